//! The capability surface every provider backend implements
//! (`spec.md` §4.3 "Provider abstraction"). Callers in `flowctl-engine` only
//! ever see this trait, never a concrete transcript format.

use async_trait::async_trait;

use crate::{
    error::Result,
    types::{CompletionRequest, CompletionResponse},
};

#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// The provider name this client was configured for (e.g. `"openai"`),
    /// used for error attribution and the `provider_used` step record field.
    fn name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    async fn embed(&self, input: &str) -> Result<Vec<f32>>;
}
