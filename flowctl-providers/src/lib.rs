//! # flowctl-providers
//!
//! The provider capability surface: a transcript-format-agnostic
//! [`client::ProviderClient`] trait, its `genai`-backed implementation, and
//! the failover chain that resolves a step's configured providers into a
//! single successful completion (`spec.md` §4.3).

pub mod client;
pub mod error;
pub mod factory;
pub mod failover;
pub mod genai_client;
pub mod types;

/// Convenient re-exports for common use.
pub mod prelude {
    pub use crate::{
        client::ProviderClient,
        error::{ProviderError, Result},
        factory::build_client,
        failover::FailoverChain,
        genai_client::GenAiProvider,
        types::{CompletionRequest, CompletionResponse, Message, Role, ToolCall},
    };
}
