//! Resolves the ordered list of `(provider, model)` attempts a step falls
//! back across, and drives the attempts themselves
//! (`spec.md` §4.3 "Provider resolution", "Failover").

use std::time::Duration;

use flowctl_core::{
    config::ConfigCatalog,
    model::{ExecutionContext, ProviderRef, Step},
};

use crate::{
    client::ProviderClient,
    error::{ProviderError, Result},
    factory::build_client,
    types::{CompletionRequest, CompletionResponse, Message},
};
use flowctl_core::model::ToolDescriptor;

/// The ordered chain a step falls back across. Step-level provider settings
/// fully replace workflow-level ones; the two are never merged, matching
/// `ExecutionContext::validate`'s mutual-exclusivity of `provider`/`providers`.
pub struct FailoverChain {
    refs: Vec<ProviderRef>,
}

impl FailoverChain {
    pub fn resolve(step: &Step, execution: &ExecutionContext) -> Result<Self> {
        let refs = if !step.providers.is_empty() {
            step.providers.clone()
        } else if let Some(provider) = &step.provider {
            vec![provider.clone()]
        } else if !execution.providers.is_empty() {
            execution.providers.clone()
        } else if let Some(provider) = &execution.provider {
            vec![provider.clone()]
        } else {
            return Err(ProviderError::Rejected {
                provider: "<none>".to_string(),
                message: "no provider configured at step or workflow level".to_string(),
            });
        };
        Ok(Self { refs })
    }

    /// A chain of exactly one provider, used when a caller (e.g. a consensus
    /// execution) already knows which provider/model to use and does not
    /// want step/workflow-level fallback.
    pub fn resolve_single(provider_ref: ProviderRef) -> Self {
        Self { refs: vec![provider_ref] }
    }

    /// The first entry of the chain, used by callers (e.g. `embeddings` mode)
    /// that need a single `(provider, model)` pair rather than a completion.
    pub fn primary(&self) -> &ProviderRef {
        &self.refs[0]
    }

    /// Tries each provider in order, bounding every attempt by the narrower
    /// of that provider's own `timeout_secs` and `step_timeout`. Stops at the
    /// first terminal (non-retryable) error; otherwise falls through to the
    /// next entry, returning `Exhausted` if every entry is retryably
    /// unavailable.
    pub async fn complete(
        &self,
        catalog: &ConfigCatalog,
        messages: &[Message],
        tools: &[ToolDescriptor],
        step_timeout: Option<u64>,
    ) -> Result<(CompletionResponse, String, String)> {
        let mut attempts = Vec::new();

        for provider_ref in &self.refs {
            let client: std::sync::Arc<dyn ProviderClient> = match build_client(catalog, &provider_ref.provider) {
                Ok(c) => c,
                Err(err) => {
                    attempts.push(format!("{}: {err}", provider_ref.provider));
                    continue;
                }
            };

            let request = CompletionRequest {
                model: provider_ref.model.clone(),
                messages: messages.to_vec(),
                tools: tools.to_vec(),
                temperature: provider_ref.temperature,
                max_tokens: provider_ref.max_tokens,
            };

            let deadline = [provider_ref.timeout_secs, step_timeout]
                .into_iter()
                .flatten()
                .min();

            let outcome = match deadline {
                Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), client.complete(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout {
                        provider: provider_ref.provider.clone(),
                        timeout_secs: secs,
                    }),
                },
                None => client.complete(request).await,
            };

            match outcome {
                Ok(response) => {
                    return Ok((response, provider_ref.provider.clone(), provider_ref.model.clone()))
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    attempts.push(format!("{}: {err}", provider_ref.provider));
                    if !retryable {
                        return Err(err);
                    }
                }
            }
        }

        Err(ProviderError::Exhausted {
            attempts: attempts.join("; "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowctl_core::model::ProviderRef;

    fn provider_ref(provider: &str, model: &str) -> ProviderRef {
        ProviderRef {
            provider: provider.to_string(),
            model: model.to_string(),
            temperature: None,
            max_tokens: None,
            timeout_secs: None,
        }
    }

    #[test]
    fn step_providers_take_precedence_over_workflow_providers() {
        let step = Step {
            name: "s".into(),
            execution_order: None,
            declaration_index: 0,
            needs: vec![],
            if_guard: None,
            provider: None,
            providers: vec![provider_ref("openai", "gpt-4o")],
            servers: vec![],
            skills: vec![],
            timeout_secs: None,
            max_iterations: Step::DEFAULT_MAX_ITERATIONS,
            mode: flowctl_core::model::StepMode::Run(flowctl_core::model::RunSpec {
                prompt: "hi".into(),
                system_prompt: None,
            }),
        };
        let execution = ExecutionContext {
            providers: vec![provider_ref("anthropic", "claude")],
            ..Default::default()
        };
        let chain = FailoverChain::resolve(&step, &execution).unwrap();
        assert_eq!(chain.refs.len(), 1);
        assert_eq!(chain.refs[0].provider, "openai");
    }

    #[test]
    fn missing_provider_everywhere_is_rejected() {
        let step = Step {
            name: "s".into(),
            execution_order: None,
            declaration_index: 0,
            needs: vec![],
            if_guard: None,
            provider: None,
            providers: vec![],
            servers: vec![],
            skills: vec![],
            timeout_secs: None,
            max_iterations: Step::DEFAULT_MAX_ITERATIONS,
            mode: flowctl_core::model::StepMode::Run(flowctl_core::model::RunSpec {
                prompt: "hi".into(),
                system_prompt: None,
            }),
        };
        let execution = ExecutionContext::default();
        assert!(FailoverChain::resolve(&step, &execution).is_err());
    }
}
