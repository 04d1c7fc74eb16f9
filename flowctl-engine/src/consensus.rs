//! Fan-out + threshold agreement for `consensus` mode steps (`spec.md` §4.3.4).

use flowctl_core::model::{ConsensusExecution, ConsensusSpec, ConsensusThreshold, ExecutionContext, Step};
use flowctl_providers::{failover::FailoverChain, types::Message};
use futures::future::join_all;

use crate::error::{EngineError, Result};

/// One execution's outcome: `Ok(text)` on success, `Err` on a failed call
/// ("no vote", per `spec.md` §4.3.4).
type ExecutionOutcome = std::result::Result<String, String>;

pub async fn run_consensus(
    catalog: &flowctl_core::config::ConfigCatalog,
    step: &Step,
    execution: &ExecutionContext,
    spec: &ConsensusSpec,
    prompt: &str,
) -> Result<String> {
    let futures = spec.executions.iter().map(|exec| {
        run_one_execution(catalog, step, execution, exec, prompt)
    });
    let outcomes: Vec<ExecutionOutcome> = join_all(futures).await;

    let votes: Vec<String> = outcomes
        .iter()
        .filter_map(|o| o.as_ref().ok())
        .map(|v| v.clone())
        .collect();

    agree(&votes, spec.threshold, spec.executions.len()).ok_or_else(|| {
        EngineError::StepFailed {
            step: step.name.clone(),
            message: "consensus-not-reached".to_string(),
        }
    })
}

async fn run_one_execution(
    catalog: &flowctl_core::config::ConfigCatalog,
    step: &Step,
    execution: &ExecutionContext,
    exec: &ConsensusExecution,
    prompt: &str,
) -> ExecutionOutcome {
    let chain = match &exec.provider {
        Some(provider_ref) => FailoverChain::resolve_single(provider_ref.clone()),
        None => FailoverChain::resolve(step, execution).map_err(|e| e.to_string())?,
    };

    let messages = vec![Message::user(prompt.to_string())];
    chain
        .complete(catalog, &messages, &[], step.timeout_secs)
        .await
        .map(|(response, _, _)| response.content)
        .map_err(|e| e.to_string())
}

/// `unanimous`: every vote (case-insensitive, trimmed) equal. `majority`:
/// strict majority `⌊N/2⌋+1` share a value. `2/3`: at least `⌈2N/3⌉` share a
/// value. Returns the agreed value in its original casing.
fn agree(votes: &[String], threshold: ConsensusThreshold, total_executions: usize) -> Option<String> {
    if votes.is_empty() {
        return None;
    }

    let normalize = |v: &str| v.trim().to_lowercase();

    match threshold {
        ConsensusThreshold::Unanimous => {
            let first_normalized = normalize(&votes[0]);
            if votes.iter().all(|v| normalize(v) == first_normalized) {
                Some(votes[0].clone())
            } else {
                None
            }
        }
        ConsensusThreshold::Majority => {
            let required = total_executions / 2 + 1;
            most_common(votes, required, normalize)
        }
        ConsensusThreshold::TwoThirds => {
            let required = (2 * total_executions).div_ceil(3);
            most_common(votes, required, normalize)
        }
    }
}

fn most_common(votes: &[String], required: usize, normalize: impl Fn(&str) -> String) -> Option<String> {
    let mut counts: Vec<(String, String, usize)> = Vec::new();
    for vote in votes {
        let key = normalize(vote);
        if let Some(entry) = counts.iter_mut().find(|(k, _, _)| *k == key) {
            entry.2 += 1;
        } else {
            counts.push((key, vote.clone(), 1));
        }
    }
    counts
        .into_iter()
        .find(|(_, _, count)| *count >= required)
        .map(|(_, original, _)| original)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unanimous_requires_every_vote_equal() {
        let votes = vec!["YES".to_string(), "yes".to_string(), " Yes ".to_string()];
        assert_eq!(agree(&votes, ConsensusThreshold::Unanimous, 3), Some("YES".to_string()));
    }

    #[test]
    fn unanimous_fails_on_disagreement() {
        let votes = vec!["YES".to_string(), "NO".to_string()];
        assert_eq!(agree(&votes, ConsensusThreshold::Unanimous, 2), None);
    }

    #[test]
    fn majority_needs_strict_majority_of_total() {
        let votes = vec!["YES".to_string(), "YES".to_string(), "NO".to_string()];
        assert_eq!(agree(&votes, ConsensusThreshold::Majority, 3), Some("YES".to_string()));
    }

    #[test]
    fn two_thirds_threshold() {
        let votes = vec!["YES".to_string(), "YES".to_string(), "NO".to_string()];
        assert_eq!(agree(&votes, ConsensusThreshold::TwoThirds, 3), Some("YES".to_string()));
    }

    #[test]
    fn two_thirds_fails_when_unreachable() {
        let votes = vec!["YES".to_string(), "NO".to_string(), "MAYBE".to_string()];
        assert_eq!(agree(&votes, ConsensusThreshold::TwoThirds, 3), None);
    }
}
