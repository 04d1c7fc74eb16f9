//! The DAG scheduler: sequential or parallel execution, conditional guards,
//! layered timeouts, cancellation, and the `error_policy` that decides what
//! happens to the rest of the graph once a step fails (`spec.md` §4.2
//! "Orchestrator"). Grounded in the teacher's `AdvancedFlow::execute()` step
//! loop and `MultiAgentNode::execute_parallel()` worker fan-out.

use std::{
    collections::HashMap,
    path::Path,
    time::{Duration, Instant},
};

use chrono::Utc;
use flowctl_core::{
    config::ConfigCatalog,
    error::CoreError,
    model::{ErrorPolicy, RunResult, Step, StepRecord, StepStatus, WorkflowGraph},
    variables::VariableStore,
};
use flowctl_mcp::registry::McpServerRegistry;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{EngineError, Result},
    executor::{self, StepContext, StepRunOutcome},
    observability,
};

/// Runs `graph` to completion with no extra seed variables beyond `input`.
pub async fn run_workflow(
    graph: &WorkflowGraph,
    catalog: &ConfigCatalog,
    config_dir: &Path,
    input: impl Into<String>,
    cancellation: CancellationToken,
) -> Result<RunResult> {
    run_workflow_with_seed(graph, catalog, config_dir, input, &[], cancellation).await
}

/// Runs `graph` to completion, additionally seeding `extra_seed` into the
/// fresh `VariableStore` before any step executes. Used by the loop drivers
/// to expose `item`/`index`/`iteration`/`loop.*` to a child workflow
/// (`spec.md` §4.5 "Iterate", "Refine").
pub async fn run_workflow_with_seed(
    graph: &WorkflowGraph,
    catalog: &ConfigCatalog,
    config_dir: &Path,
    input: impl Into<String>,
    extra_seed: &[(String, String)],
    cancellation: CancellationToken,
) -> Result<RunResult> {
    graph.execution.validate().map_err(CoreError::schema_invalid)?;

    let variables = VariableStore::with_input(input.into());
    for (key, value) in extra_seed {
        variables.set(key.clone(), value.clone());
    }
    let mcp = McpServerRegistry::new(catalog);

    let wall_clock_start = Instant::now();
    let mut records: Vec<StepRecord> = Vec::with_capacity(graph.steps.len());

    if graph.execution.parallel {
        run_parallel(graph, catalog, config_dir, &variables, &mcp, &mut records, &cancellation).await;
    } else {
        run_sequential(graph, catalog, config_dir, &variables, &mcp, &mut records, &cancellation).await;
    }

    mcp.stop_all().await;
    let wall_clock = wall_clock_start.elapsed();

    records.sort_by_key(|record| {
        graph
            .steps
            .iter()
            .position(|s| s.name == record.name)
            .unwrap_or(usize::MAX)
    });

    let final_output = records
        .iter()
        .rev()
        .find(|r| r.status == StepStatus::Succeeded)
        .map(|r| r.output.clone())
        .unwrap_or_default();

    let summary = observability::render_summary(&records);
    let timeline = observability::render_timeline(&records, wall_clock);

    Ok(RunResult {
        workflow_name: graph.name.clone(),
        final_output,
        steps: records,
        summary,
        timeline,
    })
}

/// Literal-string truthiness shared by `if:` guards and `until:` conditions:
/// interpolate, trim, and compare case-insensitively to `"true"`/`"yes"`
/// (`SPEC_FULL.md` §9 binding decision — no LLM-judged truthiness).
pub(crate) fn evaluate_truthiness(expr: &str, variables: &VariableStore) -> Result<bool> {
    let reduced = variables.interpolate(expr)?;
    let trimmed = reduced.trim();
    Ok(trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("yes"))
}

fn evaluate_guard(step: &Step, variables: &VariableStore) -> Result<bool> {
    match &step.if_guard {
        Some(guard) => evaluate_truthiness(guard, variables),
        None => Ok(true),
    }
}

/// Races a step's own execution against workflow cancellation and its
/// (possibly inherited) timeout. Dropping the losing branch of `select!`
/// cancels any in-flight provider/tool call (`spec.md` §4.2 "Cancellation").
async fn run_one_step(
    catalog: &ConfigCatalog,
    config_dir: &Path,
    mcp: &McpServerRegistry<'_>,
    variables: &VariableStore,
    cancellation: &CancellationToken,
    step: &Step,
    execution: &flowctl_core::model::ExecutionContext,
) -> Result<StepRunOutcome> {
    if cancellation.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let ctx = StepContext {
        catalog,
        config_dir,
        mcp,
        variables,
        cancellation,
    };
    let body = executor::execute_step(&ctx, step, execution);

    let timeout_secs = step.timeout_secs;
    let step_name = step.name.clone();
    let timed = async move {
        match timeout_secs {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), body).await {
                Ok(inner) => inner,
                Err(_) => Err(EngineError::StepTimeout { step: step_name, timeout_secs: secs }),
            },
            None => body.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancellation.cancelled() => Err(EngineError::Cancelled),
        result = timed => result,
    }
}

fn apply_error_policy(policy: ErrorPolicy, cancellation: &CancellationToken) -> bool {
    match policy {
        ErrorPolicy::CancelAll => {
            cancellation.cancel();
            true
        }
        ErrorPolicy::CompleteRunning => true,
        ErrorPolicy::Continue => false,
    }
}

async fn run_sequential(
    graph: &WorkflowGraph,
    catalog: &ConfigCatalog,
    config_dir: &Path,
    variables: &VariableStore,
    mcp: &McpServerRegistry<'_>,
    records: &mut Vec<StepRecord>,
    cancellation: &CancellationToken,
) {
    for step in &graph.steps {
        if cancellation.is_cancelled() {
            records.push(cancelled_record(step));
            continue;
        }

        match evaluate_guard(step, variables) {
            Ok(true) => {}
            Ok(false) => {
                variables.publish_skipped(&step.name);
                records.push(skipped_record(step));
                continue;
            }
            Err(err) => {
                let now = Utc::now();
                records.push(failed_record(step, &err, now, now));
                break;
            }
        }

        let started = Utc::now();
        let outcome = run_one_step(catalog, config_dir, mcp, variables, cancellation, step, &graph.execution).await;
        let finished = Utc::now();

        match outcome {
            Ok(result) => {
                variables.publish_step(&step.name, &result.output);
                records.push(success_record(step, result, started, finished));
            }
            Err(err) => {
                records.push(failed_record(step, &err, started, finished));
                break;
            }
        }
    }
}

async fn run_parallel(
    graph: &WorkflowGraph,
    catalog: &ConfigCatalog,
    config_dir: &Path,
    variables: &VariableStore,
    mcp: &McpServerRegistry<'_>,
    records: &mut Vec<StepRecord>,
    cancellation: &CancellationToken,
) {
    let max_workers = graph.execution.max_workers.max(1);
    let mut remaining: Vec<&Step> = graph.steps.iter().collect();
    let mut status: HashMap<&str, StepStatus> = HashMap::new();
    let mut in_flight = FuturesUnordered::new();
    let mut scheduling_halted = false;

    loop {
        if !scheduling_halted {
            'schedule: loop {
                if in_flight.len() >= max_workers {
                    break 'schedule;
                }

                let ready_idx = remaining.iter().position(|s| {
                    s.needs
                        .iter()
                        .all(|need| !matches!(status.get(need.as_str()), None))
                });
                let Some(idx) = ready_idx else { break 'schedule };
                let step = remaining.remove(idx);

                let unreachable = step.needs.iter().any(|n| {
                    matches!(
                        status.get(n.as_str()),
                        Some(&StepStatus::Failed) | Some(&StepStatus::Skipped) | Some(&StepStatus::Cancelled)
                    )
                });
                if unreachable {
                    variables.publish_skipped(&step.name);
                    status.insert(step.name.as_str(), StepStatus::Skipped);
                    records.push(skipped_record(step));
                    continue 'schedule;
                }

                match evaluate_guard(step, variables) {
                    Ok(true) => {}
                    Ok(false) => {
                        variables.publish_skipped(&step.name);
                        status.insert(step.name.as_str(), StepStatus::Skipped);
                        records.push(skipped_record(step));
                        continue 'schedule;
                    }
                    Err(err) => {
                        status.insert(step.name.as_str(), StepStatus::Failed);
                        let now = Utc::now();
                        records.push(failed_record(step, &err, now, now));
                        scheduling_halted |= apply_error_policy(graph.execution.on_error, cancellation);
                        continue 'schedule;
                    }
                }

                let started = Utc::now();
                let fut = run_one_step(catalog, config_dir, mcp, variables, cancellation, step, &graph.execution);
                in_flight.push(async move { (step, started, fut.await) });
            }
        }

        if in_flight.is_empty() {
            break;
        }

        let (step, started, outcome) = in_flight.next().await.expect("checked non-empty above");
        let finished = Utc::now();

        match outcome {
            Ok(result) => {
                variables.publish_step(&step.name, &result.output);
                status.insert(step.name.as_str(), StepStatus::Succeeded);
                records.push(success_record(step, result, started, finished));
            }
            Err(err) => {
                status.insert(step.name.as_str(), StepStatus::Failed);
                records.push(failed_record(step, &err, started, finished));
                scheduling_halted |= apply_error_policy(graph.execution.on_error, cancellation);
            }
        }
    }

    for step in remaining {
        if cancellation.is_cancelled() {
            records.push(cancelled_record(step));
        } else {
            variables.publish_skipped(&step.name);
            records.push(skipped_record(step));
        }
    }
}

fn success_record(step: &Step, result: StepRunOutcome, started: chrono::DateTime<Utc>, finished: chrono::DateTime<Utc>) -> StepRecord {
    StepRecord {
        name: step.name.clone(),
        status: StepStatus::Succeeded,
        output: result.output,
        started_at: started,
        finished_at: finished,
        error: None,
        provider_used: result.provider_used,
        model_used: result.model_used,
        tool_loop_iterations: result.tool_loop_iterations,
    }
}

fn failed_record(step: &Step, err: &EngineError, started: chrono::DateTime<Utc>, finished: chrono::DateTime<Utc>) -> StepRecord {
    StepRecord {
        name: step.name.clone(),
        status: StepStatus::Failed,
        output: String::new(),
        started_at: started,
        finished_at: finished,
        error: Some(format!("{}: {err}", err.code())),
        provider_used: None,
        model_used: None,
        tool_loop_iterations: 0,
    }
}

fn skipped_record(step: &Step) -> StepRecord {
    let now = Utc::now();
    StepRecord {
        name: step.name.clone(),
        status: StepStatus::Skipped,
        output: String::new(),
        started_at: now,
        finished_at: now,
        error: None,
        provider_used: None,
        model_used: None,
        tool_loop_iterations: 0,
    }
}

fn cancelled_record(step: &Step) -> StepRecord {
    let now = Utc::now();
    StepRecord {
        name: step.name.clone(),
        status: StepStatus::Cancelled,
        output: String::new(),
        started_at: now,
        finished_at: now,
        error: Some("cancelled".to_string()),
        provider_used: None,
        model_used: None,
        tool_loop_iterations: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_accepts_true_and_yes_case_insensitively() {
        let vars = VariableStore::new();
        vars.set("flag", "TRUE");
        assert!(evaluate_truthiness("{{flag}}", &vars).unwrap());
        vars.set("flag", "yes");
        assert!(evaluate_truthiness("{{flag}}", &vars).unwrap());
        vars.set("flag", "nope");
        assert!(!evaluate_truthiness("{{flag}}", &vars).unwrap());
    }

    #[test]
    fn apply_error_policy_cancels_only_on_cancel_all() {
        let token = CancellationToken::new();
        assert!(!apply_error_policy(ErrorPolicy::Continue, &token));
        assert!(!token.is_cancelled());

        let token = CancellationToken::new();
        assert!(apply_error_policy(ErrorPolicy::CompleteRunning, &token));
        assert!(!token.is_cancelled());

        let token = CancellationToken::new();
        assert!(apply_error_policy(ErrorPolicy::CancelAll, &token));
        assert!(token.is_cancelled());
    }
}
