//! `iterate`: runs a child workflow once per item from a list, with bounded
//! concurrency (`spec.md` §4.5 "Iterate"). Grounded in the teacher's
//! `MultiAgentNode::execute_parallel()` worker-pool fan-out, adapted to a
//! borrowed, non-`'static` execution context.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use flowctl_core::model::{IterateSpec, ItemErrorPolicy, Step};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::executor::{build_child_input, StepContext};

/// Resolves `items_source` into a JSON array of items (`spec.md` §4.5
/// "items_source"): a literal `[...]` JSON array, a `file://` path to one, or
/// an `http(s)://` URL returning one.
async fn resolve_items(ctx: &StepContext<'_>, items_source: &str) -> Result<Vec<Value>> {
    let resolved = ctx.variables.interpolate(items_source)?;
    let trimmed = resolved.trim();

    let raw = if let Some(path) = trimmed.strip_prefix("file://") {
        let path = if std::path::Path::new(path).is_absolute() {
            std::path::PathBuf::from(path)
        } else {
            ctx.config_dir.join(path)
        };
        tokio::fs::read_to_string(&path)
            .await
            .map_err(flowctl_core::error::CoreError::from)?
    } else if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        reqwest::get(trimmed)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EngineError::StepFailed {
                step: "iterate".into(),
                message: format!("failed to fetch items_source '{trimmed}': {e}"),
            })?
            .text()
            .await
            .map_err(|e| EngineError::StepFailed {
                step: "iterate".into(),
                message: format!("failed to read items_source response body: {e}"),
            })?
    } else {
        trimmed.to_string()
    };

    let items: Vec<Value> = serde_json::from_str(&raw).map_err(flowctl_core::error::CoreError::from)?;
    Ok(items)
}

struct LiveStats {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

/// Runs the child workflow for every resolved item, up to `max_workers`
/// concurrently, and returns the step's plain-string output.
pub async fn run_iterate(ctx: &StepContext<'_>, step: &Step, spec: &IterateSpec) -> Result<String> {
    let items = resolve_items(ctx, &spec.items_source).await?;
    let max_workers = spec.max_workers.max(1);
    let stats = LiveStats {
        succeeded: AtomicUsize::new(0),
        failed: AtomicUsize::new(0),
    };

    let mut results: Vec<Option<String>> = vec![None; items.len()];
    let mut halted = false;

    let total_timeout = spec.total_timeout_secs.map(Duration::from_secs);
    let run_all = async {
        let mut in_flight = FuturesUnordered::new();
        let mut next_idx = 0usize;

        loop {
            while !halted && in_flight.len() < max_workers && next_idx < items.len() {
                let idx = next_idx;
                next_idx += 1;
                let item = items[idx].clone();
                in_flight.push(run_one_item(ctx, step, spec, idx, item, items.len(), &stats));
            }

            if in_flight.is_empty() {
                break;
            }

            let (idx, outcome) = in_flight.next().await.expect("checked non-empty above");
            match outcome {
                Ok(output) => {
                    stats.succeeded.fetch_add(1, Ordering::Relaxed);
                    results[idx] = Some(output);
                }
                Err(err) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    if spec.on_failure == ItemErrorPolicy::Halt {
                        halted = true;
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    };

    match total_timeout {
        Some(timeout) => tokio::time::timeout(timeout, run_all)
            .await
            .map_err(|_| EngineError::StepFailed {
                step: step.name.clone(),
                message: "iterate exceeded total_timeout_secs".into(),
            })??,
        None => run_all.await?,
    }

    let succeeded = stats.succeeded.load(Ordering::Relaxed);
    let failed = stats.failed.load(Ordering::Relaxed);
    let attempted = succeeded + failed;

    if let Some(min_rate) = spec.min_success_rate {
        let actual = if attempted == 0 { 0.0 } else { succeeded as f64 / attempted as f64 };
        if actual < min_rate {
            return Err(EngineError::LoopSuccessRateUnmet {
                step: step.name.clone(),
                actual,
                required: min_rate,
            });
        }
    }

    ctx.variables.set("loop.count", attempted.to_string());
    ctx.variables.set("loop.stats.succeeded", succeeded.to_string());
    ctx.variables.set("loop.stats.failed", failed.to_string());

    let outputs: Vec<String> = results.into_iter().flatten().collect();
    let combined = Value::Array(outputs.iter().map(|s| Value::String(s.clone())).collect()).to_string();
    ctx.variables.set("loop.history", combined.clone());

    if let Some(accumulate_as) = &spec.accumulate {
        ctx.variables.set(accumulate_as.clone(), combined.clone());
    }

    Ok(combined)
}

async fn run_one_item(
    ctx: &StepContext<'_>,
    step: &Step,
    spec: &IterateSpec,
    idx: usize,
    item: Value,
    total_items: usize,
    stats: &LiveStats,
) -> (usize, Result<String>) {
    let attempt_once = || async {
        let input = build_child_input(Some(&item), &spec.with, ctx.variables)?;
        let graph = flowctl_core::loader::load_by_name(ctx.config_dir, &spec.workflow, ctx.catalog)?;

        let extra_seed = vec![
            ("item".to_string(), item.to_string()),
            ("index".to_string(), idx.to_string()),
            ("loop.index".to_string(), idx.to_string()),
            ("loop.current".to_string(), item.to_string()),
            ("loop.count".to_string(), total_items.to_string()),
            (
                "loop.stats.succeeded".to_string(),
                stats.succeeded.load(Ordering::Relaxed).to_string(),
            ),
            (
                "loop.stats.failed".to_string(),
                stats.failed.load(Ordering::Relaxed).to_string(),
            ),
        ];
        let run = crate::orchestrator::run_workflow_with_seed(
            &graph,
            ctx.catalog,
            ctx.config_dir,
            input,
            &extra_seed,
            ctx.cancellation.clone(),
        );

        let result = match spec.timeout_per_item_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), run)
                .await
                .map_err(|_| EngineError::LoopItemFailed {
                    step: step.name.clone(),
                    item: idx.to_string(),
                    message: "timeout_per_item_secs exceeded".into(),
                })??,
            None => run.await?,
        };

        if !result.succeeded() {
            return Err(EngineError::LoopItemFailed {
                step: step.name.clone(),
                item: idx.to_string(),
                message: result.summary,
            });
        }

        ctx.variables.set("loop.last.output", result.final_output.clone());
        Ok::<String, EngineError>(result.final_output)
    };

    let mut attempts_left = if spec.on_failure == ItemErrorPolicy::Retry {
        spec.max_retries + 1
    } else {
        1
    };

    loop {
        match attempt_once().await {
            Ok(output) => return (idx, Ok(output)),
            Err(err) => {
                attempts_left -= 1;
                if attempts_left == 0 {
                    return (idx, Err(err));
                }
                if spec.retry_delay_secs > 0 {
                    tokio::time::sleep(Duration::from_secs(spec.retry_delay_secs)).await;
                }
            }
        }
    }
}
