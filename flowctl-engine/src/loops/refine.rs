//! `refine`: re-runs a child workflow sequentially, seeding `iteration` and
//! `loop.last.output`/`loop.history`, until `until:` evaluates truthy or
//! `max_iterations` is reached (`spec.md` §4.5 "Refine").

use flowctl_core::model::{RefineSpec, Step};
use flowctl_core::variables::VariableStore;
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::executor::{build_child_input, StepContext};
use crate::orchestrator::evaluate_truthiness;

/// Runs the child workflow up to `max_iterations` times, stopping as soon as
/// `until:` evaluates truthy against the loop's own scratch variables
/// (`loop.last.output`, `loop.iteration` — `SPEC_FULL.md` §9 Open Question
/// resolution: `until:` only ever sees that loop-local state, not the parent
/// run's full `VariableStore`).
pub async fn run_refine(ctx: &StepContext<'_>, step: &Step, spec: &RefineSpec) -> Result<String> {
    let mut last_output = String::new();
    let mut history: Vec<String> = Vec::new();

    for iteration in 1..=spec.max_iterations {
        if ctx.cancellation.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let input = build_child_input(None, &spec.with, ctx.variables)?;
        let graph = flowctl_core::loader::load_by_name(ctx.config_dir, &spec.workflow, ctx.catalog)?;

        let extra_seed = vec![
            ("iteration".to_string(), iteration.to_string()),
            ("loop.last.output".to_string(), last_output.clone()),
        ];
        let result = crate::orchestrator::run_workflow_with_seed(
            &graph,
            ctx.catalog,
            ctx.config_dir,
            input,
            &extra_seed,
            ctx.cancellation.clone(),
        )
        .await?;

        if !result.succeeded() {
            return Err(EngineError::ChildWorkflowFailed {
                step: step.name.clone(),
                workflow: spec.workflow.clone(),
                message: result.summary,
            });
        }

        last_output = result.final_output;
        history.push(last_output.clone());
        ctx.variables.set("loop.last.output", last_output.clone());

        let scratch = VariableStore::new();
        scratch.set("loop.last.output", last_output.clone());
        scratch.set("loop.iteration", iteration.to_string());
        if evaluate_truthiness(&spec.until, &scratch)? {
            break;
        }
    }

    ctx.variables.set("loop.count", history.len().to_string());
    ctx.variables.set(
        "loop.history",
        Value::Array(history.iter().map(|s| Value::String(s.clone())).collect()).to_string(),
    );

    Ok(last_output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn until_condition_reads_loop_scratch_state() {
        let scratch = VariableStore::new();
        scratch.set("loop.last.output", "done");
        scratch.set("loop.iteration", "3");
        scratch.set("loop.done", "true");
        assert!(evaluate_truthiness("{{loop.done}}", &scratch).unwrap());
    }

    #[test]
    fn until_condition_defaults_false_when_not_affirmative() {
        let scratch = VariableStore::new();
        scratch.set("loop.done", "false");
        assert!(!evaluate_truthiness("{{loop.done}}", &scratch).unwrap());
    }
}
