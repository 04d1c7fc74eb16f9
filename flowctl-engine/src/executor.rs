//! Dispatches one `Step` to its mode handler (`spec.md` §4.3 "Step modes").
//!
//! Every mode eventually produces a plain-string output that the orchestrator
//! publishes to the [`VariableStore`] under `step.<name>`; nothing here knows
//! about scheduling, timeouts, or the DAG — that's [`crate::orchestrator`].

use std::{collections::HashMap, path::Path};

use flowctl_core::{
    config::ConfigCatalog,
    model::{
        EmbeddingsSpec, ExecutionContext, RagSpec, RunSpec, Step, StepMode, TemplateSpec,
    },
    variables::VariableStore,
};
use flowctl_mcp::registry::McpServerRegistry;
use flowctl_providers::{client::ProviderClient, failover::FailoverChain, types::Message};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};

/// Everything a step needs to run, borrowed for the lifetime of one
/// workflow run (`spec.md` §5 "Shared resources").
pub struct StepContext<'a> {
    pub catalog: &'a ConfigCatalog,
    pub config_dir: &'a Path,
    pub mcp: &'a McpServerRegistry<'a>,
    pub variables: &'a VariableStore,
    pub cancellation: &'a CancellationToken,
}

/// What a successfully-executed step produced, before it's wrapped into a
/// `StepRecord` by the orchestrator.
pub struct StepRunOutcome {
    pub output: String,
    pub provider_used: Option<String>,
    pub model_used: Option<String>,
    pub tool_loop_iterations: u32,
}

impl StepRunOutcome {
    fn plain(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            provider_used: None,
            model_used: None,
            tool_loop_iterations: 0,
        }
    }
}

pub async fn execute_step(
    ctx: &StepContext<'_>,
    step: &Step,
    execution: &ExecutionContext,
) -> Result<StepRunOutcome> {
    match &step.mode {
        StepMode::Run(spec) => run_mode(ctx, step, execution, spec).await,
        StepMode::Template(spec) => template_mode(ctx, step, spec).await,
        StepMode::Embeddings(spec) => embeddings_mode(ctx, step, execution, spec).await,
        StepMode::Consensus(spec) => {
            let prompt = ctx.variables.interpolate(&spec.prompt)?;
            let output = crate::consensus::run_consensus(ctx.catalog, step, execution, spec, &prompt).await?;
            Ok(StepRunOutcome::plain(output))
        }
        StepMode::Rag(spec) => rag_mode(ctx, spec).await,
        StepMode::Loop(spec) => {
            let output = match spec {
                flowctl_core::model::LoopSpec::Iterate(it) => {
                    crate::loops::iterate::run_iterate(ctx, step, it).await?
                }
                flowctl_core::model::LoopSpec::Refine(r) => {
                    crate::loops::refine::run_refine(ctx, step, r).await?
                }
            };
            Ok(StepRunOutcome::plain(output))
        }
    }
}

async fn run_mode(
    ctx: &StepContext<'_>,
    step: &Step,
    execution: &ExecutionContext,
    spec: &RunSpec,
) -> Result<StepRunOutcome> {
    let prompt = ctx.variables.interpolate(&spec.prompt)?;
    let system_prompt = spec
        .system_prompt
        .as_deref()
        .map(|s| ctx.variables.interpolate(s))
        .transpose()?;

    let mut messages = Vec::new();
    if let Some(system_prompt) = system_prompt {
        messages.push(Message::system(system_prompt));
    }
    messages.push(Message::user(prompt));

    let servers = if step.servers.is_empty() {
        &execution.servers
    } else {
        &step.servers
    };
    let (tools, tool_index) = crate::tool_loop::collect_tools(ctx, servers).await?;
    let chain = FailoverChain::resolve(step, execution)?;

    let (output, iterations, provider_used, model_used) =
        crate::tool_loop::run(ctx, step, &chain, &tool_index, &tools, messages).await?;

    Ok(StepRunOutcome {
        output,
        provider_used: Some(provider_used),
        model_used: Some(model_used),
        tool_loop_iterations: iterations,
    })
}

async fn rag_mode(ctx: &StepContext<'_>, spec: &RagSpec) -> Result<StepRunOutcome> {
    let query = ctx.variables.interpolate(&spec.query)?;
    let client = ctx.mcp.get_or_start(&spec.server).await?;
    let outcome = client
        .call_tool(&spec.tool, serde_json::json!({ "query": query }))
        .await?;
    Ok(StepRunOutcome::plain(outcome.text))
}

async fn template_mode(ctx: &StepContext<'_>, step: &Step, spec: &TemplateSpec) -> Result<StepRunOutcome> {
    let input = build_child_input(None, &spec.with, ctx.variables)?;
    let graph = flowctl_core::loader::load_by_name(ctx.config_dir, &spec.workflow, ctx.catalog)?;
    let result = crate::orchestrator::run_workflow(
        &graph,
        ctx.catalog,
        ctx.config_dir,
        input,
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

    Ok(StepRunOutcome::plain(result.final_output))
}

async fn embeddings_mode(
    ctx: &StepContext<'_>,
    step: &Step,
    execution: &ExecutionContext,
    spec: &EmbeddingsSpec,
) -> Result<StepRunOutcome> {
    let input = ctx.variables.interpolate(&spec.input)?;
    let chain = FailoverChain::resolve(step, execution)?;
    let provider_ref = chain.primary().clone();

    let client = flowctl_providers::factory::build_client(ctx.catalog, &provider_ref.provider)?;
    let vector = client.embed(&input).await?;

    Ok(StepRunOutcome {
        output: format!("embedding: {} dimensions", vector.len()),
        provider_used: Some(provider_ref.provider),
        model_used: Some(provider_ref.model),
        tool_loop_iterations: 0,
    })
}

/// Builds the JSON input passed to a child workflow invocation (`template`,
/// `iterate`, `refine`): `{"item": <elem>, ...with}` when `item` is given,
/// otherwise just the interpolated `with` map, both serialized as one JSON
/// object (`spec.md` §4.3.2 "template mode", §4.5 "loop mode").
pub(crate) fn build_child_input(
    item: Option<&Value>,
    with: &HashMap<String, Value>,
    variables: &VariableStore,
) -> Result<String> {
    let mut map = serde_json::Map::new();
    if let Some(item) = item {
        map.insert("item".to_string(), item.clone());
    }
    for (key, value) in with {
        map.insert(key.clone(), interpolate_value(value, variables)?);
    }
    Ok(Value::Object(map).to_string())
}

/// Recursively interpolates every string leaf of a JSON value against
/// `variables`, leaving numbers/bools/null untouched.
pub(crate) fn interpolate_value(value: &Value, variables: &VariableStore) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(variables.interpolate(s)?)),
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|v| interpolate_value(v, variables))
                .collect::<Result<Vec<_>>>()?,
        )),
        Value::Object(fields) => {
            let mut out = serde_json::Map::with_capacity(fields.len());
            for (k, v) in fields {
                out.insert(k.clone(), interpolate_value(v, variables)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}
