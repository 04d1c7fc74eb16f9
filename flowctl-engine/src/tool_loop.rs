//! The LLM ↔ MCP tool-call loop driving `run` mode steps
//! (`spec.md` §4.3.1 "run mode").
//!
//! Each turn asks the failover chain for a completion; if the model requests
//! tool calls, each is validated against its tool's JSON schema, dispatched to
//! the owning MCP connection, and the result fed back as a `tool` message.
//! The loop ends when a turn produces no tool calls or `max_iterations` turns
//! have elapsed.

use std::sync::Arc;

use flowctl_core::model::{Step, ToolDescriptor};
use flowctl_mcp::client::McpClient;
use flowctl_providers::{
    failover::FailoverChain,
    types::{Message, ToolCall},
};

use crate::error::{EngineError, Result};
use crate::executor::StepContext;

/// One entry per server the step can reach: its full tool list, plus the live
/// connection used to dispatch calls back to it.
type ToolIndex = Vec<(String, Arc<McpClient>)>;

/// Starts (or reuses) every server a step names and assembles the combined
/// tool catalog the provider sees.
pub async fn collect_tools(ctx: &StepContext<'_>, servers: &[String]) -> Result<(Vec<ToolDescriptor>, ToolIndex)> {
    let mut tools = Vec::new();
    let mut index = Vec::with_capacity(servers.len());

    for server in servers {
        let client = ctx.mcp.get_or_start(server).await?;
        let descriptors = client.list_tools().await?;
        tools.extend(descriptors.iter().cloned());
        index.push((server.clone(), client));
    }

    Ok((tools, index))
}

/// Runs the loop, returning `(final_text, iterations_used, provider, model)`.
pub async fn run(
    ctx: &StepContext<'_>,
    step: &Step,
    chain: &FailoverChain,
    tool_index: &ToolIndex,
    tools: &[ToolDescriptor],
    mut messages: Vec<Message>,
) -> Result<(String, u32, String, String)> {
    let mut provider_used = String::new();
    let mut model_used = String::new();
    let mut last_content = String::new();

    for iteration in 1..=step.max_iterations {
        if ctx.cancellation.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let (response, provider, model) = chain.complete(ctx.catalog, &messages, tools, step.timeout_secs).await?;
        provider_used = provider;
        model_used = model;
        last_content = response.content.clone();

        if !response.wants_tool_calls() {
            return Ok((response.content, iteration, provider_used, model_used));
        }

        messages.push(Message::assistant_with_tool_calls(
            response.content.clone(),
            response.tool_calls.clone(),
        ));

        for call in &response.tool_calls {
            let result_text = dispatch_tool_call(tool_index, tools, call).await?;
            messages.push(Message::tool_result(call.id.clone(), result_text));
        }
    }

    if last_content.is_empty() {
        last_content = format!("tool loop stopped after max_iterations ({})", step.max_iterations);
    }
    Ok((last_content, step.max_iterations, provider_used, model_used))
}

/// Validates arguments against the tool's declared schema, then dispatches to
/// whichever connected server exposes it. A hard transport failure fails the
/// step (`?`); everything else — schema mismatch, tool-semantic error, an
/// unknown tool name — becomes text fed back to the model, per the default
/// policy of `spec.md` §4.4 "Tool invocation".
async fn dispatch_tool_call(tool_index: &ToolIndex, tools: &[ToolDescriptor], call: &ToolCall) -> Result<String> {
    if let Some(descriptor) = tools.iter().find(|t| t.function.name == call.name) {
        if let Ok(validator) = jsonschema::validator_for(&descriptor.function.parameters) {
            if !validator.is_valid(&call.arguments) {
                return Ok(format!(
                    "error: arguments for tool '{}' do not match its schema",
                    call.name
                ));
            }
        }
    }

    for (server, client) in tool_index {
        let Some(original) = client.original_tool_name(&call.name).await else {
            continue;
        };

        return match client.call_tool(&original, call.arguments.clone()).await {
            Ok(outcome) => Ok(outcome.text),
            Err(err) if err.is_hard_transport_failure() => Err(EngineError::from(err)),
            Err(err) => Ok(format!("error calling '{}' on '{server}': {err}", call.name)),
        };
    }

    Ok(format!("error: no connected server exposes tool '{}'", call.name))
}
