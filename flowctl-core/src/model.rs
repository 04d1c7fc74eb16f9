//! The workflow domain model: `WorkflowGraph`, `Step`, `ExecutionContext`,
//! `RunResult`, and the MCP `ToolDescriptor` naming convention (`spec.md` §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A directed acyclic graph of steps, ready for execution without further
/// normalization. Produced by [`crate::loader::load`].
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub execution: ExecutionContext,
    pub env: HashMap<String, String>,
    /// Steps in scheduling order: sorted by `execution_order` when any step sets
    /// one, declaration order otherwise (`spec.md` §4.1 step d).
    pub steps: Vec<Step>,
}

impl WorkflowGraph {
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Direct predecessors of `name` per its `needs` list.
    pub fn predecessors(&self, name: &str) -> Vec<&str> {
        self.step(name)
            .map(|s| s.needs.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Every step transitively reachable through `needs`, including indirect
    /// ancestors, used by the loader's variable-reference validation.
    pub fn transitive_predecessors(&self, name: &str) -> Vec<String> {
        let mut seen = Vec::new();
        let mut stack: Vec<String> = self.predecessors(name).into_iter().map(String::from).collect();
        while let Some(next) = stack.pop() {
            if seen.contains(&next) {
                continue;
            }
            stack.extend(self.predecessors(&next).into_iter().map(String::from));
            seen.push(next);
        }
        seen
    }
}

/// Error policy applied by the orchestrator when a step fails in parallel mode
/// (`spec.md` §4.2 "Error policy").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    #[default]
    CancelAll,
    CompleteRunning,
    Continue,
}

/// Workflow-level defaults, inherited by every step unless overridden
/// (`spec.md` §3 "ExecutionContext").
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub provider: Option<ProviderRef>,
    pub providers: Vec<ProviderRef>,
    pub servers: Vec<String>,
    pub skills: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub logging: Option<String>,
    pub parallel: bool,
    pub max_workers: usize,
    pub on_error: ErrorPolicy,
}

impl ExecutionContext {
    /// `provider+model` and `providers[]` are mutually exclusive.
    pub fn validate(&self) -> Result<(), String> {
        if self.provider.is_some() && !self.providers.is_empty() {
            return Err("execution.provider and execution.providers are mutually exclusive".into());
        }
        Ok(())
    }
}

/// One entry of a failover chain: `(provider, model, overrides)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderRef {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// One node of the workflow DAG (`spec.md` §3 "Step").
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub execution_order: Option<i64>,
    pub declaration_index: usize,
    pub needs: Vec<String>,
    pub if_guard: Option<String>,
    pub provider: Option<ProviderRef>,
    pub providers: Vec<ProviderRef>,
    pub servers: Vec<String>,
    pub skills: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub max_iterations: u32,
    pub mode: StepMode,
}

impl Step {
    pub const DEFAULT_MAX_ITERATIONS: u32 = 25;
}

/// Exactly one mode payload per step (`spec.md` §4.3).
#[derive(Debug, Clone)]
pub enum StepMode {
    Run(RunSpec),
    Template(TemplateSpec),
    Embeddings(EmbeddingsSpec),
    Consensus(ConsensusSpec),
    Rag(RagSpec),
    Loop(LoopSpec),
}

impl StepMode {
    pub fn kind(&self) -> &'static str {
        match self {
            StepMode::Run(_) => "run",
            StepMode::Template(_) => "template",
            StepMode::Embeddings(_) => "embeddings",
            StepMode::Consensus(_) => "consensus",
            StepMode::Rag(_) => "rag",
            StepMode::Loop(_) => "loop",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSpec {
    pub prompt: String,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TemplateSpec {
    pub workflow: String,
    pub with: HashMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct EmbeddingsSpec {
    pub input: String,
    pub options: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusThreshold {
    Unanimous,
    Majority,
    #[serde(rename = "2/3")]
    TwoThirds,
}

#[derive(Debug, Clone)]
pub struct ConsensusExecution {
    pub provider: Option<ProviderRef>,
}

#[derive(Debug, Clone)]
pub struct ConsensusSpec {
    pub prompt: String,
    pub executions: Vec<ConsensusExecution>,
    pub threshold: ConsensusThreshold,
}

#[derive(Debug, Clone)]
pub struct RagSpec {
    pub server: String,
    pub query: String,
    pub tool: String,
}

impl RagSpec {
    pub const DEFAULT_TOOL: &'static str = "search_vectors";
}

#[derive(Debug, Clone)]
pub enum LoopSpec {
    Iterate(IterateSpec),
    Refine(RefineSpec),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorPolicy {
    Halt,
    #[default]
    Continue,
    Retry,
}

#[derive(Debug, Clone)]
pub struct IterateSpec {
    pub items_source: String,
    pub workflow: String,
    pub with: HashMap<String, Value>,
    pub max_workers: usize,
    pub on_failure: ItemErrorPolicy,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub min_success_rate: Option<f64>,
    pub timeout_per_item_secs: Option<u64>,
    pub total_timeout_secs: Option<u64>,
    pub accumulate: Option<String>,
}

impl IterateSpec {
    pub const DEFAULT_MAX_WORKERS: usize = 3;
}

#[derive(Debug, Clone)]
pub struct RefineSpec {
    pub workflow: String,
    pub with: HashMap<String, Value>,
    pub until: String,
    pub max_iterations: u32,
}

/// Status of one executed (or skipped) step (`spec.md` §3 "RunResult").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

/// Per-step record: status, output, timing, and the provider actually used
/// after failover (kept for the Gantt/summary rendering, not part of the
/// `VariableStore` — see `SPEC_FULL.md` §3 "StepRecord").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub output: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
    #[serde(default)]
    pub provider_used: Option<String>,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub tool_loop_iterations: u32,
}

/// Per-run result returned by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub workflow_name: String,
    pub final_output: String,
    pub steps: Vec<StepRecord>,
    pub summary: String,
    pub timeline: String,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        self.steps
            .iter()
            .all(|s| !matches!(s.status, StepStatus::Failed))
    }
}

/// `{type=function, function.{name, description, parameters-schema}}` descriptor
/// handed to the provider (`spec.md` §3 "ToolDescriptor").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    #[serde(rename = "type")]
    pub kind: ToolDescriptorKind,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolDescriptorKind {
    Function,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Replaces `.`, ` `, `-` with `_` (`spec.md` §3 "ToolDescriptor").
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c == '.' || c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// Rewrites an incoming MCP tool name to its provider-safe, prefixed form:
/// `sanitize(server)_sanitize(tool)`.
pub fn prefix_tool_name(server: &str, tool: &str) -> String {
    format!("{}_{}", sanitize(server), sanitize(tool))
}

/// Strips the sanitized server prefix from a prefixed tool name, given the
/// server name that produced it. Returns `None` if `prefixed` does not start
/// with that server's prefix.
pub fn unprefix_tool_name(prefixed: &str, server: &str) -> Option<String> {
    let marker = format!("{}_", sanitize(server));
    prefixed.strip_prefix(&marker).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_reserved_chars() {
        assert_eq!(sanitize("my.server-name one"), "my_server_name_one");
    }

    #[test]
    fn prefix_unprefix_round_trips() {
        let prefixed = prefix_tool_name("calc_server", "add_numbers");
        assert_eq!(prefixed, "calc_server_add_numbers");
        assert_eq!(
            unprefix_tool_name(&prefixed, "calc_server"),
            Some("add_numbers".to_string())
        );
    }

    #[test]
    fn execution_context_rejects_both_provider_forms() {
        let ctx = ExecutionContext {
            provider: Some(ProviderRef {
                provider: "openai".into(),
                model: "gpt-4o".into(),
                temperature: None,
                max_tokens: None,
                timeout_secs: None,
            }),
            providers: vec![ProviderRef {
                provider: "anthropic".into(),
                model: "claude".into(),
                temperature: None,
                max_tokens: None,
                timeout_secs: None,
            }],
            ..Default::default()
        };
        assert!(ctx.validate().is_err());
    }
}
