//! `RuntimeConfig`: the one per-process value assembled from CLI flags plus
//! environment, threaded explicitly through the call graph rather than kept
//! as a singleton (`SPEC_FULL.md` §3 "RuntimeConfig").

use std::collections::HashSet;
use std::io::Read;
use std::path::PathBuf;

use flowctl_core::model::{ProviderRef, WorkflowGraph};

use crate::cli::Cli;

/// Assembled once per invocation; `run`/`list-workflows`/`serve` each read
/// the slice of it they need.
pub struct RuntimeConfig {
    pub config_dir: PathBuf,
    pub log_level: String,
    pub color: bool,
}

impl RuntimeConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        let log_level = cli
            .log_level
            .clone()
            .unwrap_or_else(|| if cli.verbose { "verbose".into() } else { "info".into() });

        Self {
            config_dir: cli.config.clone(),
            log_level,
            color: !cli.no_color,
        }
    }
}

/// Installs the `tracing_subscriber::fmt` layer at the level resolved by
/// `RuntimeConfig` (`spec.md` §4.6 precedence rule: explicit `--log-level` >
/// `--verbose` > workflow `logging:` > `info`). The workflow-level fallback
/// is applied later, by `cmd_run`, since it isn't known until the workflow
/// is loaded.
pub fn init_tracing(log_level: &str) {
    let level = match log_level {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "step" | "info" => tracing::Level::INFO,
        "debug" => tracing::Level::DEBUG,
        "verbose" => tracing::Level::TRACE,
        other => {
            eprintln!("unrecognized log level '{other}', defaulting to info");
            tracing::Level::INFO
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Reads `--input-data`, falling back to stdin when absent (`spec.md` §6
/// "run --workflow <name> [--input-data <s> | stdin]").
pub fn resolve_input(input_data: Option<String>) -> std::io::Result<String> {
    match input_data {
        Some(value) => Ok(value),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf.trim_end().to_string())
        }
    }
}

/// Applies `--provider`/`--model` and `--servers`/`--skills` overrides onto
/// the workflow's `ExecutionContext` (`spec.md` §6 "Flags recognized").
/// A CLI-level concern only — it mutates a loaded, already-validated graph
/// rather than feeding back into the loader.
pub fn apply_cli_overrides(
    mut graph: WorkflowGraph,
    provider: Option<String>,
    model: Option<String>,
    servers: Vec<String>,
    skills: Vec<String>,
) -> WorkflowGraph {
    if let (Some(provider), Some(model)) = (&provider, &model) {
        graph.execution.provider = Some(ProviderRef {
            provider: provider.clone(),
            model: model.clone(),
            temperature: None,
            max_tokens: None,
            timeout_secs: None,
        });
        graph.execution.providers.clear();
    }
    if !servers.is_empty() {
        graph.execution.servers = servers;
    }
    if !skills.is_empty() {
        graph.execution.skills = skills;
    }
    graph
}

/// Every step name transitively required to compute `name`, including `name`
/// itself, walking `needs` backward via `WorkflowGraph::transitive_predecessors`.
fn ancestors_closure(graph: &WorkflowGraph, name: &str) -> HashSet<String> {
    let mut set: HashSet<String> = graph.transitive_predecessors(name).into_iter().collect();
    set.insert(name.to_string());
    set
}

/// Every step name transitively depending on `name` (directly or through a
/// chain of `needs`), including `name` itself.
fn descendants_closure(graph: &WorkflowGraph, name: &str) -> HashSet<String> {
    let mut set = HashSet::new();
    set.insert(name.to_string());
    loop {
        let mut grew = false;
        for step in &graph.steps {
            if set.contains(&step.name) {
                continue;
            }
            if step.needs.iter().any(|n| set.contains(n)) {
                set.insert(step.name.clone());
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }
    set
}

/// Restricts `graph` to the steps between `start_from` and `end_at`
/// (`spec.md` §6 "`--start-from`, `--end-at`"): only steps reachable forward
/// from `start_from` AND backward from `end_at` survive; a retained step's
/// `needs` list is pruned of any name that didn't survive, so the scheduler
/// never waits on a step that was filtered out.
pub fn apply_step_range(
    mut graph: WorkflowGraph,
    start_from: Option<&str>,
    end_at: Option<&str>,
) -> Result<WorkflowGraph, String> {
    if let Some(name) = start_from {
        if graph.step(name).is_none() {
            return Err(format!("--start-from references unknown step '{name}'"));
        }
    }
    if let Some(name) = end_at {
        if graph.step(name).is_none() {
            return Err(format!("--end-at references unknown step '{name}'"));
        }
    }

    let allowed: Option<HashSet<String>> = match (start_from, end_at) {
        (None, None) => None,
        (Some(s), None) => Some(descendants_closure(&graph, s)),
        (None, Some(e)) => Some(ancestors_closure(&graph, e)),
        (Some(s), Some(e)) => {
            let forward = descendants_closure(&graph, s);
            let backward = ancestors_closure(&graph, e);
            Some(forward.intersection(&backward).cloned().collect())
        }
    };

    if let Some(allowed) = allowed {
        graph.steps.retain(|s| allowed.contains(&s.name));
        for step in &mut graph.steps {
            step.needs.retain(|n| allowed.contains(n));
        }
    }

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowctl_core::model::{ExecutionContext, RunSpec, Step, StepMode};

    fn step(name: &str, needs: &[&str]) -> Step {
        Step {
            name: name.to_string(),
            execution_order: None,
            declaration_index: 0,
            needs: needs.iter().map(|s| s.to_string()).collect(),
            if_guard: None,
            provider: None,
            providers: Vec::new(),
            servers: Vec::new(),
            skills: Vec::new(),
            timeout_secs: None,
            max_iterations: Step::DEFAULT_MAX_ITERATIONS,
            mode: StepMode::Run(RunSpec { prompt: "x".into(), system_prompt: None }),
        }
    }

    fn chain_graph() -> WorkflowGraph {
        WorkflowGraph {
            name: "g".into(),
            version: "1".into(),
            description: None,
            execution: ExecutionContext::default(),
            env: Default::default(),
            steps: vec![step("a", &[]), step("b", &["a"]), step("c", &["b"]), step("d", &["c"])],
        }
    }

    #[test]
    fn start_from_keeps_step_and_descendants() {
        let graph = apply_step_range(chain_graph(), Some("b"), None).unwrap();
        let names: Vec<_> = graph.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "d"]);
    }

    #[test]
    fn end_at_keeps_step_and_ancestors() {
        let graph = apply_step_range(chain_graph(), None, Some("c")).unwrap();
        let names: Vec<_> = graph.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn start_from_and_end_at_intersect() {
        let graph = apply_step_range(chain_graph(), Some("b"), Some("c")).unwrap();
        let names: Vec<_> = graph.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn unknown_step_name_is_rejected() {
        assert!(apply_step_range(chain_graph(), Some("nope"), None).is_err());
    }
}
