//! Translates a YAML workflow document into a [`WorkflowGraph`] whose nodes are
//! ready for execution without further normalization (`spec.md` §4.1).

use std::{collections::HashMap, path::Path};

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{
    config::ConfigCatalog,
    error::{CoreError, Result},
    model::{
        ConsensusExecution, ConsensusSpec, ConsensusThreshold, EmbeddingsSpec, ErrorPolicy,
        ExecutionContext, IterateSpec, ItemErrorPolicy, LoopSpec, ProviderRef, RagSpec,
        RefineSpec, RunSpec, Step, StepMode, TemplateSpec, WorkflowGraph,
    },
    variables::{find_refs, is_builtin},
};

const SUPPORTED_SCHEMA: &str = "workflow/v2.0";

/// Loads and validates a workflow YAML file against `catalog`'s providers/servers.
pub fn load(path: &Path, catalog: &ConfigCatalog) -> Result<WorkflowGraph> {
    let text = std::fs::read_to_string(path)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    load_str(&text, dir, catalog)
}

/// Resolves `name` to `<dir>/<name>.yaml` and loads it. Used by `template` and
/// `loop` mode steps to invoke a named child workflow (`spec.md` §4.3.2,
/// §4.5) and by `serve` mode to publish a directory of workflows.
pub fn load_by_name(dir: &Path, name: &str, catalog: &ConfigCatalog) -> Result<WorkflowGraph> {
    let path = dir.join(format!("{name}.yaml"));
    if !path.exists() {
        return Err(CoreError::ConfigNotFound(format!("workflow '{name}' under {}", dir.display())));
    }
    load(&path, catalog)
}

/// Same as [`load`] but takes the YAML text directly; `config_dir` is where a
/// `config_source` include is resolved relative to.
pub fn load_str(text: &str, config_dir: &Path, catalog: &ConfigCatalog) -> Result<WorkflowGraph> {
    let mut doc: serde_yaml::Value = serde_yaml::from_str(text)?;

    if let Some(config_source) = doc
        .as_mapping()
        .and_then(|m| m.get("config_source"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
    {
        ConfigCatalog::resolve_config_source(config_dir, &mut doc, &config_source)?;
    }

    let parsed: WorkflowDoc = serde_yaml::from_value(doc)?;

    if parsed.schema != SUPPORTED_SCHEMA {
        return Err(CoreError::schema_invalid(format!(
            "unsupported schema '{}': only '{SUPPORTED_SCHEMA}' (v2) workflows are accepted; \
             v1 template files are deprecated and rejected",
            parsed.schema
        )));
    }

    build_graph(parsed, catalog)
}

fn build_graph(doc: WorkflowDoc, catalog: &ConfigCatalog) -> Result<WorkflowGraph> {
    let execution = build_execution_context(&doc.execution)?;
    execution
        .validate()
        .map_err(CoreError::schema_invalid)?;

    // (d) declaration order, then stable sort by execution_order when present.
    let mut indexed: Vec<(usize, StepDoc)> = doc.steps.into_iter().enumerate().collect();
    let any_ordered = indexed.iter().any(|(_, s)| s.execution_order.is_some());
    if any_ordered {
        indexed.sort_by_key(|(idx, s)| (s.execution_order.unwrap_or(i64::MAX), *idx));
    }

    let mut steps = Vec::with_capacity(indexed.len());
    let mut seen_names = std::collections::HashSet::new();
    for (declaration_index, step_doc) in indexed {
        if !seen_names.insert(step_doc.name.clone()) {
            return Err(CoreError::DuplicateStep(step_doc.name));
        }
        steps.push(build_step(step_doc, declaration_index, &execution)?);
    }

    let graph = WorkflowGraph {
        name: doc.name,
        version: doc.version,
        description: doc.description,
        execution,
        env: doc.env,
        steps,
    };

    validate_acyclic(&graph)?;
    validate_refs(&graph)?;
    validate_servers_and_providers(&graph, catalog)?;

    Ok(graph)
}

fn build_execution_context(doc: &ExecutionDoc) -> Result<ExecutionContext> {
    let provider = doc.provider_model();
    Ok(ExecutionContext {
        provider,
        providers: doc.providers.clone().unwrap_or_default(),
        servers: doc.servers.clone().unwrap_or_default(),
        skills: doc.skills.clone().unwrap_or_default(),
        timeout_secs: doc.timeout,
        logging: doc.logging.clone(),
        parallel: doc.parallel.unwrap_or(false),
        max_workers: doc.max_workers.unwrap_or(4),
        on_error: doc.on_error.unwrap_or_default(),
    })
}

fn build_step(doc: StepDoc, declaration_index: usize, defaults: &ExecutionContext) -> Result<Step> {
    let provider = doc.provider_model().or_else(|| defaults.provider.clone());
    let providers = if !doc.providers.clone().unwrap_or_default().is_empty() {
        doc.providers.clone().unwrap_or_default()
    } else if provider.is_none() {
        defaults.providers.clone()
    } else {
        Vec::new()
    };

    if provider.is_some() && !providers.is_empty() {
        return Err(CoreError::schema_invalid(format!(
            "step '{}': provider+model and providers[] are mutually exclusive",
            doc.name
        )));
    }

    let mode = build_mode(&doc)?;

    Ok(Step {
        name: doc.name,
        execution_order: doc.execution_order,
        declaration_index,
        needs: doc.needs.unwrap_or_default(),
        if_guard: doc.r#if,
        provider,
        providers,
        servers: if doc.servers.clone().unwrap_or_default().is_empty() {
            defaults.servers.clone()
        } else {
            doc.servers.unwrap_or_default()
        },
        skills: if doc.skills.clone().unwrap_or_default().is_empty() {
            defaults.skills.clone()
        } else {
            doc.skills.unwrap_or_default()
        },
        timeout_secs: doc.timeout.or(defaults.timeout_secs),
        max_iterations: doc.max_iterations.unwrap_or(Step::DEFAULT_MAX_ITERATIONS),
        mode,
    })
}

fn build_mode(doc: &StepDoc) -> Result<StepMode> {
    let mut present = Vec::new();
    if doc.run.is_some() {
        present.push("run");
    }
    if doc.template.is_some() {
        present.push("template");
    }
    if doc.embeddings.is_some() {
        present.push("embeddings");
    }
    if doc.consensus.is_some() {
        present.push("consensus");
    }
    if doc.rag.is_some() {
        present.push("rag");
    }
    if doc.r#loop.is_some() {
        present.push("loop");
    }

    match present.len() {
        0 => return Err(CoreError::MissingMode(doc.name.clone())),
        1 => {}
        _ => return Err(CoreError::AmbiguousMode(doc.name.clone())),
    }

    if let Some(run) = &doc.run {
        return Ok(StepMode::Run(run.to_spec()));
    }
    if let Some(template) = &doc.template {
        return Ok(StepMode::Template(TemplateSpec {
            workflow: template.workflow.clone(),
            with: template.with.clone().unwrap_or_default(),
        }));
    }
    if let Some(embeddings) = &doc.embeddings {
        return Ok(StepMode::Embeddings(EmbeddingsSpec {
            input: embeddings.input.clone(),
            options: embeddings.options.clone().unwrap_or(JsonValue::Null),
        }));
    }
    if let Some(consensus) = &doc.consensus {
        return Ok(StepMode::Consensus(ConsensusSpec {
            prompt: consensus.prompt.clone(),
            executions: consensus
                .executions
                .iter()
                .map(|e| ConsensusExecution {
                    provider: e.provider_model(),
                })
                .collect(),
            threshold: consensus.threshold,
        }));
    }
    if let Some(rag) = &doc.rag {
        return Ok(StepMode::Rag(RagSpec {
            server: rag.server.clone(),
            query: rag.query.clone(),
            tool: rag.tool.clone().unwrap_or_else(|| RagSpec::DEFAULT_TOOL.to_string()),
        }));
    }
    if let Some(loop_doc) = &doc.r#loop {
        return Ok(StepMode::Loop(loop_doc.to_spec()?));
    }
    unreachable!("exactly one mode payload checked above")
}

/// DFS with three-color marking; rejects self-edges and cycles
/// (`spec.md` §4.1 step e).
fn validate_acyclic(graph: &WorkflowGraph) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut colors: HashMap<&str, Color> = graph
        .steps
        .iter()
        .map(|s| (s.name.as_str(), Color::White))
        .collect();

    fn visit<'a>(
        graph: &'a WorkflowGraph,
        name: &'a str,
        colors: &mut HashMap<&'a str, Color>,
    ) -> Result<()> {
        match colors.get(name) {
            Some(Color::Black) => return Ok(()),
            Some(Color::Gray) => return Err(CoreError::CyclicGraph(name.to_string())),
            _ => {}
        }
        colors.insert(name, Color::Gray);
        if let Some(step) = graph.step(name) {
            for dep in &step.needs {
                if dep == name {
                    return Err(CoreError::CyclicGraph(name.to_string()));
                }
                if !colors.contains_key(dep.as_str()) {
                    return Err(CoreError::UnknownRef {
                        step: name.to_string(),
                        name: format!("needs: {dep}"),
                    });
                }
                visit(graph, dep, colors)?;
            }
        }
        colors.insert(name, Color::Black);
        Ok(())
    }

    for step in &graph.steps {
        visit(graph, &step.name, &mut colors)?;
    }
    Ok(())
}

/// Scans every templated string field for `{{name}}` occurrences and checks
/// each against the inheritance rules (`spec.md` §4.1 step f).
fn validate_refs(graph: &WorkflowGraph) -> Result<()> {
    let strict = graph.execution.parallel;

    for step in &graph.steps {
        let texts = templated_fields(step);
        for text in texts {
            for name in find_refs(&text) {
                if is_builtin(&name) {
                    continue;
                }
                let valid = if strict {
                    graph
                        .transitive_predecessors(&step.name)
                        .iter()
                        .any(|p| p == &name)
                } else {
                    // Sequential mode: any step declared earlier is valid.
                    graph
                        .steps
                        .iter()
                        .any(|s| s.name == name && s.declaration_index < step.declaration_index)
                };
                if !valid {
                    return Err(CoreError::UnknownRef {
                        step: step.name.clone(),
                        name,
                    });
                }
            }
        }
    }
    Ok(())
}

fn templated_fields(step: &Step) -> Vec<String> {
    match &step.mode {
        StepMode::Run(r) => {
            let mut fields = vec![r.prompt.clone()];
            if let Some(sp) = &r.system_prompt {
                fields.push(sp.clone());
            }
            fields
        }
        StepMode::Rag(r) => vec![r.query.clone()],
        StepMode::Template(t) => t
            .with
            .values()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        StepMode::Consensus(c) => vec![c.prompt.clone()],
        StepMode::Loop(LoopSpec::Iterate(it)) => vec![it.items_source.clone()],
        StepMode::Loop(LoopSpec::Refine(_)) => Vec::new(),
        StepMode::Embeddings(e) => vec![e.input.clone()],
    }
    .into_iter()
    .chain(step.if_guard.clone())
    .collect()
}

fn validate_servers_and_providers(graph: &WorkflowGraph, catalog: &ConfigCatalog) -> Result<()> {
    if catalog.providers.is_empty() && catalog.servers.is_empty() {
        // No catalog loaded (e.g. unit tests); skip cross-referencing.
        return Ok(());
    }
    for step in &graph.steps {
        for server in &step.servers {
            catalog.server(server)?;
        }
        if let Some(p) = &step.provider {
            catalog.provider(&p.provider)?;
        }
        for p in &step.providers {
            catalog.provider(&p.provider)?;
        }
    }
    Ok(())
}

// --- YAML-facing document shapes -------------------------------------------------

#[derive(Debug, Deserialize)]
struct WorkflowDoc {
    #[serde(rename = "$schema")]
    schema: String,
    name: String,
    version: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    execution: ExecutionDoc,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    steps: Vec<StepDoc>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecutionDoc {
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    providers: Option<Vec<ProviderRef>>,
    #[serde(default)]
    servers: Option<Vec<String>>,
    #[serde(default)]
    skills: Option<Vec<String>>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    logging: Option<String>,
    #[serde(default)]
    parallel: Option<bool>,
    #[serde(default)]
    max_workers: Option<usize>,
    #[serde(default)]
    on_error: Option<ErrorPolicy>,
}

impl ExecutionDoc {
    fn provider_model(&self) -> Option<ProviderRef> {
        match (&self.provider, &self.model) {
            (Some(provider), Some(model)) => Some(ProviderRef {
                provider: provider.clone(),
                model: model.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                timeout_secs: self.timeout,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StepDoc {
    name: String,
    #[serde(default)]
    execution_order: Option<i64>,
    #[serde(default)]
    needs: Option<Vec<String>>,
    #[serde(default)]
    r#if: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    providers: Option<Vec<ProviderRef>>,
    #[serde(default)]
    servers: Option<Vec<String>>,
    #[serde(default)]
    skills: Option<Vec<String>>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    max_iterations: Option<u32>,
    #[serde(default)]
    run: Option<RunDoc>,
    #[serde(default)]
    template: Option<TemplateDoc>,
    #[serde(default)]
    embeddings: Option<EmbeddingsDoc>,
    #[serde(default)]
    consensus: Option<ConsensusDoc>,
    #[serde(default)]
    rag: Option<RagDoc>,
    #[serde(default)]
    r#loop: Option<LoopDoc>,
}

impl StepDoc {
    fn provider_model(&self) -> Option<ProviderRef> {
        match (&self.provider, &self.model) {
            (Some(provider), Some(model)) => Some(ProviderRef {
                provider: provider.clone(),
                model: model.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                timeout_secs: self.timeout,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RunDoc {
    Prompt(String),
    Detailed {
        prompt: String,
        #[serde(default)]
        system_prompt: Option<String>,
    },
}

impl RunDoc {
    fn to_spec(&self) -> RunSpec {
        match self {
            RunDoc::Prompt(p) => RunSpec {
                prompt: p.clone(),
                system_prompt: None,
            },
            RunDoc::Detailed { prompt, system_prompt } => RunSpec {
                prompt: prompt.clone(),
                system_prompt: system_prompt.clone(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct TemplateDoc {
    workflow: String,
    #[serde(default)]
    with: Option<HashMap<String, JsonValue>>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsDoc {
    input: String,
    #[serde(default)]
    options: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct ConsensusExecutionDoc {
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    timeout: Option<u64>,
}

impl ConsensusExecutionDoc {
    fn provider_model(&self) -> Option<ProviderRef> {
        match (&self.provider, &self.model) {
            (Some(provider), Some(model)) => Some(ProviderRef {
                provider: provider.clone(),
                model: model.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                timeout_secs: self.timeout,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConsensusDoc {
    prompt: String,
    #[serde(default)]
    executions: Vec<ConsensusExecutionDoc>,
    threshold: ConsensusThreshold,
}

#[derive(Debug, Deserialize)]
struct RagDoc {
    server: String,
    query: String,
    #[serde(default)]
    tool: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoopDoc {
    #[serde(default)]
    iterate: Option<IterateDoc>,
    #[serde(default)]
    refine: Option<RefineDoc>,
}

impl LoopDoc {
    fn to_spec(&self) -> Result<LoopSpec> {
        match (&self.iterate, &self.refine) {
            (Some(it), None) => Ok(LoopSpec::Iterate(IterateSpec {
                items_source: it.items.clone(),
                workflow: it.workflow.clone(),
                with: it.with.clone().unwrap_or_default(),
                max_workers: it.max_workers.unwrap_or(IterateSpec::DEFAULT_MAX_WORKERS),
                on_failure: it.on_failure.unwrap_or_default(),
                max_retries: it.max_retries.unwrap_or(0),
                retry_delay_secs: it.retry_delay.unwrap_or(0),
                min_success_rate: it.min_success_rate,
                timeout_per_item_secs: it.timeout_per_item,
                total_timeout_secs: it.total_timeout,
                accumulate: it.accumulate.clone(),
            })),
            (None, Some(r)) => Ok(LoopSpec::Refine(RefineSpec {
                workflow: r.workflow.clone(),
                with: r.with.clone().unwrap_or_default(),
                until: r.until.clone(),
                max_iterations: r.max_iterations.unwrap_or(10),
            })),
            (Some(_), Some(_)) => {
                Err(CoreError::schema_invalid("loop: iterate and refine are mutually exclusive"))
            }
            (None, None) => Err(CoreError::schema_invalid("loop: one of iterate/refine is required")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IterateDoc {
    items: String,
    workflow: String,
    #[serde(default)]
    with: Option<HashMap<String, JsonValue>>,
    #[serde(default)]
    max_workers: Option<usize>,
    #[serde(default)]
    on_failure: Option<ItemErrorPolicy>,
    #[serde(default)]
    max_retries: Option<u32>,
    #[serde(default)]
    retry_delay: Option<u64>,
    #[serde(default)]
    min_success_rate: Option<f64>,
    #[serde(default)]
    timeout_per_item: Option<u64>,
    #[serde(default)]
    total_timeout: Option<u64>,
    #[serde(default)]
    accumulate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefineDoc {
    workflow: String,
    #[serde(default)]
    with: Option<HashMap<String, JsonValue>>,
    until: String,
    #[serde(default)]
    max_iterations: Option<u32>,
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn empty_catalog() -> ConfigCatalog {
        ConfigCatalog::default()
    }

    const SEQUENTIAL_TWO_STEP: &str = r#"
$schema: "workflow/v2.0"
name: greet
version: "1.0"
steps:
  - name: a
    run: "echo {{input}}"
  - name: b
    needs: [a]
    run: "echo {{step.a}}"
"#;

    #[test]
    fn loads_sequential_two_step_workflow() {
        let graph = load_str(SEQUENTIAL_TWO_STEP, Path::new("."), &empty_catalog()).unwrap();
        assert_eq!(graph.steps.len(), 2);
        assert_eq!(graph.steps[0].name, "a");
        assert_eq!(graph.steps[1].needs, vec!["a".to_string()]);
    }

    #[test]
    fn rejects_cycles() {
        let yaml = r#"
$schema: "workflow/v2.0"
name: cyclic
version: "1.0"
steps:
  - name: a
    needs: [b]
    run: "x"
  - name: b
    needs: [a]
    run: "y"
"#;
        let err = load_str(yaml, Path::new("."), &empty_catalog()).unwrap_err();
        assert_eq!(err.code(), "cyclic-graph");
    }

    #[test]
    fn rejects_unknown_ref_in_parallel_mode() {
        let yaml = r#"
$schema: "workflow/v2.0"
name: fanout
version: "1.0"
execution:
  parallel: true
steps:
  - name: a
    run: "x"
  - name: b
    run: "{{a}}"
  - name: c
    needs: [a]
    run: "{{b}}"
"#;
        let err = load_str(yaml, Path::new("."), &empty_catalog()).unwrap_err();
        assert_eq!(err.code(), "unknown-ref");
    }

    #[test]
    fn rejects_dual_mode_step() {
        let yaml = r#"
$schema: "workflow/v2.0"
name: bad
version: "1.0"
steps:
  - name: a
    run: "x"
    rag:
      server: s
      query: "q"
"#;
        let err = load_str(yaml, Path::new("."), &empty_catalog()).unwrap_err();
        assert_eq!(err.code(), "schema-invalid");
    }

    #[test]
    fn rejects_v1_schema() {
        let yaml = r#"
$schema: "workflow/v1.0"
name: legacy
version: "1.0"
steps: []
"#;
        let err = load_str(yaml, Path::new("."), &empty_catalog()).unwrap_err();
        assert_eq!(err.code(), "schema-invalid");
    }

    #[test]
    fn execution_order_breaks_ties_by_declaration() {
        let yaml = r#"
$schema: "workflow/v2.0"
name: ordered
version: "1.0"
steps:
  - name: second
    execution_order: 2
    run: "x"
  - name: first
    execution_order: 1
    run: "x"
"#;
        let graph = load_str(yaml, Path::new("."), &empty_catalog()).unwrap();
        assert_eq!(graph.steps[0].name, "first");
        assert_eq!(graph.steps[1].name, "second");
    }

    #[test]
    fn load_serialize_reload_is_equivalent() {
        let graph = load_str(SEQUENTIAL_TWO_STEP, Path::new("."), &empty_catalog()).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(SEQUENTIAL_TWO_STEP).unwrap();
        let reserialized = serde_yaml::to_string(&doc).unwrap();
        let graph2 = load_str(&reserialized, Path::new("."), &empty_catalog()).unwrap();
        assert_eq!(graph.name, graph2.name);
        assert_eq!(
            graph.steps.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
            graph2.steps.iter().map(|s| s.name.clone()).collect::<Vec<_>>()
        );
        assert_eq!(
            graph.steps.iter().map(|s| s.needs.clone()).collect::<Vec<_>>(),
            graph2.steps.iter().map(|s| s.needs.clone()).collect::<Vec<_>>()
        );
    }
}
