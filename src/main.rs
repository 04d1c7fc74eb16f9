//! `flowctl` — composes AI model providers and MCP tool servers into
//! declarative YAML pipelines (`spec.md` §1). This binary is a thin adapter:
//! it turns argv into a `RunRequest`-equivalent call into `flowctl-engine`
//! and renders the result; none of the engine crates depend on `clap`.

mod cli;
mod runtime;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use cli::{Cli, Commands};
use eyre::{Context, Result as EyreResult};
use flowctl_core::config::ConfigCatalog;
use flowctl_engine::orchestrator;
use flowctl_mcp::server::WorkflowMcpServer;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let runtime = runtime::RuntimeConfig::from_cli(&cli);
    runtime::init_tracing(&runtime.log_level);

    let code = match cli.command {
        Commands::Run {
            workflow,
            workflows_dir,
            input_data,
            provider,
            model,
            servers,
            skills,
            start_from,
            end_at,
        } => {
            cmd_run(
                &runtime,
                &workflows_dir,
                &workflow,
                input_data,
                provider,
                model,
                servers,
                skills,
                start_from,
                end_at,
            )
            .await
        }
        Commands::ListWorkflows { workflows_dir } => cmd_list_workflows(&runtime, &workflows_dir),
        Commands::Serve { workflows_dir } => cmd_serve(&runtime, &workflows_dir).await,
    };

    std::process::exit(code);
}

/// Stable exit-code table (`spec.md` §6 "Exit codes").
const EXIT_SUCCESS: i32 = 0;
const EXIT_UNSPECIFIED: i32 = 1;
const EXIT_INVALID_ARGUMENT: i32 = 2;
const EXIT_CONFIG_NOT_FOUND: i32 = 3;
const EXIT_CONTEXT_NOT_FOUND: i32 = 4;
#[allow(dead_code)]
const EXIT_OUTPUT_WRITE_FAILED: i32 = 5;
const EXIT_INITIALIZATION_FAILED: i32 = 6;
const EXIT_PROVIDER_ERROR: i32 = 7;
const EXIT_TOOL_ERROR: i32 = 8;
const EXIT_CONSENSUS_FAILURE: i32 = 9;
const EXIT_TIMEOUT: i32 = 10;

fn exit_code_for_code(code: &str) -> i32 {
    match code {
        "schema-invalid" | "unknown-ref" | "cyclic-graph" | "interpolation-failed" => EXIT_INVALID_ARGUMENT,
        "config-not-found" => EXIT_CONFIG_NOT_FOUND,
        "tool-transport" | "max-iterations-exceeded" => EXIT_TOOL_ERROR,
        "provider-exhausted" => EXIT_PROVIDER_ERROR,
        "consensus-no-quorum" => EXIT_CONSENSUS_FAILURE,
        "step-timeout" => EXIT_TIMEOUT,
        _ => EXIT_UNSPECIFIED,
    }
}

/// Parses the `"{code}: {message}"` prefix `StepRecord.error` is written in
/// by `flowctl_engine::orchestrator`'s `failed_record`.
fn exit_code_for_run_result(result: &flowctl_core::model::RunResult) -> i32 {
    result
        .steps
        .iter()
        .find_map(|s| s.error.as_deref())
        .and_then(|err| err.split(':').next())
        .map(exit_code_for_code)
        .unwrap_or(EXIT_UNSPECIFIED)
}

fn print_failure_report(workflow: &str, code: &str, message: &str) {
    let report = json!({
        "workflow": workflow,
        "status": "failed",
        "timestamp": Utc::now().to_rfc3339(),
        "error": { "code": code, "message": message },
    });
    eprintln!("{report}");
}

#[allow(clippy::too_many_arguments)]
async fn cmd_run(
    runtime: &runtime::RuntimeConfig,
    workflows_dir: &Path,
    workflow: &str,
    input_data: Option<String>,
    provider: Option<String>,
    model: Option<String>,
    servers: Vec<String>,
    skills: Vec<String>,
    start_from: Option<String>,
    end_at: Option<String>,
) -> i32 {
    let catalog = match ConfigCatalog::load_dir(&runtime.config_dir) {
        Ok(catalog) => catalog,
        Err(err) => {
            print_failure_report(workflow, err.code(), &err.to_string());
            return EXIT_INITIALIZATION_FAILED;
        }
    };

    let graph = match flowctl_core::loader::load_by_name(workflows_dir, workflow, &catalog) {
        Ok(graph) => graph,
        Err(err) => {
            print_failure_report(workflow, err.code(), &err.to_string());
            return exit_code_for_code(err.code());
        }
    };

    let graph = runtime::apply_cli_overrides(graph, provider, model, servers, skills);
    let graph = match runtime::apply_step_range(graph, start_from.as_deref(), end_at.as_deref()) {
        Ok(graph) => graph,
        Err(message) => {
            print_failure_report(workflow, "context-not-found", &message);
            return EXIT_CONTEXT_NOT_FOUND;
        }
    };

    let input = match runtime::resolve_input(input_data) {
        Ok(input) => input,
        Err(err) => {
            print_failure_report(workflow, "invalid-argument", &err.to_string());
            return EXIT_INVALID_ARGUMENT;
        }
    };

    let cancellation = CancellationToken::new();
    let result = orchestrator::run_workflow(&graph, &catalog, workflows_dir, input, cancellation).await;

    let result = match result {
        Ok(result) => result,
        Err(err) => {
            print_failure_report(workflow, err.code(), &err.to_string());
            return exit_code_for_code(err.code());
        }
    };

    println!("{}", result.final_output);
    if runtime.log_level == "verbose" || runtime.log_level == "debug" {
        println!("\n{}", result.summary);
        println!("{}", result.timeline);
    }

    if !result.succeeded() {
        let detail = result
            .steps
            .iter()
            .find(|s| s.error.is_some())
            .and_then(|s| s.error.clone())
            .unwrap_or_else(|| "step failed".to_string());
        print_failure_report(workflow, "step-failed", &detail);
        return exit_code_for_run_result(&result);
    }

    EXIT_SUCCESS
}

fn cmd_list_workflows(runtime: &runtime::RuntimeConfig, workflows_dir: &Path) -> i32 {
    let catalog = match ConfigCatalog::load_dir(&runtime.config_dir) {
        Ok(catalog) => catalog,
        Err(err) => {
            eprintln!("{err}");
            return EXIT_INITIALIZATION_FAILED;
        }
    };

    match list_workflows_entries(workflows_dir, &catalog) {
        Ok(workflows) => {
            println!("{}", json!({ "workflows": workflows }));
            EXIT_SUCCESS
        }
        Err(report) => {
            eprintln!("{report:?}");
            EXIT_CONFIG_NOT_FOUND
        }
    }
}

/// Directory scanning has no dedicated error kind in `spec.md` §7's taxonomy,
/// so failures here are reported with `eyre`'s chained context rather than a
/// one-off `thiserror` variant.
fn list_workflows_entries(
    workflows_dir: &Path,
    catalog: &ConfigCatalog,
) -> EyreResult<Vec<serde_json::Value>> {
    let entries = std::fs::read_dir(workflows_dir)
        .wrap_err_with(|| format!("reading workflow directory {}", workflows_dir.display()))?;

    let mut workflows = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        if let Ok(graph) = flowctl_core::loader::load(&path, catalog) {
            workflows.push(json!({
                "name": graph.name,
                "version": graph.version,
                "description": graph.description,
                "steps": graph.steps.len(),
            }));
        }
    }
    Ok(workflows)
}

async fn cmd_serve(runtime: &runtime::RuntimeConfig, workflows_dir: &Path) -> i32 {
    let catalog = match ConfigCatalog::load_dir(&runtime.config_dir) {
        Ok(catalog) => Arc::new(catalog),
        Err(err) => {
            eprintln!("{err}");
            return EXIT_INITIALIZATION_FAILED;
        }
    };

    let runner_catalog = catalog.clone();
    let runner: flowctl_mcp::server::WorkflowRunner = Arc::new(move |path, with| {
        let catalog = runner_catalog.clone();
        Box::pin(async move {
            let graph = flowctl_core::loader::load(&path, &catalog).map_err(|e| e.to_string())?;
            let input = with
                .get("input")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
            let cancellation = CancellationToken::new();
            let result = orchestrator::run_workflow(&graph, &catalog, &dir, input, cancellation)
                .await
                .map_err(|e| e.to_string())?;
            if result.succeeded() {
                Ok(result.final_output)
            } else {
                Err(result.summary)
            }
        })
    });

    let server = match WorkflowMcpServer::load_dir(workflows_dir, &catalog, runner) {
        Ok(server) => server,
        Err(err) => {
            eprintln!("{err}");
            return EXIT_INITIALIZATION_FAILED;
        }
    };

    match serve_until_closed(server).await {
        Ok(()) => EXIT_SUCCESS,
        Err(report) => {
            eprintln!("{report:?}");
            EXIT_UNSPECIFIED
        }
    }
}

/// `rmcp`'s transport/service errors have no counterpart in our own error
/// taxonomy (the server loop is a peer-mode concern, not a workflow-run
/// concern), so they're surfaced through `eyre` like the rest of this
/// binary's ambient I/O.
async fn serve_until_closed(server: WorkflowMcpServer) -> EyreResult<()> {
    use rmcp::{transport::stdio, ServiceExt};

    let service = server
        .serve(stdio())
        .await
        .wrap_err("failed to start MCP server")?;
    service
        .waiting()
        .await
        .wrap_err("MCP server exited with error")?;
    Ok(())
}
