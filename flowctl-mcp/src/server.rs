//! Exposes a directory of workflows as an MCP server: each workflow becomes
//! one tool named after the workflow, callable with an `input_data` argument
//! mapped onto `{{input}}` (`spec.md` §4.7 "serve mode").

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use flowctl_core::{config::ConfigCatalog, model::WorkflowGraph};
use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, Content, Implementation, InitializeRequestParam,
        InitializeResult, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo, Tool,
    },
    service::{RequestContext, RoleServer},
    ErrorData, ServerHandler,
};
use serde_json::{json, Map, Value};

/// One workflow made available as an MCP tool.
struct ServedWorkflow {
    graph: WorkflowGraph,
    path: PathBuf,
}

/// Runner callback invoked for each tool call: loads and executes the
/// workflow, returning its final output as plain text. Kept generic over a
/// closure so `flowctl-engine`'s orchestrator (which depends on this crate,
/// not the other way around) can be plugged in without a circular dependency.
pub type WorkflowRunner = Arc<
    dyn Fn(
            PathBuf,
            HashMap<String, Value>,
        ) -> futures::future::BoxFuture<'static, Result<String, String>>
        + Send
        + Sync,
>;

pub struct WorkflowMcpServer {
    workflows: HashMap<String, ServedWorkflow>,
    runner: WorkflowRunner,
}

impl WorkflowMcpServer {
    /// Loads every `*.yaml` workflow directly under `dir` and registers it as
    /// a tool named after its file stem.
    pub fn load_dir(dir: &std::path::Path, catalog: &ConfigCatalog, runner: WorkflowRunner) -> flowctl_core::error::Result<Self> {
        let mut workflows = HashMap::new();
        let entries = std::fs::read_dir(dir).map_err(flowctl_core::error::CoreError::Io)?;
        for entry in entries {
            let entry = entry.map_err(flowctl_core::error::CoreError::Io)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let graph = flowctl_core::loader::load(&path, catalog)?;
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&graph.name)
                .to_string();
            workflows.insert(name, ServedWorkflow { graph, path });
        }
        Ok(Self { workflows, runner })
    }
}

impl ServerHandler for WorkflowMcpServer {
    fn get_info(&self) -> ServerInfo {
        InitializeResult {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "flowctl".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("flowctl workflow server".to_string()),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Each tool runs one flowctl workflow with its `input_data` argument bound to \
                 {{input}}, returning the workflow's final output as text."
                    .to_string(),
            ),
        }
    }

    async fn initialize(
        &self,
        _request: InitializeRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, ErrorData> {
        Ok(self.get_info())
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let tools = self
            .workflows
            .iter()
            .map(|(name, served)| {
                let description = served
                    .graph
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Run the '{name}' workflow"));
                let schema = json!({
                    "type": "object",
                    "properties": {
                        "input_data": { "type": "string" }
                    },
                    "required": ["input_data"],
                });
                Tool::new(name.clone(), description, Arc::new(schema.as_object().unwrap().clone()))
            })
            .collect();
        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let served = self
            .workflows
            .get(request.name.as_ref())
            .ok_or_else(|| ErrorData::method_not_found::<rmcp::model::CallToolRequestMethod>())?;

        let arguments: Map<String, Value> = request.arguments.unwrap_or_default();
        let input_data = arguments
            .get("input_data")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut with = HashMap::new();
        with.insert("input".to_string(), Value::String(input_data));

        match (self.runner)(served.path.clone(), with).await {
            Ok(output) => Ok(CallToolResult::success(vec![Content::text(output)])),
            Err(message) => Ok(CallToolResult::error(vec![Content::text(message)])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_dir_registers_yaml_files_only() {
        let dir = tempfile_dir();
        std::fs::write(
            dir.join("greet.yaml"),
            "$schema: workflow/v2.0\nname: greet\nversion: \"1.0\"\nsteps:\n  - name: say\n    run:\n      prompt: hi\n",
        )
        .unwrap();
        std::fs::write(dir.join("README.md"), "not a workflow").unwrap();

        let catalog = ConfigCatalog::default();
        let runner: WorkflowRunner = Arc::new(|_, _| Box::pin(async { Ok(String::new()) }));
        let server = WorkflowMcpServer::load_dir(&dir, &catalog, runner).unwrap();
        assert_eq!(server.workflows.len(), 1);
        assert!(server.workflows.contains_key("greet"));
    }

    fn tempfile_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("flowctl-mcp-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
