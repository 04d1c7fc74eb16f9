//! One child subprocess per configured MCP server, framed as JSON-RPC 2.0 over
//! its stdin/stdout via the official `rmcp` SDK (`spec.md` §4.4).

use std::{ops::Deref, sync::Arc};

use flowctl_core::{config::McpServerConfig, model::ToolDescriptor};
use rmcp::{
    model::{CallToolRequestParam, RawContent},
    service::{RoleClient, RunningService},
    transport::TokioChildProcess,
    ServiceExt,
};
use serde_json::{Map, Value};
use tokio::{process::Command, sync::Mutex, sync::OnceCell};

use crate::error::{McpError, Result};

/// Either a raw JSON-encoded argument string or an already-decoded value; the
/// source spec leaves this ambiguous (`spec.md` §9 "Tool-argument shape"), so
/// the client accepts both and always emits the decoded form on the wire.
#[derive(Debug, Clone)]
pub enum ToolArguments {
    Decoded(Value),
    Encoded(String),
}

impl ToolArguments {
    fn into_map(self) -> Result<Option<Map<String, Value>>> {
        let value = match self {
            ToolArguments::Decoded(v) => v,
            ToolArguments::Encoded(s) => {
                serde_json::from_str(&s).map_err(|e| McpError::InvalidArguments(e.to_string()))?
            }
        };
        match value {
            Value::Null => Ok(None),
            Value::Object(map) => Ok(Some(map)),
            other => Err(McpError::InvalidArguments(format!(
                "tool arguments must be a JSON object, got: {other}"
            ))),
        }
    }
}

impl From<Value> for ToolArguments {
    fn from(v: Value) -> Self {
        ToolArguments::Decoded(v)
    }
}

impl From<String> for ToolArguments {
    fn from(s: String) -> Self {
        ToolArguments::Encoded(s)
    }
}

/// The decoded result of a `tools/call` invocation (`spec.md` §4.4 "Tool
/// invocation"): a direct string, the first text content block, or raw JSON.
#[derive(Debug, Clone)]
pub struct ToolCallOutcome {
    pub text: String,
    pub is_error: bool,
}

/// A live connection to one MCP server: owns the subprocess, caches its tool
/// list once per connection, and serializes concurrent calls with a mutex
/// (`spec.md` §5 "Shared resources" — MCP servers typically cannot tolerate
/// interleaved request/response streams).
pub struct McpClient {
    name: String,
    service: Mutex<RunningService<RoleClient, ()>>,
    tools_cache: OnceCell<(Vec<ToolDescriptor>, Vec<(String, String)>)>,
}

impl McpClient {
    /// Spawns the subprocess and performs the MCP `initialize`/`initialized`
    /// handshake (`spec.md` §4.4 "Lifecycle").
    pub async fn start(name: &str, config: &McpServerConfig) -> Result<Arc<Self>> {
        let mut cmd = Command::new(&config.command);
        if !config.args.is_empty() {
            cmd.args(&config.args);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let transport = TokioChildProcess::new(cmd).map_err(|e| McpError::SpawnFailed {
            server: name.to_string(),
            message: e.to_string(),
        })?;

        let service = ().serve(transport).await.map_err(|e| McpError::HandshakeFailed {
            server: name.to_string(),
            message: e.to_string(),
        })?;

        Ok(Arc::new(Self {
            name: name.to_string(),
            service: Mutex::new(service),
            tools_cache: OnceCell::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `tools/list`, called at most once per connection and cached for its
    /// lifetime (`spec.md` §4.4 "Tool-list caching", §8 "Idempotence").
    /// Returns the rewritten, provider-safe descriptors plus the
    /// `(prefixed_name, original_name)` reverse map.
    pub async fn list_tools(&self) -> Result<&[ToolDescriptor]> {
        let (descriptors, _) = self
            .tools_cache
            .get_or_try_init(|| async {
                let guard = self.service.lock().await;
                let response = guard
                    .list_all_tools()
                    .await
                    .map_err(|e| McpError::Transport {
                        server: self.name.clone(),
                        message: e.to_string(),
                    })?;
                drop(guard);

                let mut descriptors = Vec::with_capacity(response.len());
                let mut reverse = Vec::with_capacity(response.len());
                for tool in response {
                    let original = tool.name.to_string();
                    let prefixed = flowctl_core::model::prefix_tool_name(&self.name, &original);
                    let schema = Value::Object(tool.input_schema.as_ref().clone());
                    descriptors.push(ToolDescriptor {
                        kind: flowctl_core::model::ToolDescriptorKind::Function,
                        function: flowctl_core::model::ToolFunction {
                            name: prefixed.clone(),
                            description: tool
                                .description
                                .map(|d| d.to_string())
                                .unwrap_or_default(),
                            parameters: schema,
                        },
                    });
                    reverse.push((prefixed, original));
                }
                Ok::<_, McpError>((descriptors, reverse))
            })
            .await?;
        Ok(descriptors)
    }

    /// Resolves a provider-safe prefixed tool name back to the original MCP
    /// tool name this connection exposes, reconstructed from the cached list
    /// rather than re-parsing the string (`spec.md` §3 "ToolDescriptor").
    pub async fn original_tool_name(&self, prefixed: &str) -> Option<String> {
        self.list_tools().await.ok()?;
        let (_, reverse) = self.tools_cache.get()?;
        reverse
            .iter()
            .find(|(p, _)| p == prefixed)
            .map(|(_, original)| original.clone())
    }

    /// `tools/call` with the unprefixed tool name and decoded arguments
    /// (`spec.md` §4.4 "Tool invocation").
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: impl Into<ToolArguments>,
    ) -> Result<ToolCallOutcome> {
        let args = arguments.into().into_map()?;

        let guard = self.service.lock().await;
        let result = guard
            .call_tool(CallToolRequestParam {
                name: tool_name.to_string().into(),
                arguments: args,
                task: None,
            })
            .await
            .map_err(|e| McpError::Transport {
                server: self.name.clone(),
                message: e.to_string(),
            })?;
        drop(guard);

        let is_error = result.is_error.unwrap_or(false);

        if let Some(structured) = result.structured_content {
            return Ok(ToolCallOutcome {
                text: structured.to_string(),
                is_error,
            });
        }

        let mut text = String::new();
        for content in &result.content {
            if let RawContent::Text(text_content) = content.deref() {
                text.push_str(&text_content.text);
                break;
            }
        }
        if text.is_empty() && !result.content.is_empty() {
            // No text block present (e.g. image/resource only); marshal the raw
            // content array so callers still get something structured back.
            text = serde_json::to_string(&result.content).unwrap_or_default();
        }

        Ok(ToolCallOutcome { text, is_error })
    }

    /// Closes stdin and waits for the subprocess to exit
    /// (`spec.md` §4.4 "Lifecycle" — `stop()`).
    pub async fn stop(&self) -> Result<()> {
        let guard = self.service.lock().await;
        guard.cancellation_token().cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoded_arguments_require_object() {
        let args = ToolArguments::Decoded(Value::String("oops".into()));
        assert!(args.into_map().is_err());
    }

    #[test]
    fn null_arguments_become_none() {
        let args = ToolArguments::Decoded(Value::Null);
        assert_eq!(args.into_map().unwrap(), None);
    }

    #[test]
    fn encoded_string_arguments_parse() {
        let args = ToolArguments::Encoded(r#"{"a":1,"b":2}"#.to_string());
        let map = args.into_map().unwrap().unwrap();
        assert_eq!(map.get("a").unwrap(), &Value::from(1));
    }
}
