//! Error types for the MCP client/host layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, McpError>;

/// Errors raised by subprocess lifecycle, the JSON-RPC handshake, or tool
/// invocation (`spec.md` §4.4, §7 `tool-transport` / `tool-semantic`).
#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to spawn MCP server '{server}': {message}")]
    SpawnFailed { server: String, message: String },

    #[error("MCP handshake with '{server}' failed: {message}")]
    HandshakeFailed { server: String, message: String },

    #[error("MCP server '{0}' is not configured")]
    UnknownServer(String),

    #[error("tool '{tool}' not found on server '{server}'")]
    ToolNotFound { server: String, tool: String },

    #[error("transport error talking to '{server}': {message}")]
    Transport { server: String, message: String },

    /// A tool explicitly reported `isError: true` (or an RPC error). Per
    /// `spec.md` §4.4 the default policy is to surface this text back to the
    /// LLM as the tool result rather than fail the step outright; callers
    /// choose whether to treat it as terminal.
    #[error("tool '{tool}' on '{server}' returned an error: {message}")]
    ToolSemantic {
        server: String,
        tool: String,
        message: String,
    },

    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl McpError {
    /// `true` for hard transport failures that should fail the step outright
    /// (`spec.md` §4.4 "A hard transport error ... fails the step").
    pub fn is_hard_transport_failure(&self) -> bool {
        matches!(
            self,
            McpError::SpawnFailed { .. } | McpError::HandshakeFailed { .. } | McpError::Transport { .. }
        )
    }
}
