//! # flowctl-mcp
//!
//! The MCP (Model Context Protocol) client/host layer: subprocess-per-server
//! JSON-RPC clients used when a step calls external tools, and a
//! `ServerHandler` implementation that exposes a directory of workflows as
//! MCP tools in `serve` mode (`spec.md` §4.4, §4.7).

pub mod client;
pub mod error;
pub mod registry;
pub mod server;

/// Convenient re-exports for common use.
pub mod prelude {
    pub use crate::{
        client::{McpClient, ToolArguments, ToolCallOutcome},
        error::{McpError, Result},
        registry::McpServerRegistry,
        server::{WorkflowMcpServer, WorkflowRunner},
    };
}
