//! MCP: server registry configuration, wire protocol, and tool discovery
//!
//! The core treats MCP as an opaque transport whose observable surface is
//! "list tools" and "call tool". Servers are declared in a JSON registry
//! file; each discovered tool becomes an entry in a per-server tool
//! registry bound to an agent named after the server.

mod client;
mod config;
mod protocol;
mod toolset;

pub use client::McpClient;
pub use config::{load_server_configs, McpServerConfig, McpTransportKind};
pub use protocol::{McpContent, McpError, McpRequest, McpResponse, McpTool, McpToolResult};
pub use toolset::{discover_agents, McpToolAdapter};
