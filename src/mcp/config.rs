//! MCP server registry configuration
//!
//! Parses the `mcp_servers.json` format:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "name": { "command": "exe", "args": [], "env": {}, "type": "stdio" }
//!   }
//! }
//! ```
//!
//! `type` defaults to `stdio`; `sse` entries carry a `url` instead of a
//! command.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Transport used to reach a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportKind {
    Stdio,
    Sse,
}

impl Default for McpTransportKind {
    fn default() -> Self {
        McpTransportKind::Stdio
    }
}

/// One configured MCP server
#[derive(Debug, Clone, Deserialize)]
pub struct McpServerConfig {
    /// Server name; filled from the registry key
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub transport: McpTransportKind,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl McpServerConfig {
    /// Check the fields required by the declared transport
    pub fn validate(&self) -> Result<()> {
        match self.transport {
            McpTransportKind::Stdio if self.command.is_none() => Err(Error::Config(format!(
                "MCP server '{}' uses stdio but declares no command",
                self.name
            ))),
            McpTransportKind::Sse if self.url.is_none() => Err(Error::Config(format!(
                "MCP server '{}' uses sse but declares no url",
                self.name
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Deserialize)]
struct RegistryFile {
    #[serde(rename = "mcpServers")]
    mcp_servers: HashMap<String, McpServerConfig>,
}

/// Load and validate server configurations from a registry file. Invalid
/// entries are skipped with a warning.
pub fn load_server_configs(path: &Path) -> Result<Vec<McpServerConfig>> {
    info!("Reading MCP server configuration from {}", path.display());

    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read MCP configuration {}: {}",
            path.display(),
            e
        ))
    })?;

    let registry: RegistryFile = serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid MCP configuration: {}", e)))?;

    let mut configs: Vec<McpServerConfig> = Vec::new();
    let mut names: Vec<String> = registry.mcp_servers.keys().cloned().collect();
    names.sort();

    for name in names {
        let mut config = registry.mcp_servers[&name].clone();
        config.name = name;
        match config.validate() {
            Ok(()) => configs.push(config),
            Err(e) => warn!("Skipping MCP server: {}", e),
        }
    }

    info!("Found {} MCP server configurations", configs.len());
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_stdio_and_sse_servers() {
        let file = write_config(
            r#"{
                "mcpServers": {
                    "files": {
                        "command": "mcp-files",
                        "args": ["--root", "/tmp"],
                        "env": {"FILES_TOKEN": "x"}
                    },
                    "remote": {
                        "type": "sse",
                        "url": "http://localhost:9000/mcp"
                    }
                }
            }"#,
        );

        let configs = load_server_configs(file.path()).unwrap();
        assert_eq!(configs.len(), 2);

        let files = configs.iter().find(|c| c.name == "files").unwrap();
        assert_eq!(files.transport, McpTransportKind::Stdio);
        assert_eq!(files.command.as_deref(), Some("mcp-files"));
        assert_eq!(files.args, vec!["--root", "/tmp"]);
        assert_eq!(files.env.get("FILES_TOKEN").map(String::as_str), Some("x"));

        let remote = configs.iter().find(|c| c.name == "remote").unwrap();
        assert_eq!(remote.transport, McpTransportKind::Sse);
        assert_eq!(remote.url.as_deref(), Some("http://localhost:9000/mcp"));
    }

    #[test]
    fn test_invalid_entries_are_skipped() {
        let file = write_config(
            r#"{
                "mcpServers": {
                    "broken": {"type": "sse"},
                    "ok": {"command": "mcp-ok"}
                }
            }"#,
        );

        let configs = load_server_configs(file.path()).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].name, "ok");
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = load_server_configs(Path::new("/nonexistent/mcp_servers.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_registry_key_is_config_error() {
        let file = write_config(r#"{"servers": {}}"#);
        let err = load_server_configs(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
