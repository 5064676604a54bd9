//! MCP client
//!
//! Connects to a configured server over stdio (spawning the declared
//! command with newline-delimited JSON-RPC framing) or over HTTP for
//! url-based servers, initializes the session, and exposes the two
//! observable operations: list tools and call tool.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::config::{McpServerConfig, McpTransportKind};
use super::protocol::{McpRequest, McpResponse, McpTool, McpToolResult};
use crate::error::{Error, Result};

enum Transport {
    Stdio {
        // Held so the server dies with the client
        #[allow(dead_code)]
        child: Mutex<Child>,
        stdin: Mutex<tokio::process::ChildStdin>,
        stdout: Mutex<BufReader<tokio::process::ChildStdout>>,
    },
    Http {
        client: reqwest::Client,
        url: String,
    },
}

/// Client for one MCP server
pub struct McpClient {
    name: String,
    transport: Transport,
    next_id: AtomicU64,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.name)
            .finish()
    }
}

impl McpClient {
    /// Connect to a configured server and initialize the session
    pub async fn connect(config: &McpServerConfig) -> Result<Self> {
        config.validate()?;

        let transport = match config.transport {
            McpTransportKind::Stdio => {
                let command = config
                    .command
                    .as_deref()
                    .ok_or_else(|| Error::Config("stdio server without command".to_string()))?;
                debug!(
                    "Connecting to MCP server '{}': {} {:?}",
                    config.name, command, config.args
                );

                let mut child = Command::new(command)
                    .args(&config.args)
                    .envs(&config.env)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|e| {
                        Error::Provider(format!(
                            "Failed to spawn MCP server '{}': {}",
                            config.name, e
                        ))
                    })?;

                let stdin = child.stdin.take().ok_or_else(|| {
                    Error::Provider("Failed to capture MCP server stdin".to_string())
                })?;
                let stdout = child.stdout.take().ok_or_else(|| {
                    Error::Provider("Failed to capture MCP server stdout".to_string())
                })?;

                Transport::Stdio {
                    child: Mutex::new(child),
                    stdin: Mutex::new(stdin),
                    stdout: Mutex::new(BufReader::new(stdout)),
                }
            }
            McpTransportKind::Sse => {
                let url = config
                    .url
                    .clone()
                    .ok_or_else(|| Error::Config("sse server without url".to_string()))?;
                debug!("Connecting to MCP server '{}' at {}", config.name, url);
                Transport::Http {
                    client: reqwest::Client::new(),
                    url,
                }
            }
        };

        let client = McpClient {
            name: config.name.clone(),
            transport,
            next_id: AtomicU64::new(1),
        };
        client.initialize().await?;
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn send_request(&self, request: McpRequest) -> Result<McpResponse> {
        let payload = serde_json::to_string(&request)?;
        debug!("MCP request -> {}: {}", self.name, payload);

        let raw = match &self.transport {
            Transport::Stdio { stdin, stdout, .. } => {
                {
                    let mut stdin = stdin.lock().await;
                    stdin.write_all(payload.as_bytes()).await.map_err(|e| {
                        Error::Provider(format!("Failed to write to MCP server: {}", e))
                    })?;
                    stdin.write_all(b"\n").await.map_err(|e| {
                        Error::Provider(format!("Failed to write to MCP server: {}", e))
                    })?;
                    stdin.flush().await.map_err(|e| {
                        Error::Provider(format!("Failed to flush MCP server stdin: {}", e))
                    })?;
                }

                let mut line = String::new();
                {
                    let mut stdout = stdout.lock().await;
                    stdout.read_line(&mut line).await.map_err(|e| {
                        Error::Provider(format!("Failed to read from MCP server: {}", e))
                    })?;
                }
                line.trim().to_string()
            }
            Transport::Http { client, url } => {
                let response = client.post(url).json(&request).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(Error::Provider(format!(
                        "MCP server {} returned {}",
                        self.name, status
                    )));
                }
                response.text().await?
            }
        };

        debug!("MCP response <- {}: {}", self.name, raw);

        let response: McpResponse = serde_json::from_str(&raw).map_err(|e| {
            Error::Provider(format!(
                "Failed to parse MCP response from {}: {} (raw: {})",
                self.name,
                e,
                raw.chars().take(200).collect::<String>()
            ))
        })?;

        if let Some(ref error) = response.error {
            return Err(Error::Provider(format!(
                "MCP error from {}: {} (code {})",
                self.name, error.message, error.code
            )));
        }

        Ok(response)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn initialize(&self) -> Result<()> {
        let response = self.send_request(McpRequest::initialize(self.next_id())).await?;
        if let Some(result) = response.result {
            debug!("MCP server {} initialized: {}", self.name, result);
        }
        Ok(())
    }

    /// List the tools the server exposes
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let response = self.send_request(McpRequest::list_tools(self.next_id())).await?;

        let tools: Vec<McpTool> = response
            .result
            .as_ref()
            .and_then(|result| result.get("tools"))
            .and_then(|tools| serde_json::from_value(tools.clone()).ok())
            .unwrap_or_default();

        debug!("MCP server {} has {} tools", self.name, tools.len());
        Ok(tools)
    }

    /// Invoke a tool on the server
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult> {
        let response = self
            .send_request(McpRequest::call_tool(self.next_id(), name, arguments))
            .await?;

        let result = response.result.unwrap_or_default();
        let tool_result: McpToolResult = serde_json::from_value(result)
            .map_err(|e| Error::Provider(format!("Failed to parse MCP tool result: {}", e)))?;

        if tool_result.is_error {
            warn!("MCP tool {} returned an error result", name);
        }
        Ok(tool_result)
    }
}
