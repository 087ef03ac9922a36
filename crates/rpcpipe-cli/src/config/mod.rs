//! Named-server configuration and subprocess launch.
//!
//! The file maps server names to the command that starts them:
//!
//! ```json
//! { "mcpServers": { "hello": { "command": "rpcpipe", "args": ["serve-stdio"] } } }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, ChildStdin, Command};

use rpcpipe::StdioClient;

/// File name looked up in the home directory.
pub const CONFIG_FILE_NAME: &str = ".mcp-config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("server config not found: {0}")]
    NotFound(String),

    #[error("server is disabled: {0}")]
    Disabled(String),

    #[error("failed to start server {name}: {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },

    #[error("server {0} started without piped stdio")]
    MissingPipe(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: HashMap<String, ServerConfig>,
}

/// How to start one server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Extra variables layered over the inherited environment.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,

    /// Methods the host may call without confirmation. Carried, not enforced.
    #[serde(rename = "autoApprove", default, skip_serializing_if = "Vec::is_empty")]
    pub auto_approve: Vec<String>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!(
            "Loaded {} server(s) from {}",
            config.mcp_servers.len(),
            path.display()
        );
        Ok(config)
    }

    /// The named entry, unless it is missing or disabled.
    pub fn server(&self, name: &str) -> ConfigResult<&ServerConfig> {
        let server = self
            .mcp_servers
            .get(name)
            .ok_or_else(|| ConfigError::NotFound(name.to_string()))?;
        if server.disabled {
            return Err(ConfigError::Disabled(name.to_string()));
        }
        Ok(server)
    }

    /// Command for the named server. Not yet spawned.
    pub fn build_command(&self, name: &str) -> ConfigResult<Command> {
        let server = self.server(name)?;
        let mut command = Command::new(&server.command);
        command.args(&server.args).envs(&server.env);
        Ok(command)
    }
}

/// `$HOME/.mcp-config.json`, or `.mcp-config.json` in the working directory
/// when no home directory is known.
pub fn default_config_path() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(CONFIG_FILE_NAME),
        None => PathBuf::from(CONFIG_FILE_NAME),
    }
}

/// A running server subprocess and the stdio client talking to it.
pub struct Launched {
    child: Child,
    client: StdioClient<ChildStdin>,
}

impl Launched {
    /// Start the named server with piped stdin/stdout. Its stderr is
    /// inherited so its logs stay visible. The child is killed if this
    /// value is dropped.
    pub fn spawn(config: &Config, name: &str) -> ConfigResult<Self> {
        let mut command = config.build_command(name)?;
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| ConfigError::Spawn {
            name: name.to_string(),
            source,
        })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(ConfigError::MissingPipe(name.to_string()));
        };

        tracing::info!("Launched server {name} (pid {:?})", child.id());
        Ok(Self {
            child,
            client: StdioClient::new(stdout, stdin),
        })
    }

    pub fn client(&self) -> &StdioClient<ChildStdin> {
        &self.client
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Close the child's stdin and kill it if it is still running.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.client.close().await?;
        if self.child.try_wait()?.is_none() {
            self.child.kill().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Launched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launched")
            .field("pid", &self.child.id())
            .finish_non_exhaustive()
    }
}
