use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::worker::WorkerConfig;

/// Runtime configuration, resolved once at startup. Env vars win; everything
/// has a local-dev default.
#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub environment: String,
    pub frontend_url: Option<String>,
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    pub worker: WorkerConfig,
    pub tool_timeout: Duration,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let host = env_var("DESKFLOW_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = match env_var("PORT") {
            Some(v) => v.parse().context("PORT must be a number")?,
            None => 3000,
        };
        let data_dir = env_var("DESKFLOW_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".deskflow")
            });
        let environment = env_var("DESKFLOW_ENV").unwrap_or_else(|| "development".to_string());
        let frontend_url = env_var("FRONTEND_URL");

        let openai_api_key = env_var("OPENAI_API_KEY").unwrap_or_default();
        let openai_base_url = env_var("OPENAI_BASE_URL");

        // The worker is a Python MCP toolkit by convention; both the
        // interpreter and the script path can be overridden.
        let command = env_var("PYTHON_PATH").unwrap_or_else(|| "python3".to_string());
        let script = env_var("DESKFLOW_WORKER_SCRIPT").unwrap_or_else(|| "mcp_toolkit.py".to_string());
        let worker = WorkerConfig::new(command, vec![script]);

        let tool_timeout = match env_var("DESKFLOW_TOOL_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(
                v.parse()
                    .context("DESKFLOW_TOOL_TIMEOUT_SECS must be a number")?,
            ),
            None => Duration::from_secs(30),
        };

        Ok(Self {
            host,
            port,
            data_dir,
            environment,
            frontend_url,
            openai_api_key,
            openai_base_url,
            worker,
            tool_timeout,
        })
    }
}
