//! Configuration structures and loading logic

use crate::models::download::DEFAULT_HUB_ENDPOINT;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main host configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    pub bind_address: String,
    pub api_port: u16,
    /// Root directory holding one subdirectory per downloaded model
    pub models_dir: PathBuf,
    /// Manifest declaring the models that may be pulled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    pub hub_endpoint: String,
    /// Sent as a bearer token on hub requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_token: Option<String>,
    /// Runtime worker threads (runtime default when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_threads: Option<usize>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            api_port: default_api_port(),
            models_dir: default_models_dir(),
            manifest: None,
            hub_endpoint: DEFAULT_HUB_ENDPOINT.to_string(),
            hub_token: None,
            worker_threads: None,
        }
    }
}

impl HostConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(address) = std::env::var("MODEL_HOST_BIND_ADDRESS") {
            config.bind_address = address;
        }
        if let Ok(port) = std::env::var("MODEL_HOST_API_PORT") {
            config.api_port = port.parse().context("Invalid MODEL_HOST_API_PORT value")?;
        }
        if let Ok(dir) = std::env::var("MODEL_HOST_MODELS_DIR") {
            config.models_dir = PathBuf::from(dir);
        }
        if let Ok(manifest) = std::env::var("MODEL_HOST_MANIFEST") {
            config.manifest = Some(PathBuf::from(manifest));
        }
        if let Ok(endpoint) = std::env::var("MODEL_HOST_HUB_ENDPOINT") {
            config.hub_endpoint = endpoint;
        }
        if let Ok(token) = std::env::var("HF_TOKEN")
            && !token.is_empty()
        {
            config.hub_token = Some(token);
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_port < 1024 {
            anyhow::bail!("API port must be >= 1024 (got {})", self.api_port);
        }

        if self.worker_threads == Some(0) {
            anyhow::bail!("Worker thread count must be at least 1");
        }

        if !(self.hub_endpoint.starts_with("http://") || self.hub_endpoint.starts_with("https://"))
        {
            anyhow::bail!(
                "Hub endpoint must be an http(s) URL (got '{}')",
                self.hub_endpoint
            );
        }

        if !self.models_dir.exists() {
            std::fs::create_dir_all(&self.models_dir).with_context(|| {
                format!("Cannot create models directory: {:?}", self.models_dir)
            })?;
        }

        Ok(())
    }

    /// Socket address string for the API listener
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.api_port)
    }
}

// Default functions
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}
fn default_api_port() -> u16 {
    8080
}
fn default_models_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("model-host")
        .join("models")
}
