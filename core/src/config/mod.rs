use crate::client::{AggregatorPolicy, ConnectionDescriptor};
use crate::server::EndpointConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const TOOLMESH_DIR: &str = ".toolmesh";
const DEFAULT_SOURCE_NAME: &str = "parts";
const DEFAULT_API_VERSION: &str = "2024-12-01-preview";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {setting}: {reason}")]
    Invalid { setting: String, reason: String },

    #[error("failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSettings {
    pub name: String,
    pub bind: String,
    pub api_key_header: String,
    pub api_key: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            name: "revparts".to_string(),
            bind: "0.0.0.0:8080".to_string(),
            api_key_header: "x-api-key".to_string(),
            api_key: None,
        }
    }
}

impl ServerSettings {
    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig {
            name: self.name.clone(),
            api_key_header: self.api_key_header.clone(),
            api_key: self.api_key.clone(),
            ..EndpointConfig::default()
        }
    }
}

/// How the model backend credential is obtained.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelAuth {
    /// `api_key` (or `AZURE_OPENAI_API_KEY`) sent as an `api-key` header.
    #[default]
    ApiKey,
    /// A bearer token taken from `AZURE_OPENAI_AD_TOKEN`.
    BearerEnv,
    /// A bearer token minted by the Azure CLI.
    AzureCli,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelSettings {
    /// Azure OpenAI resource endpoint, e.g. `https://<resource>.openai.azure.com`.
    pub endpoint: Option<String>,
    pub deployment: Option<String>,
    pub api_version: String,
    pub auth: ModelAuth,
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub bearer_token: Option<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            deployment: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            auth: ModelAuth::default(),
            api_key: None,
            bearer_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentSettings {
    /// `0` disables the guard.
    pub max_turns: usize,
    pub model_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    pub system_prompt: Option<String>,
    #[serde(flatten)]
    pub policy: AggregatorPolicy,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: 20,
            model_timeout_secs: 120,
            tool_timeout_secs: 60,
            system_prompt: None,
            policy: AggregatorPolicy::default(),
        }
    }
}

impl AgentSettings {
    pub fn max_turns(&self) -> Option<usize> {
        (self.max_turns > 0).then_some(self.max_turns)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub server: ServerSettings,
    pub sources: Vec<ConnectionDescriptor>,
    pub model: ModelSettings,
    pub agent: AgentSettings,
}

pub fn get_toolmesh_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(TOOLMESH_DIR)
}

pub fn get_config_path() -> PathBuf {
    get_toolmesh_dir().join("config.toml")
}

impl Config {
    /// Reads the config file if it exists, then overlays the process
    /// environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = get_config_path();
        let mut config = if path.exists() {
            load_config(&path)?
        } else {
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlays settings from `lookup`, normally `std::env::var`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("MCP_API_KEY");
        if let Some(url) = get("MCP_SERVER_URL") {
            let name = get("MCP_SERVER_NAME").unwrap_or_else(|| DEFAULT_SOURCE_NAME.to_string());
            let mut descriptor = ConnectionDescriptor::new(name, source_url(&url));
            if let Some(key) = &api_key {
                descriptor = descriptor.with_header(self.server.api_key_header.clone(), key.clone());
            }
            self.sources.retain(|s| s.name != descriptor.name);
            self.sources.push(descriptor);
        }
        if let Some(key) = api_key {
            self.server.api_key = Some(key);
        }
        if let Some(bind) = get("MCP_BIND") {
            self.server.bind = bind;
        }

        if let Some(endpoint) = get("AZURE_OPENAI_ENDPOINT") {
            self.model.endpoint = Some(endpoint);
        }
        if let Some(deployment) = get("AZURE_OPENAI_DEPLOYMENT_NAME") {
            self.model.deployment = Some(deployment);
        }
        if let Some(version) = get("AZURE_OPENAI_API_VERSION") {
            self.model.api_version = version;
        }
        if let Some(key) = get("AZURE_OPENAI_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Some(token) = get("AZURE_OPENAI_AD_TOKEN") {
            self.model.bearer_token = Some(token);
        }
    }

    /// Everything `chat` and `tools` need, checked before any network
    /// activity.
    pub fn validate_client(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::Missing("MCP_SERVER_URL (or [[sources]])"));
        }
        for source in &self.sources {
            url::Url::parse(&source.url).map_err(|e| ConfigError::Invalid {
                setting: format!("sources.{}.url", source.name),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn validate_model(&self) -> Result<(), ConfigError> {
        let endpoint = self
            .model
            .endpoint
            .as_deref()
            .ok_or(ConfigError::Missing("AZURE_OPENAI_ENDPOINT"))?;
        url::Url::parse(endpoint).map_err(|e| ConfigError::Invalid {
            setting: "model.endpoint".to_string(),
            reason: e.to_string(),
        })?;

        if self.model.deployment.is_none() {
            return Err(ConfigError::Missing("AZURE_OPENAI_DEPLOYMENT_NAME"));
        }

        match self.model.auth {
            ModelAuth::ApiKey if self.model.api_key.is_none() => {
                Err(ConfigError::Missing("AZURE_OPENAI_API_KEY"))
            }
            ModelAuth::BearerEnv if self.model.bearer_token.is_none() => {
                Err(ConfigError::Missing("AZURE_OPENAI_AD_TOKEN"))
            }
            _ => Ok(()),
        }
    }

    pub fn validate_server(&self) -> Result<(), ConfigError> {
        self.server
            .bind
            .parse::<std::net::SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                setting: "server.bind".to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

/// Accepts both a bare server URL and one that already ends in `/mcp`.
fn source_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with(crate::server::MCP_PATH) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{}", crate::server::MCP_PATH)
    }
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
