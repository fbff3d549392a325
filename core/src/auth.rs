//! Model backend credentials. Acquired once at startup and handed to the
//! provider by value.

use crate::config::{ConfigError, ModelAuth, ModelSettings};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

pub const COGNITIVE_SERVICES_RESOURCE: &str = "https://cognitiveservices.azure.com";

#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey(String),
    Bearer(String),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("Credential::ApiKey(<redacted>)"),
            Self::Bearer(_) => f.write_str("Credential::Bearer(<redacted>)"),
        }
    }
}

impl Credential {
    /// Header name and value to attach to model requests.
    pub fn header(&self) -> (&'static str, String) {
        match self {
            Self::ApiKey(key) => ("api-key", key.clone()),
            Self::Bearer(token) => ("Authorization", format!("Bearer {token}")),
        }
    }
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn acquire(&self) -> Result<Credential>;
}

pub struct StaticTokenProvider {
    credential: Credential,
}

impl StaticTokenProvider {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn acquire(&self) -> Result<Credential> {
        Ok(self.credential.clone())
    }
}

/// Asks a logged-in Azure CLI for an access token.
pub struct AzureCliTokenProvider {
    resource: String,
}

impl Default for AzureCliTokenProvider {
    fn default() -> Self {
        Self {
            resource: COGNITIVE_SERVICES_RESOURCE.to_string(),
        }
    }
}

#[async_trait]
impl TokenProvider for AzureCliTokenProvider {
    async fn acquire(&self) -> Result<Credential> {
        let output = Command::new("az")
            .args([
                "account",
                "get-access-token",
                "--resource",
                self.resource.as_str(),
                "--query",
                "accessToken",
                "--output",
                "tsv",
            ])
            .output()
            .await
            .context("Failed to run the Azure CLI (is `az` installed?)")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("az account get-access-token failed: {}", stderr.trim()));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(anyhow!("Azure CLI returned an empty access token"));
        }

        Ok(Credential::Bearer(token))
    }
}

pub fn token_provider(settings: &ModelSettings) -> Result<Box<dyn TokenProvider>, ConfigError> {
    match settings.auth {
        ModelAuth::ApiKey => {
            let key = settings
                .api_key
                .clone()
                .ok_or(ConfigError::Missing("AZURE_OPENAI_API_KEY"))?;
            Ok(Box::new(StaticTokenProvider::new(Credential::ApiKey(key))))
        }
        ModelAuth::BearerEnv => {
            let token = settings
                .bearer_token
                .clone()
                .ok_or(ConfigError::Missing("AZURE_OPENAI_AD_TOKEN"))?;
            Ok(Box::new(StaticTokenProvider::new(Credential::Bearer(token))))
        }
        ModelAuth::AzureCli => Ok(Box::new(AzureCliTokenProvider::default())),
    }
}

/// One-time credential acquisition for the model backend.
pub async fn acquire_credential(settings: &ModelSettings) -> Result<Credential> {
    let provider = token_provider(settings)?;
    let credential = provider
        .acquire()
        .await
        .context("Failed to acquire model backend credential")?;
    info!(auth = ?settings.auth, "Model backend credential acquired");
    Ok(credential)
}
