use crate::auth::Credential;
use crate::config::{ConfigError, ModelSettings};
use crate::providers::OpenAIProvider;
use crate::traits::Provider;

/// Builds the Azure OpenAI backend described by `settings`.
pub fn create_provider(
    settings: &ModelSettings,
    credential: Credential,
) -> Result<Box<dyn Provider>, ConfigError> {
    let endpoint = settings
        .endpoint
        .as_deref()
        .ok_or(ConfigError::Missing("AZURE_OPENAI_ENDPOINT"))?;
    let deployment = settings
        .deployment
        .as_deref()
        .ok_or(ConfigError::Missing("AZURE_OPENAI_DEPLOYMENT_NAME"))?;

    let provider = OpenAIProvider::new(credential)
        .with_base_url(endpoint)
        .with_azure_deployment(deployment, settings.api_version.clone());
    Ok(Box::new(provider))
}
