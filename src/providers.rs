use std::sync::Arc;
use std::time::Duration;

use agent_provider::{ModelProvider, ProviderInitError};
use agent_provider_mock::{MockProvider, MOCK_PROVIDER_ID};
use agent_provider_openai::{OpenAiProvider, OpenAiProviderConfig, OPENAI_PROVIDER_ID};

use crate::config::{AppConfig, OpenAiSection};

pub fn provider_from_config(config: &AppConfig) -> Result<Arc<dyn ModelProvider>, ProviderInitError> {
    provider_for_id(&config.provider_id, config.file.openai.as_ref())
}

pub fn provider_for_id(
    provider_id: &str,
    openai: Option<&OpenAiSection>,
) -> Result<Arc<dyn ModelProvider>, ProviderInitError> {
    match provider_id {
        MOCK_PROVIDER_ID => Ok(Arc::new(MockProvider::default())),
        OPENAI_PROVIDER_ID => {
            let section = openai.ok_or_else(|| {
                ProviderInitError::new(
                    "The openai provider needs an 'openai' section in the config file",
                )
            })?;
            Ok(Arc::new(OpenAiProvider::new(openai_config(section)?)?))
        }
        unknown => Err(ProviderInitError::new(format!(
            "Unsupported provider '{unknown}'. Available providers: {MOCK_PROVIDER_ID}, {OPENAI_PROVIDER_ID}"
        ))),
    }
}

fn openai_config(section: &OpenAiSection) -> Result<OpenAiProviderConfig, ProviderInitError> {
    let model = section
        .models
        .first()
        .ok_or_else(|| ProviderInitError::new("openai.models must list at least one model"))?;

    let mut config = OpenAiProviderConfig::new(section.api_key.clone(), model.clone());
    if let Some(base_url) = &section.base_url {
        config = config.with_base_url(base_url.clone());
    }
    if let Some(timeout_sec) = section.timeout_sec {
        config = config.with_timeout(Duration::from_secs(timeout_sec));
    }
    Ok(config)
}
