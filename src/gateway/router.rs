use crate::config::{ApiStyle, Config, ProviderConfig};
use crate::error::{PermanentKind, ProviderError};
use crate::gateway::retry::{RetryPolicy, RetryingGateway};
use crate::gateway::{AnthropicGateway, ModelGateway, OpenAiCompatGateway};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Splits `provider/model` at the first slash. The model part may itself
/// contain slashes, as OpenRouter ids do.
pub fn split_model_id(model_id: &str) -> Result<(&str, &str), ProviderError> {
    match model_id.split_once('/') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider, model))
        }
        _ => Err(ProviderError::permanent(
            PermanentKind::NotConfigured,
            format!("model id '{model_id}' is not of the form provider/model"),
        )),
    }
}

/// Maps `provider/model` ids to configured gateways.
pub struct ProviderRouter {
    providers: Vec<ProviderConfig>,
    timeout: Duration,
    retry: RetryPolicy,
    overrides: HashMap<String, Arc<dyn ModelGateway>>,
}

impl ProviderRouter {
    pub fn from_config(config: &Config) -> Self {
        Self {
            providers: config.providers.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            retry: RetryPolicy::from(&config.retry),
            overrides: HashMap::new(),
        }
    }

    /// Serves every model of `provider` with the given gateway as is.
    pub fn register(&mut self, provider: &str, gateway: Arc<dyn ModelGateway>) {
        self.overrides.insert(provider.to_string(), gateway);
    }

    /// One line per provider with the models it offers and where its key
    /// comes from. Registered gateways come last.
    pub fn describe_providers(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .providers
            .iter()
            .filter(|p| !self.overrides.contains_key(&p.name))
            .map(|p| {
                let models = if p.models.is_empty() {
                    "any model".to_string()
                } else {
                    p.models.join(", ")
                };
                let key = match &p.api_key_env_var {
                    Some(var) if std::env::var(var).is_ok_and(|k| !k.is_empty()) => {
                        format!("key from {var}")
                    }
                    Some(var) => format!("{var} not set"),
                    None => "no key needed".to_string(),
                };
                format!("{}: {models} ({key})", p.name)
            })
            .collect();
        let mut registered: Vec<&String> = self.overrides.keys().collect();
        registered.sort();
        lines.extend(
            registered
                .into_iter()
                .map(|name| format!("{name}: any model (registered gateway)")),
        );
        lines
    }

    /// Returns the gateway for a model id and the provider-local model name.
    pub fn resolve(&self, model_id: &str) -> Result<(Arc<dyn ModelGateway>, String), ProviderError> {
        self.resolve_with(model_id, |var| std::env::var(var).ok())
    }

    pub(crate) fn resolve_with(
        &self,
        model_id: &str,
        lookup_key: impl Fn(&str) -> Option<String>,
    ) -> Result<(Arc<dyn ModelGateway>, String), ProviderError> {
        let (provider_name, model) = split_model_id(model_id)?;

        if let Some(gateway) = self.overrides.get(provider_name) {
            return Ok((gateway.clone(), model.to_string()));
        }

        let provider = self
            .providers
            .iter()
            .find(|p| p.name == provider_name)
            .ok_or_else(|| {
                ProviderError::permanent(
                    PermanentKind::NotConfigured,
                    format!("unknown provider '{provider_name}'"),
                )
            })?;
        if !provider.supports(model) {
            return Err(ProviderError::permanent(
                PermanentKind::NotConfigured,
                format!("provider '{provider_name}' does not offer model '{model}'"),
            ));
        }

        let api_key = match &provider.api_key_env_var {
            Some(var) => Some(lookup_key(var).filter(|k| !k.is_empty()).ok_or_else(|| {
                ProviderError::permanent(
                    PermanentKind::NotConfigured,
                    format!("environment variable {var} is not set"),
                )
            })?),
            None => None,
        };

        let gateway: Arc<dyn ModelGateway> = match provider.api_style {
            ApiStyle::Openai => Arc::new(OpenAiCompatGateway::new(
                &provider.name,
                &provider.api_base,
                api_key,
                self.timeout,
            )?),
            ApiStyle::Anthropic => Arc::new(AnthropicGateway::new(
                &provider.name,
                &provider.api_base,
                api_key.unwrap_or_default(),
                self.timeout,
            )?),
        };
        tracing::debug!(provider = provider_name, model, "resolved model");

        Ok((
            Arc::new(RetryingGateway::new(gateway, self.retry)),
            model.to_string(),
        ))
    }
}
