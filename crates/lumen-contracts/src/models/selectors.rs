use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    // Names outside the registry pass through for real providers.
    pub fn select(
        &self,
        provider: &str,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let fallback_reason = if let Some(requested_value) = requested {
            if let Some(model) = self.registry.ensure(requested_value, capability) {
                if model.provider == provider {
                    return Ok(ModelSelection {
                        model,
                        requested: Some(requested_value.to_string()),
                        fallback_reason: None,
                    });
                }
                Some(format!(
                    "Requested model '{requested_value}' belongs to provider '{}', not '{provider}'.",
                    model.provider
                ))
            } else if self.registry.get(requested_value).is_none() && provider != "dryrun" {
                return Ok(ModelSelection {
                    model: ModelSpec {
                        name: requested_value.to_string(),
                        provider: provider.to_string(),
                        capabilities: vec![capability.to_string()],
                        context_window: None,
                    },
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            } else {
                Some(format!(
                    "Requested model '{requested_value}' unavailable for capability '{capability}'."
                ))
            }
        } else {
            None
        };

        let candidates = self.registry.by_capability(capability, Some(provider));
        let Some(model) = candidates.first().cloned() else {
            return Err(format!(
                "No '{provider}' models available for capability '{capability}'."
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason,
        })
    }
}
