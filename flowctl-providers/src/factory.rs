//! Builds a [`ProviderClient`] from a named [`ProviderConfig`]
//! (`spec.md` §4.3 "Provider resolution").

use std::sync::Arc;

use flowctl_core::config::{ConfigCatalog, ProviderConfig};

use crate::{client::ProviderClient, error::{ProviderError, Result}, genai_client::GenAiProvider};

/// Resolves `name` in `catalog` and constructs its backing client. Every
/// provider `kind` currently routes through [`GenAiProvider`]; `kind` is kept
/// on [`ProviderConfig`] so future non-genai backends (a local model server,
/// say) can be dispatched on without touching callers.
pub fn build_client(catalog: &ConfigCatalog, name: &str) -> Result<Arc<dyn ProviderClient>> {
    let config = catalog
        .provider(name)
        .map_err(|_| ProviderError::UnknownProvider(name.to_string()))?;
    Ok(build_client_from_config(&config))
}

pub fn build_client_from_config(config: &ProviderConfig) -> Arc<dyn ProviderClient> {
    Arc::new(GenAiProvider::new(
        config.name.clone(),
        config.api_key.clone(),
        config.api_endpoint.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_rejected() {
        let catalog = ConfigCatalog::default();
        let err = build_client(&catalog, "nope").unwrap_err();
        assert!(matches!(err, ProviderError::UnknownProvider(_)));
    }
}
