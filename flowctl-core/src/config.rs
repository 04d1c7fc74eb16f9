//! `ConfigCatalog`: the named provider and MCP-server configurations a workflow
//! resolves against (`spec.md` §3 "WorkflowGraph" inputs, §6 "Environment variables").

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// One named provider entry from `providers.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_endpoint: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
}

impl ProviderConfig {
    /// Expands `${VAR}` / `$VAR` references in `api_key` and `api_endpoint`
    /// against the process environment (`spec.md` §6).
    pub fn expanded(&self) -> ProviderConfig {
        ProviderConfig {
            name: self.name.clone(),
            kind: self.kind.clone(),
            api_key: self.api_key.as_deref().map(expand_env),
            api_endpoint: self.api_endpoint.as_deref().map(expand_env),
            default_model: self.default_model.clone(),
        }
    }
}

/// One named MCP server entry from `servers.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl McpServerConfig {
    /// Expands `${VAR}` / `$VAR` in every `env` map value.
    pub fn expanded(&self) -> McpServerConfig {
        McpServerConfig {
            name: self.name.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), expand_env(v)))
                .collect(),
        }
    }
}

/// Expands both `${VAR}` and bare `$VAR` forms; falls back to the literal text
/// when a referenced variable is unset, matching `shellexpand`'s lenient default.
pub fn expand_env(text: &str) -> String {
    shellexpand::env(text)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| text.to_string())
}

/// The resolved set of providers and servers a workflow run can reference by name.
#[derive(Debug, Clone, Default)]
pub struct ConfigCatalog {
    pub providers: HashMap<String, ProviderConfig>,
    pub servers: HashMap<String, McpServerConfig>,
}

#[derive(Debug, Deserialize)]
struct ProvidersFile {
    #[serde(default)]
    providers: Vec<ProviderConfig>,
}

#[derive(Debug, Deserialize)]
struct ServersFile {
    #[serde(default)]
    servers: Vec<McpServerConfig>,
}

impl ConfigCatalog {
    /// Loads `providers.yaml` and `servers.yaml` from `dir` if present; a missing
    /// directory is not itself an error (an all-default catalog is returned) but a
    /// missing file referenced explicitly by a `config_source` include is.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut catalog = ConfigCatalog::default();

        let providers_path = dir.join("providers.yaml");
        if providers_path.exists() {
            let text = std::fs::read_to_string(&providers_path)?;
            let parsed: ProvidersFile = serde_yaml::from_str(&text)?;
            for p in parsed.providers {
                catalog.providers.insert(p.name.clone(), p);
            }
        }

        let servers_path = dir.join("servers.yaml");
        if servers_path.exists() {
            let text = std::fs::read_to_string(&servers_path)?;
            let parsed: ServersFile = serde_yaml::from_str(&text)?;
            for s in parsed.servers {
                catalog.servers.insert(s.name.clone(), s);
            }
        }

        Ok(catalog)
    }

    pub fn provider(&self, name: &str) -> Result<ProviderConfig> {
        self.providers
            .get(name)
            .map(ProviderConfig::expanded)
            .ok_or_else(|| CoreError::ConfigNotFound(format!("provider '{name}'")))
    }

    pub fn server(&self, name: &str) -> Result<McpServerConfig> {
        self.servers
            .get(name)
            .map(McpServerConfig::expanded)
            .ok_or_else(|| CoreError::ConfigNotFound(format!("server '{name}'")))
    }

    /// Merges a `config_source` YAML fragment (relative to `dir`) into an
    /// already-parsed `serde_yaml::Value` workflow document, shallow-merging
    /// top-level mapping keys with the workflow document taking precedence
    /// (`spec.md` §4.1 step b).
    pub fn resolve_config_source(
        dir: &Path,
        workflow_doc: &mut serde_yaml::Value,
        config_source: &str,
    ) -> Result<()> {
        let path = dir.join(config_source);
        let text = std::fs::read_to_string(&path).map_err(|_| {
            CoreError::ConfigNotFound(format!("config_source '{config_source}'"))
        })?;
        let included: serde_yaml::Value = serde_yaml::from_str(&text)?;

        if let (Some(doc_map), Some(inc_map)) = (workflow_doc.as_mapping_mut(), included.as_mapping())
        {
            for (k, v) in inc_map {
                doc_map.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_env_substitutes_braced_and_bare_forms() {
        std::env::set_var("FLOWCTL_TEST_VAR", "secret");
        assert_eq!(expand_env("${FLOWCTL_TEST_VAR}"), "secret");
        assert_eq!(expand_env("$FLOWCTL_TEST_VAR"), "secret");
        std::env::remove_var("FLOWCTL_TEST_VAR");
    }

    #[test]
    fn missing_provider_is_config_not_found() {
        let catalog = ConfigCatalog::default();
        let err = catalog.provider("nope").unwrap_err();
        assert_eq!(err.code(), "config-not-found");
    }
}
