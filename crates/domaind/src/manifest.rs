//! Domain manifest — the `Domain` resources the daemon reconciles, as TOML.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, bail};
use domainop_core::Domain;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DomainManifest {
    #[serde(default)]
    pub domains: Vec<Domain>,
}

impl DomainManifest {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read domain manifest {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("invalid domain manifest {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let manifest: DomainManifest = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut keys = BTreeSet::new();
        for domain in &self.domains {
            let key = domain.table_key();
            if !keys.insert(key.clone()) {
                bail!("domain {key} is listed twice");
            }
            if domain.domain_uid().is_empty() {
                bail!("domain {key} has an empty domain_uid");
            }
            if domain.spec.topology.admin_server.is_empty() {
                bail!("domain {key} has no admin server");
            }
        }
        Ok(())
    }

    /// Namespaces that hold at least one domain.
    pub fn namespaces(&self) -> BTreeSet<String> {
        self.domains
            .iter()
            .map(|d| d.namespace().to_string())
            .collect()
    }
}
