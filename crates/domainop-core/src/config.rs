//! operator.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::namespace::parse_namespace_list;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OperatorConfig {
    #[serde(default)]
    pub operator: OperatorSection,
    #[serde(default)]
    pub startup: StartupConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub listing: ListingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorSection {
    /// Namespace the operator itself runs in.
    pub namespace: String,
    /// Comma-separated list of namespaces to manage.
    pub domain_namespaces: String,
    /// Seconds between periodic rechecks of every domain.
    pub recheck_interval_secs: u64,
    /// Label selector restricting which namespaces are listed.
    pub namespace_label_selector: Option<String>,
}

impl Default for OperatorSection {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            domain_namespaces: String::new(),
            recheck_interval_secs: 30,
            namespace_label_selector: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Fallback per-cluster startup limit when neither cluster nor domain
    /// sets one. Zero means unlimited.
    pub max_concurrent_startup: u32,
    /// Seconds a started server may take to become ready.
    pub readiness_timeout_secs: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            max_concurrent_startup: 0,
            readiness_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive retries allowed before a call is reported as failed.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    /// Items requested per page.
    pub page_size: u32,
    /// Cap on scan restarts caused by a changing collection. Unset means
    /// the scan restarts for as long as the collection keeps changing.
    pub max_restarts: Option<u32>,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            max_restarts: None,
        }
    }
}

impl OperatorConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: OperatorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values that would make the engine misbehave.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.initial_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.initial_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.listing.page_size == 0 {
            return Err(ConfigError::Invalid(
                "listing.page_size must be positive".to_string(),
            ));
        }
        if self.operator.recheck_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "operator.recheck_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Namespaces to manage; the operator namespace when none are listed.
    pub fn domain_namespaces(&self) -> Vec<String> {
        parse_namespace_list(&self.operator.domain_namespaces, &self.operator.namespace)
    }

    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.operator.recheck_interval_secs)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.startup.readiness_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = OperatorConfig::from_toml("").unwrap();
        assert_eq!(config, OperatorConfig::default());
        assert_eq!(config.startup.max_concurrent_startup, 0);
        assert_eq!(config.listing.max_restarts, None);
        assert_eq!(config.domain_namespaces(), vec!["default"]);
    }

    #[test]
    fn parses_sections() {
        let toml_str = r#"
[operator]
namespace = "weblogic-operator"
domain_namespaces = "ns1, ns2"
recheck_interval_secs = 10

[startup]
max_concurrent_startup = 2
readiness_timeout_secs = 60

[retry]
initial_delay_ms = 100
max_delay_ms = 1000
max_attempts = 3

[listing]
page_size = 50
max_restarts = 4
"#;
        let config = OperatorConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.domain_namespaces(), vec!["ns1", "ns2"]);
        assert_eq!(config.recheck_interval(), Duration::from_secs(10));
        assert_eq!(config.readiness_timeout(), Duration::from_secs(60));
        assert_eq!(config.startup.max_concurrent_startup, 2);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.listing.max_restarts, Some(4));
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let toml_str = r#"
[retry]
initial_delay_ms = 5000
max_delay_ms = 1000
"#;
        let err = OperatorConfig::from_toml(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_page_size() {
        let err = OperatorConfig::from_toml("[listing]\npage_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("page_size"));
    }

    #[test]
    fn renders_back_to_toml() {
        let config = OperatorConfig::default();
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("[startup]"));
        assert_eq!(OperatorConfig::from_toml(&rendered).unwrap(), config);
    }

    #[test]
    fn from_file_reports_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = OperatorConfig::from_file(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
