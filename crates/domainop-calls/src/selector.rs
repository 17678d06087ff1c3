//! Label selector parsing.
//!
//! Supports the equality-based and existence forms: `key`, `!key`,
//! `key=value`, `key==value` and `key!=value`, comma separated. A
//! malformed selector is a configuration error and never retried.

use std::collections::BTreeMap;

use regex::Regex;

use crate::error::{ApiError, ApiResult};

const KEY: &str = r"(?:[a-z0-9](?:[-a-z0-9.]*[a-z0-9])?/)?[A-Za-z0-9](?:[-A-Za-z0-9_.]*[A-Za-z0-9])?";
const VALUE: &str = r"(?:[A-Za-z0-9](?:[-A-Za-z0-9_.]*[A-Za-z0-9])?)?";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Exists(String),
    NotExists(String),
    Equals(String, String),
    NotEquals(String, String),
}

impl Requirement {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::NotExists(key) => !labels.contains_key(key),
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
            Requirement::NotEquals(key, value) => labels.get(key) != Some(value),
        }
    }
}

/// A parsed selector. The empty selector matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn parse(selector: &str) -> ApiResult<Self> {
        let term = Regex::new(&format!(r"^(!?)({KEY})(?:\s*(==|=|!=)\s*({VALUE}))?$"))
            .map_err(|e| ApiError::Invalid(e.to_string()))?;

        let mut requirements = Vec::new();
        for raw in selector.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                if selector.trim().is_empty() {
                    continue;
                }
                return Err(ApiError::Invalid(format!(
                    "empty requirement in label selector {selector:?}"
                )));
            }
            let caps = term.captures(raw).ok_or_else(|| {
                ApiError::Invalid(format!("malformed label selector term {raw:?}"))
            })?;
            let negated = !caps[1].is_empty();
            let key = caps[2].to_string();
            let requirement = match (negated, caps.get(3).map(|m| m.as_str())) {
                (false, None) => Requirement::Exists(key),
                (true, None) => Requirement::NotExists(key),
                (false, Some("!=")) => Requirement::NotEquals(key, caps[4].to_string()),
                (false, Some(_)) => Requirement::Equals(key, caps[4].to_string()),
                (true, Some(_)) => {
                    return Err(ApiError::Invalid(format!(
                        "negation cannot be combined with a value in {raw:?}"
                    )));
                }
            };
            requirements.push(requirement);
        }
        Ok(Self { requirements })
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_equality_and_existence() {
        let selector =
            LabelSelector::parse("weblogic.domainUID=uid1, weblogic.clusterName, !skip, tier!=db")
                .unwrap();
        assert_eq!(
            selector.requirements(),
            &[
                Requirement::Equals("weblogic.domainUID".into(), "uid1".into()),
                Requirement::Exists("weblogic.clusterName".into()),
                Requirement::NotExists("skip".into()),
                Requirement::NotEquals("tier".into(), "db".into()),
            ]
        );

        let pod = labels(&[
            ("weblogic.domainUID", "uid1"),
            ("weblogic.clusterName", "cluster-1"),
        ]);
        assert!(selector.matches(&pod));
        assert!(!selector.matches(&labels(&[("weblogic.domainUID", "uid2")])));
    }

    #[test]
    fn double_equals_and_prefixed_keys() {
        let selector = LabelSelector::parse("app.kubernetes.io/name==operator").unwrap();
        assert!(selector.matches(&labels(&[("app.kubernetes.io/name", "operator")])));
    }

    #[test]
    fn empty_selector_matches_everything() {
        let selector = LabelSelector::parse("").unwrap();
        assert!(selector.requirements().is_empty());
        assert!(selector.matches(&labels(&[("a", "b")])));
    }

    #[test]
    fn malformed_selectors_are_invalid() {
        for bad in ["a=b,,c", "=value", "key=bad value", "!key=value", "-key"] {
            let err = LabelSelector::parse(bad).unwrap_err();
            assert!(matches!(err, ApiError::Invalid(_)), "{bad}: {err}");
        }
    }
}
