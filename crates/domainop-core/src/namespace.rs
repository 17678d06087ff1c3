//! Namespace selection helpers.

/// Parse a comma-separated list of namespace names.
///
/// Entries are trimmed and empty entries dropped. An empty list falls back
/// to the operator's own namespace.
pub fn parse_namespace_list(namespaces: &str, operator_namespace: &str) -> Vec<String> {
    let parsed: Vec<String> = namespaces
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if parsed.is_empty() {
        vec![operator_namespace.to_string()]
    } else {
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_and_trims() {
        assert_eq!(
            parse_namespace_list(" ns1,ns2 , ns3", "op"),
            vec!["ns1", "ns2", "ns3"]
        );
    }

    #[test]
    fn drops_empty_entries() {
        assert_eq!(parse_namespace_list("ns1,,ns2,", "op"), vec!["ns1", "ns2"]);
    }

    #[test]
    fn empty_list_falls_back_to_operator_namespace() {
        assert_eq!(parse_namespace_list("", "op"), vec!["op"]);
        assert_eq!(parse_namespace_list(" , ", "op"), vec!["op"]);
    }
}
