//! Shell-style variable expansion for server launch settings.
//!
//! Supports `$VAR` and `${VAR}`. Undefined variables expand to the empty
//! string. Expansion is single-pass: a value substituted in is never
//! expanded again.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([^}]*)\}|([A-Za-z_][A-Za-z0-9_]*))").expect("variable pattern is valid")
});

/// Expand variables in `input` against the process environment.
pub fn expand_env(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

/// Expand variables in `input` using `lookup` to resolve names.
pub fn expand_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains('$') {
        return input.to_string();
    }
    VAR_PATTERN
        .replace_all(input, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(name).unwrap_or_default()
        })
        .into_owned()
}

/// Expand every value of an environment overlay.
pub fn expand_map(env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    env.iter()
        .map(|(k, v)| (k.clone(), expand_env(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(name: &str) -> Option<String> {
        match name {
            "HOME" => Some("/home/tester".to_string()),
            "TOKEN" => Some("s3cret".to_string()),
            "LOOP" => Some("$HOME".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_braced_and_bare_forms() {
        assert_eq!(expand_with("${HOME}/data", vars), "/home/tester/data");
        assert_eq!(expand_with("$HOME/data", vars), "/home/tester/data");
        assert_eq!(expand_with("Bearer ${TOKEN}", vars), "Bearer s3cret");
    }

    #[test]
    fn test_undefined_expands_to_empty() {
        assert_eq!(expand_with("a${MISSING}b", vars), "ab");
        assert_eq!(expand_with("$MISSING", vars), "");
    }

    #[test]
    fn test_no_variables_is_identity() {
        assert_eq!(expand_with("plain --flag=1", vars), "plain --flag=1");
        assert_eq!(expand_with("cost: 5$", vars), "cost: 5$");
    }

    #[test]
    fn test_single_pass() {
        assert_eq!(expand_with("${LOOP}", vars), "$HOME");
    }

    #[test]
    fn test_expand_env_uses_process_environment() {
        let path = std::env::var("PATH").unwrap_or_default();
        assert_eq!(expand_env("${PATH}"), path);
    }
}
