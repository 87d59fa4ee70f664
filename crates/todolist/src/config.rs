//! Application configuration loaded from environment variables.

/// Demo configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `TODOLIST_SNAPSHOTS` — checkpoint views into the snapshot store (default: `false`)
/// - `TODOLIST_INVARIANT_HASH` — version tag for checkpoints (default: `"cards-v1"`)
/// - `TODOLIST_PRINT_METRICS` — dump Prometheus metrics before exit (default: `false`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_level: String,
    pub snapshots: bool,
    pub invariant_hash: String,
    pub print_metrics: bool,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            snapshots: lookup("TODOLIST_SNAPSHOTS")
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.snapshots),
            invariant_hash: lookup("TODOLIST_INVARIANT_HASH")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.invariant_hash),
            print_metrics: lookup("TODOLIST_PRINT_METRICS")
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.print_metrics),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            snapshots: false,
            invariant_hash: "cards-v1".to_string(),
            print_metrics: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert!(!config.snapshots);
        assert_eq!(config.invariant_hash, "cards-v1");
        assert!(!config.print_metrics);
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        assert_eq!(Config::from_lookup(lookup(&[])), Config::default());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("RUST_LOG", "debug"),
            ("TODOLIST_SNAPSHOTS", "true"),
            ("TODOLIST_INVARIANT_HASH", "cards-v2"),
            ("TODOLIST_PRINT_METRICS", "1"),
        ]));
        assert_eq!(config.log_level, "debug");
        assert!(config.snapshots);
        assert_eq!(config.invariant_hash, "cards-v2");
        assert!(config.print_metrics);
    }

    #[test]
    fn test_unparsable_flag_falls_back() {
        let config = Config::from_lookup(lookup(&[("TODOLIST_SNAPSHOTS", "maybe")]));
        assert!(!config.snapshots);
    }

    #[test]
    fn test_empty_invariant_hash_falls_back() {
        let config = Config::from_lookup(lookup(&[("TODOLIST_INVARIANT_HASH", "")]));
        assert_eq!(config.invariant_hash, "cards-v1");
    }
}
