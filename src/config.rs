use crate::error::ConfigError;
use crate::parser::DEFAULT_AGGREGATES;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_AGGREGATES: &str = "JPQL_EXPR_AGGREGATES";
pub const ENV_CACHE_LIMIT: &str = "JPQL_EXPR_CACHE_LIMIT";
pub const ENV_CACHE: &str = "JPQL_EXPR_CACHE";

/// Settings of an [`crate::ExpressionFactory`].
///
/// Missing JSON fields fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    /// Function names parsed as aggregates when called with a single path.
    pub aggregate_functions: Vec<String>,
    pub cache_enabled: bool,
    /// `None` leaves the parse cache unbounded.
    pub max_cache_entries: Option<usize>,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            aggregate_functions: DEFAULT_AGGREGATES.iter().map(|s| s.to_string()).collect(),
            cache_enabled: true,
            max_cache_entries: None,
        }
    }
}

impl FactoryConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Defaults overridden from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_AGGREGATES) {
            let names: Vec<String> = value
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if names.is_empty() {
                log::warn!("{} is set but lists no functions; keeping defaults", ENV_AGGREGATES);
            } else {
                self.aggregate_functions = names;
            }
        }
        if let Some(value) = lookup(ENV_CACHE_LIMIT) {
            let limit = value
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::Env { variable: ENV_CACHE_LIMIT, value: value.clone() })?;
            self.max_cache_entries = Some(limit);
        }
        if let Some(value) = lookup(ENV_CACHE) {
            match value.trim().to_ascii_lowercase().as_str() {
                "off" | "false" | "0" => self.cache_enabled = false,
                "on" | "true" | "1" => self.cache_enabled = true,
                _ => return Err(ConfigError::Env { variable: ENV_CACHE, value }),
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = FactoryConfig::from_json(r#"{"max_cache_entries": 10}"#).unwrap();
        assert_eq!(config.max_cache_entries, Some(10));
        assert!(config.cache_enabled);
        assert_eq!(config.aggregate_functions.len(), 5);
        assert!(FactoryConfig::from_json("{").is_err());
    }

    #[test]
    fn environment_overrides() {
        let config = FactoryConfig::default()
            .apply_env(env(&[(ENV_AGGREGATES, "sum, median"), (ENV_CACHE_LIMIT, "64"), (ENV_CACHE, "off")]))
            .unwrap();
        assert_eq!(config.aggregate_functions, vec!["SUM".to_string(), "MEDIAN".to_string()]);
        assert_eq!(config.max_cache_entries, Some(64));
        assert!(!config.cache_enabled);
    }

    #[test]
    fn invalid_environment_values() {
        let err = FactoryConfig::default().apply_env(env(&[(ENV_CACHE_LIMIT, "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { variable: ENV_CACHE_LIMIT, .. }));
        assert!(FactoryConfig::default().apply_env(env(&[(ENV_CACHE, "maybe")])).is_err());
    }

    #[test]
    fn file_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jx.json");
        std::fs::write(&path, r#"{"aggregate_functions": ["COUNT"], "cache_enabled": false}"#).unwrap();
        let config = FactoryConfig::from_file(&path).unwrap();
        assert_eq!(config.aggregate_functions, vec!["COUNT".to_string()]);
        assert!(!config.cache_enabled);
        assert!(FactoryConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
