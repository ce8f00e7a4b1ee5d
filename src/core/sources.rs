// src/core/sources.rs

use crate::models::{Value, ValueMap};
use anyhow::{Context, Result, anyhow};
use std::{collections::HashMap, fmt, fs, path::PathBuf};

// --- ENVIRONMENT ---

/// Read access to environment variables.
pub trait Environment: Send + Sync + fmt::Debug {
    /// The value of `key`, if set.
    fn var(&self, key: &str) -> Option<String>;
}

/// The environment of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// A fixed set of variables, independent of the process environment.
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    /// An environment with no variables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces one variable.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl Environment for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

// --- CONFIG FILES ---

/// A config producer reading a TOML file. `~` and `$VAR` in the path are
/// expanded on every call; a missing file yields an empty map.
pub fn toml_file(path: impl Into<String>) -> impl Fn() -> Result<ValueMap> + Send + Sync + 'static {
    let template = path.into();
    move || {
        let Some((path, content)) = read_optional(&template)? else {
            return Ok(ValueMap::new());
        };
        let table: toml::Table = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config at '{}'", path.display()))?;
        let value = serde_json::to_value(table)
            .with_context(|| format!("Failed to convert TOML config at '{}'", path.display()))?;
        into_map(value, &path)
    }
}

/// A config producer reading a JSON file. The document must be an object.
pub fn json_file(path: impl Into<String>) -> impl Fn() -> Result<ValueMap> + Send + Sync + 'static {
    let template = path.into();
    move || {
        let Some((path, content)) = read_optional(&template)? else {
            return Ok(ValueMap::new());
        };
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON config at '{}'", path.display()))?;
        into_map(value, &path)
    }
}

fn read_optional(template: &str) -> Result<Option<(PathBuf, String)>> {
    let expanded = shellexpand::full(template)
        .map_err(|e| anyhow!("Failed to expand config path '{}': {}", template, e))?;
    let path = PathBuf::from(expanded.into_owned());

    if !path.exists() {
        log::debug!("Config file '{}' not found, skipping", path.display());
        return Ok(None);
    }

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file at '{}'", path.display()))?;
    log::debug!("Loaded config file '{}'", path.display());
    Ok(Some((path, content)))
}

fn into_map(value: Value, path: &std::path::Path) -> Result<ValueMap> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!(
            "Config at '{}' must be a table of values, found {}",
            path.display(),
            other
        )),
    }
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_map_env() {
        let env: MapEnv = [("APP_PORT", "8080")].into_iter().collect();
        assert_eq!(env.var("APP_PORT").as_deref(), Some("8080"));
        assert_eq!(env.var("MISSING"), None);
        assert_eq!(MapEnv::new().with("A", "1").var("A").as_deref(), Some("1"));
    }

    #[test]
    fn test_toml_file_producer() {
        let file = temp_file(".toml", "name = \"api\"\nport = 8080\ntags = [\"a\", \"b\"]\n");
        let producer = toml_file(file.path().to_string_lossy());
        let map = producer().unwrap();
        assert_eq!(map.get("name"), Some(&json!("api")));
        assert_eq!(map.get("port"), Some(&json!(8080)));
        assert_eq!(map.get("tags"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn test_json_file_producer() {
        let file = temp_file(".json", r#"{ "region": "eu-west-1" }"#);
        let map = json_file(file.path().to_string_lossy())().unwrap();
        assert_eq!(map.get("region"), Some(&json!("eu-west-1")));

        let list = temp_file(".json", "[1, 2]");
        let err = json_file(list.path().to_string_lossy())().unwrap_err();
        assert!(err.to_string().contains("must be a table"));
    }

    #[test]
    fn test_missing_file_is_empty_and_bad_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(toml_file(missing.to_string_lossy())().unwrap().is_empty());

        let broken = temp_file(".toml", "name = ");
        let err = toml_file(broken.path().to_string_lossy())().unwrap_err();
        assert!(err.to_string().contains("Failed to parse TOML config"));
    }
}
