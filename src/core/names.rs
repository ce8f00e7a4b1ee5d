// src/core/names.rs

use crate::models::{EnvBinding, Parameter};

/// The external names a parameter is known by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterNames {
    /// Long flag without the leading `--` (also used as the clap id of arguments).
    pub cli_flag: String,
    /// Alternative flag. A single character is a short flag.
    pub alias: Option<String>,
    /// Key looked up in maps returned by config producers.
    pub config_key: String,
    /// Environment variable read during fallback, prefix included.
    pub env_key: String,
}

/// Derives every external name of `parameter`. Overrides always win over
/// derived values; the prefix only applies to a derived environment key.
pub fn resolve_names(parameter: &Parameter, env_prefix: Option<&str>) -> ParameterNames {
    let overrides = &parameter.names;

    let env_key = match &parameter.environment {
        EnvBinding::Key(key) => key.clone(),
        _ => overrides
            .env_key
            .clone()
            .unwrap_or_else(|| environment_name(&parameter.name, env_prefix)),
    };

    ParameterNames {
        cli_flag: overrides
            .cli_flag
            .clone()
            .unwrap_or_else(|| dashify(&parameter.name)),
        alias: overrides.alias.clone(),
        config_key: overrides
            .config_key
            .clone()
            .unwrap_or_else(|| parameter.name.clone()),
        env_key,
    }
}

/// `fooBarBaz` -> `foo-bar-baz`, `snake_case` -> `snake-case`.
pub fn dashify(name: &str) -> String {
    segment(name, '-', char::to_ascii_lowercase)
}

/// `fooBarBaz` -> `FOO_BAR_BAZ`, prefixed verbatim when a prefix is given.
pub fn environment_name(name: &str, prefix: Option<&str>) -> String {
    let key = segment(name, '_', char::to_ascii_uppercase);
    match prefix {
        Some(prefix) => format!("{prefix}{key}"),
        None => key,
    }
}

/// Splits on `-`/`_` and on lower-to-upper case boundaries, joining with `separator`.
/// Runs of capitals stay in one segment.
fn segment(name: &str, separator: char, normalize: fn(&char) -> char) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut previous: Option<char> = None;

    for ch in name.chars() {
        if ch == '-' || ch == '_' {
            out.push(separator);
        } else {
            let boundary = previous.is_some_and(|p| p.is_lowercase()) && ch.is_uppercase();
            if boundary {
                out.push(separator);
            }
            out.push(normalize(&ch));
        }
        previous = Some(ch);
    }

    out
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_case_name() {
        let names = resolve_names(&Parameter::option("fooBarBaz"), None);
        assert_eq!(names.cli_flag, "foo-bar-baz");
        assert_eq!(names.env_key, "FOO_BAR_BAZ");
        assert_eq!(names.config_key, "fooBarBaz");
        assert_eq!(names.alias, None);
    }

    #[test]
    fn test_dashify_edge_cases() {
        assert_eq!(dashify("x"), "x");
        assert_eq!(dashify("UPPER"), "upper");
        assert_eq!(dashify("reallylongname"), "reallylongname");
        assert_eq!(dashify("dashified-name-here"), "dashified-name-here");
        assert_eq!(dashify("snake_case"), "snake-case");
        assert_eq!(dashify("parseHTTPHeaders"), "parse-httpheaders");
        assert_eq!(dashify("2faCode"), "2fa-code");
    }

    #[test]
    fn test_environment_name_edge_cases() {
        assert_eq!(environment_name("REALLYLONGNAME", None), "REALLYLONGNAME");
        assert_eq!(environment_name("a-dashified-name", None), "A_DASHIFIED_NAME");
        assert_eq!(environment_name("camelCase", Some("APP_")), "APP_CAMEL_CASE");
    }

    #[test]
    fn test_overrides_win() {
        let param = Parameter::option("camelCase")
            .cli_flag("camel")
            .alias("c")
            .config_key("camel-case")
            .env_key("CAMELCASE");
        let names = resolve_names(&param, Some("APP_"));
        assert_eq!(names.cli_flag, "camel");
        assert_eq!(names.alias.as_deref(), Some("c"));
        assert_eq!(names.config_key, "camel-case");
        // Explicit keys never receive the prefix.
        assert_eq!(names.env_key, "CAMELCASE");
    }

    #[test]
    fn test_explicit_environment_key_beats_names_override() {
        let param = Parameter::option("token")
            .env_key("FROM_NAMES")
            .environment(EnvBinding::Key("FROM_BINDING".into()));
        assert_eq!(resolve_names(&param, Some("APP_")).env_key, "FROM_BINDING");
    }
}
