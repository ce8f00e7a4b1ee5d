// src/core/validation.rs

//! # Validation Adapter
//!
//! Runs each resolved value through its parameter's schema and assembles the
//! validated `Props`. All issues are collected before failing, so a user sees
//! every rejected field at once.

use crate::{
    core::registry::{ResolutionContext, ResolvedParameter},
    error::Error,
    models::{Value, ValueMap},
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::{fmt, sync::Arc};

// --- SCHEMA SEAM ---

/// A synchronous validation and coercion rule.
pub trait Schema: Send + Sync + fmt::Debug {
    /// Returns the (possibly coerced) value or the reason it was rejected.
    /// Receives `Value::Null` when the parameter has no value.
    fn parse(&self, value: Value) -> Result<Value, Issue>;
}

/// A validation rule that has to suspend, e.g. to consult a remote service.
#[async_trait]
pub trait AsyncSchema: Send + Sync + fmt::Debug {
    /// Like `Schema::parse`, but may suspend.
    async fn parse(&self, value: Value) -> Result<Value, Issue>;
}

/// The validator attached to a parameter.
#[derive(Debug, Clone)]
pub enum Validator {
    /// Runs on either entry point.
    Sync(Arc<dyn Schema>),
    /// Requires `parse_async`.
    Async(Arc<dyn AsyncSchema>),
}

/// One rejected field. `path` starts at the parameter name and descends into
/// nested values (list indices, object keys).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Parameter name first, then nested segments.
    pub path: Vec<String>,
    /// What was wrong with the value.
    pub message: String,
}

impl Issue {
    /// An issue at the root of the value.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            path: Vec::new(),
            message: message.into(),
        }
    }

    /// Prepends a path segment.
    pub fn at(mut self, segment: impl Into<String>) -> Self {
        self.path.insert(0, segment.into());
        self
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path.join("."), self.message)
        }
    }
}

/// Every issue found while validating one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Name of the command that failed validation.
    pub command: String,
    /// In declaration order of the parameters.
    pub issues: Vec<Issue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid input for command '{}':", self.command)?;
        for issue in &self.issues {
            write!(f, "\n  - {issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

// --- VALIDATED OUTPUT ---

/// The validated properties of a command, keyed by parameter name.
/// Parameters that resolved to no value are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Props(ValueMap);

impl Props {
    /// The raw validated value of `name`.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Deserializes one property. A missing property deserializes from `null`,
    /// so `Option<T>` targets yield `None`.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> serde_json::Result<T> {
        let value = self.0.get(name).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value)
    }

    /// Deserializes all properties into a typed struct.
    pub fn deserialize<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }

    /// All properties as a map.
    pub fn as_map(&self) -> &ValueMap {
        &self.0
    }

    /// Consumes the props, returning the underlying map.
    pub fn into_map(self) -> ValueMap {
        self.0
    }
}

/// Input that matched no declared parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extras {
    /// Surplus positional operands.
    pub args: Vec<Value>,
    /// Config entries whose key matched no parameter.
    pub props: ValueMap,
}

// --- VALIDATION ---

/// Validates every parameter of `context` with synchronous schemas only.
pub fn validate(context: &ResolutionContext) -> Result<Props, Error> {
    let mut props = ValueMap::new();
    let mut issues = Vec::new();

    for (name, entry) in &context.entries {
        let value = entry.value.clone().unwrap_or(Value::Null);
        let absent = value.is_null() && !entry.binding.parameter.required;
        if let Err(issue) = check_choices(entry, &value) {
            issues.push(issue.at(name.clone()));
            continue;
        }

        let parsed = match &entry.binding.parameter.validator {
            None => Ok(value),
            Some(Validator::Sync(schema)) => schema.parse(value),
            Some(Validator::Async(_)) => {
                return Err(Error::ModeMismatch {
                    command: context.command.clone(),
                    reason: format!("parameter '{name}' has an async validator"),
                });
            }
        };
        collect(&mut props, &mut issues, name, parsed, absent);
    }

    finish(&context.command, props, issues)
}

/// Validates every parameter of `context`, awaiting async schemas one at a
/// time in declaration order.
pub async fn validate_async(context: &ResolutionContext) -> Result<Props, Error> {
    let mut props = ValueMap::new();
    let mut issues = Vec::new();

    for (name, entry) in &context.entries {
        let value = entry.value.clone().unwrap_or(Value::Null);
        let absent = value.is_null() && !entry.binding.parameter.required;
        if let Err(issue) = check_choices(entry, &value) {
            issues.push(issue.at(name.clone()));
            continue;
        }

        let parsed = match &entry.binding.parameter.validator {
            None => Ok(value),
            Some(Validator::Sync(schema)) => schema.parse(value),
            Some(Validator::Async(schema)) => schema.parse(value).await,
        };
        collect(&mut props, &mut issues, name, parsed, absent);
    }

    finish(&context.command, props, issues)
}

/// An optional parameter nothing supplied is left out when its schema has
/// no answer for `null`; `with_default` and `optional` still see it.
fn collect(
    props: &mut ValueMap,
    issues: &mut Vec<Issue>,
    name: &str,
    parsed: Result<Value, Issue>,
    absent: bool,
) {
    match parsed {
        Ok(Value::Null) => {}
        Ok(value) => {
            props.insert(name.to_string(), value);
        }
        Err(_) if absent => log::trace!("'{}' is absent and optional, skipping its schema", name),
        Err(issue) => issues.push(issue.at(name)),
    }
}

fn finish(command: &str, props: ValueMap, issues: Vec<Issue>) -> Result<Props, Error> {
    if issues.is_empty() {
        log::trace!("Validated {} properties for '{}'", props.len(), command);
        Ok(Props(props))
    } else {
        Err(ValidationError {
            command: command.to_string(),
            issues,
        }
        .into())
    }
}

/// Choices apply to the value whatever its source; arrays are checked element-wise.
fn check_choices(entry: &ResolvedParameter, value: &Value) -> Result<(), Issue> {
    let choices = &entry.binding.parameter.choices;
    if choices.is_empty() {
        return Ok(());
    }

    let candidates: Vec<&Value> = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    for candidate in candidates {
        let literal = match candidate {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if !choices.contains(&literal) {
            return Err(Issue::new(format!(
                "Invalid choice '{}'. Expected one of: {}",
                literal,
                choices.join(", ")
            )));
        }
    }
    Ok(())
}

// MARK: --- UNIT TESTS ---
