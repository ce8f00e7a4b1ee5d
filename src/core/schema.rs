// src/core/schema.rs

//! Built-in schemas. Command-line values arrive as strings, so the scalar
//! schemas coerce from their textual form as well as accepting native JSON.

use crate::{
    core::validation::{AsyncSchema, Issue, Schema},
    models::Value,
};
use async_trait::async_trait;
use regex::Regex;
use std::{fmt, future::Future, marker::PhantomData};

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "nothing",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

fn expected(kind: &str, value: &Value) -> Issue {
    Issue::new(format!("Expected {}, received {}", kind, describe(value)))
}

// --- SCALARS ---

/// Built by `string()`.
#[derive(Debug, Clone, Copy)]
pub struct StringSchema;

/// Accepts strings, stringifying numbers and booleans.
pub fn string() -> StringSchema {
    StringSchema
}

impl Schema for StringSchema {
    fn parse(&self, value: Value) -> Result<Value, Issue> {
        match value {
            Value::String(_) => Ok(value),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(expected("string", &other)),
        }
    }
}

/// Built by `integer()`.
#[derive(Debug, Clone, Copy)]
pub struct IntegerSchema;

/// Accepts integers and integer strings.
pub fn integer() -> IntegerSchema {
    IntegerSchema
}

impl Schema for IntegerSchema {
    fn parse(&self, value: Value) -> Result<Value, Issue> {
        match &value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| Issue::new(format!("Expected integer, received '{s}'"))),
            other => Err(expected("integer", other)),
        }
    }
}

/// Built by `number()`.
#[derive(Debug, Clone, Copy)]
pub struct NumberSchema;

/// Accepts numbers and numeric strings.
pub fn number() -> NumberSchema {
    NumberSchema
}

impl Schema for NumberSchema {
    fn parse(&self, value: Value) -> Result<Value, Issue> {
        match &value {
            Value::Number(_) => Ok(value),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| Issue::new(format!("Expected number, received '{s}'"))),
            other => Err(expected("number", other)),
        }
    }
}

/// Built by `boolean()`.
#[derive(Debug, Clone, Copy)]
pub struct BooleanSchema;

/// Accepts booleans and the usual true/false spellings.
pub fn boolean() -> BooleanSchema {
    BooleanSchema
}

impl Schema for BooleanSchema {
    fn parse(&self, value: Value) -> Result<Value, Issue> {
        match &value {
            Value::Bool(_) => Ok(value),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" => Ok(Value::Bool(false)),
                _ => Err(Issue::new(format!("Expected boolean, received '{s}'"))),
            },
            other => Err(expected("boolean", other)),
        }
    }
}

// --- COMBINATORS ---

/// A list whose elements all satisfy `inner`. A lone scalar is wrapped.
#[derive(Debug, Clone)]
pub struct ListSchema<S> {
    inner: S,
}

/// A list of values accepted by `inner`.
pub fn list<S: Schema>(inner: S) -> ListSchema<S> {
    ListSchema { inner }
}

impl<S: Schema> Schema for ListSchema<S> {
    fn parse(&self, value: Value) -> Result<Value, Issue> {
        let items = match value {
            Value::Array(items) => items,
            Value::Null => return Err(expected("list", &Value::Null)),
            scalar => vec![scalar],
        };
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| self.inner.parse(item).map_err(|i| i.at(index.to_string())))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }
}

/// One of a fixed set of string literals.
#[derive(Debug, Clone)]
pub struct OneOfSchema {
    options: Vec<String>,
}

/// Accepts only the given string literals.
pub fn one_of<I, S>(options: I) -> OneOfSchema
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    OneOfSchema {
        options: options.into_iter().map(Into::into).collect(),
    }
}

impl Schema for OneOfSchema {
    fn parse(&self, value: Value) -> Result<Value, Issue> {
        match value.as_str() {
            Some(s) if self.options.iter().any(|o| o == s) => Ok(value),
            _ => Err(Issue::new(format!(
                "Expected one of: {}",
                self.options.join(", ")
            ))),
        }
    }
}

/// A string matching a regular expression.
#[derive(Debug, Clone)]
pub struct PatternSchema {
    regex: Regex,
}

/// Accepts strings matching `regex`.
pub fn pattern(regex: Regex) -> PatternSchema {
    PatternSchema { regex }
}

impl Schema for PatternSchema {
    fn parse(&self, value: Value) -> Result<Value, Issue> {
        match value.as_str() {
            Some(s) if self.regex.is_match(s) => Ok(value),
            Some(s) => Err(Issue::new(format!(
                "'{}' does not match pattern {}",
                s,
                self.regex.as_str()
            ))),
            None => Err(expected("string", &value)),
        }
    }
}

/// Lets `null` through untouched, otherwise defers to `inner`.
#[derive(Debug, Clone)]
pub struct OptionalSchema<S> {
    inner: S,
}

/// Lets `null` through untouched; anything else goes to `inner`.
pub fn optional<S: Schema>(inner: S) -> OptionalSchema<S> {
    OptionalSchema { inner }
}

impl<S: Schema> Schema for OptionalSchema<S> {
    fn parse(&self, value: Value) -> Result<Value, Issue> {
        if value.is_null() {
            Ok(value)
        } else {
            self.inner.parse(value)
        }
    }
}

/// Substitutes `default` for `null` before deferring to `inner`.
#[derive(Debug, Clone)]
pub struct DefaultSchema<S> {
    inner: S,
    default: Value,
}

/// Uses `default` when the value is `null`.
pub fn with_default<S: Schema>(inner: S, default: impl Into<Value>) -> DefaultSchema<S> {
    DefaultSchema {
        inner,
        default: default.into(),
    }
}

impl<S: Schema> Schema for DefaultSchema<S> {
    fn parse(&self, value: Value) -> Result<Value, Issue> {
        if value.is_null() {
            self.inner.parse(self.default.clone())
        } else {
            self.inner.parse(value)
        }
    }
}

// --- CLOSURES ---

/// A schema backed by a plain function.
pub struct FnSchema<F> {
    check: F,
}

/// Wraps a synchronous check.
pub fn from_fn<F>(check: F) -> FnSchema<F>
where
    F: Fn(Value) -> Result<Value, Issue> + Send + Sync,
{
    FnSchema { check }
}

impl<F> fmt::Debug for FnSchema<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnSchema")
    }
}

impl<F> Schema for FnSchema<F>
where
    F: Fn(Value) -> Result<Value, Issue> + Send + Sync,
{
    fn parse(&self, value: Value) -> Result<Value, Issue> {
        (self.check)(value)
    }
}

/// A schema backed by an async function.
pub struct AsyncFnSchema<F, Fut> {
    check: F,
    _future: PhantomData<fn() -> Fut>,
}

/// Wraps an async check. Commands using it must be parsed with `parse_async`.
pub fn from_async_fn<F, Fut>(check: F) -> AsyncFnSchema<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Issue>> + Send + 'static,
{
    AsyncFnSchema {
        check,
        _future: PhantomData,
    }
}

impl<F, Fut> fmt::Debug for AsyncFnSchema<F, Fut> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsyncFnSchema")
    }
}

#[async_trait]
impl<F, Fut> AsyncSchema for AsyncFnSchema<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Issue>> + Send + 'static,
{
    async fn parse(&self, value: Value) -> Result<Value, Issue> {
        (self.check)(value).await
    }
}

// MARK: --- UNIT TESTS ---
