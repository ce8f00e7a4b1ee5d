// src/models.rs

use crate::core::validation::{AsyncSchema, Schema, Validator};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// A dynamically typed parameter value. `Null` means "no value".
pub type Value = serde_json::Value;

/// An insertion-ordered map of values keyed by parameter name or config key.
pub type ValueMap = serde_json::Map<String, Value>;

/// Produces a map of values for a whole command, e.g. from a config file.
pub type ConfigProducer = Arc<dyn Fn() -> anyhow::Result<ValueMap> + Send + Sync>;

/// Maps the raw value of one parameter to values for other parameters.
pub type SourceFn = Arc<dyn Fn(Option<&Value>) -> anyhow::Result<ValueMap> + Send + Sync>;

// --- PARAMETER SCHEMA ---

/// Whether a parameter is read positionally or through a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    /// Read positionally.
    Argument,
    /// Read through `--flag`.
    Option,
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argument => write!(f, "argument"),
            Self::Option => write!(f, "option"),
        }
    }
}

/// The origin of a resolved value. Variants are declared lowest tier first, so
/// `Ord` reflects precedence: `Cli > Prompt > Config > Env > Default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// A declared default value.
    Default,
    /// An environment variable.
    Env,
    /// A config producer or a `from_source` function.
    Config,
    /// Answers and subscriber injections.
    Prompt,
    /// Typed on the command line.
    Cli,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Default => "default",
            Self::Env => "env",
            Self::Config => "config",
            Self::Prompt => "prompt",
            Self::Cli => "cli",
        };
        f.write_str(label)
    }
}

/// Explicit overrides for the names derived from a parameter's identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameOverrides {
    /// Replaces the derived long flag.
    pub cli_flag: Option<String>,
    /// Extra flag name. One character makes a short flag.
    pub alias: Option<String>,
    /// Replaces the key looked up in config maps.
    pub config_key: Option<String>,
    /// Used verbatim, without the command prefix.
    pub env_key: Option<String>,
}

/// How a parameter participates in environment fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EnvBinding {
    /// Follows the command-wide `use_environment` switch.
    #[default]
    Inherit,
    /// Reads the derived, prefixed key.
    Enabled,
    /// Never reads the environment.
    Disabled,
    /// Enabled, reading exactly this variable. No prefix is applied.
    Key(String),
}

/// The declarative description of one argument or option.
#[derive(Clone)]
pub struct Parameter {
    /// Identifier, unique within a command.
    pub name: String,
    /// Whether the parameter is positional or a flag.
    pub kind: ParameterKind,
    /// Help text.
    pub description: Option<String>,
    /// Whether resolution fails when no source supplies a value.
    pub required: bool,
    /// Arguments only: collects every remaining operand into a list.
    pub variadic: bool,
    /// Options only: the flag becomes `--no-<flag>` and yields `false`.
    pub negate: bool,
    /// Lowest-tier value used when no source supplies one.
    pub default_value: Option<Value>,
    /// Allowed values; empty means unrestricted.
    pub choices: Vec<String>,
    /// Schema the resolved value must satisfy.
    pub validator: Option<Validator>,
    /// Overrides for the derived names.
    pub names: NameOverrides,
    /// How the parameter takes part in environment fallback.
    pub environment: EnvBinding,
    /// When false, config producers never set this parameter.
    pub config_enabled: bool,
    /// Derives other parameters' values from this one's raw value.
    pub from_source: Option<SourceFn>,
}

impl Parameter {
    fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            required: kind == ParameterKind::Argument,
            variadic: false,
            negate: false,
            default_value: None,
            choices: Vec::new(),
            validator: None,
            names: NameOverrides::default(),
            environment: EnvBinding::Inherit,
            config_enabled: true,
            from_source: None,
        }
    }

    /// A positional argument. Required unless marked otherwise.
    pub fn argument(name: impl Into<String>) -> Self {
        Self::new(name, ParameterKind::Argument)
    }

    /// A flag-based option. Optional unless marked otherwise.
    pub fn option(name: impl Into<String>) -> Self {
        Self::new(name, ParameterKind::Option)
    }

    /// Sets the help text.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Marks the parameter as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the parameter as optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Collects every remaining operand into a list.
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    /// Registers the option as `--no-<flag>`.
    pub fn negate(mut self) -> Self {
        self.negate = true;
        self
    }

    /// Sets the value used when no source supplies one.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Restricts values to `choices`. Options show them in help.
    pub fn choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    /// Attaches a synchronous schema that validates and coerces the resolved value.
    pub fn schema(mut self, schema: impl Schema + 'static) -> Self {
        self.validator = Some(Validator::Sync(Arc::new(schema)));
        self
    }

    /// Attaches a schema that must be awaited. Commands using it can only be
    /// parsed through the async entry point.
    pub fn async_schema(mut self, schema: impl AsyncSchema + 'static) -> Self {
        self.validator = Some(Validator::Async(Arc::new(schema)));
        self
    }

    /// Overrides the derived long flag.
    pub fn cli_flag(mut self, flag: impl Into<String>) -> Self {
        self.names.cli_flag = Some(flag.into());
        self
    }

    /// Adds an alternative flag. A single character makes a short flag.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.names.alias = Some(alias.into());
        self
    }

    /// Overrides the key looked up in config maps.
    pub fn config_key(mut self, key: impl Into<String>) -> Self {
        self.names.config_key = Some(key.into());
        self
    }

    /// Reads exactly this variable, without the command prefix.
    pub fn env_key(mut self, key: impl Into<String>) -> Self {
        self.names.env_key = Some(key.into());
        self
    }

    /// Sets how the parameter takes part in environment fallback.
    pub fn environment(mut self, binding: EnvBinding) -> Self {
        self.environment = binding;
        self
    }

    /// Excludes this parameter from the command's config producer.
    pub fn no_config(mut self) -> Self {
        self.config_enabled = false;
        self
    }

    /// Registers a function that turns this parameter's raw value into values
    /// for other parameters, keyed by their config key or name.
    pub fn from_source<F>(mut self, source: F) -> Self
    where
        F: Fn(Option<&Value>) -> anyhow::Result<ValueMap> + Send + Sync + 'static,
    {
        self.from_source = Some(Arc::new(source));
        self
    }

    /// True for positional arguments.
    pub fn is_argument(&self) -> bool {
        self.kind == ParameterKind::Argument
    }

    /// True when resolving this parameter needs the async entry point.
    pub fn requires_async(&self) -> bool {
        matches!(self.validator, Some(Validator::Async(_)))
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("variadic", &self.variadic)
            .field("negate", &self.negate)
            .field("default_value", &self.default_value)
            .field("choices", &self.choices)
            .field("validator", &self.validator)
            .field("names", &self.names)
            .field("environment", &self.environment)
            .field("config_enabled", &self.config_enabled)
            .field("from_source", &self.from_source.is_some())
            .finish()
    }
}

// --- COMMAND SCHEMA ---

/// The declarative description of a command: its parameters and command-wide sources.
#[derive(Clone)]
pub struct CommandSchema {
    /// Command name, as typed on the command line.
    pub name: String,
    /// Help text.
    pub description: Option<String>,
    /// In declaration order.
    pub parameters: Vec<Arc<Parameter>>,
    /// Command-wide config producer.
    pub from_config: Option<ConfigProducer>,
    /// Enables environment fallback for every parameter.
    pub use_environment: bool,
    /// Prepended to derived environment keys.
    pub environment_prefix: Option<String>,
}

impl CommandSchema {
    /// An empty schema named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: Vec::new(),
            from_config: None,
            use_environment: false,
            environment_prefix: None,
        }
    }

    /// Sets the help text.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Appends a parameter.
    pub fn parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(Arc::new(parameter));
        self
    }

    /// Registers the command-wide config producer. It runs once per parse,
    /// before command-line values are applied.
    pub fn from_config<F>(mut self, producer: F) -> Self
    where
        F: Fn() -> anyhow::Result<ValueMap> + Send + Sync + 'static,
    {
        self.from_config = Some(Arc::new(producer));
        self
    }

    /// Turns environment fallback on or off for every parameter.
    pub fn use_environment(mut self, enabled: bool) -> Self {
        self.use_environment = enabled;
        self
    }

    /// Sets the prefix prepended to derived environment keys.
    pub fn environment_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.environment_prefix = Some(prefix.into());
        self
    }
}

impl fmt::Debug for CommandSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSchema")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("from_config", &self.from_config.is_some())
            .field("use_environment", &self.use_environment)
            .field("environment_prefix", &self.environment_prefix)
            .finish()
    }
}

// MARK: --- UNIT TESTS ---
