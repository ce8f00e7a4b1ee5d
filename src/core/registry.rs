// src/core/registry.rs

//! # Parameter Registry
//!
//! Validates a `CommandSchema` once, at construction, and derives the immutable
//! `Binding` of every parameter. At parse time it seeds a `ResolutionContext`,
//! the single mutable aggregate that resolution stages write to through `Delta`s.

use crate::{
    constants::{NO_INTERACTIVE_FLAG, RESERVED_HELP_ALIAS, RESERVED_HELP_FLAG},
    core::{
        names::{ParameterNames, resolve_names},
        sequencer,
        validation::Extras,
    },
    error::Error,
    models::{CommandSchema, EnvBinding, Parameter, ParameterKind, Source, Value, ValueMap},
};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use std::{collections::HashSet, sync::Arc};

lazy_static! {
    static ref PARAMETER_NAME: Regex =
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9_-]*[A-Za-z0-9])?$").unwrap();
}

// --- BINDINGS ---

/// A parameter together with the names derived for it.
#[derive(Debug)]
pub struct Binding {
    /// The declared parameter.
    pub parameter: Arc<Parameter>,
    /// Flags and keys derived for it.
    pub names: ParameterNames,
}

impl Binding {
    /// The parameter name, unique within the command.
    pub fn name(&self) -> &str {
        &self.parameter.name
    }

    /// Whether the parameter is an argument or an option.
    pub fn kind(&self) -> ParameterKind {
        self.parameter.kind
    }

    /// The flag actually registered on the command line, without dashes.
    pub fn effective_flag(&self) -> String {
        if self.parameter.negate {
            format!("no-{}", self.names.cli_flag)
        } else {
            self.names.cli_flag.clone()
        }
    }

    /// The declared default. A negated option defaults to `true`, so that
    /// passing `--no-<flag>` is what turns it off.
    pub fn default_value(&self) -> Option<Value> {
        match &self.parameter.default_value {
            Some(value) => Some(value.clone()),
            None if self.parameter.negate => Some(Value::Bool(true)),
            None => None,
        }
    }

    /// Whether this parameter falls back to its environment variable.
    pub fn reads_environment(&self, command_wide: bool) -> bool {
        match self.parameter.environment {
            EnvBinding::Inherit => command_wide,
            EnvBinding::Enabled | EnvBinding::Key(_) => true,
            EnvBinding::Disabled => false,
        }
    }

    /// Human-readable label used in error messages.
    pub fn describe(&self) -> String {
        match self.kind() {
            ParameterKind::Argument => format!("argument '{}'", self.name()),
            ParameterKind::Option => format!("option '--{}'", self.effective_flag()),
        }
    }
}

/// The validated set of bindings for one command.
#[derive(Debug)]
pub struct Registry {
    command: String,
    bindings: IndexMap<String, Arc<Binding>>,
    /// Arguments in positional order (required, optional, variadic).
    arguments: Vec<Arc<Binding>>,
}

impl Registry {
    /// Validates `schema` and derives every binding.
    ///
    /// # Errors
    /// `Error::SchemaDefinition` on an invalid or duplicate name, a flag that
    /// collides with another or with a reserved one, negation on an argument,
    /// or more than one variadic argument.
    pub fn new(schema: &CommandSchema) -> Result<Self, Error> {
        let invalid = |reason: String| Error::SchemaDefinition {
            command: schema.name.clone(),
            reason,
        };

        let mut bindings: IndexMap<String, Arc<Binding>> = IndexMap::new();
        let mut flags: HashSet<String> = [
            format!("--{RESERVED_HELP_FLAG}"),
            format!("-{RESERVED_HELP_ALIAS}"),
            format!("--{NO_INTERACTIVE_FLAG}"),
        ]
        .into_iter()
        .collect();

        for parameter in &schema.parameters {
            let name = &parameter.name;
            if !PARAMETER_NAME.is_match(name) {
                return Err(invalid(format!(
                    "'{name}' is not a valid parameter name. Names must start and end with a letter or digit and may only contain letters, digits, '-' and '_'."
                )));
            }
            if bindings.contains_key(name) {
                return Err(invalid(format!("Parameter '{name}' is defined more than once.")));
            }
            if parameter.negate && parameter.is_argument() {
                return Err(invalid(format!(
                    "Argument '{name}' cannot be negated. Only options support negation."
                )));
            }

            let binding = Binding {
                parameter: Arc::clone(parameter),
                names: resolve_names(parameter, schema.environment_prefix.as_deref()),
            };

            if !parameter.is_argument() {
                let mut keys = vec![format!("--{}", binding.effective_flag())];
                if let Some(alias) = &binding.names.alias {
                    let dashes = if alias.chars().count() == 1 { "-" } else { "--" };
                    keys.push(format!("{dashes}{alias}"));
                }
                for key in keys {
                    if !flags.insert(key.clone()) {
                        return Err(invalid(format!(
                            "Flag '{key}' of option '{name}' is already in use."
                        )));
                    }
                }
            }

            bindings.insert(name.clone(), Arc::new(binding));
        }

        let variadics: Vec<&str> = bindings
            .values()
            .filter(|b| b.parameter.is_argument() && b.parameter.variadic)
            .map(|b| b.name())
            .collect();
        if variadics.len() > 1 {
            return Err(invalid(format!(
                "Only one variadic argument can be defined. Found: {}",
                variadics.join(", ")
            )));
        }

        let arguments = sequencer::sequence_by(
            bindings
                .values()
                .filter(|b| b.parameter.is_argument())
                .cloned()
                .collect(),
            |b| b.parameter.as_ref(),
        );

        log::trace!(
            "Registered {} parameters for command '{}'",
            bindings.len(),
            schema.name
        );

        Ok(Self {
            command: schema.name.clone(),
            bindings,
            arguments,
        })
    }

    /// Name of the command this registry was built for.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The binding called `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<Binding>> {
        self.bindings.get(name)
    }

    /// Every binding, in declaration order.
    pub fn bindings(&self) -> impl Iterator<Item = &Arc<Binding>> {
        self.bindings.values()
    }

    /// Arguments in positional order.
    pub fn arguments(&self) -> &[Arc<Binding>] {
        &self.arguments
    }

    /// Options in declaration order.
    pub fn options(&self) -> impl Iterator<Item = &Arc<Binding>> {
        self.bindings.values().filter(|b| !b.parameter.is_argument())
    }

    /// True when an argument collects the remaining operands.
    pub fn has_variadic_argument(&self) -> bool {
        self.arguments.iter().any(|b| b.parameter.variadic)
    }
}

// --- RESOLUTION CONTEXT ---

/// The live value of one parameter during resolution.
#[derive(Debug, Clone)]
pub struct ResolvedParameter {
    /// The parameter this value belongs to.
    pub binding: Arc<Binding>,
    /// `None` until a source supplies a value.
    pub value: Option<Value>,
    /// Tier of the source that supplied `value`.
    pub source: Option<Source>,
}

impl ResolvedParameter {
    /// Whether the parameter is an argument or an option.
    pub fn kind(&self) -> ParameterKind {
        self.binding.kind()
    }

    /// True for any value except `null`, an empty string or an empty list.
    pub fn has_value(&self) -> bool {
        match &self.value {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(_) => true,
        }
    }

    /// Has a value that came from somewhere other than the declared default.
    pub fn is_settled(&self) -> bool {
        self.has_value() && self.source != Some(Source::Default)
    }
}

/// Per-command resolution state. `arguments()` and `options()` are views over
/// the same entries.
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    /// Name of the command being resolved.
    pub command: String,
    /// One entry per parameter, in declaration order.
    pub entries: IndexMap<String, ResolvedParameter>,
    /// Config keys that matched no parameter.
    pub extras: Extras,
}

impl ResolutionContext {
    /// An empty context with one unset entry per registered parameter.
    pub fn new(registry: &Registry) -> Self {
        let entries = registry
            .bindings()
            .map(|binding| {
                (
                    binding.name().to_string(),
                    ResolvedParameter {
                        binding: Arc::clone(binding),
                        value: None,
                        source: None,
                    },
                )
            })
            .collect();

        Self {
            command: registry.command().to_string(),
            entries,
            extras: Extras::default(),
        }
    }

    /// The entry for `name`.
    pub fn get(&self, name: &str) -> Option<&ResolvedParameter> {
        self.entries.get(name)
    }

    /// The current value of `name`, if any.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.entries.get(name).and_then(|entry| entry.value.as_ref())
    }

    /// The tier that supplied the current value of `name`.
    pub fn source(&self, name: &str) -> Option<Source> {
        self.entries.get(name).and_then(|entry| entry.source)
    }

    /// Argument entries in declaration order.
    pub fn arguments(&self) -> impl Iterator<Item = &ResolvedParameter> {
        self.entries.values().filter(|e| e.kind() == ParameterKind::Argument)
    }

    /// Option entries in declaration order.
    pub fn options(&self) -> impl Iterator<Item = &ResolvedParameter> {
        self.entries.values().filter(|e| e.kind() == ParameterKind::Option)
    }

    /// Applies every write of `delta` in order and returns the names of the
    /// entries that changed.
    pub fn apply(&mut self, delta: Delta) -> Vec<String> {
        let mut changed = Vec::new();

        for write in delta.writes {
            if write.value.is_null() {
                continue;
            }

            let Some(name) = self.find(&write.key, delta.lookup) else {
                match delta.lookup {
                    Lookup::ConfigKey => {
                        log::trace!("'{}' matches no parameter, keeping it as an extra", write.key);
                        let props = &mut self.extras.props;
                        if delta.policy == Policy::FillLower {
                            props.entry(write.key).or_insert(write.value);
                        } else {
                            props.insert(write.key, write.value);
                        }
                    }
                    Lookup::Name => {
                        log::warn!("Ignoring value for unknown parameter '{}'", write.key);
                    }
                }
                continue;
            };

            let Some(entry) = self.entries.get_mut(&name) else {
                continue;
            };
            if write.source == Source::Config && !entry.binding.parameter.config_enabled {
                log::trace!("Parameter '{}' does not read config, skipping", name);
                continue;
            }

            let accepted = match delta.policy {
                Policy::Overwrite => entry.source.is_none_or(|current| write.source >= current),
                Policy::FillLower => entry.source.is_none_or(|current| write.source > current),
                Policy::Replace => true,
            };
            if accepted {
                log::trace!("'{}' <- {} ({})", name, write.value, write.source);
                entry.value = Some(write.value);
                entry.source = Some(write.source);
                changed.push(name);
            }
        }

        changed
    }

    fn find(&self, key: &str, lookup: Lookup) -> Option<String> {
        if lookup == Lookup::ConfigKey {
            let by_config_key = self
                .entries
                .iter()
                .find(|(_, entry)| entry.binding.names.config_key == key)
                .map(|(name, _)| name.clone());
            if by_config_key.is_some() {
                return by_config_key;
            }
        }
        self.entries.contains_key(key).then(|| key.to_string())
    }
}

// --- DELTAS ---

/// How a write competes with the value already in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Replaces a value from the same or a lower tier.
    Overwrite,
    /// Replaces a value from a strictly lower tier only.
    FillLower,
    /// Replaces unconditionally. Used when re-merging positional operands.
    Replace,
}

/// How the key of a write is matched against parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Parameter name only.
    Name,
    /// Config key first, then name. Unmatched keys become extra props.
    ConfigKey,
}

/// A single value proposed for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    /// Parameter name or config key, depending on the delta's `Lookup`.
    pub key: String,
    /// The proposed value.
    pub value: Value,
    /// Tier the value comes from.
    pub source: Source,
}

/// The output of one resolution stage.
#[derive(Debug, Clone)]
pub struct Delta {
    /// How each write competes with the current value.
    pub policy: Policy,
    /// How write keys are matched to parameters.
    pub lookup: Lookup,
    /// Applied in order.
    pub writes: Vec<Write>,
}

impl Delta {
    /// An empty delta.
    pub fn new(policy: Policy, lookup: Lookup) -> Self {
        Self {
            policy,
            lookup,
            writes: Vec::new(),
        }
    }

    /// Every entry of `map` as a write from `source`, matched by config key.
    pub fn from_map(map: ValueMap, source: Source, policy: Policy) -> Self {
        let mut delta = Self::new(policy, Lookup::ConfigKey);
        for (key, value) in map {
            delta.push(key, value, source);
        }
        delta
    }

    /// Appends a write of `value` for `key`, tagged with `source`.
    pub fn push(&mut self, key: impl Into<String>, value: Value, source: Source) {
        self.writes.push(Write {
            key: key.into(),
            value,
            source,
        });
    }

    /// True when the delta holds no writes.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

// MARK: --- UNIT TESTS ---
