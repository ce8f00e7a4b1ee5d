// src/core/resolver.rs

//! # Source Priority Resolver
//!
//! One `Run` resolves one command. Its stages must run in order:
//!
//! ```text
//! Init -> ConfigApplied -> CliParsed -> ArgumentSourcesApplied -> Resolved -> Validated
//! ```
//!
//! with `Failed` reachable from any stage that errors. Each stage only produces `Delta`s;
//! the run applies them to the context, so the tier rules live in one place.

use crate::{
    core::{
        command::Command,
        events::{Event, EventBus, ParametersResolved},
        parser::{CommandTokens, ControlFlag},
        registry::{Delta, Lookup, Policy, Registry, ResolutionContext},
        sequencer,
        sources::Environment,
        validation::{self, Props},
    },
    error::Error,
    models::{CommandSchema, Source, Value},
};
use async_trait::async_trait;
use std::{cell::RefCell, collections::BTreeSet, fmt};

/// Stage of a `Run`. Each stage may only follow the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Nothing applied yet.
    Init,
    /// Defaults and config applied.
    ConfigApplied,
    /// Command-line options applied.
    CliParsed,
    /// Argument sources and environment fallback applied.
    ArgumentSourcesApplied,
    /// Positionals merged and subscribers notified.
    Resolved,
    /// Props produced. Terminal.
    Validated,
    /// A stage errored. Terminal.
    Failed,
}

impl State {
    fn next(self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::ConfigApplied),
            Self::ConfigApplied => Some(Self::CliParsed),
            Self::CliParsed => Some(Self::ArgumentSourcesApplied),
            Self::ArgumentSourcesApplied => Some(Self::Resolved),
            Self::Resolved => Some(Self::Validated),
            Self::Validated | Self::Failed => None,
        }
    }
}

// --- RUN ---

/// The resolution state of one command during one parse.
pub struct Run<'a> {
    registry: &'a Registry,
    schema: &'a CommandSchema,
    tokens: &'a CommandTokens,
    /// Control flags set on this command or any ancestor.
    controls: &'a BTreeSet<String>,
    environment: &'a dyn Environment,
    bus: &'a EventBus,
    context: ResolutionContext,
    state: State,
    operands: Vec<Value>,
}

impl<'a> Run<'a> {
    pub(crate) fn new(
        command: &'a Command,
        tokens: &'a CommandTokens,
        controls: &'a BTreeSet<String>,
        environment: &'a dyn Environment,
    ) -> Self {
        Self {
            registry: command.registry(),
            schema: command.schema(),
            tokens,
            controls,
            environment,
            bus: command.bus(),
            context: ResolutionContext::new(command.registry()),
            state: State::Init,
            operands: Vec::new(),
        }
    }

    /// Name of the command being resolved.
    pub fn command(&self) -> &str {
        &self.schema.name
    }

    /// The current stage.
    pub fn state(&self) -> State {
        self.state
    }

    /// The bindings of the command being resolved.
    pub fn registry(&self) -> &Registry {
        self.registry
    }

    /// The values resolved so far.
    pub fn context(&self) -> &ResolutionContext {
        &self.context
    }

    /// What the user typed for this command.
    pub fn tokens(&self) -> &CommandTokens {
        self.tokens
    }

    /// True when the control flag `id` was passed to this command or an ancestor.
    pub fn control_flag(&self, id: &str) -> bool {
        self.controls.contains(id)
    }

    /// Applies a delta to the context and returns the names that changed.
    pub fn apply(&mut self, delta: Delta) -> Vec<String> {
        self.context.apply(delta)
    }

    fn advance(&mut self, to: State) -> Result<(), Error> {
        if self.state.next() != Some(to) {
            return Err(Error::InvalidTransition {
                command: self.schema.name.clone(),
                from: self.state,
                to,
            });
        }
        log::debug!("'{}': {:?} -> {:?}", self.schema.name, self.state, to);
        self.state = to;
        Ok(())
    }

    // --- STAGES ---

    /// Seeds defaults and applies the command's config producer.
    pub fn apply_config(&mut self) -> Result<(), Error> {
        if self.state != State::Init {
            return Err(self.out_of_order(State::ConfigApplied));
        }
        let outcome = self.load_config();
        self.record(outcome)
    }

    fn load_config(&mut self) -> Result<(), Error> {
        let schema = self.schema;
        let mut defaults = Delta::new(Policy::Overwrite, Lookup::Name);
        for binding in self.registry.bindings() {
            if let Some(value) = binding.default_value() {
                defaults.push(binding.name(), value, Source::Default);
            }
        }
        self.apply(defaults);

        if let Some(producer) = &schema.from_config {
            let map = producer().map_err(|source| Error::Source {
                origin: format!("of command '{}'", schema.name),
                source,
            })?;
            log::debug!("'{}': config produced {} entries", schema.name, map.len());
            self.apply(Delta::from_map(map, Source::Config, Policy::Overwrite));
        }

        self.advance(State::ConfigApplied)
    }

    /// Applies typed option values in argv order, each followed by its
    /// `from_source` results.
    pub fn apply_cli(&mut self) -> Result<(), Error> {
        if self.state != State::ConfigApplied {
            return Err(self.out_of_order(State::CliParsed));
        }
        let outcome = self.load_cli();
        self.record(outcome)
    }

    fn load_cli(&mut self) -> Result<(), Error> {
        let (registry, tokens) = (self.registry, self.tokens);
        for (name, value) in &tokens.options {
            let mut delta = Delta::new(Policy::Overwrite, Lookup::Name);
            delta.push(name.clone(), value.clone(), Source::Cli);
            self.apply(delta);

            let source_fn = registry
                .get(name)
                .and_then(|binding| binding.parameter.from_source.clone());
            if let Some(source_fn) = source_fn {
                let map = source_fn(Some(value)).map_err(|source| Error::Source {
                    origin: format!("of option '{name}'"),
                    source,
                })?;
                self.apply(Delta::from_map(map, Source::Config, Policy::Overwrite));
            }
        }

        self.advance(State::CliParsed)
    }

    /// Runs argument `from_source` functions against their operands, then
    /// falls back to environment variables.
    pub fn apply_argument_sources(&mut self) -> Result<(), Error> {
        if self.state != State::CliParsed {
            return Err(self.out_of_order(State::ArgumentSourcesApplied));
        }
        let outcome = self.load_argument_sources();
        self.record(outcome)
    }

    fn load_argument_sources(&mut self) -> Result<(), Error> {
        let (registry, tokens) = (self.registry, self.tokens);
        for (slot, binding) in registry.arguments().iter().enumerate() {
            let Some(source_fn) = binding.parameter.from_source.clone() else {
                continue;
            };

            let raw = if binding.parameter.variadic {
                let rest: Vec<Value> = tokens
                    .operands
                    .iter()
                    .skip(slot)
                    .map(|token| Value::String(token.clone()))
                    .collect();
                (!rest.is_empty()).then_some(Value::Array(rest))
            } else {
                tokens
                    .operands
                    .get(slot)
                    .filter(|token| !token.is_empty())
                    .map(|token| Value::String(token.clone()))
            };

            if let Some(value) = &raw {
                let mut delta = Delta::new(Policy::Overwrite, Lookup::Name);
                delta.push(binding.name(), value.clone(), Source::Cli);
                self.apply(delta);
            }

            let map = source_fn(raw.as_ref()).map_err(|source| Error::Source {
                origin: format!("of argument '{}'", binding.name()),
                source,
            })?;
            self.apply(Delta::from_map(map, Source::Config, Policy::FillLower));
        }

        let mut env = Delta::new(Policy::FillLower, Lookup::Name);
        for binding in registry.bindings() {
            if !binding.reads_environment(self.schema.use_environment) {
                continue;
            }
            let Some(raw) = self.environment.var(&binding.names.env_key) else {
                continue;
            };
            log::trace!("'{}' found in environment as {}", binding.name(), binding.names.env_key);
            let value = if binding.parameter.variadic {
                Value::Array(vec![Value::String(raw)])
            } else {
                Value::String(raw)
            };
            env.push(binding.name(), value, Source::Env);
        }
        self.apply(env);

        self.advance(State::ArgumentSourcesApplied)
    }

    /// Merges operands into the arguments, notifies subscribers, applies
    /// their injections and merges again.
    pub fn settle(&mut self) -> Result<(), Error> {
        if self.state != State::ArgumentSourcesApplied {
            return Err(self.out_of_order(State::Resolved));
        }
        let outcome = self.publish_resolved();
        self.record(outcome)
    }

    fn publish_resolved(&mut self) -> Result<(), Error> {
        self.remerge();

        let injections = RefCell::new(Vec::new());
        self.bus
            .publish(&Event::ParametersResolved(ParametersResolved {
                command: &self.schema.name,
                context: &self.context,
                injections: &injections,
            }))?;

        let injections = injections.into_inner();
        if !injections.is_empty() {
            let mut delta = Delta::new(Policy::Overwrite, Lookup::Name);
            for (name, value) in injections {
                delta.push(name, value, Source::Prompt);
            }
            self.apply(delta);
            self.remerge();
        }

        self.advance(State::Resolved)
    }

    /// Re-runs the argument sequencer over the current values.
    pub fn remerge(&mut self) {
        let slots = {
            let resolved: Vec<_> = self
                .registry
                .arguments()
                .iter()
                .filter_map(|binding| self.context.get(binding.name()))
                .collect();
            sequencer::merge_slots(&self.tokens.operands, &resolved)
        };
        self.operands = slots.iter().flatten().map(|(value, _)| value.clone()).collect();

        let distribution = sequencer::distribute(slots, self.registry.arguments());
        let mut delta = Delta::new(Policy::Replace, Lookup::Name);
        for (name, value, source) in distribution.assignments {
            delta.push(name, value, source);
        }
        self.apply(delta);
        self.context.extras.args = distribution.extras;
    }

    // --- VALIDATION ---

    fn ensure_required(&self) -> Result<(), Error> {
        for entry in self.context.entries.values() {
            if entry.binding.parameter.required && !entry.has_value() {
                return Err(Error::MissingRequired {
                    command: self.schema.name.clone(),
                    parameter: entry.binding.describe(),
                });
            }
        }
        Ok(())
    }

    /// Checks required values and runs synchronous validators.
    pub fn validate(&mut self) -> Result<Props, Error> {
        if self.state != State::Resolved {
            return Err(self.out_of_order(State::Validated));
        }
        let outcome = self
            .ensure_required()
            .and_then(|()| validation::validate(&self.context));
        let props = self.record(outcome)?;
        self.advance(State::Validated)?;
        Ok(props)
    }

    /// Like `validate`, awaiting async validators in declaration order.
    pub async fn validate_async(&mut self) -> Result<Props, Error> {
        if self.state != State::Resolved {
            return Err(self.out_of_order(State::Validated));
        }
        let outcome = match self.ensure_required() {
            Ok(()) => validation::validate_async(&self.context).await,
            Err(err) => Err(err),
        };
        let props = self.record(outcome)?;
        self.advance(State::Validated)?;
        Ok(props)
    }

    /// Moves the run to `Failed` when a stage errored. Any later stage call
    /// is then rejected as out of order.
    fn record<T>(&mut self, outcome: Result<T, Error>) -> Result<T, Error> {
        if outcome.is_err() {
            log::debug!("'{}': {:?} -> Failed", self.schema.name, self.state);
            self.state = State::Failed;
        }
        outcome
    }

    fn out_of_order(&self, to: State) -> Error {
        Error::InvalidTransition {
            command: self.schema.name.clone(),
            from: self.state,
            to,
        }
    }

    /// The final context and merged operand list.
    pub(crate) fn into_parts(self) -> (ResolutionContext, Vec<Value>) {
        (self.context, self.operands)
    }
}

impl fmt::Debug for Run<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Run")
            .field("command", &self.schema.name)
            .field("state", &self.state)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

// --- PIPELINES ---

/// Drives a `Run` from `Init` to `Resolved`. Decorators wrap another pipeline.
#[async_trait]
pub trait Pipeline: Send + Sync + fmt::Debug {
    /// True when this pipeline can only run through `resolve_async`.
    fn requires_async(&self) -> bool {
        false
    }

    /// Extra switches this pipeline reads from the command line.
    fn control_flags(&self) -> Vec<ControlFlag> {
        Vec::new()
    }

    /// Drives `run` through every stage up to `Resolved`.
    fn resolve(&self, run: &mut Run<'_>) -> Result<(), Error>;

    /// Async form of `resolve`. Decorators that suspend override this one.
    async fn resolve_async(&self, run: &mut Run<'_>) -> Result<(), Error> {
        self.resolve(run)
    }
}

/// The base pipeline: config, command line, argument sources and
/// environment, then settle.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceResolver;

impl Pipeline for SourceResolver {
    fn resolve(&self, run: &mut Run<'_>) -> Result<(), Error> {
        run.apply_config()?;
        run.apply_cli()?;
        run.apply_argument_sources()?;
        run.settle()
    }
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{parser::ArgvOrigin, sources::MapEnv},
        models::{EnvBinding, Parameter},
    };
    use serde_json::json;

    fn tokens_for(command: &Command, argv: &[&str]) -> CommandTokens {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let argv = command.parser().normalize(command, argv, ArgvOrigin::User);
        command.parser().parse(command, &argv).unwrap()
    }

    fn resolve(command: &Command, argv: &[&str], env: &MapEnv) -> ResolutionContext {
        let tokens = tokens_for(command, argv);
        let controls = BTreeSet::new();
        let mut run = Run::new(command, &tokens, &controls, env);
        SourceResolver.resolve(&mut run).unwrap();
        assert_eq!(run.state(), State::Resolved);
        run.into_parts().0
    }

    fn layered() -> Command {
        Command::new(
            CommandSchema::new("serve")
                .use_environment(true)
                .environment_prefix("APP_")
                .from_config(|| Ok(json!({ "port": "3000", "host": "config.local" }).as_object().cloned().unwrap_or_default()))
                .parameter(Parameter::option("port").default_value("80"))
                .parameter(Parameter::option("host").default_value("localhost"))
                .parameter(Parameter::option("mode").default_value("dev"))
                .parameter(Parameter::option("user").environment(EnvBinding::Disabled)),
        )
        .unwrap()
    }

    #[test]
    fn test_priority_cli_config_env_default() {
        let env = MapEnv::new()
            .with("APP_PORT", "4000")
            .with("APP_HOST", "env.local")
            .with("APP_MODE", "prod")
            .with("APP_USER", "root");
        let context = resolve(&layered(), &["--port", "5000"], &env);

        assert_eq!(context.value("port"), Some(&json!("5000")));
        assert_eq!(context.source("port"), Some(Source::Cli));
        assert_eq!(context.value("host"), Some(&json!("config.local")));
        assert_eq!(context.source("host"), Some(Source::Config));
        assert_eq!(context.value("mode"), Some(&json!("prod")));
        assert_eq!(context.source("mode"), Some(Source::Env));
        assert_eq!(context.value("user"), None);
    }

    #[test]
    fn test_stages_reject_out_of_order_calls() {
        let command = layered();
        let tokens = tokens_for(&command, &[]);
        let controls = BTreeSet::new();
        let env = MapEnv::new();
        let mut run = Run::new(&command, &tokens, &controls, &env);

        let err = run.apply_cli().unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition { from: State::Init, to: State::CliParsed, .. }
        ));
        run.apply_config().unwrap();
        assert!(run.settle().is_err());
        assert!(run.validate().is_err());
    }

    #[test]
    fn test_stage_errors_fail_the_run() {
        let command = Command::new(
            CommandSchema::new("broken").from_config(|| anyhow::bail!("config unreadable")),
        )
        .unwrap();
        let tokens = tokens_for(&command, &[]);
        let controls = BTreeSet::new();
        let env = MapEnv::new();
        let mut run = Run::new(&command, &tokens, &controls, &env);

        assert!(matches!(run.apply_config(), Err(Error::Source { .. })));
        assert_eq!(run.state(), State::Failed);
        assert!(matches!(
            run.apply_cli(),
            Err(Error::InvalidTransition { from: State::Failed, .. })
        ));

        let command = Command::new(CommandSchema::new("vetoed")).unwrap();
        command.subscribe(crate::core::events::EventName::ParametersResolved, |_| {
            anyhow::bail!("vetoed")
        });
        let tokens = tokens_for(&command, &[]);
        let mut run = Run::new(&command, &tokens, &controls, &env);
        run.apply_config().unwrap();
        run.apply_cli().unwrap();
        run.apply_argument_sources().unwrap();
        assert!(matches!(run.settle(), Err(Error::Subscriber { .. })));
        assert_eq!(run.state(), State::Failed);
    }

    #[test]
    fn test_subscriber_injection_applies_at_prompt_tier() {
        let command = Command::new(
            CommandSchema::new("greet")
                .from_config(|| Ok(json!({ "name": "config" }).as_object().cloned().unwrap_or_default()))
                .parameter(Parameter::argument("name"))
                .parameter(Parameter::option("greeting")),
        )
        .unwrap();
        command
            .subscribe(crate::core::events::EventName::ParametersResolved, |event| {
                if let Event::ParametersResolved(resolved) = event {
                    resolved.inject("name", "injected");
                    resolved.inject("greeting", "hi");
                }
                Ok(())
            });

        let context = resolve(&command, &[], &MapEnv::new());
        assert_eq!(context.value("name"), Some(&json!("injected")));
        assert_eq!(context.source("name"), Some(Source::Prompt));
        assert_eq!(context.value("greeting"), Some(&json!("hi")));

        // The command line still wins over an injection.
        let context = resolve(&command, &["typed"], &MapEnv::new());
        assert_eq!(context.value("name"), Some(&json!("typed")));
    }

    #[test]
    fn test_variadic_environment_value_is_a_list() {
        let command = Command::new(
            CommandSchema::new("lint")
                .parameter(Parameter::argument("files").variadic().environment(EnvBinding::Key("LINT_FILES".into()))),
        )
        .unwrap();
        let context = resolve(&command, &[], &MapEnv::new().with("LINT_FILES", "src"));
        assert_eq!(context.value("files"), Some(&json!(["src"])));
        assert_eq!(context.source("files"), Some(Source::Env));
    }
}
