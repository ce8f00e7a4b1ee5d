// src/core/command.rs

//! # Command Runtime
//!
//! A `Command` owns its schema, its validated registry, the pipeline that
//! resolves it and its subcommands. Parsing walks the selected path from the
//! root to the leaf, resolving and validating every command on the way, and
//! finally hands the leaf's `Parsed` result to the leaf's action.

use crate::{
    core::{
        events::{Event, EventBus, EventName, Subscription},
        parser::{ArgvOrigin, ArgvParser, ClapParser, CommandTokens, ControlFlag},
        registry::{Registry, ResolutionContext},
        resolver::{Pipeline, Run, SourceResolver},
        sources::{Environment, ProcessEnv},
        validation::{Extras, Props},
    },
    error::Error,
    models::{CommandSchema, Value},
};
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

/// The callback invoked with the leaf command's result.
pub type Action = Arc<dyn Fn(&Parsed) -> anyhow::Result<()> + Send + Sync>;

// --- PARSED RESULT ---

/// The outcome of resolving one command on the selected path.
#[derive(Debug, Clone)]
pub struct Parsed {
    /// Name of the command this result belongs to.
    pub command: String,
    /// Validated values keyed by parameter name.
    pub props: Props,
    /// Surplus operands and unmatched config keys.
    pub extras: Extras,
    /// The final resolution state, including the source of every value.
    pub context: ResolutionContext,
    /// The merged positional operands.
    pub operands: Vec<Value>,
    /// The result of the enclosing command, for subcommands.
    pub parent: Option<Box<Parsed>>,
}

impl Parsed {
    /// The enclosing command's result, if any.
    pub fn parent(&self) -> Option<&Self> {
        self.parent.as_deref()
    }

    /// Command names from the root down to this one.
    pub fn path(&self) -> Vec<&str> {
        let mut path = match self.parent() {
            Some(parent) => parent.path(),
            None => Vec::new(),
        };
        path.push(&self.command);
        path
    }

    /// The nearest validated property called `name`, searching this command
    /// first and then its ancestors.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.props
            .value(name)
            .or_else(|| self.parent().and_then(|parent| parent.lookup(name)))
    }
}

// --- COMMAND ---

/// A node of the command tree.
///
/// Build one with `Command::new`, attach children with `subcommand`, then call
/// `parse`/`parse_from` or their async forms exactly once.
pub struct Command {
    schema: CommandSchema,
    registry: Registry,
    pipeline: Arc<dyn Pipeline>,
    parser: Arc<dyn ArgvParser>,
    environment: Arc<dyn Environment>,
    bus: Arc<EventBus>,
    subcommands: Vec<Command>,
    action: Option<Action>,
    parsed: AtomicBool,
}

impl Command {
    /// Validates `schema` and builds a command with the default collaborators:
    /// clap for parsing and the process environment.
    ///
    /// # Errors
    /// `Error::SchemaDefinition` if the schema is invalid.
    pub fn new(schema: CommandSchema) -> Result<Self, Error> {
        let registry = Registry::new(&schema)?;
        Ok(Self {
            schema,
            registry,
            pipeline: Arc::new(SourceResolver),
            parser: Arc::new(ClapParser),
            environment: Arc::new(ProcessEnv),
            bus: Arc::new(EventBus::new()),
            subcommands: Vec::new(),
            action: None,
            parsed: AtomicBool::new(false),
        })
    }

    /// Replaces the resolution pipeline of this command only.
    pub fn with_pipeline(mut self, pipeline: impl Pipeline + 'static) -> Self {
        self.pipeline = Arc::new(pipeline);
        self
    }

    /// Replaces the argv parser. Only the root's parser is used.
    pub fn with_parser(mut self, parser: impl ArgvParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    /// Replaces the environment. Only the root's environment is used.
    pub fn with_environment(mut self, environment: impl Environment + 'static) -> Self {
        self.environment = Arc::new(environment);
        self
    }

    /// Sets the callback that runs when this command is the selected leaf.
    pub fn action<F>(mut self, action: F) -> Self
    where
        F: Fn(&Parsed) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.action = Some(Arc::new(action));
        self
    }

    /// Attaches `child` as a subcommand. The child's event subscribers move to
    /// this command's bus, which the whole tree shares from then on.
    ///
    /// # Errors
    /// `Error::SchemaDefinition` if a subcommand with the same name exists.
    pub fn subcommand(mut self, mut child: Self) -> Result<Self, Error> {
        if self.subcommands.iter().any(|c| c.name() == child.name()) {
            return Err(Error::SchemaDefinition {
                command: self.schema.name.clone(),
                reason: format!("Subcommand '{}' is defined more than once.", child.name()),
            });
        }
        self.bus.absorb(&child.bus);
        child.rebind(&self.bus);
        self.subcommands.push(child);
        Ok(self)
    }

    fn rebind(&mut self, bus: &Arc<EventBus>) {
        self.bus = Arc::clone(bus);
        for child in &mut self.subcommands {
            child.rebind(bus);
        }
    }

    /// Subscribes to an event on the bus shared by this command's tree.
    pub fn subscribe<F>(&self, name: EventName, handler: F) -> Subscription
    where
        F: Fn(&Event<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.subscribe(name, handler)
    }

    // --- ACCESSORS ---

    /// The command name, as typed on the command line.
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// The declarative schema this command was built from.
    pub fn schema(&self) -> &CommandSchema {
        &self.schema
    }

    /// The validated bindings of this command's parameters.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Attached subcommands, in attachment order.
    pub fn subcommands(&self) -> &[Self] {
        &self.subcommands
    }

    /// The parser of this command. Only the root's is used when parsing.
    pub fn parser(&self) -> &dyn ArgvParser {
        self.parser.as_ref()
    }

    /// The event bus shared by this command's tree.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Control flags the pipeline registers on this command.
    pub fn control_flags(&self) -> Vec<ControlFlag> {
        self.pipeline.control_flags()
    }

    /// Why this tree can only be parsed asynchronously, if it can't be parsed
    /// synchronously.
    pub fn async_requirement(&self) -> Option<String> {
        if self.pipeline.requires_async() {
            return Some(format!("command '{}' resolves values interactively", self.name()));
        }
        if let Some(parameter) = self.schema.parameters.iter().find(|p| p.requires_async()) {
            return Some(format!(
                "parameter '{}' of command '{}' has an async validator",
                parameter.name,
                self.name()
            ));
        }
        self.subcommands.iter().find_map(Self::async_requirement)
    }

    // --- PARSING ---

    /// Parses the process arguments synchronously.
    pub fn parse(&self) -> Result<Parsed, Error> {
        self.parse_from(std::env::args(), ArgvOrigin::Process)
    }

    /// Parses `argv` synchronously.
    ///
    /// # Errors
    /// `Error::ModeMismatch` before any work when the tree needs the async
    /// entry point, `Error::AlreadyParsed` on a second call, and any error
    /// raised while resolving, validating or running the action.
    pub fn parse_from<I, S>(&self, argv: I, origin: ArgvOrigin) -> Result<Parsed, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(reason) = self.async_requirement() {
            return Err(Error::ModeMismatch {
                command: self.name().to_string(),
                reason,
            });
        }
        let root_tokens = self.begin(argv, origin)?;

        let mut controls = root_tokens.controls.clone();
        let (mut command, mut tokens) = (self, &root_tokens);
        let mut parent = None;

        loop {
            let mut run = Run::new(command, tokens, &controls, self.environment.as_ref());
            command.pipeline.resolve(&mut run)?;
            let props = run.validate()?;
            let parsed = command.finish(run, props, parent.take())?;

            let Some((child, child_tokens)) = command.descend(tokens) else {
                return command.dispatch(parsed);
            };
            controls.extend(child_tokens.controls.iter().cloned());
            parent = Some(Box::new(parsed));
            (command, tokens) = (child, child_tokens);
        }
    }

    /// Parses the process arguments, awaiting prompts and async validators.
    pub async fn parse_async(&self) -> Result<Parsed, Error> {
        self.parse_async_from(std::env::args(), ArgvOrigin::Process).await
    }

    /// Parses `argv`, awaiting prompts and async validators one at a time.
    pub async fn parse_async_from<I, S>(&self, argv: I, origin: ArgvOrigin) -> Result<Parsed, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let root_tokens = self.begin(argv, origin)?;

        let mut controls = root_tokens.controls.clone();
        let (mut command, mut tokens) = (self, &root_tokens);
        let mut parent = None;

        loop {
            let mut run = Run::new(command, tokens, &controls, self.environment.as_ref());
            command.pipeline.resolve_async(&mut run).await?;
            let props = run.validate_async().await?;
            let parsed = command.finish(run, props, parent.take())?;

            let Some((child, child_tokens)) = command.descend(tokens) else {
                return command.dispatch(parsed);
            };
            controls.extend(child_tokens.controls.iter().cloned());
            parent = Some(Box::new(parsed));
            (command, tokens) = (child, child_tokens);
        }
    }

    /// Guards against re-entry and tokenizes `argv`.
    fn begin<I, S>(&self, argv: I, origin: ArgvOrigin) -> Result<CommandTokens, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.parsed.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyParsed {
                command: self.name().to_string(),
            });
        }
        let argv = argv.into_iter().map(Into::into).collect();
        let argv = self.parser.normalize(self, argv, origin);
        self.parser.parse(self, &argv)
    }

    fn descend<'c>(&'c self, tokens: &'c CommandTokens) -> Option<(&'c Self, &'c CommandTokens)> {
        let child_tokens = tokens.subcommand.as_deref()?;
        self.subcommands
            .iter()
            .find(|child| child.name() == child_tokens.command)
            .map(|child| (child, child_tokens))
    }

    fn finish(&self, run: Run<'_>, props: Props, parent: Option<Box<Parsed>>) -> Result<Parsed, Error> {
        self.bus.publish(&Event::PropsValidated {
            command: self.name(),
            props: &props,
        })?;

        let (context, operands) = run.into_parts();
        Ok(Parsed {
            command: self.name().to_string(),
            props,
            extras: context.extras.clone(),
            context,
            operands,
            parent,
        })
    }

    /// Runs the action of the leaf command, if it has one.
    fn dispatch(&self, parsed: Parsed) -> Result<Parsed, Error> {
        if let Some(action) = &self.action {
            log::debug!("Running action of '{}'", self.name());
            action(&parsed).map_err(|source| Error::Action {
                command: self.name().to_string(),
                source,
            })?;
        }
        Ok(parsed)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.schema.name)
            .field("registry", &self.registry)
            .field("pipeline", &self.pipeline)
            .field("parser", &self.parser)
            .field("environment", &self.environment)
            .field("subcommands", &self.subcommands)
            .field("action", &self.action.is_some())
            .field("parsed", &self.parsed.load(Ordering::SeqCst))
            .finish()
    }
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{schema, sources::MapEnv, validation::Issue},
        models::{Parameter, Source, ValueMap},
    };
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::{Mutex, atomic::AtomicUsize};

    fn map(value: Value) -> ValueMap {
        value.as_object().cloned().unwrap_or_default()
    }

    fn parse(command: &Command, argv: &[&str]) -> Result<Parsed, Error> {
        command.parse_from(argv.iter().copied(), ArgvOrigin::User)
    }

    fn two_arguments() -> CommandSchema {
        CommandSchema::new("pair")
            .parameter(Parameter::argument("foo"))
            .parameter(Parameter::argument("bar"))
    }

    #[test]
    fn test_required_arguments_from_cli() {
        let command = Command::new(two_arguments()).unwrap();
        let parsed = parse(&command, &["x", "y"]).unwrap();
        assert_eq!(parsed.props.value("foo"), Some(&json!("x")));
        assert_eq!(parsed.props.value("bar"), Some(&json!("y")));
        assert_eq!(parsed.context.source("foo"), Some(Source::Cli));
    }

    #[test]
    fn test_command_config_fills_operands() {
        let command = Command::new(
            two_arguments().from_config(|| Ok(map(json!({ "foo": "1", "bar": "2" })))),
        )
        .unwrap();
        let parsed = parse(&command, &[]).unwrap();
        assert_eq!(parsed.operands, vec![json!("1"), json!("2")]);
    }

    #[test]
    fn test_argument_source_fills_arguments_and_options() {
        let command = Command::new(
            CommandSchema::new("sourced")
                .parameter(Parameter::argument("config").from_source(|_| {
                    Ok(map(json!({ "foo": "1", "bar": "2", "fizz": "3", "buzz": "4" })))
                }))
                .parameter(Parameter::argument("foo").schema(schema::string()))
                .parameter(Parameter::argument("bar").schema(schema::string()))
                .parameter(Parameter::option("fizz"))
                .parameter(Parameter::option("buzz")),
        )
        .unwrap();

        let parsed = parse(&command, &["config"]).unwrap();
        assert_eq!(parsed.operands, vec![json!("config"), json!("1"), json!("2")]);
        assert_eq!(parsed.props.value("fizz"), Some(&json!("3")));
        assert_eq!(parsed.props.value("buzz"), Some(&json!("4")));
    }

    #[test]
    fn test_option_source_fills_other_options() {
        let command = Command::new(
            CommandSchema::new("sourced")
                .parameter(
                    Parameter::option("config")
                        .required()
                        .from_source(|_| Ok(map(json!({ "foo": "1", "bar": "2" })))),
                )
                .parameter(Parameter::option("foo").required())
                .parameter(Parameter::option("bar").required()),
        )
        .unwrap();

        let parsed = parse(&command, &["--config=config"]).unwrap();
        assert_eq!(
            parsed.props.as_map(),
            &map(json!({ "config": "config", "foo": "1", "bar": "2" }))
        );
    }

    #[test]
    fn test_environment_fallback() {
        let command = Command::new(
            two_arguments()
                .use_environment(true)
                .parameter(Parameter::option("fizz"))
                .parameter(Parameter::option("buzz")),
        )
        .unwrap()
        .with_environment(
            [("FOO", "1"), ("BAR", "2"), ("FIZZ", "3"), ("BUZZ", "4")]
                .into_iter()
                .collect::<MapEnv>(),
        );

        let parsed = parse(&command, &[]).unwrap();
        assert_eq!(parsed.operands, vec![json!("1"), json!("2")]);
        assert_eq!(parsed.props.value("fizz"), Some(&json!("3")));
        assert_eq!(parsed.context.source("fizz"), Some(Source::Env));
    }

    #[test]
    fn test_config_beats_environment() {
        let command = Command::new(
            two_arguments()
                .use_environment(true)
                .environment_prefix("JEST_")
                .from_config(|| Ok(map(json!({ "foo": "1", "bar": "2", "fizz": "config" }))))
                .parameter(Parameter::option("fizz"))
                .parameter(Parameter::option("buzz")),
        )
        .unwrap()
        .with_environment(MapEnv::new().with("JEST_FIZZ", "3").with("JEST_BUZZ", "4"));

        let parsed = parse(&command, &[]).unwrap();
        assert_eq!(parsed.props.value("fizz"), Some(&json!("config")));
        assert_eq!(parsed.props.value("buzz"), Some(&json!("4")));
    }

    #[test]
    fn test_missing_required_is_a_parse_error() {
        let command = Command::new(two_arguments()).unwrap();
        let err = parse(&command, &["x"]).unwrap_err();
        assert!(matches!(err, Error::MissingRequired { ref parameter, .. } if parameter == "argument 'bar'"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_typed_props_negation_and_alias() {
        #[derive(Deserialize)]
        struct Build {
            target: String,
            color: bool,
            jobs: u32,
        }

        let command = Command::new(
            CommandSchema::new("build")
                .parameter(Parameter::argument("target"))
                .parameter(Parameter::option("color").negate().schema(schema::boolean()))
                .parameter(
                    Parameter::option("jobs")
                        .alias("j")
                        .default_value(1)
                        .schema(schema::integer()),
                ),
        )
        .unwrap();

        let parsed = parse(&command, &["release", "--no-color", "-j", "8"]).unwrap();
        let build: Build = parsed.props.deserialize().unwrap();
        assert_eq!(build.target, "release");
        assert!(!build.color);
        assert_eq!(build.jobs, 8);

        let command = Command::new(
            CommandSchema::new("build")
                .parameter(Parameter::option("color").negate().schema(schema::boolean())),
        )
        .unwrap();
        let parsed = parse(&command, &[]).unwrap();
        assert_eq!(parsed.props.value("color"), Some(&json!(true)));
    }

    #[test]
    fn test_absent_optional_typed_options_are_left_out() {
        #[derive(Deserialize)]
        struct Serve {
            host: String,
            verbose: Option<bool>,
            workers: Option<u32>,
        }

        let command = Command::new(
            CommandSchema::new("serve")
                .parameter(Parameter::argument("host"))
                .parameter(Parameter::option("verbose").schema(schema::boolean()))
                .parameter(Parameter::option("workers").schema(schema::integer())),
        )
        .unwrap();

        let parsed = parse(&command, &["localhost", "--workers", "4"]).unwrap();
        let serve: Serve = parsed.props.deserialize().unwrap();
        assert_eq!(serve.host, "localhost");
        assert_eq!(serve.verbose, None);
        assert_eq!(serve.workers, Some(4));
        assert!(parsed.props.value("verbose").is_none());
    }

    #[test]
    fn test_extras_hold_surplus_operands_and_unknown_config() {
        let command = Command::new(
            CommandSchema::new("extra")
                .from_config(|| Ok(map(json!({ "unknown": 42 }))))
                .parameter(Parameter::argument("only")),
        )
        .unwrap();
        let parsed = parse(&command, &["a", "b", "c"]).unwrap();
        assert_eq!(parsed.props.value("only"), Some(&json!("a")));
        assert_eq!(parsed.extras.args, vec![json!("b"), json!("c")]);
        assert_eq!(parsed.extras.props.get("unknown"), Some(&json!(42)));
    }

    #[test]
    fn test_second_parse_is_rejected() {
        let command = Command::new(two_arguments()).unwrap();
        parse(&command, &["x", "y"]).unwrap();
        assert!(matches!(
            parse(&command, &["x", "y"]),
            Err(Error::AlreadyParsed { .. })
        ));
    }

    #[test]
    fn test_fresh_instances_resolve_identically() {
        let build = || {
            Command::new(
                two_arguments()
                    .from_config(|| Ok(map(json!({ "bar": "from-config" }))))
                    .parameter(Parameter::option("level").default_value("info")),
            )
            .unwrap()
        };
        let first = parse(&build(), &["x"]).unwrap();
        let second = parse(&build(), &["x"]).unwrap();
        assert_eq!(first.props, second.props);
        assert_eq!(first.operands, second.operands);
    }

    #[test]
    fn test_async_requirement_rejected_before_side_effects() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let child = Command::new(
            CommandSchema::new("child").parameter(
                Parameter::option("token")
                    .async_schema(schema::from_async_fn(|v| async move { Ok(v) })),
            ),
        )
        .unwrap();
        let root = Command::new(CommandSchema::new("root").from_config(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ValueMap::new())
        }))
        .unwrap()
        .subcommand(child)
        .unwrap();

        let err = parse(&root, &["child"]).unwrap_err();
        assert!(matches!(err, Error::ModeMismatch { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_async_entry_point_awaits_validators() {
        let command = Command::new(CommandSchema::new("check").parameter(
            Parameter::argument("token").async_schema(schema::from_async_fn(|v| async move {
                tokio::task::yield_now().await;
                match v.as_str() {
                    Some(token) if token.starts_with("tk_") => Ok(v),
                    _ => Err(Issue::new("Unknown token format")),
                }
            })),
        ))
        .unwrap();
        let parsed = command
            .parse_async_from(["tk_123"], ArgvOrigin::User)
            .await
            .unwrap();
        assert_eq!(parsed.props.value("token"), Some(&json!("tk_123")));
    }

    #[test]
    fn test_nested_commands_chain_parents_and_run_leaf_action_once() {
        let leaf_calls = Arc::new(AtomicUsize::new(0));
        let root_calls = Arc::new(AtomicUsize::new(0));
        let (leaf_counter, root_counter) = (Arc::clone(&leaf_calls), Arc::clone(&root_calls));

        let child = Command::new(CommandSchema::new("deploy").parameter(Parameter::argument("target")))
            .unwrap()
            .action(move |parsed| {
                leaf_counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(parsed.path(), vec!["app", "deploy"]);
                assert_eq!(parsed.lookup("verbose"), Some(&json!("on")));
                Ok(())
            });
        let root = Command::new(CommandSchema::new("app").parameter(Parameter::option("verbose")))
            .unwrap()
            .action(move |_| {
                root_counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .subcommand(child)
            .unwrap();

        let parsed = parse(&root, &["--verbose=on", "deploy", "prod"]).unwrap();
        assert_eq!(parsed.command, "deploy");
        assert_eq!(parsed.props.value("target"), Some(&json!("prod")));
        assert_eq!(parsed.parent().map(|p| p.command.as_str()), Some("app"));
        assert_eq!(leaf_calls.load(Ordering::SeqCst), 1);
        assert_eq!(root_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_duplicate_subcommand_is_rejected() {
        let root = Command::new(CommandSchema::new("app"))
            .unwrap()
            .subcommand(Command::new(CommandSchema::new("run")).unwrap())
            .unwrap();
        let err = root
            .subcommand(Command::new(CommandSchema::new("run")).unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::SchemaDefinition { .. }));
    }

    #[test]
    fn test_events_see_resolved_values_and_shared_bus() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let child = Command::new(CommandSchema::new("child").parameter(Parameter::argument("name")))
            .unwrap();
        let sink = Arc::clone(&seen);
        child.subscribe(EventName::ParametersResolved, move |event| {
            if let Event::ParametersResolved(resolved) = event {
                sink.lock()
                    .unwrap()
                    .push((resolved.command.to_string(), resolved.value("name").cloned()));
            }
            Ok(())
        });

        let root = Command::new(CommandSchema::new("root")).unwrap().subcommand(child).unwrap();
        assert_eq!(root.bus().subscriber_count(Some(EventName::ParametersResolved)), 1);

        parse(&root, &["child", "ada"]).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                ("root".to_string(), None),
                ("child".to_string(), Some(json!("ada"))),
            ]
        );
    }

    #[test]
    fn test_subscriber_error_aborts_parse() {
        let command = Command::new(two_arguments()).unwrap();
        command.subscribe(EventName::ParametersResolved, |_| anyhow::bail!("vetoed"));
        let err = parse(&command, &["x", "y"]).unwrap_err();
        assert!(matches!(err, Error::Subscriber { .. }));
    }

    #[test]
    fn test_action_error_is_wrapped() {
        let command = Command::new(two_arguments())
            .unwrap()
            .action(|_| anyhow::bail!("boom"));
        let err = parse(&command, &["x", "y"]).unwrap_err();
        assert!(matches!(err, Error::Action { ref command, .. } if command == "pair"));
    }
}
