// src/core/parser.rs

//! The command-line collaborator. It only tokenizes: it reports which values
//! the user actually typed and never applies defaults, environment variables
//! or requiredness, since those belong to the resolver.

use crate::{
    constants::{EXTRA_OPERANDS_ID, FLAG_PRESENT_VALUE},
    core::{command::Command, registry::Binding},
    error::Error,
    models::Value,
};
use clap::{Arg, ArgAction, ArgMatches, builder::PossibleValuesParser, parser::ValueSource};
use std::{
    collections::{BTreeSet, HashSet},
    fmt,
};

/// Where an argv list came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArgvOrigin {
    /// `std::env::args()`: the first element is the binary name.
    #[default]
    Process,
    /// Arguments only, as a user would type them after the binary name.
    User,
}

/// A boolean switch contributed by a pipeline, e.g. `--no-interactive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFlag {
    /// Clap id, reported in `CommandTokens::controls`.
    pub id: String,
    /// Long flag without the leading `--`.
    pub long: String,
    /// Help text shown in usage output.
    pub help: String,
}

/// What the user typed for one command on the selected path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandTokens {
    /// Name of the command these tokens belong to.
    pub command: String,
    /// Option values keyed by parameter name, in argv order.
    pub options: Vec<(String, Value)>,
    /// Positional operands in the order typed, surplus ones included.
    pub operands: Vec<String>,
    /// Ids of the control flags that were set.
    pub controls: BTreeSet<String>,
    /// Tokens of the selected subcommand, if any.
    pub subcommand: Option<Box<CommandTokens>>,
}

impl CommandTokens {
    /// The value typed for option `name`.
    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

/// Puts the binary name first when `argv` holds user arguments only.
pub fn with_program(program: &str, argv: Vec<String>, origin: ArgvOrigin) -> Vec<String> {
    match origin {
        ArgvOrigin::Process => argv,
        ArgvOrigin::User => std::iter::once(program.to_string()).chain(argv).collect(),
    }
}

/// Turns argv into per-command tokens. `ClapParser` is the default backend.
pub trait ArgvParser: Send + Sync + fmt::Debug {
    /// Pre-parse hook that turns `argv` into the form `parse` expects, with
    /// the binary name first.
    fn normalize(&self, command: &Command, argv: Vec<String>, origin: ArgvOrigin) -> Vec<String> {
        with_program(command.name(), argv, origin)
    }

    /// Tokenizes `argv` against the command tree rooted at `command`.
    fn parse(&self, command: &Command, argv: &[String]) -> Result<CommandTokens, Error>;
}

/// The default parser, backed by clap's builder API.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClapParser;

impl ClapParser {
    /// Builds the clap command for `command` and all of its subcommands.
    pub fn build(&self, command: &Command) -> clap::Command {
        let registry = command.registry();
        let mut cmd = clap::Command::new(command.name().to_string()).disable_help_subcommand(true);
        if let Some(description) = &command.schema().description {
            cmd = cmd.about(description.clone());
        }

        for binding in registry.options() {
            cmd = cmd.arg(Self::build_option(binding));
        }

        let arguments = registry.arguments();
        for (position, binding) in arguments.iter().enumerate() {
            cmd = cmd.arg(Self::build_argument(binding, position + 1));
        }
        if !registry.has_variadic_argument() && command.subcommands().is_empty() {
            cmd = cmd.arg(
                Arg::new(EXTRA_OPERANDS_ID)
                    .index(arguments.len() + 1)
                    .num_args(1..)
                    .action(ArgAction::Append)
                    .hide(true),
            );
        }

        for flag in command.control_flags() {
            cmd = cmd.arg(
                Arg::new(flag.id)
                    .long(flag.long)
                    .help(flag.help)
                    .action(ArgAction::SetTrue),
            );
        }

        for child in command.subcommands() {
            cmd = cmd.subcommand(self.build(child));
        }
        cmd
    }

    fn build_option(binding: &Binding) -> Arg {
        let parameter = &binding.parameter;
        let mut arg = Arg::new(binding.name().to_string()).long(binding.effective_flag());

        if let Some(alias) = &binding.names.alias {
            let mut chars = alias.chars();
            arg = match (chars.next(), chars.next()) {
                (Some(short), None) => arg.short(short),
                _ => arg.visible_alias(alias.clone()),
            };
        }
        if let Some(description) = &parameter.description {
            arg = arg.help(description.clone());
        }

        arg = if parameter.negate {
            arg.action(ArgAction::SetFalse)
        } else if parameter.variadic {
            arg.num_args(1..).action(ArgAction::Append)
        } else if parameter.required || !parameter.choices.is_empty() {
            arg.num_args(1).action(ArgAction::Set)
        } else {
            arg.num_args(0..=1)
                .default_missing_value(FLAG_PRESENT_VALUE)
                .action(ArgAction::Set)
        };

        if !parameter.negate && !parameter.choices.is_empty() {
            arg = arg.value_parser(PossibleValuesParser::new(parameter.choices.clone()));
        }
        arg
    }

    fn build_argument(binding: &Binding, index: usize) -> Arg {
        let parameter = &binding.parameter;
        let mut arg = Arg::new(binding.name().to_string())
            .index(index)
            .value_name(binding.name().to_string());

        if let Some(description) = &parameter.description {
            arg = arg.help(description.clone());
        }
        if !parameter.choices.is_empty() {
            arg = arg.value_parser(PossibleValuesParser::new(parameter.choices.clone()));
        }

        if parameter.variadic {
            arg.num_args(1..).action(ArgAction::Append)
        } else {
            arg.num_args(1).action(ArgAction::Set)
        }
    }

    fn long_aliases(command: &Command, aliases: &mut HashSet<String>) {
        for binding in command.registry().options() {
            if let Some(alias) = binding.names.alias.as_ref().filter(|a| a.chars().count() > 1) {
                aliases.insert(alias.clone());
            }
        }
        for child in command.subcommands() {
            Self::long_aliases(child, aliases);
        }
    }

    /// `-fz` and `-fz=3` become `--fz` and `--fz=3` when `fz` is a known alias.
    fn expand_alias(token: String, aliases: &HashSet<String>) -> String {
        let Some(rest) = token.strip_prefix('-').filter(|rest| !rest.starts_with('-')) else {
            return token;
        };
        let name = rest.split_once('=').map_or(rest, |(name, _)| name);
        if aliases.contains(name) {
            format!("-{token}")
        } else {
            token
        }
    }

    fn collect(command: &Command, matches: &ArgMatches) -> CommandTokens {
        let typed = |id: &str| matches.value_source(id) == Some(ValueSource::CommandLine);
        let mut tokens = CommandTokens {
            command: command.name().to_string(),
            ..CommandTokens::default()
        };

        let mut options: Vec<(usize, String, Value)> = Vec::new();
        for binding in command.registry().options() {
            let id = binding.name();
            if !typed(id) {
                continue;
            }
            let value = if binding.parameter.negate {
                matches
                    .try_get_one::<bool>(id)
                    .ok()
                    .flatten()
                    .map(|flag| Value::Bool(*flag))
            } else if binding.parameter.variadic {
                matches
                    .try_get_many::<String>(id)
                    .ok()
                    .flatten()
                    .map(|values| Value::Array(values.cloned().map(Value::String).collect()))
            } else {
                matches
                    .try_get_one::<String>(id)
                    .ok()
                    .flatten()
                    .map(|value| Value::String(value.clone()))
            };
            if let Some(value) = value {
                let position = matches.index_of(id).unwrap_or(usize::MAX);
                options.push((position, id.to_string(), value));
            }
        }
        options.sort_by_key(|(position, _, _)| *position);
        tokens.options = options
            .into_iter()
            .map(|(_, name, value)| (name, value))
            .collect();

        let positional_ids = command
            .registry()
            .arguments()
            .iter()
            .map(|binding| binding.name())
            .chain(std::iter::once(EXTRA_OPERANDS_ID));
        for id in positional_ids {
            if let Some(values) = matches.try_get_many::<String>(id).ok().flatten() {
                tokens.operands.extend(values.cloned());
            }
        }

        for flag in command.control_flags() {
            if matches.try_get_one::<bool>(&flag.id).ok().flatten() == Some(&true) {
                tokens.controls.insert(flag.id);
            }
        }

        if let Some((name, sub_matches)) = matches.subcommand() {
            if let Some(child) = command.subcommands().iter().find(|c| c.name() == name) {
                tokens.subcommand = Some(Box::new(Self::collect(child, sub_matches)));
            }
        }

        tokens
    }
}

impl ArgvParser for ClapParser {
    /// Also rewrites `-alias` to `--alias` for multi-character aliases, which
    /// clap only accepts as long flags. Tokens after `--` are left alone.
    fn normalize(&self, command: &Command, argv: Vec<String>, origin: ArgvOrigin) -> Vec<String> {
        let mut aliases = HashSet::new();
        Self::long_aliases(command, &mut aliases);

        let mut argv = with_program(command.name(), argv, origin).into_iter();
        let mut normalized: Vec<String> = argv.next().into_iter().collect();
        for token in argv.by_ref() {
            if token == "--" {
                normalized.push(token);
                break;
            }
            normalized.push(Self::expand_alias(token, &aliases));
        }
        normalized.extend(argv);
        normalized
    }

    fn parse(&self, command: &Command, argv: &[String]) -> Result<CommandTokens, Error> {
        let matches = self.build(command).try_get_matches_from(argv)?;
        let tokens = Self::collect(command, &matches);
        log::debug!(
            "Parsed '{}': {} option(s), {} operand(s)",
            tokens.command,
            tokens.options.len(),
            tokens.operands.len()
        );
        Ok(tokens)
    }
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommandSchema, Parameter};
    use serde_json::json;

    fn argv(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn command() -> Command {
        Command::new(
            CommandSchema::new("tool")
                .parameter(Parameter::argument("source"))
                .parameter(Parameter::option("outDir").alias("o"))
                .parameter(Parameter::option("color").negate())
                .parameter(Parameter::option("tag").variadic())
                .parameter(Parameter::option("level").choices(["low", "high"]))
                .parameter(Parameter::option("force")),
        )
        .unwrap()
    }

    #[test]
    fn test_normalize_prepends_program_for_user_argv() {
        let parser = ClapParser;
        let command = command();
        assert_eq!(
            parser.normalize(&command, argv(&["a"]), ArgvOrigin::User),
            argv(&["tool", "a"])
        );
        assert_eq!(
            parser.normalize(&command, argv(&["bin", "a"]), ArgvOrigin::Process),
            argv(&["bin", "a"])
        );
    }

    #[test]
    fn test_single_dash_multi_char_alias() {
        let root = Command::new(
            CommandSchema::new("tool")
                .parameter(Parameter::option("fizz").alias("fz"))
                .parameter(Parameter::option("buzz").alias("b")),
        )
        .unwrap();

        let normalized = ClapParser.normalize(
            &root,
            argv(&["-fz", "3", "-b", "4", "-fz=5", "--", "-fz"]),
            ArgvOrigin::User,
        );
        assert_eq!(
            normalized,
            argv(&["tool", "--fz", "3", "-b", "4", "--fz=5", "--", "-fz"])
        );

        let tokens = ClapParser
            .parse(&root, &ClapParser.normalize(&root, argv(&["-fz", "3"]), ArgvOrigin::User))
            .unwrap();
        assert_eq!(tokens.option("fizz"), Some(&json!("3")));
    }

    #[test]
    fn test_only_typed_values_are_reported() {
        let tokens = ClapParser
            .parse(&command(), &argv(&["tool", "src", "-o", "dist", "--force"]))
            .unwrap();
        assert_eq!(tokens.operands, argv(&["src"]));
        assert_eq!(
            tokens.options,
            vec![
                ("outDir".to_string(), json!("dist")),
                ("force".to_string(), json!(FLAG_PRESENT_VALUE)),
            ]
        );
        assert!(tokens.option("color").is_none());
    }

    #[test]
    fn test_negation_variadic_and_argv_order() {
        let tokens = ClapParser
            .parse(
                &command(),
                &argv(&["tool", "--tag", "a", "b", "--no-color", "src", "surplus"]),
            )
            .unwrap();
        assert_eq!(
            tokens.options,
            vec![
                ("tag".to_string(), json!(["a", "b"])),
                ("color".to_string(), json!(false)),
            ]
        );
        assert_eq!(tokens.operands, argv(&["src", "surplus"]));
    }

    #[test]
    fn test_invalid_choice_is_a_parse_error() {
        let err = ClapParser
            .parse(&command(), &argv(&["tool", "--level", "medium"]))
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_subcommand_tokens() {
        let root = Command::new(CommandSchema::new("root"))
            .unwrap()
            .subcommand(
                Command::new(CommandSchema::new("child").parameter(Parameter::argument("name")))
                    .unwrap(),
            )
            .unwrap();
        let tokens = ClapParser.parse(&root, &argv(&["root", "child", "x"])).unwrap();
        let child = tokens.subcommand.unwrap();
        assert_eq!(child.command, "child");
        assert_eq!(child.operands, argv(&["x"]));
    }
}
