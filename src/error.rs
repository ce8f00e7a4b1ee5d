// src/error.rs

use crate::core::{resolver::State, validation::ValidationError};
use thiserror::Error;

/// Every failure the binding layer can surface to its caller.
///
/// Nothing is retried internally: an error aborts the remaining pipeline for the
/// command being resolved and propagates to whoever called `parse`/`parse_async`.
#[derive(Error, Debug)]
pub enum Error {
    /// The declarative schema itself is invalid. Raised while constructing a command.
    #[error("Invalid definition for command '{command}': {reason}")]
    SchemaDefinition { command: String, reason: String },

    /// Malformed command-line input, reported by the parser collaborator.
    /// This also carries help and version display requests.
    #[error(transparent)]
    Parse(#[from] clap::Error),

    /// A required parameter had no value once every source was consulted.
    #[error("Command '{command}' is missing a value for required {parameter}.")]
    MissingRequired { command: String, parameter: String },

    /// A resolved value was rejected by its schema.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The synchronous entry point was used on a tree that needs to suspend.
    #[error("Command '{command}' cannot be parsed synchronously: {reason}. Use `parse_async` instead.")]
    ModeMismatch { command: String, reason: String },

    /// The same command instance was parsed twice.
    #[error("Command '{command}' has already been parsed. Construct a new instance to parse again.")]
    AlreadyParsed { command: String },

    /// A config producer or `from_source` function failed.
    #[error("Config source {origin} failed: {source}")]
    Source {
        origin: String,
        #[source]
        source: anyhow::Error,
    },

    /// The interactive collaborator failed to produce an answer.
    #[error("Prompt for '{parameter}' in command '{command}' failed: {source}")]
    Prompt {
        command: String,
        parameter: String,
        #[source]
        source: anyhow::Error,
    },

    /// An event subscriber returned an error; subscribers are not isolated from the publisher.
    #[error("Subscriber to '{event}' failed: {source}")]
    Subscriber {
        event: String,
        #[source]
        source: anyhow::Error,
    },

    /// The user callback attached to the command failed.
    #[error("Action for command '{command}' failed: {source}")]
    Action {
        command: String,
        #[source]
        source: anyhow::Error,
    },

    /// A resolution stage was run out of order.
    #[error("Resolution of command '{command}' cannot move from {from:?} to {to:?}.")]
    InvalidTransition {
        command: String,
        from: State,
        to: State,
    },
}

impl Error {
    /// The process exit code that matches this error.
    ///
    /// Help and version requests exit with `0`, malformed input with `2`
    /// (clap's convention), and everything else with `1`.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Parse(err) => err.exit_code(),
            Self::MissingRequired { .. } => 2,
            _ => 1,
        }
    }

    /// True for errors raised because of what the user typed or omitted,
    /// as opposed to how the command was declared or wired.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::MissingRequired { .. } | Self::Validation(_)
        )
    }
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validation::Issue;

    #[test]
    fn test_exit_codes() {
        let missing = Error::MissingRequired {
            command: "deploy".into(),
            parameter: "argument 'target'".into(),
        };
        assert_eq!(missing.exit_code(), 2);
        assert!(missing.is_user_error());

        let mode = Error::ModeMismatch {
            command: "deploy".into(),
            reason: "prompts".into(),
        };
        assert_eq!(mode.exit_code(), 1);
        assert!(!mode.is_user_error());

        let help = clap::Command::new("deploy")
            .try_get_matches_from(["deploy", "--help"])
            .unwrap_err();
        assert_eq!(Error::from(help).exit_code(), 0);
    }

    #[test]
    fn test_validation_error_is_transparent() {
        let err = Error::from(ValidationError {
            command: "deploy".into(),
            issues: vec![Issue::new("Expected integer").at("port")],
        });
        let message = err.to_string();
        assert!(message.contains("port"));
        assert!(message.contains("Expected integer"));
    }
}
