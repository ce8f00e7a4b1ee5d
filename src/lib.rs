// src/lib.rs

//! # argbind
//!
//! Declarative command-line parameter binding. A `CommandSchema` describes
//! arguments and options; a `Command` resolves each one from the command line,
//! config producers, the environment and defaults (in that order of
//! precedence), validates the result and hands typed props to an action.
//! The `prompt` module adds interactive fallback for values nothing supplied.

/// Reserved clap ids and flag names.
pub mod constants;
/// Resolution engine: registry, resolver, parser, events and commands.
pub mod core;
/// The crate error type.
pub mod error;
/// Declarative parameter and command schemas.
pub mod models;
/// Interactive fallback through `with_prompt`.
pub mod prompt;

pub use crate::core::{
    command::{Command, Parsed},
    events::{Event, EventName, Subscription},
    parser::ArgvOrigin,
    resolver::SourceResolver,
    schema,
    sources::{MapEnv, ProcessEnv},
    validation::{Extras, Issue, Props},
};
pub use error::Error;
pub use models::{CommandSchema, EnvBinding, Parameter, Source};
