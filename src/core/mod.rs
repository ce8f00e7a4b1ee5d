// src/core/mod.rs

pub mod command;
pub mod events;
/// Derivation of flags, config keys and environment keys.
pub mod names;
pub mod parser;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod sequencer;
/// Environment access and file-backed config producers.
pub mod sources;
pub mod validation;
