// src/prompt/mod.rs

//! Interactive fallback for parameters that no other source resolved.

pub mod extension;
/// Questions and the `Prompter` collaborator that answers them.
pub mod question;

pub use extension::{Prompt, Prompted, with_prompt};
pub use question::{DialoguerPrompter, Prompter, Question, QuestionKind};
