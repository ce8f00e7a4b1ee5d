// src/prompt/question.rs

use crate::models::Value;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use dialoguer::{Input, Select, theme::ColorfulTheme};
use std::{fmt, sync::Arc};

/// How the answer is collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionKind {
    /// Free text input.
    Text,
    /// A selection list over the parameter's choices.
    Choice(Vec<String>),
}

/// One interactive question for one parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Parameter the answer is for.
    pub name: String,
    /// Text shown to the user.
    pub message: String,
    /// How the answer is collected.
    pub kind: QuestionKind,
    /// The parameter's current value, offered as the default answer.
    pub default: Option<String>,
    /// When set, an empty answer is not accepted.
    pub required: bool,
}

impl Question {
    /// A free text question.
    pub fn text(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            kind: QuestionKind::Text,
            default: None,
            required: false,
        }
    }

    /// A selection among `choices`.
    pub fn choice(name: impl Into<String>, message: impl Into<String>, choices: Vec<String>) -> Self {
        Self {
            kind: QuestionKind::Choice(choices),
            ..Self::text(name, message)
        }
    }

    /// Offers `default` as the pre-filled answer.
    pub fn with_default(mut self, default: Option<String>) -> Self {
        self.default = default;
        self
    }

    /// Sets whether an empty answer is refused.
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }
}

/// The interactive I/O collaborator.
#[async_trait]
pub trait Prompter: Send + Sync + fmt::Debug {
    /// Asks `question` and returns the answer.
    async fn ask(&self, question: &Question) -> Result<Value>;
}

#[async_trait]
impl<T: Prompter + ?Sized> Prompter for Arc<T> {
    async fn ask(&self, question: &Question) -> Result<Value> {
        self.as_ref().ask(question).await
    }
}

/// Asks on the terminal with dialoguer's colorful theme. The blocking
/// terminal I/O runs on tokio's blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct DialoguerPrompter;

impl DialoguerPrompter {
    fn ask_blocking(question: &Question) -> Result<Value> {
        let theme = ColorfulTheme::default();
        match &question.kind {
            QuestionKind::Text => {
                let mut input = Input::<String>::with_theme(&theme)
                    .with_prompt(&question.message)
                    .allow_empty(!question.required);
                if let Some(default) = &question.default {
                    input = input.default(default.clone());
                }
                Ok(Value::String(input.interact_text()?))
            }
            QuestionKind::Choice(choices) => {
                let selected = question
                    .default
                    .as_ref()
                    .and_then(|default| choices.iter().position(|c| c == default))
                    .unwrap_or(0);
                let index = Select::with_theme(&theme)
                    .with_prompt(&question.message)
                    .items(choices)
                    .default(selected)
                    .interact()?;
                choices
                    .get(index)
                    .map(|choice| Value::String(choice.clone()))
                    .ok_or_else(|| anyhow!("Selection {} is out of range", index))
            }
        }
    }
}

#[async_trait]
impl Prompter for DialoguerPrompter {
    async fn ask(&self, question: &Question) -> Result<Value> {
        let question = question.clone();
        tokio::task::spawn_blocking(move || Self::ask_blocking(&question)).await?
    }
}

// MARK: --- UNIT TESTS ---
