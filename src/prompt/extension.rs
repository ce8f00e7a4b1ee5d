// src/prompt/extension.rs

//! # Prompt Fallback
//!
//! `with_prompt` wraps any pipeline and, once the inner pipeline has resolved
//! a command, asks interactively for the parameters no source could fill.
//! Prompting suspends, so a command using this decorator can only be parsed
//! through `Command::parse_async`.

use crate::{
    constants::{DEFAULT_PROMPT_TEMPLATE, NO_INTERACTIVE_FLAG, NO_INTERACTIVE_ID},
    core::{
        parser::ControlFlag,
        registry::{Delta, Lookup, Policy, ResolvedParameter},
        resolver::{Pipeline, Run},
    },
    error::Error,
    models::{Source, Value},
    prompt::question::{Prompter, Question},
};
use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

/// How one parameter is asked for.
#[derive(Debug, Clone)]
pub enum Prompt {
    /// Ask with this message through the decorator's prompter.
    Message(String),
    /// Ask with the generated message through a dedicated prompter.
    Custom(Arc<dyn Prompter>),
}

/// A pipeline decorated with interactive prompting.
#[derive(Debug, Clone)]
pub struct Prompted<P> {
    inner: P,
    prompter: Arc<dyn Prompter>,
    prompts: HashMap<String, Prompt>,
    always: HashSet<String>,
    default_prompts: bool,
    disable_flag: bool,
}

/// Decorates `inner` so that unresolved parameters are asked through `prompter`.
///
/// Only parameters with a configured prompt are asked until
/// [`Prompted::default_prompts`] is enabled.
pub fn with_prompt<P: Pipeline>(inner: P, prompter: impl Prompter + 'static) -> Prompted<P> {
    Prompted {
        inner,
        prompter: Arc::new(prompter),
        prompts: HashMap::new(),
        always: HashSet::new(),
        default_prompts: false,
        disable_flag: true,
    }
}

impl<P: Pipeline> Prompted<P> {
    /// Generates a question for every required parameter without its own prompt.
    pub fn default_prompts(mut self, enabled: bool) -> Self {
        self.default_prompts = enabled;
        self
    }

    /// Registers the `--no-interactive` switch. On by default.
    pub fn disable_flag(mut self, enabled: bool) -> Self {
        self.disable_flag = enabled;
        self
    }

    /// Asks for `name` with `message` instead of the default wording.
    pub fn prompt(mut self, name: impl Into<String>, message: impl Into<String>) -> Self {
        self.prompts.insert(name.into(), Prompt::Message(message.into()));
        self
    }

    /// Asks for `name` through `prompter` instead of the shared one.
    pub fn prompt_with(mut self, name: impl Into<String>, prompter: impl Prompter + 'static) -> Self {
        self.prompts.insert(name.into(), Prompt::Custom(Arc::new(prompter)));
        self
    }

    /// Asks for `name` even when a source already supplied it, unless the
    /// value came from the command line.
    pub fn always_prompt(mut self, name: impl Into<String>) -> Self {
        self.always.insert(name.into());
        self
    }

    fn needs_answer(&self, entry: &ResolvedParameter) -> bool {
        if !entry.is_settled() {
            return true;
        }
        self.always.contains(entry.binding.name()) && entry.source != Some(Source::Cli)
    }

    /// The questions to ask, in declaration order, each with its prompter.
    fn questions(&self, run: &Run<'_>) -> Vec<(Question, Arc<dyn Prompter>)> {
        let mut questions = Vec::new();
        for entry in run.context().entries.values() {
            if !self.needs_answer(entry) {
                continue;
            }
            let parameter = &entry.binding.parameter;
            let generated = || DEFAULT_PROMPT_TEMPLATE.replace("{}", &parameter.name);
            let (message, prompter) = match self.prompts.get(&parameter.name) {
                Some(Prompt::Message(message)) => (message.clone(), Arc::clone(&self.prompter)),
                Some(Prompt::Custom(prompter)) => (generated(), Arc::clone(prompter)),
                None if self.default_prompts && parameter.required => {
                    (generated(), Arc::clone(&self.prompter))
                }
                None => continue,
            };

            let question = if parameter.choices.is_empty() {
                Question::text(&parameter.name, message)
            } else {
                Question::choice(&parameter.name, message, parameter.choices.clone())
            };
            let default = entry.value.as_ref().and_then(display_value);
            questions.push((question.with_default(default).required(parameter.required), prompter));
        }
        questions
    }
}

fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(display_value).collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        }
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl<P: Pipeline> Pipeline for Prompted<P> {
    fn requires_async(&self) -> bool {
        true
    }

    fn control_flags(&self) -> Vec<ControlFlag> {
        let mut flags = self.inner.control_flags();
        if self.disable_flag {
            flags.push(ControlFlag {
                id: NO_INTERACTIVE_ID.to_string(),
                long: NO_INTERACTIVE_FLAG.to_string(),
                help: "Never prompt for missing values".to_string(),
            });
        }
        flags
    }

    fn resolve(&self, run: &mut Run<'_>) -> Result<(), Error> {
        Err(Error::ModeMismatch {
            command: run.command().to_string(),
            reason: "interactive prompts can only be awaited".to_string(),
        })
    }

    async fn resolve_async(&self, run: &mut Run<'_>) -> Result<(), Error> {
        self.inner.resolve_async(run).await?;

        if self.disable_flag && run.control_flag(NO_INTERACTIVE_ID) {
            log::debug!("'{}': prompting disabled by --{}", run.command(), NO_INTERACTIVE_FLAG);
            return Ok(());
        }

        let questions = self.questions(run);
        if questions.is_empty() {
            return Ok(());
        }

        let mut answers = Delta::new(Policy::Overwrite, Lookup::Name);
        for (question, prompter) in questions {
            log::debug!("'{}': prompting for '{}'", run.command(), question.name);
            let answer = prompter.ask(&question).await.map_err(|source| Error::Prompt {
                command: run.command().to_string(),
                parameter: question.name.clone(),
                source,
            })?;

            let variadic = run
                .registry()
                .get(&question.name)
                .is_some_and(|binding| binding.parameter.variadic);
            let answer = match answer {
                Value::Array(_) => answer,
                scalar if variadic => Value::Array(vec![scalar]),
                scalar => scalar,
            };
            answers.push(question.name, answer, Source::Prompt);
        }

        run.apply(answers);
        run.remerge();
        Ok(())
    }
}

// MARK: --- UNIT TESTS ---
