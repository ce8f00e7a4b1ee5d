// src/core/sequencer.rs

//! # Argument Sequencer
//!
//! Positional arguments are consumed in a fixed order: required ones first,
//! then optional ones, then the single variadic argument. Operands typed on
//! the command line take their position; any position the command line left
//! empty is filled from the value the argument already resolved elsewhere.

use crate::{
    core::registry::{Binding, ResolvedParameter},
    models::{Parameter, Source, Value},
};
use std::sync::Arc;

/// One positional slot after merging: the value and the tier it came from.
pub type Slot = Option<(Value, Source)>;

/// Stable-sorts `items` into positional order.
pub fn sequence_by<T, F>(mut items: Vec<T>, selector: F) -> Vec<T>
where
    F: Fn(&T) -> &Parameter,
{
    items.sort_by_key(|item| {
        let parameter = selector(item);
        (parameter.variadic, !parameter.required)
    });
    items
}

/// `sequence_by` over bare parameters.
pub fn sequence(arguments: Vec<Arc<Parameter>>) -> Vec<Arc<Parameter>> {
    sequence_by(arguments, |p| p.as_ref())
}

/// Merges command-line operands with already resolved argument values.
///
/// `resolved` must be in positional order. A variadic array contributes one
/// slot per element; an argument without a value leaves a hole so the
/// arguments after it keep their position.
pub fn merge_slots(cli_operands: &[String], resolved: &[&ResolvedParameter]) -> Vec<Slot> {
    let mut flattened: Vec<Slot> = Vec::new();
    for entry in resolved {
        let source = entry.source.unwrap_or(Source::Default);
        match &entry.value {
            Some(Value::Array(items)) if entry.binding.parameter.variadic => {
                flattened.extend(items.iter().map(|item| Some((item.clone(), source))));
            }
            Some(_) if entry.has_value() => {
                flattened.push(entry.value.clone().map(|value| (value, source)));
            }
            _ => flattened.push(None),
        }
    }

    let length = cli_operands.len().max(flattened.len());
    (0..length)
        .map(|index| match cli_operands.get(index) {
            Some(token) if !token.is_empty() => Some((Value::String(token.clone()), Source::Cli)),
            _ => flattened.get(index).cloned().flatten(),
        })
        .collect()
}

/// The compacted operand list: every filled slot, in order.
pub fn merge_from_source(cli_operands: &[String], resolved: &[&ResolvedParameter]) -> Vec<Value> {
    merge_slots(cli_operands, resolved)
        .into_iter()
        .flatten()
        .map(|(value, _)| value)
        .collect()
}

/// Slots assigned to arguments, plus the operands no argument could take.
#[derive(Debug, Default, PartialEq)]
pub struct Distribution {
    /// `(name, value, source)` for every filled slot.
    pub assignments: Vec<(String, Value, Source)>,
    /// Values no argument slot could take.
    pub extras: Vec<Value>,
}

/// Assigns slots positionally. The variadic argument takes every remaining
/// slot as one list, tagged with the highest tier among them. Without a
/// variadic argument, the remainder becomes extras.
pub fn distribute(slots: Vec<Slot>, arguments: &[Arc<Binding>]) -> Distribution {
    let mut distribution = Distribution::default();
    let mut slots = slots.into_iter();

    for binding in arguments {
        if binding.parameter.variadic {
            let rest: Vec<(Value, Source)> = slots.by_ref().flatten().collect();
            if let Some(source) = rest.iter().map(|(_, source)| *source).max() {
                let values = rest.into_iter().map(|(value, _)| value).collect();
                distribution
                    .assignments
                    .push((binding.name().to_string(), Value::Array(values), source));
            }
            break;
        }
        if let Some(Some((value, source))) = slots.next() {
            distribution
                .assignments
                .push((binding.name().to_string(), value, source));
        }
    }

    distribution.extras = slots.flatten().map(|(value, _)| value).collect();
    distribution
}

// MARK: --- UNIT TESTS ---
