// src/core/events.rs

//! # Event Bus
//!
//! A synchronous, in-process publish/subscribe channel shared by a whole
//! command tree. Handlers run in subscription order on the publishing thread,
//! and the first handler error aborts the publish.

use crate::{
    core::{registry::ResolutionContext, validation::Props},
    error::Error,
    models::Value,
};
use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

/// Ids are unique across buses, so they survive a merge into a parent bus.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Channel an event is published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    /// Published before validation; handlers may inject values.
    ParametersResolved,
    /// Published with the validated props.
    PropsValidated,
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParametersResolved => f.write_str("parameters-resolved"),
            Self::PropsValidated => f.write_str("props-validated"),
        }
    }
}

/// Published once every source has been merged, before validation.
/// Handlers may inject values, which apply at the prompt tier.
pub struct ParametersResolved<'a> {
    /// Name of the command being resolved.
    pub command: &'a str,
    /// The merged values, with their sources.
    pub context: &'a ResolutionContext,
    pub(crate) injections: &'a RefCell<Vec<(String, Value)>>,
}

impl ParametersResolved<'_> {
    /// The merged value of `name`, before validation.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.context.value(name)
    }

    /// Supplies a value for `name`. It overrides everything except the command line.
    pub fn inject(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.injections.borrow_mut().push((name.into(), value.into()));
    }
}

impl fmt::Debug for ParametersResolved<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParametersResolved")
            .field("command", &self.command)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Events published while a command resolves.
#[derive(Debug)]
pub enum Event<'a> {
    /// See `ParametersResolved`.
    ParametersResolved(ParametersResolved<'a>),
    /// The command's props passed validation.
    PropsValidated { command: &'a str, props: &'a Props },
}

impl Event<'_> {
    /// The channel this event is published on.
    pub fn name(&self) -> EventName {
        match self {
            Self::ParametersResolved(_) => EventName::ParametersResolved,
            Self::PropsValidated { .. } => EventName::PropsValidated,
        }
    }
}

type Handler = Arc<dyn Fn(&Event<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Publish/subscribe channels shared across a command tree.
#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<EventName, Vec<(u64, Handler)>>>,
    /// Set once this bus's handlers have moved to a parent command's bus.
    merged_into: Mutex<Option<Arc<EventBus>>>,
}

impl EventBus {
    /// An empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `name`. The returned subscription detaches it.
    pub fn subscribe<F>(self: &Arc<Self>, name: EventName, handler: F) -> Subscription
    where
        F: Fn(&Event<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed);
        self.lock()
            .entry(name)
            .or_default()
            .push((id, Arc::new(handler)));
        log::trace!("Subscribed handler {} to '{}'", id, name);

        Subscription {
            bus: Arc::clone(self),
            name,
            id,
        }
    }

    /// Calls every handler of the event's channel, in subscription order.
    ///
    /// # Errors
    /// `Error::Subscriber` with the first handler error; later handlers do not run.
    pub fn publish(&self, event: &Event<'_>) -> Result<(), Error> {
        let name = event.name();
        // Handlers are cloned out so a handler may subscribe or unsubscribe.
        let handlers: Vec<Handler> = self
            .lock()
            .get(&name)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        log::debug!("Publishing '{}' to {} subscriber(s)", name, handlers.len());
        for handler in handlers {
            handler(event).map_err(|source| Error::Subscriber {
                event: name.to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// The number of live handlers for `name`, or for every event when `None`.
    pub fn subscriber_count(&self, name: Option<EventName>) -> usize {
        let handlers = self.lock();
        match name {
            Some(name) => handlers.get(&name).map_or(0, Vec::len),
            None => handlers.values().map(Vec::len).sum(),
        }
    }

    /// Removes the handlers of `name`, or all handlers when `None`.
    pub fn clear(&self, name: Option<EventName>) {
        let mut handlers = self.lock();
        match name {
            Some(name) => {
                handlers.remove(&name);
            }
            None => handlers.clear(),
        }
    }

    /// Moves every handler of `other` onto this bus, after the existing ones.
    /// Subscriptions made on `other` keep working through the merge.
    pub(crate) fn absorb(self: &Arc<Self>, other: &Arc<Self>) {
        if Arc::ptr_eq(self, other) {
            return;
        }
        let drained: Vec<_> = other.lock().drain().collect();
        {
            let mut handlers = self.lock();
            for (name, list) in drained {
                handlers.entry(name).or_default().extend(list);
            }
        }
        *other
            .merged_into
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(self));
    }

    fn unsubscribe(&self, name: EventName, id: u64) {
        if let Some(list) = self.lock().get_mut(&name) {
            list.retain(|(existing, _)| *existing != id);
        }
        let parent = self
            .merged_into
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(parent) = parent {
            parent.unsubscribe(name, id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EventName, Vec<(u64, Handler)>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count(None))
            .finish()
    }
}

/// Handle to one registered handler.
#[derive(Debug, Clone)]
pub struct Subscription {
    bus: Arc<EventBus>,
    name: EventName,
    id: u64,
}

impl Subscription {
    /// Detaches the handler. A no-op if it was already removed, e.g. by `clear`.
    pub fn unsubscribe(self) {
        self.bus.unsubscribe(self.name, self.id);
    }
}

// MARK: --- UNIT TESTS ---
