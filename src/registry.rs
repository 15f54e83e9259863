//! Dispatch registry mapping topic filters to message handlers.

use crate::error::Error;
use crate::topic::TopicFilter;
use crate::types::Message;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Result returned by a message handler.
pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Callback invoked synchronously for each message routed to its filter.
pub type MessageHandler = Box<dyn FnMut(&Message) -> HandlerResult + Send + 'static>;

/// A filter bound to its handler.
pub struct Subscription {
    filter: TopicFilter,
    handler: MessageHandler,
}

impl Subscription {
    /// Returns the subscription filter.
    pub fn filter(&self) -> &TopicFilter {
        &self.filter
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter.as_str())
            .finish_non_exhaustive()
    }
}

/// Result of routing one message.
#[derive(Debug)]
pub enum Dispatch {
    /// The best-matching handler ran to completion.
    Delivered,
    /// No registered filter matches the topic.
    Unmatched,
    /// The handler returned an error or panicked.
    Failed(Error),
}

/// Ordered set of subscriptions, one per filter.
#[derive(Debug, Default)]
pub struct DispatchRegistry {
    subscriptions: Vec<Subscription>,
}

impl DispatchRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` to `filter`.
    ///
    /// Registering a filter that is already present replaces its handler and
    /// keeps its position. Returns true if the filter was new.
    pub fn register<F>(&mut self, filter: TopicFilter, handler: F) -> bool
    where
        F: FnMut(&Message) -> HandlerResult + Send + 'static,
    {
        let handler: MessageHandler = Box::new(handler);
        if let Some(existing) = self.subscriptions.iter_mut().find(|s| s.filter == filter) {
            existing.handler = handler;
            return false;
        }
        self.subscriptions.push(Subscription { filter, handler });
        true
    }

    /// Removes the binding for `filter`. Returns true if one was present.
    pub fn remove(&mut self, filter: &str) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.filter.as_str() != filter);
        self.subscriptions.len() != before
    }

    /// Filters in registration order.
    pub fn filters(&self) -> impl Iterator<Item = &TopicFilter> {
        self.subscriptions.iter().map(|s| &s.filter)
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Returns the filter that would receive `topic`, if any.
    ///
    /// The filter with the most literal segments wins; an exact filter beats
    /// a wildcard one of equal length; remaining ties go to the earliest
    /// registration.
    pub fn best_match(&self, topic: &str) -> Option<&TopicFilter> {
        self.best_index(topic).map(|i| &self.subscriptions[i].filter)
    }

    /// Routes `message` to its best-matching handler.
    ///
    /// Handler errors and panics are caught and returned as
    /// [`Dispatch::Failed`] so one bad message cannot take down the caller.
    pub fn dispatch(&mut self, message: &Message) -> Dispatch {
        let Some(index) = self.best_index(&message.topic) else {
            return Dispatch::Unmatched;
        };
        let handler = &mut self.subscriptions[index].handler;

        match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
            Ok(Ok(())) => Dispatch::Delivered,
            Ok(Err(e)) => Dispatch::Failed(Error::HandlerFault {
                topic: message.topic.clone(),
                details: e.to_string(),
            }),
            Err(panic) => Dispatch::Failed(Error::HandlerFault {
                topic: message.topic.clone(),
                details: format!("handler panicked: {}", panic_message(panic.as_ref())),
            }),
        }
    }

    fn best_index(&self, topic: &str) -> Option<usize> {
        let mut best: Option<(usize, (usize, bool))> = None;
        for (i, sub) in self.subscriptions.iter().enumerate() {
            if !sub.filter.matches(topic) {
                continue;
            }
            let rank = sub.filter.specificity();
            if best.map_or(true, |(_, current)| rank > current) {
                best = Some((i, rank));
            }
        }
        best.map(|(i, _)| i)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
