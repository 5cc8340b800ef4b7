//! Synchronous publish/subscribe used by the repository and the playlist.
//!
//! Handlers run on the emitting thread, in subscription order, before `emit`
//! returns. Each handler receives the emitting component as `source`, so it
//! can read the current state without borrowing the component again.

use std::fmt;

use log::trace;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<S, E> = Box<dyn FnMut(&S, &E)>;

pub struct EventBus<E, S: ?Sized = ()> {
    next_id: u64,
    handlers: Vec<(SubscriptionId, Handler<S, E>)>,
}

impl<E: fmt::Debug, S: ?Sized> EventBus<E, S> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            handlers: Vec::new(),
        }
    }

    pub fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&S, &E) + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, Box::new(handler)));
        id
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(handler_id, _)| *handler_id != id);
        self.handlers.len() != before
    }

    pub fn emit(&mut self, source: &S, event: &E) {
        trace!("Emitting {:?} to {} handler(s)", event, self.handlers.len());
        for (_, handler) in self.handlers.iter_mut() {
            handler(source, event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

impl<E: fmt::Debug, S: ?Sized> Default for EventBus<E, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, S: ?Sized> fmt::Debug for EventBus<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.handlers.len())
            .finish()
    }
}
