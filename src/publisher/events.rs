//! In-process event dispatch
//!
//! Status notifications flow from the connection to the stream (and to any
//! external observers) through a small synchronous dispatcher. Listeners are
//! typed closures keyed by an event kind; registration returns a token that
//! is the removal identity. Dispatch walks a snapshot of the listener list,
//! so a listener may add or remove listeners and the change takes effect on
//! the next dispatch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::protocol::message::StatusInfo;

/// Event kinds the dispatcher routes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An RTMP status notification (onStatus, connect result)
    RtmpStatus,
    /// The underlying connection went away
    ConnectionClosed,
}

/// A dispatched event
#[derive(Debug, Clone)]
pub enum Event {
    /// Status notification from the server
    Status(StatusInfo),
    /// Connection loss
    Closed,
}

impl Event {
    /// The kind this event dispatches under
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Status(_) => EventKind::RtmpStatus,
            Event::Closed => EventKind::ConnectionClosed,
        }
    }

    /// Status payload, for RtmpStatus events
    pub fn status(&self) -> Option<&StatusInfo> {
        match self {
            Event::Status(info) => Some(info),
            Event::Closed => None,
        }
    }
}

/// Removal identity returned by listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerToken {
    kind: EventKind,
    id: u64,
}

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

struct Listener {
    id: u64,
    callback: Callback,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<Listener>>,
}

/// Synchronous multi-listener event dispatcher
#[derive(Default)]
pub struct EventDispatcher {
    inner: Mutex<Inner>,
}

impl EventDispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for an event kind; returns its removal token
    pub fn add_listener<F>(&self, kind: EventKind, callback: F) -> ListenerToken
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.entry(kind).or_default().push(Listener {
            id,
            callback: Arc::new(callback),
        });
        ListenerToken { kind, id }
    }

    /// Remove a listener by token; returns whether it was registered
    pub fn remove_listener(&self, token: ListenerToken) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = inner.listeners.get_mut(&token.kind) {
            let before = list.len();
            list.retain(|l| l.id != token.id);
            before != list.len()
        } else {
            false
        }
    }

    /// Invoke every listener registered for the event's kind, in
    /// registration order
    pub fn dispatch(&self, event: &Event) {
        let callbacks: Vec<Callback> = {
            let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner
                .listeners
                .get(&event.kind())
                .map(|list| list.iter().map(|l| Arc::clone(&l.callback)).collect())
                .unwrap_or_default()
        };

        for callback in callbacks {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn status(code: &str) -> Event {
        Event::Status(StatusInfo {
            level: "status".into(),
            code: code.into(),
            description: String::new(),
        })
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let dispatcher = EventDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            dispatcher.add_listener(EventKind::RtmpStatus, move |_| {
                order.lock().unwrap().push(tag);
            });
        }

        dispatcher.dispatch(&status("NetStream.Publish.Start"));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_removal_by_token() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count1 = Arc::clone(&count);
        let token = dispatcher.add_listener(EventKind::RtmpStatus, move |_| {
            count1.fetch_add(1, Ordering::SeqCst);
        });
        let count2 = Arc::clone(&count);
        dispatcher.add_listener(EventKind::RtmpStatus, move |_| {
            count2.fetch_add(10, Ordering::SeqCst);
        });

        dispatcher.dispatch(&status("x"));
        assert_eq!(count.load(Ordering::SeqCst), 11);

        assert!(dispatcher.remove_listener(token));
        assert!(!dispatcher.remove_listener(token));

        dispatcher.dispatch(&status("x"));
        assert_eq!(count.load(Ordering::SeqCst), 21);
    }

    #[test]
    fn test_kinds_are_independent() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count1 = Arc::clone(&count);
        dispatcher.add_listener(EventKind::ConnectionClosed, move |_| {
            count1.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.dispatch(&status("x"));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        dispatcher.dispatch(&Event::Closed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_register_another() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let count = Arc::new(AtomicUsize::new(0));

        let dispatcher2 = Arc::clone(&dispatcher);
        let count2 = Arc::clone(&count);
        dispatcher.add_listener(EventKind::RtmpStatus, move |_| {
            let count3 = Arc::clone(&count2);
            dispatcher2.add_listener(EventKind::RtmpStatus, move |_| {
                count3.fetch_add(1, Ordering::SeqCst);
            });
        });

        // The listener added during dispatch only fires on the next one
        dispatcher.dispatch(&status("x"));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        dispatcher.dispatch(&status("x"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
