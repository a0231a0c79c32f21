//! A priority-ordered, wildcard-aware event bus.
//!
//! Handlers subscribe to a dotted event name (`"story:loaded"`) or a
//! wildcard pattern (`"story:*"`, `"*"`). See `spec.md` §4.1 for the
//! dispatch-order contract this module must honor.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

type Handler = Rc<dyn Fn(&str, &dyn Any)>;
type DebugTap = Box<dyn Fn(&str, &dyn Any)>;

struct Record {
    id: u64,
    seq: u64,
    priority: i32,
    once: bool,
    handler: Handler,
}

#[derive(Clone)]
struct Entry {
    pattern: String,
    id: u64,
    seq: u64,
    priority: i32,
    once: bool,
    handler: Handler,
}

struct Inner {
    next_id: u64,
    next_seq: u64,
    handlers: std::collections::HashMap<String, Vec<Record>>,
    debug_tap: Option<DebugTap>,
}

impl Inner {
    fn new() -> Self {
        Self {
            next_id: 0,
            next_seq: 0,
            handlers: std::collections::HashMap::new(),
            debug_tap: None,
        }
    }
}

fn matches_wildcard(pattern: &str, event: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => event.starts_with(prefix),
        None => false,
    }
}

/// A clonable handle to a shared event bus. Cloning shares subscriptions and
/// dispatch state; it does not create an independent bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Rc<RefCell<Inner>>,
}

/// An active subscription. Dropping it unsubscribes the handler — ownership
/// of the subscription belongs to whoever holds this handle, matching
/// `spec.md` §3's "event-bus subscriptions are owned by the subscriber".
pub struct Subscription {
    bus: Rc<RefCell<Inner>>,
    pattern: String,
    id: u64,
}

impl Subscription {
    /// Explicitly unsubscribes. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.bus.try_borrow_mut() {
            if let Some(records) = inner.handlers.get_mut(&self.pattern) {
                records.retain(|r| r.id != self.id);
            }
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner::new())),
        }
    }

    /// Subscribes `handler` to `pattern` (an exact event name or a `"*"`/
    /// `"ns:*"` wildcard) at the given priority. Higher priority runs first.
    pub fn on(
        &self,
        pattern: impl Into<String>,
        priority: i32,
        handler: impl Fn(&str, &dyn Any) + 'static,
    ) -> Subscription {
        self.subscribe(pattern.into(), priority, false, Rc::new(handler))
    }

    /// Like [`EventBus::on`], but the handler is unsubscribed immediately
    /// before it runs for the first time, so a re-emission triggered from
    /// within the callback does not re-fire it.
    pub fn once(
        &self,
        pattern: impl Into<String>,
        priority: i32,
        handler: impl Fn(&str, &dyn Any) + 'static,
    ) -> Subscription {
        self.subscribe(pattern.into(), priority, true, Rc::new(handler))
    }

    fn subscribe(&self, pattern: String, priority: i32, once: bool, handler: Handler) -> Subscription {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .handlers
            .entry(pattern.clone())
            .or_default()
            .push(Record { id, seq, priority, once, handler });
        Subscription {
            bus: self.inner.clone(),
            pattern,
            id,
        }
    }

    /// Removes every handler registered under the exact pattern `pattern`
    /// (no wildcard expansion). To remove a single handler, drop the
    /// [`Subscription`] returned from [`EventBus::on`] instead.
    pub fn off(&self, pattern: &str) {
        self.inner.borrow_mut().handlers.remove(pattern);
    }

    /// Installs (or clears, with `None`) a single pre-dispatch tap invoked
    /// with `(event_name, payload)` before any handler runs, for debug
    /// observability.
    pub fn set_debug_tap(&self, tap: Option<DebugTap>) {
        self.inner.borrow_mut().debug_tap = tap;
    }

    /// Dispatches `payload` to every handler whose pattern matches `event`.
    ///
    /// Handlers run from highest to lowest priority; within equal priority,
    /// handlers registered on the exact event name run before wildcard
    /// handlers, and ties within that are broken by subscription order. The
    /// dispatch list is snapshotted before the first handler runs, so a
    /// handler unsubscribing itself (or another handler) mid-emission does
    /// not affect handlers already scheduled for this emission.
    pub fn emit(&self, event: &str, payload: &dyn Any) {
        {
            let inner = self.inner.borrow();
            if let Some(tap) = &inner.debug_tap {
                tap(event, payload);
            }
        }
        for entry in self.collect_ordered(event) {
            if entry.once {
                self.remove(&entry.pattern, entry.id);
            }
            (entry.handler)(event, payload);
        }
    }

    fn remove(&self, pattern: &str, id: u64) {
        if let Some(records) = self.inner.borrow_mut().handlers.get_mut(pattern) {
            records.retain(|r| r.id != id);
        }
    }

    fn collect_ordered(&self, event: &str) -> Vec<Entry> {
        let inner = self.inner.borrow();

        let mut specific: Vec<Entry> = inner
            .handlers
            .get(event)
            .into_iter()
            .flatten()
            .map(|r| Entry {
                pattern: event.to_string(),
                id: r.id,
                seq: r.seq,
                priority: r.priority,
                once: r.once,
                handler: r.handler.clone(),
            })
            .collect();
        specific.sort_by_key(|e| e.seq);

        let mut wildcard: Vec<Entry> = inner
            .handlers
            .iter()
            .filter(|(pattern, _)| pattern.as_str() != event && matches_wildcard(pattern, event))
            .flat_map(|(pattern, records)| {
                records.iter().map(move |r| Entry {
                    pattern: pattern.clone(),
                    id: r.id,
                    seq: r.seq,
                    priority: r.priority,
                    once: r.once,
                    handler: r.handler.clone(),
                })
            })
            .collect();
        wildcard.sort_by_key(|e| e.seq);

        drop(inner);

        let mut combined = specific;
        combined.extend(wildcard);
        combined.sort_by(|a, b| b.priority.cmp(&a.priority));
        combined
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
