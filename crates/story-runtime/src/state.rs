//! The typed variable store a running story reads and mutates
//! (`spec.md` §3's `State`, §4.7's "Observation" paragraph).
//!
//! Per-variable and wildcard observation reuse `story_kernel::EventBus`
//! rather than reimplementing subscribe/notify: a variable name is just
//! another event name, and the bus already gives us priority ordering,
//! a `"*"` wildcard, and Drop-based unsubscribe for free.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use story_base::{ErrorKind, StoryError};
use story_compile::{StateView, Value};
use story_kernel::{EventBus, Subscription};

/// The payload an observer receives: the variable's name and its value
/// immediately before and after the mutation that triggered notification.
#[derive(Debug, Clone)]
pub struct VariableChanged {
    pub name: String,
    pub old: Value,
    pub new: Value,
}

struct Inner {
    variables: HashMap<String, Value>,
    visit_counts: HashMap<String, u64>,
    /// Set for the duration of a `set` call's observer notification, so a
    /// reentrant write from inside an observer is rejected instead of
    /// corrupting the map or deadlocking on a nested borrow.
    notifying: bool,
}

/// A clonable handle to a shared state store. Cloning shares variables and
/// subscriptions, mirroring `EventBus`'s own clone semantics.
#[derive(Clone)]
pub struct State {
    inner: Rc<RefCell<Inner>>,
    bus: EventBus,
}

impl State {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                variables: HashMap::new(),
                visit_counts: HashMap::new(),
                notifying: false,
            })),
            bus: EventBus::new(),
        }
    }

    /// A variable with no entry reads as `Nil`, never an error.
    pub fn get(&self, name: &str) -> Value {
        self.inner.borrow().variables.get(name).cloned().unwrap_or(Value::Nil)
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner.borrow().variables.contains_key(name)
    }

    /// Writes `value` to `name` and notifies observers in subscription
    /// order. Fails with `invalid_state` (state left unchanged) if called
    /// from within an observer's own notification.
    pub fn set(&self, name: &str, value: Value) -> Result<(), StoryError> {
        {
            let inner = self.inner.borrow();
            if inner.notifying {
                return Err(StoryError::without_span(
                    ErrorKind::InvalidState,
                    "cannot write state from within a variable-change observer",
                ));
            }
        }

        let old = {
            let mut inner = self.inner.borrow_mut();
            let old = inner.variables.get(name).cloned().unwrap_or(Value::Nil);
            inner.variables.insert(name.to_string(), value.clone());
            inner.notifying = true;
            old
        };

        let changed = VariableChanged { name: name.to_string(), old, new: value };
        self.bus.emit(name, &changed);

        self.inner.borrow_mut().notifying = false;
        Ok(())
    }

    /// Subscribes to changes on a single variable (`pattern` is the
    /// variable's name) or every variable (`pattern` is `"*"`).
    pub fn observe(
        &self,
        pattern: impl Into<String>,
        priority: i32,
        handler: impl Fn(&str, &VariableChanged) + 'static,
    ) -> Subscription {
        self.bus.on(pattern, priority, move |event, payload| {
            if let Some(changed) = payload.downcast_ref::<VariableChanged>() {
                handler(event, changed);
            }
        })
    }

    pub fn visit_count(&self, passage_id: &str) -> u64 {
        self.inner.borrow().visit_counts.get(passage_id).copied().unwrap_or(0)
    }

    pub fn visited(&self, passage_id: &str) -> bool {
        self.visit_count(passage_id) > 0
    }

    /// Called by the engine whenever it enters a passage. Not gated by the
    /// reentrancy guard: visit counts are engine bookkeeping, not an
    /// observable variable, and never trigger `variable:changed`.
    pub fn record_visit(&self, passage_id: &str) {
        *self.inner.borrow_mut().visit_counts.entry(passage_id.to_string()).or_insert(0) += 1;
    }

    /// A sorted snapshot of every declared variable, for the persisted
    /// `state_snapshot` layout (`spec.md` §6.4).
    pub fn variables_sorted(&self) -> std::collections::BTreeMap<String, Value> {
        self.inner.borrow().variables.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn visit_counts_sorted(&self) -> std::collections::BTreeMap<String, u64> {
        self.inner.borrow().visit_counts.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    /// Total replace: variables absent from `variables` are removed, not
    /// merged (`spec.md` §6.4's round-trip law). Does not notify observers —
    /// restore is a bulk load, not a sequence of individual mutations.
    pub fn restore(&self, variables: std::collections::BTreeMap<String, Value>, visit_counts: std::collections::BTreeMap<String, u64>) {
        let mut inner = self.inner.borrow_mut();
        inner.variables = variables.into_iter().collect();
        inner.visit_counts = visit_counts.into_iter().collect();
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapts [`State`] to `story_compile::StateView` so the pure evaluator can
/// read variables without depending on `story-runtime` itself.
impl StateView for State {
    fn get(&self, name: &str) -> Value {
        State::get(self, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn missing_variable_is_nil() {
        let state = State::new();
        assert_eq!(state.get("score"), Value::Nil);
        assert!(!state.has("score"));
    }

    #[test]
    fn set_then_get_round_trips() {
        let state = State::new();
        state.set("score", Value::Number(3.0)).unwrap();
        assert_eq!(state.get("score"), Value::Number(3.0));
        assert!(state.has("score"));
    }

    #[test]
    fn observer_is_notified_with_old_and_new_value() {
        let state = State::new();
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen2 = seen.clone();
        let _sub = state.observe("score", 0, move |_, changed| {
            seen2.borrow_mut().push((changed.old.clone(), changed.new.clone()));
        });
        state.set("score", Value::Number(1.0)).unwrap();
        state.set("score", Value::Number(2.0)).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![(Value::Nil, Value::Number(1.0)), (Value::Number(1.0), Value::Number(2.0))]
        );
    }

    #[test]
    fn wildcard_observer_sees_every_variable() {
        let state = State::new();
        let count = Rc::new(StdRefCell::new(0));
        let c = count.clone();
        let _sub = state.observe("*", 0, move |_, _| *c.borrow_mut() += 1);
        state.set("a", Value::Number(1.0)).unwrap();
        state.set("b", Value::Number(2.0)).unwrap();
        assert_eq!(*count.borrow(), 2);
    }

    #[test]
    fn reentrant_write_from_observer_fails_without_corrupting_state() {
        let state = State::new();
        let state2 = state.clone();
        let _sub = state.observe("score", 0, move |_, _| {
            let err = state2.set("score", Value::Number(999.0)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidState);
        });
        state.set("score", Value::Number(1.0)).unwrap();
        assert_eq!(state.get("score"), Value::Number(1.0));
    }

    #[test]
    fn unsubscribe_stops_future_notifications() {
        let state = State::new();
        let count = Rc::new(StdRefCell::new(0));
        let c = count.clone();
        let sub = state.observe("score", 0, move |_, _| *c.borrow_mut() += 1);
        state.set("score", Value::Number(1.0)).unwrap();
        drop(sub);
        state.set("score", Value::Number(2.0)).unwrap();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn visit_count_starts_at_zero_and_increments_on_each_visit() {
        let state = State::new();
        assert_eq!(state.visit_count("cave"), 0);
        assert!(!state.visited("cave"));
        state.record_visit("cave");
        state.record_visit("cave");
        assert_eq!(state.visit_count("cave"), 2);
        assert!(state.visited("cave"));
    }

    #[test]
    fn restore_replaces_rather_than_merges() {
        let state = State::new();
        state.set("keep", Value::Number(1.0)).unwrap();
        state.set("drop", Value::Number(2.0)).unwrap();
        let mut replacement = std::collections::BTreeMap::new();
        replacement.insert("keep".to_string(), Value::Number(5.0));
        state.restore(replacement, std::collections::BTreeMap::new());
        assert_eq!(state.get("keep"), Value::Number(5.0));
        assert_eq!(state.get("drop"), Value::Nil);
    }
}
