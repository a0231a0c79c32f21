//! The narrow contract surface the core exposes to plugins (`spec.md`
//! §4.9, component K).
//!
//! Plugins never see the AST, the `Story` IR, or `Runtime` internals
//! directly — they hold a [`PluginId`] and go through a [`PluginHost`] for
//! everything: reading/writing [`story_runtime::State`] (gated per
//! capability), subscribing to the [`story_kernel::EventBus`], and
//! registering external functions or content hooks. This breaks the
//! plugin-to-host back-reference the source language used
//! (`spec.md` §9, "Cyclic structures ... break with identity tokens"): a
//! plugin carries only an opaque `PluginId` and looks the host up through
//! whichever kernel resolved it, never a pointer back into the host.

mod hooks;

pub use hooks::{ContentHook, ContentHookRegistry};

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use story_base::{ErrorKind, StoryError};
use story_compile::Value;
use story_kernel::{CapabilitySet, Subscription};
use story_runtime::{Functions, Runtime, VariableChanged};

/// An opaque handle identifying one registered plugin. Carries no
/// back-pointer to the host or to its own registration record; it is only
/// ever compared for equality against the host's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginId(u64);

/// The capability names the plugin host recognizes out of the box
/// (`spec.md` §4.1's capability set, §4.9's three contract surfaces).
pub mod capabilities {
    pub const STATE_READ: &str = "state:read";
    pub const STATE_WRITE: &str = "state:write";
    pub const EVENT_SUBSCRIBE: &str = "event:subscribe";
    pub const FUNCTION_REGISTER: &str = "function:register";
    pub const CONTENT_HOOK: &str = "content:hook";
}

/// Mediates plugin access to one running story. Construct one per
/// `Runtime`; plugins only ever interact with the engine through the
/// methods here.
pub struct PluginHost {
    runtime: Rc<RefCell<Runtime>>,
    capabilities: RefCell<CapabilitySet>,
    content_hooks: ContentHookRegistry,
    next_id: Cell<u64>,
    registered: RefCell<HashMap<PluginId, String>>,
}

impl PluginHost {
    /// Builds a host over `runtime` with every capability in
    /// [`capabilities`] known and enabled. A host embedder that wants a
    /// tighter default can call `capabilities_mut().disable(...)`
    /// immediately after construction.
    pub fn new(runtime: Rc<RefCell<Runtime>>) -> Self {
        let mut capabilities = CapabilitySet::new();
        capabilities.declare(capabilities::STATE_READ, true);
        capabilities.declare(capabilities::STATE_WRITE, true);
        capabilities.declare(capabilities::EVENT_SUBSCRIBE, true);
        capabilities.declare(capabilities::FUNCTION_REGISTER, true);
        capabilities.declare(capabilities::CONTENT_HOOK, true);
        Self {
            runtime,
            capabilities: RefCell::new(capabilities),
            content_hooks: ContentHookRegistry::new(),
            next_id: Cell::new(0),
            registered: RefCell::new(HashMap::new()),
        }
    }

    pub fn capabilities(&self) -> std::cell::Ref<'_, CapabilitySet> {
        self.capabilities.borrow()
    }

    pub fn capabilities_mut(&self) -> std::cell::RefMut<'_, CapabilitySet> {
        self.capabilities.borrow_mut()
    }

    /// Registers a new plugin identity under `name` and returns the id it
    /// must present to every other `PluginHost` method.
    pub fn register_plugin(&self, name: impl Into<String>) -> PluginId {
        let id = PluginId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.registered.borrow_mut().insert(id, name.into());
        id
    }

    /// Drops a plugin's identity. Its event subscriptions are unaffected —
    /// they are owned by whatever `Subscription` handle the plugin is
    /// holding, per `spec.md` §3's subscription-ownership invariant — but
    /// further calls using `id` fail with `not_found`.
    pub fn unregister_plugin(&self, id: PluginId) {
        self.registered.borrow_mut().remove(&id);
    }

    fn require(&self, id: PluginId, capability: &str) -> Result<(), StoryError> {
        if !self.registered.borrow().contains_key(&id) {
            return Err(StoryError::without_span(ErrorKind::NotFound, "unknown plugin id"));
        }
        if !self.capabilities.borrow().has(capability) {
            return Err(StoryError::without_span(
                ErrorKind::PermissionDenied,
                format!("capability denied: {capability}"),
            ));
        }
        Ok(())
    }

    /// Reads a state variable, gated by `state:read`.
    pub fn get_variable(&self, id: PluginId, name: &str) -> Result<Value, StoryError> {
        self.require(id, capabilities::STATE_READ)?;
        Ok(self.runtime.borrow().state().get(name))
    }

    /// Writes a state variable, gated by `state:write`.
    pub fn set_variable(&self, id: PluginId, name: &str, value: Value) -> Result<(), StoryError> {
        self.require(id, capabilities::STATE_WRITE)?;
        self.runtime.borrow().state().set(name, value)
    }

    /// Subscribes to the engine's event bus, gated by `event:subscribe`.
    /// Dropping the returned `Subscription` unsubscribes, same as any other
    /// `story_kernel::EventBus` subscriber.
    pub fn subscribe(
        &self,
        id: PluginId,
        pattern: impl Into<String>,
        priority: i32,
        handler: impl Fn(&str, &dyn std::any::Any) + 'static,
    ) -> Result<Subscription, StoryError> {
        self.require(id, capabilities::EVENT_SUBSCRIBE)?;
        Ok(self.runtime.borrow().bus().on(pattern, priority, handler))
    }

    /// Subscribes to variable-change notifications, gated by `state:read`
    /// (observing state is a read, not a write).
    pub fn observe_variable(
        &self,
        id: PluginId,
        pattern: impl Into<String>,
        priority: i32,
        handler: impl Fn(&str, &VariableChanged) + 'static,
    ) -> Result<Subscription, StoryError> {
        self.require(id, capabilities::STATE_READ)?;
        Ok(self.runtime.borrow().state().observe(pattern, priority, handler))
    }

    /// Binds an external function the Script can call by name, gated by
    /// `function:register` (`spec.md` §4.7's "External functions",
    /// §6.2's `bind_external_function`).
    pub fn bind_function(
        &self,
        id: PluginId,
        name: impl Into<String>,
        lookahead_safe: bool,
        callable: impl Fn(&[Value]) -> Result<Value, StoryError> + 'static,
    ) -> Result<(), StoryError> {
        self.require(id, capabilities::FUNCTION_REGISTER)?;
        self.functions().bind(name, lookahead_safe, callable);
        Ok(())
    }

    fn functions(&self) -> Functions {
        self.runtime.borrow().functions().clone()
    }

    /// Registers a content hook for `tag`, gated by `content:hook`. The
    /// hook fires whenever a host-side collaborator (an asset loader, a
    /// bundler) calls [`PluginHost::run_content_hooks`] for that tag — the
    /// core itself never inspects tag semantics (`spec.md` §1's non-goals:
    /// audio/image playback and bundling are external collaborators).
    pub fn register_content_hook(
        &self,
        id: PluginId,
        tag: impl Into<String>,
        hook: impl Fn(&str, &[String]) + 'static,
    ) -> Result<(), StoryError> {
        self.require(id, capabilities::CONTENT_HOOK)?;
        self.content_hooks.register(tag, hook);
        Ok(())
    }

    /// Invoked by a host-side collaborator when it encounters content
    /// tagged `tag` on passage `passage_id`, dispatching to every
    /// registered hook for that tag in registration order.
    pub fn run_content_hooks(&self, tag: &str, passage_id: &str, tags: &[String]) {
        self.content_hooks.run(tag, passage_id, tags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use story_compile::lower;

    fn host() -> PluginHost {
        let (script, diagnostics) = story_lang::parse("t.story", ":: start\n  ~ score = 0\n  hi\n");
        let story = lower(&script, &diagnostics).unwrap();
        let runtime = Rc::new(RefCell::new(Runtime::load(Rc::new(story))));
        PluginHost::new(runtime)
    }

    #[test]
    fn registered_plugin_can_read_and_write_state() {
        let host = host();
        let id = host.register_plugin("inventory");
        host.set_variable(id, "gold", Value::Number(10.0)).unwrap();
        assert_eq!(host.get_variable(id, "gold").unwrap(), Value::Number(10.0));
    }

    #[test]
    fn unknown_plugin_id_is_not_found() {
        let host = host();
        let bogus = host.register_plugin("ghost");
        host.unregister_plugin(bogus);
        let err = host.get_variable(bogus, "gold").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn disabled_capability_is_permission_denied() {
        let host = host();
        let id = host.register_plugin("readonly-plugin");
        host.capabilities_mut().disable(capabilities::STATE_WRITE);
        let err = host.set_variable(id, "gold", Value::Number(1.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        // Reading is unaffected - only the write capability was disabled.
        assert_eq!(host.get_variable(id, "gold").unwrap(), Value::Nil);
    }

    #[test]
    fn subscribed_plugin_observes_bus_events() {
        let host = host();
        let id = host.register_plugin("logger");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        let _sub = host
            .subscribe(id, "passage:entered", 0, move |event, _| seen2.borrow_mut().push(event.to_string()))
            .unwrap();
        host.runtime.borrow_mut().start().unwrap();
        assert_eq!(*seen.borrow(), vec!["passage:entered".to_string()]);
    }

    #[test]
    fn content_hooks_fire_for_registered_tag_only() {
        let host = host();
        let id = host.register_plugin("audio");
        let fired = Rc::new(RefCell::new(Vec::new()));
        let fired2 = fired.clone();
        host.register_content_hook(id, "sound", move |passage_id, tags| {
            fired2.borrow_mut().push((passage_id.to_string(), tags.to_vec()));
        })
        .unwrap();

        host.run_content_hooks("sound", "start", &["sound".to_string()]);
        host.run_content_hooks("image", "start", &["image".to_string()]);

        assert_eq!(fired.borrow().len(), 1);
        assert_eq!(fired.borrow()[0].0, "start");
    }
}
