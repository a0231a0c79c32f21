//! Content hook registration (`spec.md` §4.9's third plugin contract).
//!
//! A content hook is simpler than an event-bus subscription: it is not
//! fired by the engine itself (the core has no notion of "sound tag" or
//! "image tag" — those belong to external collaborators per `spec.md` §1's
//! non-goals), it is fired by whichever host-side collaborator recognizes
//! the tag and chooses to dispatch through the plugin host.

use std::cell::RefCell;
use std::rc::Rc;

type Hook = Rc<dyn Fn(&str, &[String])>;

/// Hooks registered per tag name, invoked in registration order.
#[derive(Default)]
pub struct ContentHookRegistry {
    hooks: RefCell<std::collections::HashMap<String, Vec<Hook>>>,
}

/// A registered content hook's identity, for future targeted removal. Not
/// currently exposed for unregistration — hooks live as long as the
/// registry, matching the engine's own `on_enter_script`/content model,
/// where there is no mid-run unsubscribe.
pub type ContentHook = Hook;

impl ContentHookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tag: impl Into<String>, hook: impl Fn(&str, &[String]) + 'static) {
        self.hooks.borrow_mut().entry(tag.into()).or_default().push(Rc::new(hook));
    }

    pub fn run(&self, tag: &str, passage_id: &str, tags: &[String]) {
        let hooks = match self.hooks.borrow().get(tag) {
            Some(hooks) => hooks.clone(),
            None => return,
        };
        for hook in hooks {
            hook(passage_id, tags);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hooks_fire_in_registration_order() {
        let registry = ContentHookRegistry::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l1 = log.clone();
        registry.register("sound", move |passage_id, _| l1.borrow_mut().push(format!("a:{passage_id}")));
        let l2 = log.clone();
        registry.register("sound", move |passage_id, _| l2.borrow_mut().push(format!("b:{passage_id}")));
        registry.run("sound", "start", &[]);
        assert_eq!(*log.borrow(), vec!["a:start".to_string(), "b:start".to_string()]);
    }

    #[test]
    fn unregistered_tag_runs_nothing() {
        let registry = ContentHookRegistry::new();
        registry.run("sound", "start", &[]);
    }
}
