//! A dotted-name module registry.
//!
//! [`Registry`] is the generic building block the DI container and the
//! interface-validation layer are both built on: a sorted, duplicate-free
//! mapping from a dotted module name (`"story.runtime.engine"`) to a value
//! of type `T`.

use std::collections::BTreeMap;
use story_base::{ErrorKind, Result, StoryError};

/// Returns `true` if `name` matches `^[a-z][a-z0-9_.]*$`.
fn is_valid_module_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.')
}

/// A sorted, name-validated registry of modules.
///
/// Registration order is not preserved; [`Registry::list`] always returns
/// names in lexicographic order (`spec.md` §4.1).
pub struct Registry<T> {
    entries: BTreeMap<String, T>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registers `module` under `name`.
    ///
    /// Fails with [`ErrorKind::Validation`] if `name` doesn't match
    /// `^[a-z][a-z0-9_.]*$`, or [`ErrorKind::Duplicate`] if `name` is
    /// already registered.
    pub fn register(&mut self, name: impl Into<String>, module: T) -> Result<()> {
        let name = name.into();
        if !is_valid_module_name(&name) {
            return Err(StoryError::without_span(
                ErrorKind::Validation,
                format!("invalid module name: '{name}'"),
            ));
        }
        if self.entries.contains_key(&name) {
            return Err(StoryError::without_span(
                ErrorKind::Duplicate,
                format!("module already registered: '{name}'"),
            ));
        }
        self.entries.insert(name, module);
        Ok(())
    }

    /// Removes and returns the module registered under `name`, if any.
    pub fn unregister(&mut self, name: &str) -> Option<T> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.entries.get_mut(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names in lexicographic order.
    pub fn list(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_get() {
        let mut reg: Registry<i32> = Registry::new();
        reg.register("story.runtime", 1).unwrap();
        assert_eq!(reg.get("story.runtime"), Some(&1));
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut reg: Registry<i32> = Registry::new();
        reg.register("a.b", 1).unwrap();
        let err = reg.register("a.b", 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate);
    }

    #[test]
    fn invalid_name_rejected() {
        let mut reg: Registry<i32> = Registry::new();
        assert!(reg.register("Story.Runtime", 1).is_err());
        assert!(reg.register("1story", 1).is_err());
        assert!(reg.register("", 1).is_err());
    }

    #[test]
    fn list_is_sorted() {
        let mut reg: Registry<i32> = Registry::new();
        reg.register("z.module", 1).unwrap();
        reg.register("a.module", 2).unwrap();
        reg.register("m.module", 3).unwrap();
        assert_eq!(reg.list(), vec!["a.module", "m.module", "z.module"]);
    }

    #[test]
    fn unregister_removes_entry() {
        let mut reg: Registry<i32> = Registry::new();
        reg.register("a.b", 1).unwrap();
        assert_eq!(reg.unregister("a.b"), Some(1));
        assert!(!reg.has("a.b"));
    }

    #[test]
    fn clear_empties_registry() {
        let mut reg: Registry<i32> = Registry::new();
        reg.register("a.b", 1).unwrap();
        reg.register("c.d", 2).unwrap();
        reg.clear();
        assert_eq!(reg.count(), 0);
    }
}
