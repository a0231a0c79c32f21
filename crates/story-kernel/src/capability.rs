//! Capability gating.
//!
//! A capability is the unit of permission checked at the plugin API boundary
//! (`spec.md` §4.9, e.g. `"state:read"`, `"persistence:write"`). Capabilities
//! must be declared known before they can be enabled or disabled; querying an
//! unknown capability simply reports it as absent rather than erroring, since
//! "does this gate exist" and "is this gate open" collapse to the same
//! question from a caller's point of view.

use std::collections::HashMap;

/// A mapping from capability name to enabled/disabled state.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    capabilities: HashMap<String, bool>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `name` as a known capability with the given initial state.
    /// Re-declaring an already-known capability overwrites its state.
    pub fn declare(&mut self, name: impl Into<String>, enabled: bool) {
        self.capabilities.insert(name.into(), enabled);
    }

    /// Returns whether `name` is both known and enabled. Unknown names
    /// always report `false`.
    pub fn has(&self, name: &str) -> bool {
        self.capabilities.get(name).copied().unwrap_or(false)
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Enables a known capability. Returns `false` without effect if `name`
    /// is not known.
    pub fn enable(&mut self, name: &str) -> bool {
        match self.capabilities.get_mut(name) {
            Some(enabled) => {
                *enabled = true;
                true
            }
            None => false,
        }
    }

    /// Disables a known capability. Returns `false` without effect if `name`
    /// is not known.
    pub fn disable(&mut self, name: &str) -> bool {
        match self.capabilities.get_mut(name) {
            Some(enabled) => {
                *enabled = false;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_capability_is_false() {
        let caps = CapabilitySet::new();
        assert!(!caps.has("state:read"));
    }

    #[test]
    fn declare_and_enable() {
        let mut caps = CapabilitySet::new();
        caps.declare("state:read", false);
        assert!(!caps.has("state:read"));
        assert!(caps.enable("state:read"));
        assert!(caps.has("state:read"));
    }

    #[test]
    fn enable_unknown_is_noop() {
        let mut caps = CapabilitySet::new();
        assert!(!caps.enable("persistence:write"));
        assert!(!caps.has("persistence:write"));
    }

    #[test]
    fn disable_known_capability() {
        let mut caps = CapabilitySet::new();
        caps.declare("persistence:write", true);
        assert!(caps.has("persistence:write"));
        assert!(caps.disable("persistence:write"));
        assert!(!caps.has("persistence:write"));
    }

    #[test]
    fn is_known_distinguishes_declared_from_unknown() {
        let mut caps = CapabilitySet::new();
        caps.declare("state:read", false);
        assert!(caps.is_known("state:read"));
        assert!(!caps.is_known("state:write"));
    }
}
