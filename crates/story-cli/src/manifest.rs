//! `story.toml` project manifest (ambient config surface; `SPEC_FULL.md`
//! §2's "Config" entry). Optional — `story run`/`story check` work on a bare
//! `.story` file with no manifest present; a manifest only supplies
//! defaults (the entry script, capability grants) a project wants to pin.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// The parsed contents of `story.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub story: StoryConfig,
    /// Capability name to granted/denied, handed to `story_kernel::CapabilitySet`
    /// before the plugin host is built (`spec.md` §4.1, §4.9).
    #[serde(default)]
    pub capabilities: HashMap<String, bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryConfig {
    /// Path to the entry `.story` (or pre-compiled format) file, relative to
    /// the manifest.
    pub entry: String,
    /// Overrides the emitted Story's start passage, same as the Script's
    /// own `@@ start: "..."` metadata directive.
    #[serde(default)]
    pub start: Option<String>,
    /// Tunnel call stack depth bound (`spec.md` §4.7). Defaults to
    /// `story_runtime::RuntimeConfig`'s own default when absent.
    #[serde(default)]
    pub max_tunnel_depth: Option<usize>,
}

impl Manifest {
    /// Reads and parses a manifest from `path`. Fails with
    /// `ErrorKind::Validation` for missing or malformed manifests — a
    /// manifest is host-authored configuration, not story content, so a bad
    /// one is a precondition failure rather than a recoverable diagnostic.
    pub fn load(path: &Path) -> Result<Self, story_base::StoryError> {
        let text = fs::read_to_string(path).map_err(|e| {
            story_base::StoryError::without_span(
                story_base::ErrorKind::Validation,
                format!("could not read manifest {}: {e}", path.display()),
            )
        })?;
        toml::from_str(&text).map_err(|e| {
            story_base::StoryError::without_span(
                story_base::ErrorKind::Validation,
                format!("malformed manifest {}: {e}", path.display()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_manifest() {
        let manifest: Manifest = toml::from_str(
            r#"
            [story]
            entry = "start.story"
            "#,
        )
        .unwrap();
        assert_eq!(manifest.story.entry, "start.story");
        assert!(manifest.capabilities.is_empty());
    }

    #[test]
    fn parses_capability_grants() {
        let manifest: Manifest = toml::from_str(
            r#"
            [story]
            entry = "start.story"

            [capabilities]
            "state:write" = false
            "#,
        )
        .unwrap();
        assert_eq!(manifest.capabilities.get("state:write"), Some(&false));
    }
}
