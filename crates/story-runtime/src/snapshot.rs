//! The persisted snapshot layout (`spec.md` §4.7's save/restore contract and
//! §6.4's persisted state layout). A `Snapshot` is plain data: serializing it
//! with any `serde` format and deserializing it back must restore a
//! `Runtime` to an observably identical state (`spec.md` §8's round-trip
//! law), so every field uses a sorted collection rather than a hash map.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use story_compile::Value;

/// Wire version of the [`Snapshot`] layout (`spec.md` §6.4). Bumped whenever
/// a field is added, removed, or reinterpreted; `restore_state` rejects any
/// other value rather than guess at an upgrade.
pub const FORMAT_VERSION: u32 = 1;

/// One entry of the tunnel call stack: where to resume when the matching
/// `tunnel_return` runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelFrame {
    pub return_passage_id: String,
    pub return_index: usize,
}

/// A complete, self-contained snapshot of a running story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    pub story_id: String,
    pub state_snapshot: BTreeMap<String, Value>,
    pub visit_counts: BTreeMap<String, u64>,
    pub current_passage_id: String,
    pub current_index: usize,
    pub tunnel_stack: Vec<TunnelFrame>,
    /// `"{passage_id}#{choice_index}"` entries for every `once` choice
    /// already taken this run.
    pub consumed_onces: BTreeSet<String>,
    pub alive_flows: BTreeSet<String>,
    pub continue_buffer: String,
}
