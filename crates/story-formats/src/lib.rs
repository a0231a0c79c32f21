//! Format front-ends: alternate producers of the same `Story` shape the
//! emitter builds, bypassing the lexer/parser/emitter pipeline entirely
//! (`spec.md` §2's component K, §4.8).
//!
//! A [`Format`] turns a story between its in-memory `story_compile::Story`
//! form and some serialized representation. Once a `Story` exists — whether
//! it came from `story_compile::lower` or from `Format::import` — the
//! runtime cannot tell the two apart (`spec.md` §4.8's closing sentence).

pub mod json;

pub use json::JsonFormat;

use story_base::StoryError;
use story_compile::Story;

/// A format front-end, importing and exporting the engine's `Story` shape.
///
/// `can_import`/`can_export` are cheap pre-checks a host can use before
/// committing to the (possibly expensive, possibly failing) `import`/
/// `export` call — they answer "does this look like mine", not "will this
/// succeed".
pub trait Format {
    /// Short, stable identifier, e.g. `"json"`.
    fn name(&self) -> &'static str;
    /// File extensions this format claims, without the leading dot.
    fn extensions(&self) -> &[&'static str];
    fn mime_type(&self) -> &'static str;

    /// Cheap syntactic sniff: does `source` look like this format's shape?
    fn can_import(&self, source: &str) -> bool;
    /// Parses `source` into a `Story`. Fails with `ErrorKind::Validation`
    /// for malformed input (`spec.md` §4.8).
    fn import(&self, source: &str) -> Result<Story, StoryError>;

    /// Whether this format can represent `story` at all. The JSON front-end
    /// can represent any `Story` this engine can build, so it always
    /// returns `true`; a format with a narrower value model would not.
    fn can_export(&self, story: &Story) -> bool;
    /// Serializes `story` to this format's textual representation.
    fn export(&self, story: &Story) -> Result<String, StoryError>;
}
