//! Resolves `>> "path" (as alias)?` includes into a merged [`Script`].
//!
//! story-lang performs no file I/O itself — the lexer, parser, and emitter
//! never suspend — so a host that wants includes resolved
//! supplies an [`IncludeResolver`] that reads each referenced path and hands
//! the source text back. `story-cli` is the only current caller.

use std::collections::HashSet;

use story_base::{Diagnostic, DiagnosticBag, ErrorKind, SourceSpan};

use crate::ast::{Passage, Script};

/// Supplies the source text for an included path. `story-cli`'s
/// implementation reads from the filesystem, relative to the including
/// file's directory; a test can substitute an in-memory map.
pub trait IncludeResolver {
    /// Resolves `path` (as written after `>>` in the including file,
    /// itself located at `from_file`) to its source text.
    fn read(&mut self, from_file: &str, path: &str) -> Result<(String, String), String>;
}

/// Recursively merges every include reachable from `script`, depth-first,
/// in source order. Each included passage not under an alias is merged
/// under its own name; an aliased include's passages are merged twice —
/// under their own name (so a non-aliased reference still resolves) and
/// again under `alias__name` (so `-> alias__name` reaches it too). A path
/// already on the inclusion chain is skipped with a `load_error`
/// diagnostic rather than recursing forever.
pub fn resolve_includes(file: &str, script: Script, resolver: &mut dyn IncludeResolver) -> (Script, DiagnosticBag) {
    let mut diagnostics = DiagnosticBag::new();
    let mut chain = HashSet::new();
    chain.insert(file.to_string());
    let merged = resolve_into(file, script, resolver, &mut chain, &mut diagnostics);
    (merged, diagnostics)
}

fn resolve_into(
    file: &str,
    mut script: Script,
    resolver: &mut dyn IncludeResolver,
    chain: &mut HashSet<String>,
    diagnostics: &mut DiagnosticBag,
) -> Script {
    let includes = std::mem::take(&mut script.includes);
    for include in includes {
        let (included_file, source) = match resolver.read(file, &include.path) {
            Ok(pair) => pair,
            Err(message) => {
                diagnostics.push(Diagnostic::new(
                    ErrorKind::LoadError,
                    "include_not_found",
                    format!("could not resolve include '{}': {message}", include.path),
                    include.span.unwrap_or_else(SourceSpan::synthetic),
                ));
                continue;
            }
        };

        if !chain.insert(included_file.clone()) {
            diagnostics.push(Diagnostic::new(
                ErrorKind::LoadError,
                "include_cycle",
                format!("include cycle detected at '{included_file}'"),
                include.span.unwrap_or_else(SourceSpan::synthetic),
            ));
            continue;
        }

        let (included_script, included_diagnostics) = crate::parse(included_file.clone(), &source);
        for d in included_diagnostics {
            diagnostics.push(d);
        }
        let included_script = resolve_into(&included_file, included_script, resolver, chain, diagnostics);
        chain.remove(&included_file);

        merge(&mut script, &included_script, include.alias.as_deref());
    }
    script
}

fn merge(into: &mut Script, included: &Script, alias: Option<&str>) {
    for metadata in &included.metadata {
        if !into.metadata.iter().any(|m| m.key == metadata.key) {
            into.metadata.push(metadata.clone());
        }
    }
    for passage in &included.passages {
        into.passages.push(passage.clone());
        if let Some(alias) = alias {
            into.passages.push(aliased(passage, alias));
        }
    }
}

/// Script identifiers are `[a-zA-Z_][a-zA-Z0-9_]*` (`story-lang::lexer`'s
/// `lex_word`) — no `.` — so an alias prefix has to stay inside that
/// alphabet rather than use the dotted names `story_kernel::Registry` uses;
/// otherwise `-> alias_name` would not lex as a single identifier a Divert
/// could target.
fn aliased(passage: &Passage, alias: &str) -> Passage {
    Passage {
        name: format!("{alias}__{}", passage.name),
        tags: passage.tags.clone(),
        body: passage.body.clone(),
        span: passage.span.clone(),
    }
}
