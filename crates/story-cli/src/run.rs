//! Driver logic for `story run` and `story check` (`SPEC_FULL.md` §6.5).
//!
//! Neither subcommand touches `story_kernel::Container` or `story_plugin`
//! directly: a bare `run`/`check` has no plugins to host. The manifest's
//! `[capabilities]` table still gates what a future plugin-hosting wrapper
//! around this same `Runtime` would be allowed to do; recording denials here
//! would be dead code with nothing yet to enforce them against.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::rc::Rc;

use story_base::{ErrorKind, StoryError};
use story_compile::lower;
use story_formats::{Format, JsonFormat};
use story_lang::IncludeResolver;
use story_runtime::{Runtime, RuntimeConfig, RuntimeState};

use crate::manifest::Manifest;

fn read_source(path: &Path) -> Result<String, StoryError> {
    std::fs::read_to_string(path)
        .map_err(|e| StoryError::without_span(ErrorKind::Validation, format!("could not read {}: {e}", path.display())))
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}

/// Resolves `>> "path"` includes against the filesystem, relative to the
/// directory of the file that referenced them (`story_lang::IncludeResolver`,
/// the only I/O-performing side of include resolution — `story-lang` itself
/// stays pure).
struct FsIncludeResolver;

impl IncludeResolver for FsIncludeResolver {
    fn read(&mut self, from_file: &str, path: &str) -> Result<(String, String), String> {
        let base = Path::new(from_file).parent().unwrap_or_else(|| Path::new("."));
        let resolved = base.join(path);
        let source = std::fs::read_to_string(&resolved).map_err(|e| e.to_string())?;
        Ok((resolved.display().to_string(), source))
    }
}

/// Parses (or imports) `path` into a compiled `Story`, resolving includes
/// and printing any diagnostics produced along the way to stderr.
fn load_story(path: &Path) -> Result<story_compile::Story, StoryError> {
    let source = read_source(path)?;
    if is_json(path) {
        return JsonFormat.import(&source);
    }
    let file_name = path.display().to_string();
    let (script, parse_diagnostics) = story_lang::parse(file_name.clone(), &source);
    let (script, include_diagnostics) = story_lang::resolve_includes(&file_name, script, &mut FsIncludeResolver);
    for d in parse_diagnostics.iter().chain(include_diagnostics.iter()) {
        eprintln!("{}", d.display_with_source(&source));
    }
    let mut diagnostics = parse_diagnostics;
    for d in include_diagnostics {
        diagnostics.push(d);
    }
    lower(&script, &diagnostics)
}

fn resolve_entry(file: &Path, manifest: Option<&Manifest>) -> std::path::PathBuf {
    match manifest {
        Some(m) => {
            let entry = Path::new(&m.story.entry);
            if entry.is_absolute() {
                entry.to_path_buf()
            } else {
                file.parent().unwrap_or_else(|| Path::new(".")).join(entry)
            }
        }
        None => file.to_path_buf(),
    }
}

fn runtime_config_from(manifest: Option<&Manifest>) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    if let Some(depth) = manifest.and_then(|m| m.story.max_tunnel_depth) {
        config.max_tunnel_depth = depth;
    }
    config
}

/// `story check FILE`: parse and lower, print diagnostics, exit non-zero
/// only if a fatal diagnostic prevented lowering.
pub fn check(file: &Path) -> Result<i32, StoryError> {
    let source = read_source(file)?;
    if is_json(file) {
        JsonFormat.import(&source)?;
        log::info!("{}: imports cleanly", file.display());
        return Ok(0);
    }

    let file_name = file.display().to_string();
    let (script, parse_diagnostics) = story_lang::parse(file_name.clone(), &source);
    let (script, include_diagnostics) = story_lang::resolve_includes(&file_name, script, &mut FsIncludeResolver);
    for d in parse_diagnostics.iter().chain(include_diagnostics.iter()) {
        eprintln!("{}", d.display_with_source(&source));
    }
    let mut diagnostics = parse_diagnostics;
    for d in include_diagnostics {
        diagnostics.push(d);
    }
    let fatal = diagnostics.first_fatal().is_some();
    match lower(&script, &diagnostics) {
        Ok(story) => {
            log::info!("{}: {} passage(s), start = '{}'", file.display(), story.passages.len(), story.start_passage_id);
            Ok(if fatal { 1 } else { 0 })
        }
        Err(e) => {
            eprintln!("error: {e}");
            Ok(1)
        }
    }
}

/// `story run FILE [--manifest PATH]`: load, start, and interactively drive
/// a story over stdin/stdout until it ends.
pub fn run(file: &Path, manifest_path: Option<&Path>) -> Result<i32, StoryError> {
    let manifest = match manifest_path {
        Some(p) => Some(Manifest::load(p)?),
        None => {
            let default = Path::new("story.toml");
            if default.exists() {
                Some(Manifest::load(default)?)
            } else {
                None
            }
        }
    };

    let entry = resolve_entry(file, manifest.as_ref());
    let mut story = load_story(&entry)?;
    if let Some(start) = manifest.as_ref().and_then(|m| m.story.start.as_ref()) {
        if !story.passages.contains_key(start) {
            return Err(StoryError::without_span(
                ErrorKind::NotFound,
                format!("manifest start passage '{start}' not found"),
            ));
        }
        story.start_passage_id = start.clone();
    }
    let config = runtime_config_from(manifest.as_ref());

    let mut rt = Runtime::load_with_config(Rc::new(story), config);
    rt.start()?;
    drive(&mut rt)
}

/// The read-print loop: print continued text, then either present numbered
/// choices and read a selection, or stop once the story ends.
fn drive(rt: &mut Runtime) -> Result<i32, StoryError> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        let (text, _tags) = rt.continue_story()?;
        if !text.is_empty() {
            println!("{text}");
        }

        match rt.runtime_state() {
            RuntimeState::Ended => return Ok(0),
            RuntimeState::AwaitingChoice => {
                let choices = rt.visible_choices();
                for choice in &choices {
                    println!("{}. {}", choice.index, choice.text);
                }
                print!("> ");
                io::stdout().flush().ok();

                let line = match lines.next() {
                    Some(line) => line.map_err(|e| StoryError::without_span(ErrorKind::Validation, format!("stdin read failed: {e}")))?,
                    None => return Ok(0),
                };
                let choice: usize = match line.trim().parse() {
                    Ok(n) => n,
                    Err(_) => {
                        eprintln!("not a choice number: '{}'", line.trim());
                        continue;
                    }
                };
                if let Err(e) = rt.make_choice(choice) {
                    eprintln!("{e}");
                }
            }
            other => {
                return Err(StoryError::without_span(
                    ErrorKind::InvalidState,
                    format!("continue_story() returned with the runtime in {other:?}"),
                ))
            }
        }
    }
}
