#![cfg_attr(docsrs, feature(doc_cfg))]

//! # story-base
//!
//! Pure structural atoms shared across the story engine.
//!
//! This crate provides the foundational types used throughout the engine:
//!
//! - [`SourcePosition`]/[`SourceSpan`] — source location tracking
//! - [`ErrorKind`]/[`StoryError`] — the engine's closed error taxonomy
//! - [`Diagnostic`]/[`DiagnosticBag`] — the recoverable diagnostic stream
//!
//! # Design Principles
//!
//! This crate has **no knowledge of Script syntax or story semantics**. It
//! provides only generic, reusable infrastructure that higher-level crates
//! build upon.

pub mod diagnostic;
pub mod error;
pub mod span;
pub mod style;

pub use diagnostic::{Diagnostic, DiagnosticBag};
pub use error::{ErrorKind, Result, StoryError};
pub use span::{SourcePosition, SourceSpan};
pub use style::Style;
