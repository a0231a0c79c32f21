//! Lowers a parsed `story_lang::Script` into an executable `Story` and
//! evaluates its expressions (`spec.md` §4.5, §4.6). This crate is pure: it
//! performs no I/O and does not execute a story — stepping a `Story`
//! through its passages lives in `story-runtime`.

pub mod emit;
pub mod eval;
pub mod ir;

pub use emit::lower;
pub use eval::{evaluate, CallContext, EmptyState, FunctionRegistry, NoFunctions, StateView};
pub use ir::{AssignOp, BinaryOp, Choice, ContentElement, ExprIr, Passage, Story, UnaryOp, Value};
