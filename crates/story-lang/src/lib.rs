//! Lexer, parser, and abstract syntax tree for the story scripting language.
//! This crate turns source text into a `Script`; it never
//! executes anything — lowering to a runnable `Story` lives in
//! `story-compile`, and executing one lives in `story-runtime`.

pub mod ast;
pub mod include;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::{
    AssignOp, Assignment, BinaryOp, Choice, Conditional, Divert, ElifClause, ElseClause, Expr,
    Include, InlineConditional, InlineExpr, Literal, Metadata, Passage, Script, Stmt, Tag, Text,
    TextFragment, ThreadStart, TunnelCall, TunnelReturn, UnaryOp,
};
pub use include::{resolve_includes, IncludeResolver};
pub use lexer::Lexer;
pub use parser::Parser;
pub use token::{Token, TokenKind, TokenStream};

use story_base::DiagnosticBag;

/// Lexes and parses `source` in one pass, merging lexer and parser
/// diagnostics in emission order (lexer diagnostics first, since they were
/// produced before the parser ever saw a token).
pub fn parse(file: impl Into<std::rc::Rc<str>>, source: &str) -> (Script, DiagnosticBag) {
    let (stream, lex_diagnostics) = Lexer::new(file, source).tokenize();
    let (script, parse_diagnostics) = Parser::new(stream).parse();
    let mut diagnostics = DiagnosticBag::new();
    for d in lex_diagnostics {
        diagnostics.push(d);
    }
    for d in parse_diagnostics {
        diagnostics.push(d);
    }
    (script, diagnostics)
}
