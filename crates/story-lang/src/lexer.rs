//! Indentation-sensitive lexer for the story scripting language.
//!
//! A logical line is tokenized one of two ways once its leading indentation
//! is consumed:
//!
//! - **Statement lines** — the first characters match a structural marker
//!   (`::`, `@@`, `>>`, `->`, `->->`, `<-`, `*`, `+`, `~`, `{`) — are
//!   tokenized fully as code: keywords, identifiers, numbers, strings,
//!   operators.
//! - **Text lines** — anything else inside a passage body — are scanned as
//!   literal narrative text, with `{ ... }` islands switched into code
//!   tokenization for inline interpolation and switched back to text at the
//!   matching `}`.
//!
//! Tabs in leading indentation are rejected outright (`tab_in_indent`); see
//! `DESIGN.md` for why this implementation does not normalize them.

use story_base::{Diagnostic, DiagnosticBag, ErrorKind, SourcePosition, SourceSpan};

use crate::token::{Literal, Token, TokenKind, TokenStream};

pub struct Lexer<'a> {
    file: std::rc::Rc<str>,
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    indent_stack: Vec<usize>,
    at_line_start: bool,
    tokens: Vec<Token>,
    diagnostics: DiagnosticBag,
}

const STATEMENT_PREFIXES: &[&str] = &["->->", "->", "::", "@@", ">>", "<-", "~", "{", "*", "+"];
const STATEMENT_KEYWORDS: &[&str] = &["elif", "else", "end"];

impl<'a> Lexer<'a> {
    pub fn new(file: impl Into<std::rc::Rc<str>>, source: &'a str) -> Self {
        Self {
            file: file.into(),
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
            indent_stack: vec![0],
            at_line_start: true,
            tokens: Vec::new(),
            diagnostics: DiagnosticBag::new(),
        }
    }

    /// Runs the full lexer to completion, returning the resulting token
    /// stream and any diagnostics accumulated along the way.
    pub fn tokenize(mut self) -> (TokenStream, DiagnosticBag) {
        while !self.is_eof() {
            if self.at_line_start {
                if self.skip_blank_line() {
                    continue;
                }
                self.handle_indentation();
                self.at_line_start = false;
                if self.is_eof() {
                    break;
                }
            }

            if self.peek_byte() == Some(b'\n') {
                self.advance_byte();
                self.push(TokenKind::Newline, "\n");
                self.at_line_start = true;
                continue;
            }

            if self.line_is_statement() {
                if self.line_starts_with_choice_marker() {
                    self.lex_choice_line();
                } else {
                    self.lex_code_until_newline();
                }
            } else {
                self.lex_text_until_newline();
            }
        }

        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.push(TokenKind::Dedent, "");
        }
        self.push(TokenKind::Eof, "");

        (TokenStream::new(self.tokens), self.diagnostics)
    }

    // ---- position helpers ----

    fn is_eof(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_byte_n(&self, n: usize) -> Option<u8> {
        self.bytes.get(self.pos + n).copied()
    }

    fn advance_byte(&mut self) -> u8 {
        let b = self.bytes[self.pos];
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        b
    }

    fn current_position(&self) -> SourcePosition {
        SourcePosition::new(self.file.clone(), self.line, self.column, self.pos)
    }

    fn push(&mut self, kind: TokenKind, lexeme: impl Into<String>) {
        let pos = self.current_position();
        self.tokens.push(Token::new(kind, lexeme, SourceSpan::new(pos.clone(), pos)));
    }

    fn push_spanned(&mut self, kind: TokenKind, lexeme: impl Into<String>, start: SourcePosition) {
        let end = self.current_position();
        self.tokens.push(Token::new(kind, lexeme, SourceSpan::new(start, end)));
    }

    fn error(&mut self, code: &'static str, message: impl Into<String>, span: SourceSpan) {
        self.diagnostics
            .push(Diagnostic::new(ErrorKind::ParseError, code, message.into(), span));
    }

    // ---- line-level handling ----

    /// Skips fully blank lines without touching indent state. Returns `true`
    /// if a blank line was consumed.
    fn skip_blank_line(&mut self) -> bool {
        let start = self.pos;
        let mut cursor = self.pos;
        while let Some(b) = self.bytes.get(cursor) {
            match b {
                b' ' => cursor += 1,
                b'\n' => {
                    while self.pos < cursor {
                        self.advance_byte();
                    }
                    self.advance_byte();
                    return true;
                }
                b'\t' => break,
                _ => return false,
            }
        }
        if cursor >= self.bytes.len() && start != cursor {
            while self.pos < cursor {
                self.advance_byte();
            }
            return true;
        }
        false
    }

    fn handle_indentation(&mut self) {
        let start = self.current_position();
        let mut width = 0usize;
        while let Some(b) = self.peek_byte() {
            match b {
                b' ' => {
                    width += 1;
                    self.advance_byte();
                }
                b'\t' => {
                    let span = SourceSpan::new(start.clone(), self.current_position());
                    self.error("tab_in_indent", "tabs are not permitted in indentation", span);
                    self.advance_byte();
                    width += 1;
                }
                _ => break,
            }
        }

        let current = *self.indent_stack.last().unwrap();
        if width > current {
            self.indent_stack.push(width);
            self.push(TokenKind::Indent, "");
        } else if width < current {
            while *self.indent_stack.last().unwrap() > width {
                self.indent_stack.pop();
                self.push(TokenKind::Dedent, "");
            }
            if *self.indent_stack.last().unwrap() != width {
                let span = SourceSpan::new(start, self.current_position());
                self.error(
                    "inconsistent_indent",
                    format!("indentation of {width} spaces matches no enclosing block"),
                    span,
                );
                self.indent_stack.push(width);
            }
        }
    }

    fn line_is_statement(&self) -> bool {
        let rest = &self.source[self.pos..];
        let rest = rest.split('\n').next().unwrap_or(rest);
        if STATEMENT_PREFIXES.iter().any(|p| rest.starts_with(p)) {
            return true;
        }
        STATEMENT_KEYWORDS.iter().any(|kw| {
            rest.strip_prefix(kw)
                .map(|tail| !tail.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(false)
        })
    }

    /// A choice line (`*`/`+` marker) needs its own dispatch: the marker and
    /// any trailing `[...]` choice text are lexed specially so the bracketed
    /// text can contain arbitrary narrative text and `{ }` interpolation,
    /// not just expression tokens.
    fn line_starts_with_choice_marker(&self) -> bool {
        let rest = &self.source[self.pos..];
        let rest = rest.split('\n').next().unwrap_or(rest);
        rest.starts_with('*') || rest.starts_with('+')
    }

    fn lex_choice_line(&mut self) {
        self.skip_inline_whitespace();
        self.lex_one_code_token(); // the '*' or '+' marker
        self.skip_inline_whitespace();
        if self.peek_byte() == Some(b'[') {
            self.lex_choice_bracket_text();
        }
        self.lex_code_until_newline();
    }

    /// Lexes `[ ... ]` choice display text: a text run (with `{ }`
    /// interpolation islands) delimited by brackets rather than a newline.
    fn lex_choice_bracket_text(&mut self) {
        let open_start = self.current_position();
        self.advance_byte(); // '['
        self.push_spanned(TokenKind::LBracket, "[", open_start.clone());

        let mut text = String::new();
        let mut text_start = self.current_position();
        loop {
            match self.peek_byte() {
                None | Some(b'\n') => {
                    let span = SourceSpan::new(open_start.clone(), self.current_position());
                    self.error("unterminated_choice_text", "unterminated '[' choice text", span);
                    return;
                }
                Some(b']') => {
                    if !text.is_empty() {
                        self.push_spanned(TokenKind::Text(text.clone()), text.clone(), text_start.clone());
                        text.clear();
                    }
                    let close_start = self.current_position();
                    self.advance_byte();
                    self.push_spanned(TokenKind::RBracket, "]", close_start);
                    return;
                }
                Some(b'{') => {
                    if !text.is_empty() {
                        self.push_spanned(TokenKind::Text(text.clone()), text.clone(), text_start.clone());
                        text.clear();
                    }
                    self.lex_brace_island();
                    text_start = self.current_position();
                }
                Some(_) => {
                    let ch_start = self.pos;
                    let ch_len = utf8_len(self.bytes[ch_start]);
                    for _ in 0..ch_len {
                        self.advance_byte();
                    }
                    text.push_str(&self.source[ch_start..ch_start + ch_len]);
                }
            }
        }
    }

    // ---- text-mode scanning ----

    fn lex_text_until_newline(&mut self) {
        let mut text = String::new();
        let mut text_start = self.current_position();
        loop {
            match self.peek_byte() {
                None | Some(b'\n') => break,
                Some(b'{') => {
                    if !text.is_empty() {
                        self.push_spanned(TokenKind::Text(text.clone()), text.clone(), text_start);
                        text.clear();
                    }
                    self.lex_brace_island();
                    text_start = self.current_position();
                }
                Some(_) => {
                    let ch_start = self.pos;
                    let ch_len = utf8_len(self.bytes[ch_start]);
                    for _ in 0..ch_len {
                        self.advance_byte();
                    }
                    text.push_str(&self.source[ch_start..ch_start + ch_len]);
                }
            }
        }
        if !text.is_empty() {
            self.push_spanned(TokenKind::Text(text), "", text_start);
        }
    }

    fn lex_brace_island(&mut self) {
        let start = self.current_position();
        self.advance_byte(); // consume '{'
        self.push_spanned(TokenKind::LBrace, "{", start.clone());
        let mut depth = 1usize;
        while depth > 0 {
            self.skip_inline_whitespace();
            match self.peek_byte() {
                None | Some(b'\n') => {
                    let span = SourceSpan::new(start.clone(), self.current_position());
                    self.error("unterminated_conditional", "unterminated '{' interpolation", span);
                    return;
                }
                Some(b'}') => {
                    let tok_start = self.current_position();
                    self.advance_byte();
                    self.push_spanned(TokenKind::RBrace, "}", tok_start);
                    depth -= 1;
                }
                Some(b'{') => {
                    let tok_start = self.current_position();
                    self.advance_byte();
                    self.push_spanned(TokenKind::LBrace, "{", tok_start);
                    depth += 1;
                }
                Some(b'?') if depth == 1 => {
                    let tok_start = self.current_position();
                    self.advance_byte();
                    self.push_spanned(TokenKind::Question, "?", tok_start);
                    self.lex_inline_conditional_tail(start.clone());
                    return;
                }
                _ => self.lex_one_code_token(),
            }
        }
    }

    /// After a `?` at the top of a `{ expr ? ... }` interpolation, the
    /// remainder through the matching `}` is narrative text, not code:
    /// `then_text ('|' else_text)?`. Nested `{ }` islands (including further
    /// nested inline conditionals) are lexed recursively via
    /// [`Lexer::lex_brace_island`].
    fn lex_inline_conditional_tail(&mut self, start: SourcePosition) {
        let mut branch_text = String::new();
        let mut text_start = self.current_position();
        let mut in_else = false;
        loop {
            match self.peek_byte() {
                None | Some(b'\n') => {
                    let span = SourceSpan::new(start.clone(), self.current_position());
                    self.error("unterminated_conditional", "unterminated inline conditional", span);
                    return;
                }
                Some(b'{') => {
                    if !branch_text.is_empty() {
                        self.push_spanned(TokenKind::Text(branch_text.clone()), branch_text.clone(), text_start.clone());
                        branch_text.clear();
                    }
                    self.lex_brace_island();
                    text_start = self.current_position();
                }
                Some(b'|') if !in_else => {
                    if !branch_text.is_empty() {
                        self.push_spanned(TokenKind::Text(branch_text.clone()), branch_text.clone(), text_start.clone());
                        branch_text.clear();
                    }
                    let pipe_start = self.current_position();
                    self.advance_byte();
                    self.push_spanned(TokenKind::Pipe, "|", pipe_start);
                    in_else = true;
                    text_start = self.current_position();
                }
                Some(b'}') => {
                    if !branch_text.is_empty() {
                        self.push_spanned(TokenKind::Text(branch_text.clone()), branch_text.clone(), text_start.clone());
                    }
                    let close_start = self.current_position();
                    self.advance_byte();
                    self.push_spanned(TokenKind::RBrace, "}", close_start);
                    return;
                }
                Some(_) => {
                    let ch_start = self.pos;
                    let ch_len = utf8_len(self.bytes[ch_start]);
                    for _ in 0..ch_len {
                        self.advance_byte();
                    }
                    branch_text.push_str(&self.source[ch_start..ch_start + ch_len]);
                }
            }
        }
    }

    fn skip_inline_whitespace(&mut self) {
        while matches!(self.peek_byte(), Some(b' ')) {
            self.advance_byte();
        }
    }

    // ---- code-mode scanning ----

    fn lex_code_until_newline(&mut self) {
        loop {
            self.skip_inline_whitespace();
            match self.peek_byte() {
                None | Some(b'\n') => break,
                _ => self.lex_one_code_token(),
            }
        }
    }

    fn lex_one_code_token(&mut self) {
        self.skip_inline_whitespace();
        let start = self.current_position();
        let Some(b) = self.peek_byte() else { return };

        macro_rules! two_char {
            ($second:expr, $then:expr, $else_:expr) => {{
                self.advance_byte();
                if self.peek_byte() == Some($second) {
                    self.advance_byte();
                    self.push_spanned($then, "", start);
                } else {
                    self.push_spanned($else_, "", start);
                }
            }};
        }

        match b {
            b':' => {
                self.advance_byte();
                if self.peek_byte() == Some(b':') {
                    self.advance_byte();
                    self.push_spanned(TokenKind::PassageMarker, "::", start);
                } else {
                    self.push_spanned(TokenKind::Colon, ":", start);
                }
            }
            b'@' => {
                self.advance_byte();
                if self.peek_byte() == Some(b'@') {
                    self.advance_byte();
                    self.push_spanned(TokenKind::MetadataMarker, "@@", start);
                } else {
                    let span = SourceSpan::new(start, self.current_position());
                    self.error("unexpected_character", "unexpected '@'", span);
                }
            }
            b'>' => {
                self.advance_byte();
                match self.peek_byte() {
                    Some(b'>') => {
                        self.advance_byte();
                        self.push_spanned(TokenKind::IncludeMarker, ">>", start);
                    }
                    Some(b'=') => {
                        self.advance_byte();
                        self.push_spanned(TokenKind::Ge, ">=", start);
                    }
                    _ => self.push_spanned(TokenKind::Gt, ">", start),
                }
            }
            b'-' => {
                self.advance_byte();
                match self.peek_byte() {
                    Some(b'>') => {
                        self.advance_byte();
                        if self.peek_byte() == Some(b'-') && self.peek_byte_n(1) == Some(b'>') {
                            self.advance_byte();
                            self.advance_byte();
                            self.push_spanned(TokenKind::TunnelCall, "->->", start);
                        } else {
                            self.push_spanned(TokenKind::Divert, "->", start);
                        }
                    }
                    Some(b'=') => {
                        self.advance_byte();
                        self.push_spanned(TokenKind::MinusAssign, "-=", start);
                    }
                    _ => self.push_spanned(TokenKind::Minus, "-", start),
                }
            }
            b'<' => {
                self.advance_byte();
                match self.peek_byte() {
                    Some(b'-') => {
                        self.advance_byte();
                        self.push_spanned(TokenKind::ThreadMark, "<-", start);
                    }
                    Some(b'=') => {
                        self.advance_byte();
                        self.push_spanned(TokenKind::Le, "<=", start);
                    }
                    _ => self.push_spanned(TokenKind::Lt, "<", start),
                }
            }
            b'=' => two_char!(b'=', TokenKind::Eq, TokenKind::Assign),
            b'!' => {
                self.advance_byte();
                if self.peek_byte() == Some(b'=') {
                    self.advance_byte();
                    self.push_spanned(TokenKind::NotEq, "!=", start);
                } else {
                    let span = SourceSpan::new(start, self.current_position());
                    self.error("unexpected_character", "unexpected '!'", span);
                }
            }
            b'+' => two_char!(b'=', TokenKind::PlusAssign, TokenKind::Plus),
            b'*' => two_char!(b'=', TokenKind::StarAssign, TokenKind::Star),
            b'/' => two_char!(b'=', TokenKind::SlashAssign, TokenKind::Slash),
            b'%' => {
                self.advance_byte();
                self.push_spanned(TokenKind::Percent, "%", start);
            }
            b'~' => {
                self.advance_byte();
                self.push_spanned(TokenKind::Tilde, "~", start);
            }
            b'[' => {
                self.advance_byte();
                self.push_spanned(TokenKind::LBracket, "[", start);
            }
            b']' => {
                self.advance_byte();
                self.push_spanned(TokenKind::RBracket, "]", start);
            }
            b'(' => {
                self.advance_byte();
                self.push_spanned(TokenKind::LParen, "(", start);
            }
            b')' => {
                self.advance_byte();
                self.push_spanned(TokenKind::RParen, ")", start);
            }
            b',' => {
                self.advance_byte();
                self.push_spanned(TokenKind::Comma, ",", start);
            }
            b'{' => self.lex_brace_island(),
            b'}' => {
                self.advance_byte();
                let span = SourceSpan::new(start, self.current_position());
                self.error("unexpected_character", "unexpected '}'", span);
            }
            b'"' => self.lex_string(start),
            b'0'..=b'9' => self.lex_number(start),
            _ if b.is_ascii_alphabetic() || b == b'_' => self.lex_word(start),
            _ => {
                self.advance_byte();
                let span = SourceSpan::new(start, self.current_position());
                self.error("unexpected_character", format!("unexpected character '{}'", b as char), span);
            }
        }
    }

    fn lex_string(&mut self, start: SourcePosition) {
        self.advance_byte(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek_byte() {
                None | Some(b'\n') => {
                    let span = SourceSpan::new(start.clone(), self.current_position());
                    self.error("unterminated_string", "unterminated string literal", span);
                    break;
                }
                Some(b'"') => {
                    self.advance_byte();
                    break;
                }
                Some(b'\\') => {
                    self.advance_byte();
                    match self.peek_byte() {
                        Some(b'n') => {
                            value.push('\n');
                            self.advance_byte();
                        }
                        Some(b't') => {
                            value.push('\t');
                            self.advance_byte();
                        }
                        Some(b'"') => {
                            value.push('"');
                            self.advance_byte();
                        }
                        Some(b'\\') => {
                            value.push('\\');
                            self.advance_byte();
                        }
                        _ => {
                            let span = SourceSpan::new(start.clone(), self.current_position());
                            self.error("invalid_escape", "invalid escape sequence", span);
                        }
                    }
                }
                Some(_) => {
                    let ch_start = self.pos;
                    let ch_len = utf8_len(self.bytes[ch_start]);
                    for _ in 0..ch_len {
                        self.advance_byte();
                    }
                    value.push_str(&self.source[ch_start..ch_start + ch_len]);
                }
            }
        }
        let lexeme = self.source[start.byte_offset..self.pos].to_string();
        let token = Token::new(TokenKind::String(value.clone()), lexeme, SourceSpan::new(start, self.current_position()))
            .with_literal(Literal::String(value));
        self.tokens.push(token);
    }

    fn lex_number(&mut self, start: SourcePosition) {
        while matches!(self.peek_byte(), Some(b'0'..=b'9')) {
            self.advance_byte();
        }
        if self.peek_byte() == Some(b'.') && matches!(self.peek_byte_n(1), Some(b'0'..=b'9')) {
            self.advance_byte();
            while matches!(self.peek_byte(), Some(b'0'..=b'9')) {
                self.advance_byte();
            }
        }
        let lexeme = self.source[start.byte_offset..self.pos].to_string();
        let value: f64 = lexeme.parse().unwrap_or(0.0);
        let token = Token::new(TokenKind::Number(value), lexeme, SourceSpan::new(start, self.current_position()))
            .with_literal(Literal::Number(value));
        self.tokens.push(token);
    }

    fn lex_word(&mut self, start: SourcePosition) {
        while matches!(self.peek_byte(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
            self.advance_byte();
        }
        let lexeme = self.source[start.byte_offset..self.pos].to_string();
        let span = SourceSpan::new(start, self.current_position());
        if let Some(keyword) = TokenKind::keyword_from_str(&lexeme) {
            self.tokens.push(Token::new(keyword, lexeme, span));
        } else {
            self.tokens
                .push(Token::new(TokenKind::Identifier(lexeme.clone()), lexeme, span));
        }
    }
}

fn utf8_len(lead: u8) -> usize {
    if lead & 0x80 == 0 {
        1
    } else if lead & 0xE0 == 0xC0 {
        2
    } else if lead & 0xF0 == 0xE0 {
        3
    } else {
        4
    }
}
