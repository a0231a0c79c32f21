//! Recursive-descent, error-recovering parser for the story scripting
//! language.
//!
//! The parser never aborts on a syntax error: it records a [`Diagnostic`]
//! and *synchronizes* by consuming tokens until a contextual sync point is
//! reached, then keeps going. The resulting [`Script`] is
//! best-effort — callers inspect the returned diagnostics to decide whether
//! the tree is usable (see `story-compile::emit`, which refuses to lower a
//! script with a fatal diagnostic present).

use story_base::{Diagnostic, DiagnosticBag, ErrorKind, SourceSpan};

use crate::ast::{
    AssignOp, Assignment, Choice, Conditional, Divert, ElifClause, ElseClause, Expr, Include,
    InlineConditional, InlineExpr, Literal, Metadata, Passage, Script, Stmt, Tag, Text,
    TextFragment, ThreadStart, TunnelCall, TunnelReturn, BinaryOp, UnaryOp,
};
use crate::token::{Token, TokenKind, TokenStream};

pub struct Parser {
    stream: TokenStream,
    diagnostics: DiagnosticBag,
}

impl Parser {
    pub fn new(stream: TokenStream) -> Self {
        Self {
            stream,
            diagnostics: DiagnosticBag::new(),
        }
    }

    /// Parses the full token stream, returning a best-effort [`Script`] and
    /// whatever diagnostics were collected along the way.
    pub fn parse(mut self) -> (Script, DiagnosticBag) {
        let script = self.parse_script();
        (script, self.diagnostics)
    }

    // ---- token helpers ----

    fn peek_kind(&self) -> &TokenKind {
        &self.stream.peek().kind
    }

    fn current_span(&self) -> SourceSpan {
        self.stream.peek().span.clone()
    }

    fn is_kind(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    fn advance(&mut self) -> Token {
        self.stream.advance().clone()
    }

    fn at_eof(&self) -> bool {
        self.stream.is_at_end()
    }

    fn error(&mut self, code: &'static str, message: impl Into<String>, span: SourceSpan) {
        self.diagnostics
            .push(Diagnostic::new(ErrorKind::ParseError, code, message.into(), span));
    }

    /// Consumes and returns the current token if it matches `kind`'s
    /// variant (data payload ignored); otherwise records a diagnostic and
    /// leaves the cursor untouched.
    fn expect(&mut self, kind: TokenKind, code: &'static str, message: &str) -> Option<Token> {
        if self.is_kind(&kind) {
            Some(self.advance())
        } else {
            self.error(code, message.to_string(), self.current_span());
            None
        }
    }

    /// Consumes the current token if it matches `kind`'s variant, without
    /// recording a diagnostic on mismatch. Returns whether it matched.
    fn match_kind(&mut self, kind: &TokenKind) -> bool {
        if self.is_kind(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_newline(&mut self, code: &'static str, message: &str) {
        if !self.match_kind(&TokenKind::Newline) && !self.at_eof() {
            self.error(code, message.to_string(), self.current_span());
        }
    }

    fn expect_identifier(&mut self) -> Option<(String, SourceSpan)> {
        if let TokenKind::Identifier(_) = self.peek_kind() {
            let tok = self.advance();
            match tok.kind {
                TokenKind::Identifier(name) => Some((name, tok.span)),
                _ => unreachable!(),
            }
        } else {
            self.error("expected_identifier", "expected an identifier", self.current_span());
            None
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline) {
            self.advance();
        }
    }

    // ---- sync sets ----

    /// Block-level: `PassageDecl, Dedent, EOF`.
    fn synchronize_block(&mut self) {
        while !self.at_eof() && !matches!(self.peek_kind(), TokenKind::PassageMarker | TokenKind::Dedent) {
            self.advance();
        }
    }

    /// Statement-level: `Newline, PassageDecl, +, *, ~, Divert, Dedent, EOF`.
    /// Never swallows a passage boundary.
    fn synchronize_statement(&mut self) {
        while !self.at_eof()
            && !matches!(
                self.peek_kind(),
                TokenKind::Newline
                    | TokenKind::PassageMarker
                    | TokenKind::Star
                    | TokenKind::Plus
                    | TokenKind::Tilde
                    | TokenKind::Divert
                    | TokenKind::Dedent
            )
        {
            self.advance();
        }
        if matches!(self.peek_kind(), TokenKind::Newline) {
            self.advance();
        }
    }

    /// Expression-level: `Newline, ), ], }, ",", EOF`.
    fn synchronize_expr(&mut self) {
        while !self.at_eof()
            && !matches!(
                self.peek_kind(),
                TokenKind::Newline
                    | TokenKind::RParen
                    | TokenKind::RBracket
                    | TokenKind::RBrace
                    | TokenKind::Comma
            )
        {
            self.advance();
        }
    }

    // ---- top level ----

    fn parse_script(&mut self) -> Script {
        let mut metadata = Vec::new();
        let mut includes = Vec::new();
        let mut passages = Vec::new();
        self.skip_newlines();
        while !self.at_eof() {
            match self.peek_kind() {
                TokenKind::MetadataMarker => metadata.push(self.parse_metadata()),
                TokenKind::IncludeMarker => includes.push(self.parse_include()),
                TokenKind::PassageMarker => passages.push(self.parse_passage()),
                TokenKind::Newline => {
                    self.advance();
                }
                TokenKind::Eof => break,
                other => {
                    let message = format!("unexpected token at top level: {other:?}");
                    self.error("unexpected_token", message, self.current_span());
                    self.synchronize_block();
                }
            }
            self.skip_newlines();
        }
        Script {
            metadata,
            includes,
            passages,
            span: None,
        }
    }

    fn parse_metadata(&mut self) -> Metadata {
        let start = self.current_span();
        self.advance(); // '@@'
        let key = match self.expect_identifier() {
            Some((name, _)) => name,
            None => {
                self.synchronize_statement();
                return Metadata {
                    key: String::new(),
                    value: Expr::Literal(Literal::Bool(false)),
                    span: Some(start),
                };
            }
        };
        self.expect(TokenKind::Colon, "expected_colon", "expected ':' after metadata key");
        let value = self.parse_expr();
        let end = self.current_span();
        self.expect_newline("expected_newline", "expected newline after metadata value");
        Metadata {
            key,
            value,
            span: Some(start.merge(&end)),
        }
    }

    fn parse_include(&mut self) -> Include {
        let start = self.current_span();
        self.advance(); // '>>'
        let path = match self.peek_kind().clone() {
            TokenKind::String(s) => {
                self.advance();
                s
            }
            _ => {
                self.error("expected_string", "expected a string path after '>>'", self.current_span());
                String::new()
            }
        };
        let alias = if matches!(self.peek_kind(), TokenKind::As) {
            self.advance();
            self.expect_identifier().map(|(name, _)| name)
        } else {
            None
        };
        let end = self.current_span();
        self.expect_newline("expected_newline", "expected newline after include");
        Include {
            path,
            alias,
            span: Some(start.merge(&end)),
        }
    }

    fn parse_passage(&mut self) -> Passage {
        let start = self.current_span();
        self.advance(); // '::'
        let name = self.expect_identifier().map(|(name, _)| name).unwrap_or_default();
        let tags = if matches!(self.peek_kind(), TokenKind::LBracket) {
            self.parse_tag_list()
        } else {
            Vec::new()
        };
        self.expect_newline("expected_newline", "expected newline after passage header");
        let body = self.parse_body();
        let end = self.current_span();
        Passage {
            name,
            tags,
            body,
            span: Some(start.merge(&end)),
        }
    }

    fn parse_tag_list(&mut self) -> Vec<Tag> {
        self.advance(); // '['
        let mut tags = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::RBracket | TokenKind::Newline) && !self.at_eof() {
            match self.expect_identifier() {
                Some((name, span)) => tags.push(Tag { name, span: Some(span) }),
                None => {
                    self.advance();
                }
            }
            if matches!(self.peek_kind(), TokenKind::Comma) {
                self.advance();
            }
        }
        self.expect(TokenKind::RBracket, "expected_rbracket", "expected ']' to close tag list");
        tags
    }

    /// `body := Indent statement* Dedent`. A missing `Indent` (an empty
    /// body) yields an empty statement list without a diagnostic — callers
    /// such as a choice with no nested action rely on this.
    fn parse_body(&mut self) -> Vec<Stmt> {
        if !matches!(self.peek_kind(), TokenKind::Indent) {
            return Vec::new();
        }
        self.advance(); // Indent
        let mut stmts = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::Dedent | TokenKind::Eof) {
            if matches!(self.peek_kind(), TokenKind::PassageMarker) {
                break;
            }
            if matches!(self.peek_kind(), TokenKind::Newline) {
                self.advance();
                continue;
            }
            match self.parse_statement() {
                Some(parsed) => stmts.extend(parsed),
                None => self.synchronize_statement(),
            }
        }
        if matches!(self.peek_kind(), TokenKind::Dedent) {
            self.advance();
        }
        stmts
    }

    // ---- statements ----

    fn parse_statement(&mut self) -> Option<Vec<Stmt>> {
        match self.peek_kind() {
            TokenKind::Star | TokenKind::Plus => Some(vec![Stmt::Choice(self.parse_choice())]),
            TokenKind::Tilde => Some(vec![Stmt::Assignment(self.parse_assignment())]),
            TokenKind::LBrace => Some(vec![Stmt::Conditional(self.parse_conditional())]),
            TokenKind::Divert => Some(vec![Stmt::Divert(self.parse_divert())]),
            TokenKind::TunnelCall => Some(vec![self.parse_tunnel_call_or_return()]),
            TokenKind::ThreadMark => Some(vec![Stmt::ThreadStart(self.parse_thread_start())]),
            TokenKind::Text(_) => Some(self.parse_text_line()),
            other => {
                let message = format!("unexpected token in passage body: {other:?}");
                self.error("unexpected_token", message, self.current_span());
                None
            }
        }
    }

    fn parse_choice(&mut self) -> Choice {
        let marker = self.advance(); // '*' or '+'
        let once = matches!(marker.kind, TokenKind::Star);
        let sticky = matches!(marker.kind, TokenKind::Plus);
        let start = marker.span;

        let text = if matches!(self.peek_kind(), TokenKind::LBracket) {
            self.parse_choice_text_fragments()
        } else {
            Vec::new()
        };

        let condition = if matches!(self.peek_kind(), TokenKind::LBrace) {
            self.advance();
            let expr = self.parse_expr();
            self.expect(TokenKind::RBrace, "expected_rbrace", "expected '}' to close choice condition");
            Some(expr)
        } else {
            None
        };

        let target = if matches!(self.peek_kind(), TokenKind::Divert) {
            self.advance();
            self.expect_identifier().map(|(name, _)| name)
        } else {
            None
        };

        let end = self.current_span();
        self.expect_newline("expected_newline", "expected newline after choice");

        let action = self.parse_body();
        let fallback = text.is_empty() && target.is_some();

        Choice {
            text,
            condition,
            target,
            action,
            sticky,
            once,
            fallback,
            tags: Vec::new(),
            span: Some(start.merge(&end)),
        }
    }

    fn parse_choice_text_fragments(&mut self) -> Vec<TextFragment> {
        self.advance(); // '['
        let mut fragments = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::RBracket | TokenKind::Newline | TokenKind::Eof) {
            fragments.push(self.parse_text_fragment());
        }
        self.expect(TokenKind::RBracket, "expected_rbracket", "expected ']' to close choice text");
        fragments
    }

    fn parse_text_fragment(&mut self) -> TextFragment {
        match self.peek_kind().clone() {
            TokenKind::Text(s) => {
                self.advance();
                TextFragment::Literal(s)
            }
            TokenKind::LBrace => self.parse_brace_fragment(),
            other => {
                let message = format!("unexpected token in text: {other:?}");
                self.error("unexpected_token", message, self.current_span());
                self.advance();
                TextFragment::Literal(String::new())
            }
        }
    }

    /// Parses a `{ expr }` interpolation or `{ expr ? then | else }` inline
    /// conditional (`ast::TextFragment::Conditional` / `InlineConditional`).
    fn parse_brace_fragment(&mut self) -> TextFragment {
        self.advance(); // '{'
        let condition = self.parse_expr();
        if matches!(self.peek_kind(), TokenKind::Question) {
            self.advance();
            let then_branch = self.parse_fragment_list_until(&[TokenKind::Pipe, TokenKind::RBrace]);
            let else_branch = if matches!(self.peek_kind(), TokenKind::Pipe) {
                self.advance();
                self.parse_fragment_list_until(&[TokenKind::RBrace])
            } else {
                Vec::new()
            };
            self.expect(TokenKind::RBrace, "expected_rbrace", "expected '}' to close inline conditional");
            TextFragment::Conditional {
                condition,
                then_branch,
                else_branch,
            }
        } else {
            self.expect(TokenKind::RBrace, "expected_rbrace", "expected '}' to close interpolation");
            TextFragment::Expr(condition)
        }
    }

    fn parse_fragment_list_until(&mut self, stop: &[TokenKind]) -> Vec<TextFragment> {
        let mut fragments = Vec::new();
        while !self.at_eof() && !stop.iter().any(|kind| self.is_kind(kind)) {
            fragments.push(self.parse_text_fragment());
        }
        fragments
    }

    /// A run of `Text`/`{ }` tokens up to the line's `Newline`, lowered
    /// straight into ordered passage-body content statements.
    fn parse_text_line(&mut self) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        while matches!(self.peek_kind(), TokenKind::Text(_) | TokenKind::LBrace) {
            let span = self.current_span();
            match self.peek_kind().clone() {
                TokenKind::Text(s) => {
                    self.advance();
                    stmts.push(Stmt::Text(Text { value: s, span: Some(span) }));
                }
                TokenKind::LBrace => match self.parse_brace_fragment() {
                    TextFragment::Expr(expr) => stmts.push(Stmt::InlineExpr(InlineExpr { expr, span: Some(span) })),
                    TextFragment::Conditional { condition, then_branch, else_branch } => {
                        stmts.push(Stmt::InlineConditional(InlineConditional {
                            condition,
                            then_branch,
                            else_branch,
                            span: Some(span),
                        }));
                    }
                    TextFragment::Literal(_) => unreachable!("brace fragment is never a literal"),
                },
                _ => break,
            }
        }
        self.expect_newline("expected_newline", "expected newline after text line");
        stmts
    }

    fn parse_assignment(&mut self) -> Assignment {
        let start = self.current_span();
        self.advance(); // '~'
        let name = self.expect_identifier().map(|(name, _)| name).unwrap_or_default();
        let op = match self.peek_kind() {
            TokenKind::Assign => {
                self.advance();
                AssignOp::Assign
            }
            TokenKind::PlusAssign => {
                self.advance();
                AssignOp::AddAssign
            }
            TokenKind::MinusAssign => {
                self.advance();
                AssignOp::SubAssign
            }
            TokenKind::StarAssign => {
                self.advance();
                AssignOp::MulAssign
            }
            TokenKind::SlashAssign => {
                self.advance();
                AssignOp::DivAssign
            }
            _ => {
                self.error("expected_assign_op", "expected an assignment operator", self.current_span());
                AssignOp::Assign
            }
        };
        let value = self.parse_expr();
        let end = self.current_span();
        self.expect_newline("expected_newline", "expected newline after assignment");
        Assignment {
            name,
            op,
            value,
            span: Some(start.merge(&end)),
        }
    }

    /// Block conditional: `{ expr } then_body (elif expr then_body)* (else
    /// then_body)? end`.
    fn parse_conditional(&mut self) -> Conditional {
        let start = self.current_span();
        self.advance(); // '{'
        let condition = self.parse_expr();
        self.expect(TokenKind::RBrace, "expected_rbrace", "expected '}' to close conditional expression");
        self.expect_newline("expected_newline", "expected newline after conditional header");
        let then_body = self.parse_body();

        let mut elifs = Vec::new();
        while matches!(self.peek_kind(), TokenKind::Elif) {
            let elif_start = self.current_span();
            self.advance();
            let elif_condition = self.parse_expr();
            self.expect_newline("expected_newline", "expected newline after elif");
            let body = self.parse_body();
            let elif_end = self.current_span();
            elifs.push(ElifClause {
                condition: elif_condition,
                body,
                span: Some(elif_start.merge(&elif_end)),
            });
        }

        let else_clause = if matches!(self.peek_kind(), TokenKind::Else) {
            let else_start = self.current_span();
            self.advance();
            self.expect_newline("expected_newline", "expected newline after else");
            let body = self.parse_body();
            let else_end = self.current_span();
            Some(ElseClause {
                body,
                span: Some(else_start.merge(&else_end)),
            })
        } else {
            None
        };

        self.expect(TokenKind::End, "expected_end", "expected 'end' to close conditional");
        let end = self.current_span();
        self.expect_newline("expected_newline", "expected newline after 'end'");
        Conditional {
            condition,
            then_body,
            elifs,
            else_clause,
            span: Some(start.merge(&end)),
        }
    }

    fn parse_divert(&mut self) -> Divert {
        let start = self.current_span();
        self.advance(); // '->'
        let target = self.expect_identifier().map(|(name, _)| name);
        let end = self.current_span();
        self.expect_newline("expected_newline", "expected newline after divert");
        Divert {
            target,
            span: Some(start.merge(&end)),
        }
    }

    /// The lexer emits one `TunnelCall` token for `->->` regardless of
    /// whether a target identifier follows; a trailing identifier means a
    /// tunnel call, its absence means a tunnel return.
    fn parse_tunnel_call_or_return(&mut self) -> Stmt {
        let start = self.current_span();
        self.advance(); // '->->'
        if matches!(self.peek_kind(), TokenKind::Identifier(_)) {
            let target = self.expect_identifier().map(|(name, _)| name);
            let end = self.current_span();
            self.expect_newline("expected_newline", "expected newline after tunnel call");
            Stmt::TunnelCall(TunnelCall {
                target,
                span: Some(start.merge(&end)),
            })
        } else {
            let end = self.current_span();
            self.expect_newline("expected_newline", "expected newline after tunnel return");
            Stmt::TunnelReturn(TunnelReturn {
                span: Some(start.merge(&end)),
            })
        }
    }

    fn parse_thread_start(&mut self) -> ThreadStart {
        let start = self.current_span();
        self.advance(); // '<-'
        let target = self.expect_identifier().map(|(name, _)| name);
        let end = self.current_span();
        self.expect_newline("expected_newline", "expected newline after thread start");
        ThreadStart {
            target,
            span: Some(start.merge(&end)),
        }
    }

    // ---- expressions (Pratt-style, precedence low -> high:
    // or < and < not < == != < <= > >= < < + - < * / % < unary-minus < primary) ----

    fn parse_expr(&mut self) -> Expr {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Expr {
        let mut lhs = self.parse_and();
        while matches!(self.peek_kind(), TokenKind::Or) {
            self.advance();
            let rhs = self.parse_and();
            lhs = Expr::BinaryExpr {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        lhs
    }

    fn parse_and(&mut self) -> Expr {
        let mut lhs = self.parse_not();
        while matches!(self.peek_kind(), TokenKind::And) {
            self.advance();
            let rhs = self.parse_not();
            lhs = Expr::BinaryExpr {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        lhs
    }

    fn parse_not(&mut self) -> Expr {
        if matches!(self.peek_kind(), TokenKind::Not) {
            self.advance();
            let operand = self.parse_not();
            Expr::UnaryExpr {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            }
        } else {
            self.parse_equality()
        }
    }

    fn parse_equality(&mut self) -> Expr {
        let mut lhs = self.parse_comparison();
        loop {
            let op = match self.peek_kind() {
                TokenKind::Eq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::NotEq,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_comparison();
            lhs = Expr::BinaryExpr { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        lhs
    }

    fn parse_comparison(&mut self) -> Expr {
        let mut lhs = self.parse_additive();
        loop {
            let op = match self.peek_kind() {
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                TokenKind::Lt => BinaryOp::Lt,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive();
            lhs = Expr::BinaryExpr { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        lhs
    }

    fn parse_additive(&mut self) -> Expr {
        let mut lhs = self.parse_multiplicative();
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative();
            lhs = Expr::BinaryExpr { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        lhs
    }

    fn parse_multiplicative(&mut self) -> Expr {
        let mut lhs = self.parse_unary();
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary();
            lhs = Expr::BinaryExpr { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        lhs
    }

    fn parse_unary(&mut self) -> Expr {
        if matches!(self.peek_kind(), TokenKind::Minus) {
            self.advance();
            let operand = self.parse_unary();
            Expr::UnaryExpr {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            }
        } else {
            self.parse_primary()
        }
    }

    fn parse_primary(&mut self) -> Expr {
        match self.peek_kind().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Expr::Literal(Literal::Number(n))
            }
            TokenKind::String(s) => {
                self.advance();
                Expr::Literal(Literal::String(s))
            }
            TokenKind::True => {
                self.advance();
                Expr::Literal(Literal::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Expr::Literal(Literal::Bool(false))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr();
                self.expect(TokenKind::RParen, "expected_rparen", "expected ')'");
                expr
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !matches!(self.peek_kind(), TokenKind::RBracket | TokenKind::Eof) {
                    items.push(self.parse_expr());
                    if matches!(self.peek_kind(), TokenKind::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket, "expected_rbracket", "expected ']' to close list literal");
                Expr::ListLiteral(items)
            }
            TokenKind::Identifier(name) => {
                self.advance();
                if matches!(self.peek_kind(), TokenKind::LParen) {
                    self.advance();
                    let mut args = Vec::new();
                    while !matches!(self.peek_kind(), TokenKind::RParen | TokenKind::Eof) {
                        args.push(self.parse_expr());
                        if matches!(self.peek_kind(), TokenKind::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                    self.expect(TokenKind::RParen, "expected_rparen", "expected ')' to close call arguments");
                    Expr::FunctionCall { name, args }
                } else if matches!(self.peek_kind(), TokenKind::LBracket) {
                    self.advance();
                    let index = self.parse_expr();
                    self.expect(TokenKind::RBracket, "expected_rbracket", "expected ']' to close index");
                    Expr::VariableRef {
                        name,
                        index: Some(Box::new(index)),
                    }
                } else {
                    Expr::VariableRef { name, index: None }
                }
            }
            other => {
                let message = format!("expected an expression, found {other:?}");
                self.error("expected_expression", message, self.current_span());
                self.synchronize_expr();
                Expr::Literal(Literal::Bool(false))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(source: &str) -> (Script, DiagnosticBag) {
        let (stream, lex_diags) = Lexer::new("test.story", source).tokenize();
        let (script, mut parse_diags) = Parser::new(stream).parse();
        for d in lex_diags {
            parse_diags.push(d);
        }
        (script, parse_diags)
    }

    #[test]
    fn parses_a_minimal_passage() {
        let (script, diags) = parse(":: start\n  hello\n");
        assert!(diags.is_empty());
        assert_eq!(script.passages.len(), 1);
        assert_eq!(script.passages[0].name, "start");
    }

    #[test]
    fn parses_metadata_and_title() {
        let (script, diags) = parse("@@ title: \"My Story\"\n:: start\n  hi\n");
        assert!(diags.is_empty());
        assert_eq!(script.metadata.len(), 1);
        assert_eq!(script.metadata[0].key, "title");
    }

    #[test]
    fn parses_one_shot_and_sticky_choices() {
        let (script, diags) = parse(":: a\n  * [go] -> b\n  + [wait]\n    ~ n += 1\n    -> a\n");
        assert!(diags.is_empty());
        let body = &script.passages[0].body;
        let choices: Vec<_> = body
            .iter()
            .filter_map(|s| if let Stmt::Choice(c) = s { Some(c) } else { None })
            .collect();
        assert_eq!(choices.len(), 2);
        assert!(choices[0].once && !choices[0].sticky);
        assert!(choices[1].sticky && !choices[1].once);
        assert_eq!(choices[1].action.len(), 2);
    }

    #[test]
    fn parses_every_compound_assignment_operator() {
        let (script, diags) = parse(":: a\n  ~ n = 1\n  ~ n += 1\n  ~ n -= 1\n  ~ n *= 2\n  ~ n /= 2\n");
        assert!(diags.is_empty());
        let ops: Vec<_> = script.passages[0]
            .body
            .iter()
            .filter_map(|s| if let Stmt::Assignment(a) = s { Some(a.op) } else { None })
            .collect();
        assert_eq!(
            ops,
            vec![AssignOp::Assign, AssignOp::AddAssign, AssignOp::SubAssign, AssignOp::MulAssign, AssignOp::DivAssign]
        );
    }

    #[test]
    fn fallback_choice_has_empty_text_and_auto_target() {
        let (script, diags) = parse(":: a\n  * [q] {false} -> x\n  * -> y\n");
        assert!(diags.is_empty());
        let choices: Vec<_> = script.passages[0]
            .body
            .iter()
            .filter_map(|s| if let Stmt::Choice(c) = s { Some(c) } else { None })
            .collect();
        assert!(!choices[0].fallback);
        assert!(choices[0].condition.is_some());
        assert!(choices[1].fallback);
        assert!(choices[1].text.is_empty());
    }

    #[test]
    fn divert_with_missing_target_is_a_diagnostic() {
        let (_script, diags) = parse(":: a\n  ->\n");
        assert_eq!(diags.first_fatal().unwrap().code, "expected_identifier");
    }

    #[test]
    fn tunnel_call_and_return_round_trip() {
        let (script, diags) = parse(":: a\n  ->-> b\n  tail\n:: b\n  middle\n  ->->\n");
        assert!(diags.is_empty());
        assert!(matches!(script.passages[0].body[0], Stmt::TunnelCall(_)));
        assert!(matches!(script.passages[1].body[1], Stmt::TunnelReturn(_)));
    }

    #[test]
    fn thread_start_parses_target() {
        let (script, diags) = parse(":: a\n  <- side\n");
        assert!(diags.is_empty());
        match &script.passages[0].body[0] {
            Stmt::ThreadStart(t) => assert_eq!(t.target.as_deref(), Some("side")),
            other => panic!("expected ThreadStart, got {other:?}"),
        }
    }

    #[test]
    fn block_conditional_with_elif_and_else() {
        let src = ":: a\n  {x == 1}\n    one\n  elif x == 2\n    two\n  else\n    other\n  end\n";
        let (script, diags) = parse(src);
        assert!(diags.is_empty());
        match &script.passages[0].body[0] {
            Stmt::Conditional(c) => {
                assert_eq!(c.elifs.len(), 1);
                assert!(c.else_clause.is_some());
            }
            other => panic!("expected Conditional, got {other:?}"),
        }
    }

    #[test]
    fn text_with_inline_interpolation_splits_into_fragments() {
        let (script, diags) = parse(":: a\n  Welcome, {name}.\n");
        assert!(diags.is_empty());
        let body = &script.passages[0].body;
        assert!(matches!(body[0], Stmt::Text(_)));
        assert!(matches!(body[1], Stmt::InlineExpr(_)));
        assert!(matches!(body[2], Stmt::Text(_)));
    }

    #[test]
    fn inline_conditional_text_parses_both_branches() {
        let (script, diags) = parse(":: a\n  {seen ? yes|no}\n");
        assert!(diags.is_empty());
        match &script.passages[0].body[0] {
            Stmt::InlineConditional(ic) => {
                assert_eq!(ic.then_branch.len(), 1);
                assert_eq!(ic.else_branch.len(), 1);
            }
            other => panic!("expected InlineConditional, got {other:?}"),
        }
    }

    #[test]
    fn expression_precedence_multiplication_binds_tighter_than_addition() {
        let (script, diags) = parse("@@ v: 1 + 2 * 3\n:: a\n  hi\n");
        assert!(diags.is_empty());
        match &script.metadata[0].value {
            Expr::BinaryExpr { op: BinaryOp::Add, rhs, .. } => {
                assert!(matches!(**rhs, Expr::BinaryExpr { op: BinaryOp::Mul, .. }));
            }
            other => panic!("expected Add at top of expr, got {other:?}"),
        }
    }

    #[test]
    fn unclosed_passage_body_does_not_swallow_next_passage() {
        let (script, _diags) = parse(":: a\n  * [go\n:: b\n  hi\n");
        assert_eq!(script.passages.len(), 2);
        assert_eq!(script.passages[1].name, "b");
    }
}
