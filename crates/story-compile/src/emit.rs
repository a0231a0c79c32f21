//! Lowers a parsed `Script` into an executable `Story` (`spec.md` §4.5).
//!
//! ```text
//! Script (story_lang::ast)
//!      │
//!      ▼
//! ┌──────────────┐
//! │ lower()      │  passages -> Story, choices attached, expressions -> IR
//! └──────┬───────┘
//!        ▼
//!      Story (crate::ir)
//! ```
//!
//! The emitter never resolves passage-name targets: a `Divert`/`TunnelCall`
//! to a name with no matching passage lowers successfully and surfaces as a
//! `not_found` error only when the runtime actually tries to jump there
//! (`spec.md` §4.5 item 6).

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use story_base::{DiagnosticBag, ErrorKind, StoryError};
use story_lang::{self as lang, Script};

use crate::eval::{evaluate, CallContext, EmptyState, NoFunctions};
use crate::ir::{AssignOp, BinaryOp, Choice, ContentElement, ExprIr, Passage, Story, UnaryOp, Value};

/// Lowers `script` into a `Story`, refusing if `diagnostics` carries a fatal
/// (parse-error) entry — the emitter propagates the first one rather than
/// attempting to lower a tree it knows is malformed (`spec.md` §7).
pub fn lower(script: &Script, diagnostics: &DiagnosticBag) -> Result<Story, StoryError> {
    if let Some(fatal) = diagnostics.first_fatal() {
        return Err(StoryError::new(fatal.kind, fatal.message.clone(), fatal.span.clone()));
    }

    let mut metadata = BTreeMap::new();
    for entry in &script.metadata {
        let ir = lower_expr(&entry.value);
        let value = evaluate(&ir, &EmptyState, &NoFunctions, CallContext::Normal)?;
        metadata.insert(entry.key.clone(), value);
    }

    let mut passages = HashMap::new();
    let mut order = Vec::new();
    for passage_ast in &script.passages {
        if passages.contains_key(&passage_ast.name) {
            return Err(StoryError::without_span(
                ErrorKind::Duplicate,
                format!("duplicate passage name: {}", passage_ast.name),
            ));
        }
        let passage = lower_passage(passage_ast)?;
        order.push(passage_ast.name.clone());
        passages.insert(passage_ast.name.clone(), Rc::new(passage));
    }

    let start_passage_id = match metadata.get("start") {
        Some(Value::String(name)) => name.clone(),
        _ => order.first().cloned().unwrap_or_default(),
    };

    if !passages.contains_key(&start_passage_id) {
        return Err(StoryError::without_span(
            ErrorKind::NotFound,
            format!("start passage not found: {start_passage_id}"),
        ));
    }

    Ok(Story {
        metadata,
        start_passage_id,
        passages,
    })
}

fn lower_passage(passage: &lang::Passage) -> Result<Passage, StoryError> {
    let mut content = Vec::new();
    let mut choices = Vec::new();
    let mut on_enter_script = Vec::new();
    let mut last_text_line = None;

    for stmt in &passage.body {
        match stmt {
            lang::Stmt::Assignment(a) => {
                on_enter_script.push(lower_assignment(a));
                last_text_line = None;
            }
            lang::Stmt::Choice(c) => {
                choices.push(lower_choice(c)?);
                last_text_line = None;
            }
            other => {
                push_line_separated(&mut content, other, &mut last_text_line);
                content.push(lower_stmt(other)?);
            }
        }
    }

    Ok(Passage {
        id: passage.name.clone(),
        name: passage.name.clone(),
        tags: passage.tags.iter().map(|t| t.name.clone()).collect(),
        content,
        choices,
        on_enter_script,
    })
}

/// Separate authored source lines lower to adjacent `Text`/`InlineExpr`/
/// `InlineConditional` elements with no marker between them (`spec.md` §3's
/// content sequence is flat). This reconstructs the line break a display
/// string needs: fragments sharing one line (e.g. an interpolated
/// `Hello {name}!`) concatenate directly, fragments from different lines get
/// an explicit `Text("\n")` inserted ahead of them.
fn push_line_separated(content: &mut Vec<ContentElement>, stmt: &lang::Stmt, last_text_line: &mut Option<u32>) {
    let line = text_stmt_line(stmt);
    if line.is_some() {
        if !content.is_empty() && *last_text_line != line {
            content.push(ContentElement::Text("\n".to_string()));
        }
        *last_text_line = line;
    } else {
        *last_text_line = None;
    }
}

fn text_stmt_line(stmt: &lang::Stmt) -> Option<u32> {
    let span = match stmt {
        lang::Stmt::Text(t) => t.span.as_ref(),
        lang::Stmt::InlineExpr(e) => e.span.as_ref(),
        lang::Stmt::InlineConditional(ic) => ic.span.as_ref(),
        _ => None,
    };
    span.map(|s| s.start.line)
}

/// Lowers statements that may appear nested inside a conditional branch or a
/// choice's action body. Unlike a passage's top-level body, `Choice`
/// statements are not valid here (`spec.md`'s illustrative examples and
/// §8 scenarios only ever place choices directly under a passage) — one is
/// reported as `invalid_state` rather than silently dropped or misplaced.
fn lower_body(stmts: &[lang::Stmt]) -> Result<Vec<ContentElement>, StoryError> {
    let mut content = Vec::with_capacity(stmts.len());
    let mut last_text_line = None;
    for stmt in stmts {
        match stmt {
            lang::Stmt::Choice(_) => {
                return Err(StoryError::without_span(
                    ErrorKind::InvalidState,
                    "a choice may only appear directly in a passage body, not nested inside a conditional or another choice's action",
                ))
            }
            lang::Stmt::Assignment(a) => {
                content.push(lower_assignment_element(a));
                last_text_line = None;
            }
            other => {
                push_line_separated(&mut content, other, &mut last_text_line);
                content.push(lower_stmt(other)?);
            }
        }
    }
    Ok(content)
}

fn lower_assignment(a: &lang::Assignment) -> ContentElement {
    lower_assignment_element(a)
}

fn lower_assignment_element(a: &lang::Assignment) -> ContentElement {
    ContentElement::Assign {
        name: a.name.clone(),
        op: lower_assign_op(a.op),
        value: lower_expr(&a.value),
    }
}

fn lower_assign_op(op: lang::AssignOp) -> AssignOp {
    match op {
        lang::AssignOp::Assign => AssignOp::Assign,
        lang::AssignOp::AddAssign => AssignOp::AddAssign,
        lang::AssignOp::SubAssign => AssignOp::SubAssign,
        lang::AssignOp::MulAssign => AssignOp::MulAssign,
        lang::AssignOp::DivAssign => AssignOp::DivAssign,
    }
}

fn lower_stmt(stmt: &lang::Stmt) -> Result<ContentElement, StoryError> {
    Ok(match stmt {
        lang::Stmt::Text(t) => ContentElement::Text(t.value.clone()),
        lang::Stmt::InlineExpr(e) => ContentElement::InlineExpr(lower_expr(&e.expr)),
        lang::Stmt::InlineConditional(ic) => ContentElement::InlineConditional {
            condition: lower_expr(&ic.condition),
            then_branch: lower_fragments(&ic.then_branch)?,
            else_branch: lower_fragments(&ic.else_branch)?,
        },
        lang::Stmt::Divert(d) => ContentElement::Divert {
            target: require_target(d.target.as_deref(), "divert")?,
        },
        lang::Stmt::TunnelCall(t) => ContentElement::TunnelCall {
            target: require_target(t.target.as_deref(), "tunnel call")?,
        },
        lang::Stmt::TunnelReturn(_) => ContentElement::TunnelReturn,
        lang::Stmt::ThreadStart(t) => ContentElement::ThreadStart {
            target: require_target(t.target.as_deref(), "thread start")?,
        },
        lang::Stmt::Conditional(c) => {
            let mut branches = vec![(lower_expr(&c.condition), lower_body(&c.then_body)?)];
            for elif in &c.elifs {
                branches.push((lower_expr(&elif.condition), lower_body(&elif.body)?));
            }
            let else_branch = match &c.else_clause {
                Some(clause) => Some(lower_body(&clause.body)?),
                None => None,
            };
            ContentElement::Conditional { branches, else_branch }
        }
        lang::Stmt::Assignment(a) => lower_assignment_element(a),
        lang::Stmt::Choice(_) => unreachable!("callers route Stmt::Choice through lower_passage/lower_body"),
    })
}

/// A missing target at this point means the parser already recorded a
/// `ParseError` diagnostic for it (`expected_identifier`), which the fatal
/// check at the top of `lower` would have caught — this is an invariant
/// violation, not a recoverable user error.
fn require_target(target: Option<&str>, what: &str) -> Result<String, StoryError> {
    target.map(str::to_string).ok_or_else(|| {
        StoryError::without_span(ErrorKind::InvalidState, format!("{what} reached emit with no target"))
    })
}

fn lower_fragments(fragments: &[lang::TextFragment]) -> Result<Vec<ContentElement>, StoryError> {
    let mut content = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        content.push(match fragment {
            lang::TextFragment::Literal(s) => ContentElement::Text(s.clone()),
            lang::TextFragment::Expr(e) => ContentElement::InlineExpr(lower_expr(e)),
            lang::TextFragment::Conditional { condition, then_branch, else_branch } => {
                ContentElement::InlineConditional {
                    condition: lower_expr(condition),
                    then_branch: lower_fragments(then_branch)?,
                    else_branch: lower_fragments(else_branch)?,
                }
            }
        });
    }
    Ok(content)
}

fn lower_choice(choice: &lang::Choice) -> Result<Choice, StoryError> {
    Ok(Choice {
        text: lower_fragments(&choice.text)?,
        condition: choice.condition.as_ref().map(lower_expr),
        target_passage_id: choice.target.clone(),
        action: lower_body(&choice.action)?,
        sticky: choice.sticky,
        once: choice.once,
        fallback: choice.fallback,
        tags: choice.tags.iter().map(|t| t.name.clone()).collect(),
        span: choice.span.clone(),
    })
}

fn lower_expr(expr: &lang::Expr) -> ExprIr {
    match expr {
        lang::Expr::Literal(lit) => ExprIr::Literal(lower_literal(lit)),
        lang::Expr::ListLiteral(items) => ExprIr::ListLiteral(items.iter().map(lower_expr).collect()),
        lang::Expr::VariableRef { name, index } => ExprIr::Variable {
            name: name.clone(),
            index: index.as_deref().map(lower_expr).map(Box::new),
        },
        lang::Expr::FunctionCall { name, args } => ExprIr::Call {
            name: name.clone(),
            args: args.iter().map(lower_expr).collect(),
        },
        lang::Expr::BinaryExpr { op, lhs, rhs } => ExprIr::Binary {
            op: lower_binary_op(*op),
            lhs: Box::new(lower_expr(lhs)),
            rhs: Box::new(lower_expr(rhs)),
        },
        lang::Expr::UnaryExpr { op, operand } => ExprIr::Unary {
            op: lower_unary_op(*op),
            operand: Box::new(lower_expr(operand)),
        },
    }
}

fn lower_literal(lit: &lang::Literal) -> Value {
    match lit {
        lang::Literal::Number(n) => Value::Number(*n),
        lang::Literal::String(s) => Value::String(s.clone()),
        lang::Literal::Bool(b) => Value::Bool(*b),
    }
}

fn lower_binary_op(op: lang::BinaryOp) -> BinaryOp {
    match op {
        lang::BinaryOp::Add => BinaryOp::Add,
        lang::BinaryOp::Sub => BinaryOp::Sub,
        lang::BinaryOp::Mul => BinaryOp::Mul,
        lang::BinaryOp::Div => BinaryOp::Div,
        lang::BinaryOp::Mod => BinaryOp::Mod,
        lang::BinaryOp::Eq => BinaryOp::Eq,
        lang::BinaryOp::NotEq => BinaryOp::NotEq,
        lang::BinaryOp::Lt => BinaryOp::Lt,
        lang::BinaryOp::Gt => BinaryOp::Gt,
        lang::BinaryOp::Le => BinaryOp::Le,
        lang::BinaryOp::Ge => BinaryOp::Ge,
        lang::BinaryOp::And => BinaryOp::And,
        lang::BinaryOp::Or => BinaryOp::Or,
    }
}

fn lower_unary_op(op: lang::UnaryOp) -> UnaryOp {
    match op {
        lang::UnaryOp::Neg => UnaryOp::Neg,
        lang::UnaryOp::Not => UnaryOp::Not,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str) -> Result<Story, StoryError> {
        let (script, diagnostics) = story_lang::parse("test.story", source);
        lower(&script, &diagnostics)
    }

    #[test]
    fn lowers_a_minimal_story() {
        let story = compile(":: start\n  hello\n").unwrap();
        assert_eq!(story.start_passage_id, "start");
        assert!(story.passages.contains_key("start"));
    }

    #[test]
    fn first_passage_in_source_order_is_the_start_unless_overridden() {
        let story = compile(":: a\n  hi\n:: b\n  bye\n").unwrap();
        assert_eq!(story.start_passage_id, "a");
    }

    #[test]
    fn metadata_start_overrides_source_order() {
        let story = compile("@@ start: \"b\"\n:: a\n  hi\n:: b\n  bye\n").unwrap();
        assert_eq!(story.start_passage_id, "b");
    }

    #[test]
    fn duplicate_passage_names_are_rejected() {
        let err = compile(":: a\n  one\n:: a\n  two\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate);
    }

    #[test]
    fn unresolved_start_passage_is_not_found() {
        let err = compile("@@ start: \"missing\"\n:: a\n  hi\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn choices_are_attached_to_their_passage_and_assignments_go_to_on_enter() {
        let story = compile(":: a\n  ~ n = 1\n  * [go] -> b\n:: b\n  bye\n").unwrap();
        let a = story.passage("a").unwrap();
        assert_eq!(a.on_enter_script.len(), 1);
        assert_eq!(a.choices.len(), 1);
        assert_eq!(a.choices[0].target_passage_id.as_deref(), Some("b"));
    }

    #[test]
    fn fallback_choice_retains_its_divert_target() {
        let story = compile(":: a\n  * [q] {false} -> x\n  * -> y\n:: x\n  hi\n:: y\n  bye\n").unwrap();
        let a = story.passage("a").unwrap();
        assert!(a.choices[1].fallback);
        assert_eq!(a.choices[1].target_passage_id.as_deref(), Some("y"));
    }

    #[test]
    fn sticky_choice_with_action_only_divert_has_no_line_level_target() {
        let story = compile(":: a\n  + [wait]\n    ~ n += 1\n    -> a\n").unwrap();
        let a = story.passage("a").unwrap();
        assert!(a.choices[0].target_passage_id.is_none());
        assert_eq!(a.choices[0].action.len(), 2);
    }

    #[test]
    fn a_choice_nested_inside_a_conditional_is_rejected() {
        let err = compile(":: a\n  {true}\n    * [go] -> a\n  end\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn fatal_diagnostic_short_circuits_lowering() {
        let err = compile(":: a\n  ->\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
    }

    #[test]
    fn interpolated_fragments_on_one_line_have_no_separator_between_them() {
        let story = compile(":: a\n  Hello {name}!\n").unwrap();
        let a = story.passage("a").unwrap();
        assert!(matches!(a.content[0], ContentElement::Text(ref s) if s == "Hello "));
        assert!(matches!(a.content[1], ContentElement::InlineExpr(_)));
        assert!(matches!(a.content[2], ContentElement::Text(ref s) if s == "!"));
    }

    #[test]
    fn two_separate_text_lines_get_a_newline_inserted_between_them() {
        let story = compile(":: a\n  first\n  second\n").unwrap();
        let a = story.passage("a").unwrap();
        assert!(matches!(a.content[0], ContentElement::Text(ref s) if s == "first"));
        assert!(matches!(a.content[1], ContentElement::Text(ref s) if s == "\n"));
        assert!(matches!(a.content[2], ContentElement::Text(ref s) if s == "second"));
    }
}
