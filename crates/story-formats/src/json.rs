//! A JSON `Format` front-end (`spec.md` §2's "external Ink-like JSON").
//!
//! The wire shape mirrors `story_compile::ir` closely rather than copying
//! any particular third-party narrative JSON dialect — expressions and
//! content elements are tagged unions keyed by a `"kind"`/`"type"` field, so
//! the JSON is readable by hand and the import/export round trip is exact
//! (`spec.md` §8's "F.import(F.export(S)) equal to S up to stable metadata
//! ordering").

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use story_base::{ErrorKind, StoryError};
use story_compile::{AssignOp, BinaryOp, Choice, ContentElement, ExprIr, Passage, Story, UnaryOp, Value};

use crate::Format;

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct JsonStory {
    format_version: u32,
    metadata: BTreeMap<String, Value>,
    start_passage_id: String,
    passages: BTreeMap<String, JsonPassage>,
}

#[derive(Serialize, Deserialize)]
struct JsonPassage {
    name: String,
    tags: Vec<String>,
    content: Vec<JsonContent>,
    choices: Vec<JsonChoice>,
    on_enter_script: Vec<JsonContent>,
}

#[derive(Serialize, Deserialize)]
struct JsonChoice {
    text: Vec<JsonContent>,
    condition: Option<JsonExpr>,
    target_passage_id: Option<String>,
    action: Vec<JsonContent>,
    sticky: bool,
    once: bool,
    fallback: bool,
    tags: Vec<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
enum JsonContent {
    Text { value: String },
    InlineExpr { expr: JsonExpr },
    InlineConditional { condition: JsonExpr, then_branch: Vec<JsonContent>, else_branch: Vec<JsonContent> },
    Divert { target: String },
    TunnelCall { target: String },
    TunnelReturn,
    ThreadStart { target: String },
    Conditional { branches: Vec<JsonBranch>, else_branch: Option<Vec<JsonContent>> },
    Assign { name: String, op: String, value: JsonExpr },
}

#[derive(Serialize, Deserialize)]
struct JsonBranch {
    condition: JsonExpr,
    body: Vec<JsonContent>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind")]
enum JsonExpr {
    Literal { value: Value },
    List { items: Vec<JsonExpr> },
    Variable { name: String, index: Option<Box<JsonExpr>> },
    Call { name: String, args: Vec<JsonExpr> },
    Binary { op: String, lhs: Box<JsonExpr>, rhs: Box<JsonExpr> },
    Unary { op: String, operand: Box<JsonExpr> },
}

fn binary_op_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "add",
        BinaryOp::Sub => "sub",
        BinaryOp::Mul => "mul",
        BinaryOp::Div => "div",
        BinaryOp::Mod => "mod",
        BinaryOp::Eq => "eq",
        BinaryOp::NotEq => "neq",
        BinaryOp::Lt => "lt",
        BinaryOp::Gt => "gt",
        BinaryOp::Le => "le",
        BinaryOp::Ge => "ge",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
    }
}

fn parse_binary_op(s: &str) -> Result<BinaryOp, StoryError> {
    Ok(match s {
        "add" => BinaryOp::Add,
        "sub" => BinaryOp::Sub,
        "mul" => BinaryOp::Mul,
        "div" => BinaryOp::Div,
        "mod" => BinaryOp::Mod,
        "eq" => BinaryOp::Eq,
        "neq" => BinaryOp::NotEq,
        "lt" => BinaryOp::Lt,
        "gt" => BinaryOp::Gt,
        "le" => BinaryOp::Le,
        "ge" => BinaryOp::Ge,
        "and" => BinaryOp::And,
        "or" => BinaryOp::Or,
        other => return Err(validation(format!("unknown binary operator: {other}"))),
    })
}

fn unary_op_name(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "neg",
        UnaryOp::Not => "not",
    }
}

fn parse_unary_op(s: &str) -> Result<UnaryOp, StoryError> {
    Ok(match s {
        "neg" => UnaryOp::Neg,
        "not" => UnaryOp::Not,
        other => return Err(validation(format!("unknown unary operator: {other}"))),
    })
}

fn assign_op_name(op: AssignOp) -> &'static str {
    match op {
        AssignOp::Assign => "assign",
        AssignOp::AddAssign => "add_assign",
        AssignOp::SubAssign => "sub_assign",
        AssignOp::MulAssign => "mul_assign",
        AssignOp::DivAssign => "div_assign",
    }
}

fn parse_assign_op(s: &str) -> Result<AssignOp, StoryError> {
    Ok(match s {
        "assign" => AssignOp::Assign,
        "add_assign" => AssignOp::AddAssign,
        "sub_assign" => AssignOp::SubAssign,
        "mul_assign" => AssignOp::MulAssign,
        "div_assign" => AssignOp::DivAssign,
        other => return Err(validation(format!("unknown assignment operator: {other}"))),
    })
}

fn validation(message: impl Into<String>) -> StoryError {
    StoryError::without_span(ErrorKind::Validation, message.into())
}

fn expr_to_json(expr: &ExprIr) -> JsonExpr {
    match expr {
        ExprIr::Literal(v) => JsonExpr::Literal { value: v.clone() },
        ExprIr::ListLiteral(items) => JsonExpr::List { items: items.iter().map(expr_to_json).collect() },
        ExprIr::Variable { name, index } => JsonExpr::Variable {
            name: name.clone(),
            index: index.as_deref().map(expr_to_json).map(Box::new),
        },
        ExprIr::Call { name, args } => JsonExpr::Call { name: name.clone(), args: args.iter().map(expr_to_json).collect() },
        ExprIr::Binary { op, lhs, rhs } => JsonExpr::Binary {
            op: binary_op_name(*op).to_string(),
            lhs: Box::new(expr_to_json(lhs)),
            rhs: Box::new(expr_to_json(rhs)),
        },
        ExprIr::Unary { op, operand } => {
            JsonExpr::Unary { op: unary_op_name(*op).to_string(), operand: Box::new(expr_to_json(operand)) }
        }
    }
}

fn expr_from_json(expr: JsonExpr) -> Result<ExprIr, StoryError> {
    Ok(match expr {
        JsonExpr::Literal { value } => ExprIr::Literal(value),
        JsonExpr::List { items } => {
            ExprIr::ListLiteral(items.into_iter().map(expr_from_json).collect::<Result<_, _>>()?)
        }
        JsonExpr::Variable { name, index } => ExprIr::Variable {
            name,
            index: match index {
                Some(boxed) => Some(Box::new(expr_from_json(*boxed)?)),
                None => None,
            },
        },
        JsonExpr::Call { name, args } => {
            ExprIr::Call { name, args: args.into_iter().map(expr_from_json).collect::<Result<_, _>>()? }
        }
        JsonExpr::Binary { op, lhs, rhs } => ExprIr::Binary {
            op: parse_binary_op(&op)?,
            lhs: Box::new(expr_from_json(*lhs)?),
            rhs: Box::new(expr_from_json(*rhs)?),
        },
        JsonExpr::Unary { op, operand } => {
            ExprIr::Unary { op: parse_unary_op(&op)?, operand: Box::new(expr_from_json(*operand)?) }
        }
    })
}

fn content_to_json(elements: &[ContentElement]) -> Vec<JsonContent> {
    elements.iter().map(content_element_to_json).collect()
}

fn content_element_to_json(element: &ContentElement) -> JsonContent {
    match element {
        ContentElement::Text(s) => JsonContent::Text { value: s.clone() },
        ContentElement::InlineExpr(e) => JsonContent::InlineExpr { expr: expr_to_json(e) },
        ContentElement::InlineConditional { condition, then_branch, else_branch } => JsonContent::InlineConditional {
            condition: expr_to_json(condition),
            then_branch: content_to_json(then_branch),
            else_branch: content_to_json(else_branch),
        },
        ContentElement::Divert { target } => JsonContent::Divert { target: target.clone() },
        ContentElement::TunnelCall { target } => JsonContent::TunnelCall { target: target.clone() },
        ContentElement::TunnelReturn => JsonContent::TunnelReturn,
        ContentElement::ThreadStart { target } => JsonContent::ThreadStart { target: target.clone() },
        ContentElement::Conditional { branches, else_branch } => JsonContent::Conditional {
            branches: branches
                .iter()
                .map(|(cond, body)| JsonBranch { condition: expr_to_json(cond), body: content_to_json(body) })
                .collect(),
            else_branch: else_branch.as_ref().map(|body| content_to_json(body)),
        },
        ContentElement::Assign { name, op, value } => {
            JsonContent::Assign { name: name.clone(), op: assign_op_name(*op).to_string(), value: expr_to_json(value) }
        }
    }
}

fn content_from_json(elements: Vec<JsonContent>) -> Result<Vec<ContentElement>, StoryError> {
    elements.into_iter().map(content_element_from_json).collect()
}

fn content_element_from_json(element: JsonContent) -> Result<ContentElement, StoryError> {
    Ok(match element {
        JsonContent::Text { value } => ContentElement::Text(value),
        JsonContent::InlineExpr { expr } => ContentElement::InlineExpr(expr_from_json(expr)?),
        JsonContent::InlineConditional { condition, then_branch, else_branch } => ContentElement::InlineConditional {
            condition: expr_from_json(condition)?,
            then_branch: content_from_json(then_branch)?,
            else_branch: content_from_json(else_branch)?,
        },
        JsonContent::Divert { target } => ContentElement::Divert { target },
        JsonContent::TunnelCall { target } => ContentElement::TunnelCall { target },
        JsonContent::TunnelReturn => ContentElement::TunnelReturn,
        JsonContent::ThreadStart { target } => ContentElement::ThreadStart { target },
        JsonContent::Conditional { branches, else_branch } => {
            let mut lowered = Vec::with_capacity(branches.len());
            for branch in branches {
                lowered.push((expr_from_json(branch.condition)?, content_from_json(branch.body)?));
            }
            let else_branch = match else_branch {
                Some(body) => Some(content_from_json(body)?),
                None => None,
            };
            ContentElement::Conditional { branches: lowered, else_branch }
        }
        JsonContent::Assign { name, op, value } => {
            ContentElement::Assign { name, op: parse_assign_op(&op)?, value: expr_from_json(value)? }
        }
    })
}

fn choice_to_json(choice: &Choice) -> JsonChoice {
    JsonChoice {
        text: content_to_json(&choice.text),
        condition: choice.condition.as_ref().map(expr_to_json),
        target_passage_id: choice.target_passage_id.clone(),
        action: content_to_json(&choice.action),
        sticky: choice.sticky,
        once: choice.once,
        fallback: choice.fallback,
        tags: choice.tags.clone(),
    }
}

fn choice_from_json(choice: JsonChoice) -> Result<Choice, StoryError> {
    Ok(Choice {
        text: content_from_json(choice.text)?,
        condition: match choice.condition {
            Some(c) => Some(expr_from_json(c)?),
            None => None,
        },
        target_passage_id: choice.target_passage_id,
        action: content_from_json(choice.action)?,
        sticky: choice.sticky,
        once: choice.once,
        fallback: choice.fallback,
        tags: choice.tags,
        span: None,
    })
}

fn passage_to_json(passage: &Passage) -> JsonPassage {
    JsonPassage {
        name: passage.name.clone(),
        tags: passage.tags.clone(),
        content: content_to_json(&passage.content),
        choices: passage.choices.iter().map(choice_to_json).collect(),
        on_enter_script: content_to_json(&passage.on_enter_script),
    }
}

fn passage_from_json(id: String, passage: JsonPassage) -> Result<Passage, StoryError> {
    Ok(Passage {
        id,
        name: passage.name,
        tags: passage.tags,
        content: content_from_json(passage.content)?,
        choices: passage.choices.into_iter().map(choice_from_json).collect::<Result<_, _>>()?,
        on_enter_script: content_from_json(passage.on_enter_script)?,
    })
}

fn story_to_json(story: &Story) -> JsonStory {
    JsonStory {
        format_version: FORMAT_VERSION,
        metadata: story.metadata.clone(),
        start_passage_id: story.start_passage_id.clone(),
        passages: story.passages.iter().map(|(id, p)| (id.clone(), passage_to_json(p))).collect(),
    }
}

fn story_from_json(json: JsonStory) -> Result<Story, StoryError> {
    if !json.passages.contains_key(&json.start_passage_id) {
        return Err(validation(format!("start passage not found: {}", json.start_passage_id)));
    }
    let mut passages = std::collections::HashMap::with_capacity(json.passages.len());
    for (id, passage) in json.passages {
        let lowered = passage_from_json(id.clone(), passage)?;
        passages.insert(id, Rc::new(lowered));
    }
    Ok(Story { metadata: json.metadata, start_passage_id: json.start_passage_id, passages })
}

/// The JSON format front-end (`spec.md` §4.8).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

impl Format for JsonFormat {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extensions(&self) -> &[&'static str] {
        &["json"]
    }

    fn mime_type(&self) -> &'static str {
        "application/json"
    }

    fn can_import(&self, source: &str) -> bool {
        match serde_json::from_str::<serde_json::Value>(source) {
            Ok(serde_json::Value::Object(map)) => map.contains_key("start_passage_id") && map.contains_key("passages"),
            _ => false,
        }
    }

    fn import(&self, source: &str) -> Result<Story, StoryError> {
        let json: JsonStory = serde_json::from_str(source).map_err(|e| validation(format!("malformed story JSON: {e}")))?;
        story_from_json(json)
    }

    fn can_export(&self, _story: &Story) -> bool {
        true
    }

    fn export(&self, story: &Story) -> Result<String, StoryError> {
        serde_json::to_string_pretty(&story_to_json(story)).map_err(|e| validation(format!("failed to serialize story: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use story_compile::lower;

    fn sample_story() -> Story {
        let (script, diagnostics) = story_lang::parse(
            "t.story",
            ":: start [intro]\n  Welcome, {name}.\n  * [go] {true} -> room\n  * -> fallback_end\n:: room\n  ~ seen += 1\n  a room\n:: fallback_end\n  the end\n",
        );
        lower(&script, &diagnostics).unwrap()
    }

    #[test]
    fn can_import_recognizes_well_shaped_json() {
        let format = JsonFormat;
        assert!(format.can_import(r#"{"start_passage_id": "a", "passages": {}}"#));
        assert!(!format.can_import("not json at all"));
        assert!(!format.can_import(r#"{"some_other_key": 1}"#));
    }

    #[test]
    fn export_then_import_round_trips_passage_shape() {
        let format = JsonFormat;
        let story = sample_story();
        let exported = format.export(&story).unwrap();
        let imported = format.import(&exported).unwrap();

        assert_eq!(imported.start_passage_id, story.start_passage_id);
        assert_eq!(imported.passages.len(), story.passages.len());
        for (id, passage) in &story.passages {
            let round_tripped = imported.passages.get(id).expect("passage survives round trip");
            assert_eq!(round_tripped.name, passage.name);
            assert_eq!(round_tripped.tags, passage.tags);
            assert_eq!(round_tripped.choices.len(), passage.choices.len());
            for (a, b) in round_tripped.choices.iter().zip(passage.choices.iter()) {
                assert_eq!(a.sticky, b.sticky);
                assert_eq!(a.once, b.once);
                assert_eq!(a.fallback, b.fallback);
                assert_eq!(a.target_passage_id, b.target_passage_id);
            }
        }
    }

    #[test]
    fn import_rejects_unresolvable_start_passage() {
        let format = JsonFormat;
        let err = format.import(r#"{"format_version":1,"metadata":{},"start_passage_id":"missing","passages":{}}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn import_rejects_malformed_json() {
        let format = JsonFormat;
        let err = format.import("{ this is not valid json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn import_rejects_unknown_operator_codes() {
        let format = JsonFormat;
        let source = r#"{
            "format_version": 1,
            "metadata": {},
            "start_passage_id": "a",
            "passages": {
                "a": {
                    "name": "a",
                    "tags": [],
                    "content": [
                        {"type": "InlineExpr", "expr": {"kind": "Binary", "op": "xor", "lhs": {"kind": "Literal", "value": {"Number": 1.0}}, "rhs": {"kind": "Literal", "value": {"Number": 2.0}}}}
                    ],
                    "choices": [],
                    "on_enter_script": []
                }
            }
        }"#;
        let err = format.import(source).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
