//! The executable intermediate representation a `Script` AST lowers into
//! (`spec.md` §3, §4.5): `Story`, `Passage`, `Choice`, the expression IR, and
//! the dynamically typed `Value` state cells evaluate over.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use story_base::SourceSpan;

/// A dynamically typed runtime value. State, expression results, and
/// snapshot fields are all built from this closed set (`spec.md` §3).
///
/// Serializable so a `State` snapshot round-trips through `story-runtime`'s
/// persistence layer byte-for-byte stable (sorted map keys on the way in).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Number(f64),
    String(String),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Nil,
}

impl Value {
    /// The name used in `type_error` diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Nil => "nil",
        }
    }

    /// Truthiness used by conditionals and short-circuit operators:
    /// `nil` and `false` are falsy, everything else (including `0` and `""`)
    /// is truthy — narrative scripts test presence, not numeric zero.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }
}

/// A lowered expression tree (`spec.md` §4.5 item 5). Distinct from
/// `story_lang::ast::Expr`: diverts/targets have already been separated out,
/// and this tree is what `eval::evaluate` walks, never the surface AST.
#[derive(Debug, Clone)]
pub enum ExprIr {
    Literal(Value),
    ListLiteral(Vec<ExprIr>),
    Variable { name: String, index: Option<Box<ExprIr>> },
    Call { name: String, args: Vec<ExprIr> },
    Binary { op: BinaryOp, lhs: Box<ExprIr>, rhs: Box<ExprIr> },
    Unary { op: UnaryOp, operand: Box<ExprIr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// One piece of a passage's ordered content sequence (`spec.md` §3's
/// `Passage.content`).
#[derive(Debug, Clone)]
pub enum ContentElement {
    Text(String),
    InlineExpr(ExprIr),
    InlineConditional {
        condition: ExprIr,
        then_branch: Vec<ContentElement>,
        else_branch: Vec<ContentElement>,
    },
    Divert {
        target: String,
    },
    TunnelCall {
        target: String,
    },
    TunnelReturn,
    ThreadStart {
        target: String,
    },
    Conditional {
        branches: Vec<(ExprIr, Vec<ContentElement>)>,
        else_branch: Option<Vec<ContentElement>>,
    },
    /// An assignment executed inline as content is walked (used for
    /// `on_enter_script`, which is a `Vec<Assignment>` run before content).
    Assign {
        name: String,
        op: AssignOp,
        value: ExprIr,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
}

/// A choice entity attached to a passage (`spec.md` §3's `Choice`).
#[derive(Debug, Clone)]
pub struct Choice {
    pub text: Vec<ContentElement>,
    pub condition: Option<ExprIr>,
    pub target_passage_id: Option<String>,
    pub action: Vec<ContentElement>,
    pub sticky: bool,
    pub once: bool,
    pub fallback: bool,
    pub tags: Vec<String>,
    pub span: Option<SourceSpan>,
}

/// A named unit of narrative content (`spec.md` §3).
#[derive(Debug, Clone)]
pub struct Passage {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub content: Vec<ContentElement>,
    pub choices: Vec<Choice>,
    pub on_enter_script: Vec<ContentElement>,
}

/// The executable story graph an emitter or format front-end produces
/// (`spec.md` §3). Wrapped in `Rc` by callers so multiple runtimes may share
/// one `Story` without cloning passage content.
#[derive(Debug, Clone)]
pub struct Story {
    pub metadata: BTreeMap<String, Value>,
    pub start_passage_id: String,
    pub passages: HashMap<String, Rc<Passage>>,
}

impl Story {
    pub fn passage(&self, id: &str) -> Option<&Rc<Passage>> {
        self.passages.get(id)
    }
}
