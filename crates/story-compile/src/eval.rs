//! Pure, side-effect-free expression evaluation (`spec.md` §4.6).
//!
//! `evaluate` never mutates anything it is given: a `StateView` is read-only,
//! and a `FunctionRegistry` call is the only way evaluation can have an
//! externally visible effect (and then only if the implementer's registered
//! function itself has one — the evaluator does not know or care).

use story_base::{ErrorKind, StoryError};

use crate::ir::{BinaryOp, ExprIr, UnaryOp, Value};

/// Read-only view of runtime state an expression may reference. A variable
/// with no entry evaluates to `Value::Nil`, never an error — scripts
/// routinely test variables before any assignment has run.
pub trait StateView {
    fn get(&self, name: &str) -> Value;
}

/// Where a bound external function may be called from (`spec.md` §4.7's
/// "External functions" paragraph). During lookahead — evaluating a
/// choice's condition to decide visibility, before the choice is actually
/// taken — only functions marked `lookahead_safe` may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallContext {
    Normal,
    Lookahead,
}

/// Dispatches a named function call to a bound implementation. Unknown
/// names fail with `ErrorKind::NotFound` (`spec.md` §4.6).
pub trait FunctionRegistry {
    fn call(&self, name: &str, args: &[Value], context: CallContext) -> Result<Value, StoryError>;
}

/// A function registry with no bound functions — every call fails with
/// `not_found`. Used when lowering constant metadata expressions, which must
/// not reference runtime functions.
pub struct NoFunctions;

impl FunctionRegistry for NoFunctions {
    fn call(&self, name: &str, _args: &[Value], _context: CallContext) -> Result<Value, StoryError> {
        Err(StoryError::without_span(
            ErrorKind::NotFound,
            format!("unknown function '{name}'"),
        ))
    }
}

/// A state view with no variables — every lookup evaluates to `Nil`. Used
/// alongside [`NoFunctions`] for constant-folding metadata expressions.
pub struct EmptyState;

impl StateView for EmptyState {
    fn get(&self, _name: &str) -> Value {
        Value::Nil
    }
}

/// Evaluates `expr` against `state`, dispatching calls through `functions`.
/// Referentially transparent over an unchanged state (`spec.md` §8).
pub fn evaluate(
    expr: &ExprIr,
    state: &dyn StateView,
    functions: &dyn FunctionRegistry,
    context: CallContext,
) -> Result<Value, StoryError> {
    match expr {
        ExprIr::Literal(v) => Ok(v.clone()),
        ExprIr::ListLiteral(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(evaluate(item, state, functions, context)?);
            }
            Ok(Value::List(values))
        }
        ExprIr::Variable { name, index } => {
            let base = state.get(name);
            match index {
                None => Ok(base),
                Some(index_expr) => {
                    let index_value = evaluate(index_expr, state, functions, context)?;
                    index_into(&base, &index_value)
                }
            }
        }
        ExprIr::Call { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate(arg, state, functions, context)?);
            }
            functions.call(name, &values, context)
        }
        ExprIr::Unary { op, operand } => {
            let value = evaluate(operand, state, functions, context)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                UnaryOp::Neg => match value {
                    Value::Number(n) => Ok(Value::Number(-n)),
                    other => Err(type_error(format!("cannot negate a {}", other.type_name()))),
                },
            }
        }
        ExprIr::Binary { op, lhs, rhs } => evaluate_binary(*op, lhs, rhs, state, functions, context),
    }
}

fn evaluate_binary(
    op: BinaryOp,
    lhs: &ExprIr,
    rhs: &ExprIr,
    state: &dyn StateView,
    functions: &dyn FunctionRegistry,
    context: CallContext,
) -> Result<Value, StoryError> {
    match op {
        BinaryOp::And => {
            let l = evaluate(lhs, state, functions, context)?;
            if !l.is_truthy() {
                return Ok(Value::Bool(false));
            }
            let r = evaluate(rhs, state, functions, context)?;
            Ok(Value::Bool(r.is_truthy()))
        }
        BinaryOp::Or => {
            let l = evaluate(lhs, state, functions, context)?;
            if l.is_truthy() {
                return Ok(Value::Bool(true));
            }
            let r = evaluate(rhs, state, functions, context)?;
            Ok(Value::Bool(r.is_truthy()))
        }
        _ => {
            let l = evaluate(lhs, state, functions, context)?;
            let r = evaluate(rhs, state, functions, context)?;
            evaluate_binary_values(op, l, r)
        }
    }
}

fn evaluate_binary_values(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, StoryError> {
    use BinaryOp::*;
    match op {
        Add => match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
            (a, b) => Err(type_error(format!("cannot add {} and {}", a.type_name(), b.type_name()))),
        },
        Sub => numeric(lhs, rhs, |a, b| Ok(Value::Number(a - b))),
        Mul => numeric(lhs, rhs, |a, b| Ok(Value::Number(a * b))),
        Div => numeric(lhs, rhs, |a, b| {
            if b == 0.0 {
                Err(domain_error("division by zero"))
            } else {
                Ok(Value::Number(a / b))
            }
        }),
        Mod => numeric(lhs, rhs, |a, b| {
            if b == 0.0 {
                Err(domain_error("modulo by zero"))
            } else {
                Ok(Value::Number(a % b))
            }
        }),
        Eq => Ok(Value::Bool(lhs == rhs)),
        NotEq => Ok(Value::Bool(lhs != rhs)),
        Lt => ordering(lhs, rhs, |a, b| a < b),
        Gt => ordering(lhs, rhs, |a, b| a > b),
        Le => ordering(lhs, rhs, |a, b| a <= b),
        Ge => ordering(lhs, rhs, |a, b| a >= b),
        And | Or => unreachable!("short-circuit operators handled in evaluate_binary"),
    }
}

fn numeric(lhs: Value, rhs: Value, f: impl FnOnce(f64, f64) -> Result<Value, StoryError>) -> Result<Value, StoryError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => f(a, b),
        (a, b) => Err(type_error(format!(
            "expected numbers, found {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// Ordering comparisons between incompatible types are not an error — they
/// evaluate to `false`, so authored conditions stay robust to mixed-type
/// mistakes instead of aborting a whole passage (`spec.md` §4.6).
fn ordering(lhs: Value, rhs: Value, f: impl FnOnce(f64, f64) -> bool) -> Result<Value, StoryError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(f(a, b))),
        _ => Ok(Value::Bool(false)),
    }
}

/// Indexing a list out of range evaluates to `Nil` rather than failing,
/// matching the evaluator's robustness stance on comparisons; indexing a
/// non-list is a `type_error`.
fn index_into(base: &Value, index: &Value) -> Result<Value, StoryError> {
    match (base, index) {
        (Value::List(items), Value::Number(n)) => {
            if *n < 0.0 {
                return Ok(Value::Nil);
            }
            Ok(items.get(*n as usize).cloned().unwrap_or(Value::Nil))
        }
        (Value::Map(map), Value::String(key)) => Ok(map.get(key).cloned().unwrap_or(Value::Nil)),
        (other, _) => Err(type_error(format!("cannot index a {}", other.type_name()))),
    }
}

fn type_error(message: impl Into<String>) -> StoryError {
    StoryError::without_span(ErrorKind::TypeError, message.into())
}

fn domain_error(message: impl Into<String>) -> StoryError {
    StoryError::without_span(ErrorKind::DomainError, message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapState(HashMap<String, Value>);
    impl StateView for MapState {
        fn get(&self, name: &str) -> Value {
            self.0.get(name).cloned().unwrap_or(Value::Nil)
        }
    }

    fn num(n: f64) -> ExprIr {
        ExprIr::Literal(Value::Number(n))
    }

    #[test]
    fn addition_of_numbers() {
        let expr = ExprIr::Binary { op: BinaryOp::Add, lhs: Box::new(num(1.0)), rhs: Box::new(num(2.0)) };
        let result = evaluate(&expr, &EmptyState, &NoFunctions, CallContext::Normal).unwrap();
        assert_eq!(result, Value::Number(3.0));
    }

    #[test]
    fn string_concatenation_via_plus() {
        let expr = ExprIr::Binary {
            op: BinaryOp::Add,
            lhs: Box::new(ExprIr::Literal(Value::String("a".into()))),
            rhs: Box::new(ExprIr::Literal(Value::String("b".into()))),
        };
        let result = evaluate(&expr, &EmptyState, &NoFunctions, CallContext::Normal).unwrap();
        assert_eq!(result, Value::String("ab".into()));
    }

    #[test]
    fn mixed_type_addition_is_a_type_error() {
        let expr = ExprIr::Binary {
            op: BinaryOp::Add,
            lhs: Box::new(ExprIr::Literal(Value::String("a".into()))),
            rhs: Box::new(num(1.0)),
        };
        let err = evaluate(&expr, &EmptyState, &NoFunctions, CallContext::Normal).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeError);
    }

    #[test]
    fn division_by_zero_is_a_domain_error() {
        let expr = ExprIr::Binary { op: BinaryOp::Div, lhs: Box::new(num(1.0)), rhs: Box::new(num(0.0)) };
        let err = evaluate(&expr, &EmptyState, &NoFunctions, CallContext::Normal).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DomainError);
    }

    #[test]
    fn incompatible_comparison_is_false_not_an_error() {
        let expr = ExprIr::Binary {
            op: BinaryOp::Lt,
            lhs: Box::new(ExprIr::Literal(Value::String("a".into()))),
            rhs: Box::new(num(1.0)),
        };
        let result = evaluate(&expr, &EmptyState, &NoFunctions, CallContext::Normal).unwrap();
        assert_eq!(result, Value::Bool(false));
    }

    #[test]
    fn and_short_circuits_without_evaluating_rhs() {
        let expr = ExprIr::Binary {
            op: BinaryOp::And,
            lhs: Box::new(ExprIr::Literal(Value::Bool(false))),
            rhs: Box::new(ExprIr::Call { name: "boom".into(), args: vec![] }),
        };
        let result = evaluate(&expr, &EmptyState, &NoFunctions, CallContext::Normal).unwrap();
        assert_eq!(result, Value::Bool(false));
    }

    #[test]
    fn or_short_circuits_without_evaluating_rhs() {
        let expr = ExprIr::Binary {
            op: BinaryOp::Or,
            lhs: Box::new(ExprIr::Literal(Value::Bool(true))),
            rhs: Box::new(ExprIr::Call { name: "boom".into(), args: vec![] }),
        };
        let result = evaluate(&expr, &EmptyState, &NoFunctions, CallContext::Normal).unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn unknown_function_is_not_found() {
        let expr = ExprIr::Call { name: "mystery".into(), args: vec![] };
        let err = evaluate(&expr, &EmptyState, &NoFunctions, CallContext::Normal).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn variable_lookup_reads_through_state_view() {
        let mut vars = HashMap::new();
        vars.insert("score".to_string(), Value::Number(42.0));
        let state = MapState(vars);
        let expr = ExprIr::Variable { name: "score".into(), index: None };
        let result = evaluate(&expr, &state, &NoFunctions, CallContext::Normal).unwrap();
        assert_eq!(result, Value::Number(42.0));
    }

    #[test]
    fn missing_variable_evaluates_to_nil() {
        let expr = ExprIr::Variable { name: "ghost".into(), index: None };
        let result = evaluate(&expr, &EmptyState, &NoFunctions, CallContext::Normal).unwrap();
        assert_eq!(result, Value::Nil);
    }

    #[test]
    fn out_of_range_list_index_is_nil() {
        let expr = ExprIr::Variable {
            name: "xs".into(),
            index: Some(Box::new(num(5.0))),
        };
        let mut vars = HashMap::new();
        vars.insert("xs".to_string(), Value::List(vec![Value::Number(1.0)]));
        let state = MapState(vars);
        let result = evaluate(&expr, &state, &NoFunctions, CallContext::Normal).unwrap();
        assert_eq!(result, Value::Nil);
    }

    #[test]
    fn referential_transparency_over_unchanged_state() {
        let expr = ExprIr::Binary { op: BinaryOp::Mul, lhs: Box::new(num(3.0)), rhs: Box::new(num(4.0)) };
        let a = evaluate(&expr, &EmptyState, &NoFunctions, CallContext::Normal).unwrap();
        let b = evaluate(&expr, &EmptyState, &NoFunctions, CallContext::Normal).unwrap();
        assert_eq!(a, b);
    }
}
