//! External function binding: host-registered callables a script can invoke
//! by name, each tagged with whether it may run during lookahead.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use story_base::{ErrorKind, StoryError};
use story_compile::{CallContext, FunctionRegistry, Value};

use crate::state::State;

type Callable = Rc<dyn Fn(&[Value]) -> Result<Value, StoryError>>;

struct BoundFunction {
    callable: Callable,
    lookahead_safe: bool,
}

/// The registry a `Runtime` hands to the evaluator: built-in `visited`/
/// `visit_count` plus whatever the host has bound with [`Functions::bind`].
#[derive(Clone)]
pub struct Functions {
    state: State,
    bound: Rc<RefCell<HashMap<String, BoundFunction>>>,
}

impl Functions {
    pub fn new(state: State) -> Self {
        Self { state, bound: Rc::new(RefCell::new(HashMap::new())) }
    }

    /// Binds `name` to `callable`. `lookahead_safe` must be `true` for a
    /// function with no visible side effects and a deterministic result —
    /// only such functions may run while the runtime is speculatively
    /// evaluating a choice's condition to decide visibility.
    pub fn bind(
        &self,
        name: impl Into<String>,
        lookahead_safe: bool,
        callable: impl Fn(&[Value]) -> Result<Value, StoryError> + 'static,
    ) {
        self.bound.borrow_mut().insert(name.into(), BoundFunction { callable: Rc::new(callable), lookahead_safe });
    }

    fn expect_one_string_arg(name: &str, args: &[Value]) -> Result<String, StoryError> {
        match args {
            [Value::String(s)] => Ok(s.clone()),
            _ => Err(StoryError::without_span(
                ErrorKind::TypeError,
                format!("{name} expects a single string argument"),
            )),
        }
    }
}

impl FunctionRegistry for Functions {
    fn call(&self, name: &str, args: &[Value], context: CallContext) -> Result<Value, StoryError> {
        match name {
            "visited" => {
                let passage_id = Self::expect_one_string_arg("visited", args)?;
                Ok(Value::Bool(self.state.visited(&passage_id)))
            }
            "visit_count" => {
                let passage_id = Self::expect_one_string_arg("visit_count", args)?;
                Ok(Value::Number(self.state.visit_count(&passage_id) as f64))
            }
            _ => {
                let bound = self.bound.borrow();
                match bound.get(name) {
                    Some(f) => {
                        if context == CallContext::Lookahead && !f.lookahead_safe {
                            // `spec.md` §4.7: a disallowed call during lookahead makes the
                            // enclosing condition evaluate to false rather than erroring.
                            return Ok(Value::Bool(false));
                        }
                        (f.callable)(args)
                    }
                    None => Err(StoryError::without_span(ErrorKind::NotFound, format!("unknown function '{name}'"))),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visited_reflects_visit_count() {
        let state = State::new();
        let functions = Functions::new(state.clone());
        assert_eq!(
            functions.call("visited", &[Value::String("cave".into())], CallContext::Normal).unwrap(),
            Value::Bool(false)
        );
        state.record_visit("cave");
        assert_eq!(
            functions.call("visited", &[Value::String("cave".into())], CallContext::Normal).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            functions.call("visit_count", &[Value::String("cave".into())], CallContext::Normal).unwrap(),
            Value::Number(1.0)
        );
    }

    #[test]
    fn unbound_function_is_not_found() {
        let functions = Functions::new(State::new());
        let err = functions.call("mystery", &[], CallContext::Normal).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn lookahead_unsafe_function_evaluates_false_during_lookahead() {
        let functions = Functions::new(State::new());
        functions.bind("has_saved_game", false, |_| Ok(Value::Bool(true)));
        assert_eq!(functions.call("has_saved_game", &[], CallContext::Normal).unwrap(), Value::Bool(true));
        assert_eq!(functions.call("has_saved_game", &[], CallContext::Lookahead).unwrap(), Value::Bool(false));
    }

    #[test]
    fn lookahead_safe_function_still_runs_during_lookahead() {
        let functions = Functions::new(State::new());
        functions.bind("is_weekend", true, |_| Ok(Value::Bool(true)));
        assert_eq!(functions.call("is_weekend", &[], CallContext::Lookahead).unwrap(), Value::Bool(true));
    }
}
