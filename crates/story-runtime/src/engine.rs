//! Steps a compiled [`Story`] through its passages (`spec.md` §4.7).
//!
//! ```text
//! Story (story_compile::ir)
//!      │
//!      ▼
//! ┌───────────────┐   load/start/continue/make_choice
//! │ Runtime       │ <───────────────────────────────── host
//! └──────┬────────┘
//!        │ emits via EventBus, reads/writes via State
//!        ▼
//!   passage:entered, choices:available, variable:changed, story:ended, ...
//! ```
//!
//! Diverts and tunnel calls/returns are invisible to the host: `continue()`
//! keeps walking through as many of them as it takes to reach a genuine
//! suspension point (choices become available, or the story ends). Only
//! `make_choice` stops as soon as the new passage has been entered, matching
//! the ordering guarantee in `spec.md` §5.

use std::collections::{BTreeSet, HashSet};
use std::rc::Rc;

use story_base::{ErrorKind, StoryError};
use story_compile::{evaluate, AssignOp, BinaryOp, CallContext, ContentElement, ExprIr, Story, Value};
use story_kernel::{EventBus, Subscription};

use crate::functions::Functions;
use crate::snapshot::{Snapshot, TunnelFrame};
use crate::state::State;

/// The runtime's named state-machine position (`spec.md` §4.7's transition
/// table). `Started` has no resting point of its own in that table — `start()`
/// lands directly in `InPassage` — it is kept here only for parity with the
/// spec's named state list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Unloaded,
    Loaded,
    Started,
    InPassage,
    AwaitingChoice,
    Ended,
}

/// Tunable limits a host may adjust before calling [`Runtime::start`].
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Bounds the tunnel call stack so a cyclic tunnel cannot grow it
    /// without limit (`spec.md` §4.7's "bounded by a configured maximum
    /// depth").
    pub max_tunnel_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { max_tunnel_depth: 64 }
    }
}

/// A choice as shown to the host: its rendered text and tags, in display
/// order, 1-indexed to match `make_choice`.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleChoice {
    pub index: usize,
    pub text: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
struct ResolvedChoice {
    origin_passage_id: String,
    choice_index: usize,
    visible: VisibleChoice,
}

struct Frame {
    content: Vec<ContentElement>,
    index: usize,
}

enum AfterContent {
    Presented,
    Ended,
    AutoFallback,
}

/// Steps one compiled [`Story`] forward. Cheap to construct; the expensive
/// part (parsing and lowering) already happened to produce the `Story`.
pub struct Runtime {
    story: Rc<Story>,
    state: State,
    functions: Functions,
    bus: EventBus,
    config: RuntimeConfig,
    runtime_state: RuntimeState,
    current_passage_id: String,
    content_frames: Vec<Frame>,
    tunnel_stack: Vec<TunnelFrame>,
    consumed_onces: HashSet<String>,
    alive_flows: BTreeSet<String>,
    visible_choices: Vec<ResolvedChoice>,
    pending_gathered_choices: Vec<(String, usize)>,
    continue_buffer: String,
    /// Re-publishes every `State` mutation as `variable:changed` on `bus`,
    /// so a host subscribed only to `bus` (not to `State::observe`
    /// directly) still sees the canonical event named in `spec.md` §6.3.
    /// Held only to keep the subscription alive for `self`'s lifetime.
    _variable_bridge: Subscription,
}

impl Runtime {
    /// `Unloaded -> Loaded`. Emits `story:loaded`.
    pub fn load(story: Rc<Story>) -> Self {
        Self::load_with_config(story, RuntimeConfig::default())
    }

    pub fn load_with_config(story: Rc<Story>, config: RuntimeConfig) -> Self {
        let state = State::new();
        let functions = Functions::new(state.clone());
        let bus = EventBus::new();
        bus.emit("story:loaded", &story.start_passage_id.clone());
        let forward_bus = bus.clone();
        let variable_bridge = state.observe("*", 0, move |_, changed| {
            forward_bus.emit("variable:changed", changed);
        });
        Self {
            story,
            state,
            functions,
            bus,
            config,
            runtime_state: RuntimeState::Loaded,
            current_passage_id: String::new(),
            content_frames: Vec::new(),
            tunnel_stack: Vec::new(),
            consumed_onces: HashSet::new(),
            alive_flows: BTreeSet::from(["main".to_string()]),
            visible_choices: Vec::new(),
            pending_gathered_choices: Vec::new(),
            continue_buffer: String::new(),
            _variable_bridge: variable_bridge,
        }
    }

    pub fn runtime_state(&self) -> RuntimeState {
        self.runtime_state
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn functions(&self) -> &Functions {
        &self.functions
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn current_passage_id(&self) -> &str {
        &self.current_passage_id
    }

    /// `Loaded -> InPassage`. Runs the start passage's `on_enter_script` and
    /// emits `passage:entered`.
    pub fn start(&mut self) -> Result<(), StoryError> {
        let start_id = self.story.start_passage_id.clone();
        self.start_at(&start_id)
    }

    /// Like [`Runtime::start`], but enters `knot` instead of the story's
    /// default `start_passage_id` (`spec.md` §6.2's `start(knot?)`).
    pub fn start_at(&mut self, knot: &str) -> Result<(), StoryError> {
        if self.runtime_state != RuntimeState::Loaded {
            return Err(StoryError::without_span(ErrorKind::InvalidState, "start() requires the Loaded state"));
        }
        self.runtime_state = RuntimeState::InPassage;
        self.bus.emit("story:started", &knot.to_string());
        self.enter_passage(knot)
    }

    /// Jumps directly to `path`, bypassing any pending diverts, tunnels, or
    /// presented choices — `spec.md` §6.2's `go_to_path(path,
    /// reset_callstack?)`. Valid from any state but `Unloaded`.
    /// `reset_callstack` additionally clears the tunnel call stack; leaving
    /// it unset preserves in-flight tunnel returns so a jump mid-tunnel can
    /// still `->->` back to its caller.
    pub fn go_to_path(&mut self, path: &str, reset_callstack: bool) -> Result<(), StoryError> {
        if self.runtime_state == RuntimeState::Unloaded {
            return Err(StoryError::without_span(ErrorKind::InvalidState, "go_to_path() requires a loaded story"));
        }
        if !self.story.passages.contains_key(path) {
            return Err(StoryError::without_span(ErrorKind::NotFound, format!("no such passage: {path}")));
        }
        if reset_callstack {
            self.tunnel_stack.clear();
        }
        self.visible_choices.clear();
        self.pending_gathered_choices.clear();
        self.runtime_state = RuntimeState::InPassage;
        self.enter_passage(path)
    }

    /// Returns the runtime to its state immediately after [`Runtime::load`]:
    /// variables and visit counts cleared, tunnel stack and consumed-once
    /// marks dropped, position back at `Loaded`.
    pub fn reset(&mut self) -> Result<(), StoryError> {
        self.state.restore(Default::default(), Default::default());
        self.tunnel_stack.clear();
        self.consumed_onces.clear();
        self.content_frames.clear();
        self.visible_choices.clear();
        self.pending_gathered_choices.clear();
        self.continue_buffer.clear();
        self.current_passage_id.clear();
        self.alive_flows = BTreeSet::from(["main".to_string()]);
        self.runtime_state = RuntimeState::Loaded;
        self.bus.emit("story:reset", &());
        Ok(())
    }

    /// Pulls text from `InPassage`, walking through diverts and tunnel
    /// calls/returns invisibly, until choices become available or the story
    /// ends. Returns the accumulated text and the entered passage's tags.
    pub fn continue_story(&mut self) -> Result<(String, Vec<String>), StoryError> {
        if self.runtime_state != RuntimeState::InPassage {
            return Err(StoryError::without_span(ErrorKind::InvalidState, "continue() requires the InPassage state"));
        }
        self.bus.emit("story:continued", &self.current_passage_id.clone());
        self.drain_frames(false)?;
        let text = std::mem::take(&mut self.continue_buffer);
        let tags = self.story.passage(&self.current_passage_id).map(|p| p.tags.clone()).unwrap_or_default();
        Ok((text, tags))
    }

    /// The choices presented for the current pause point, in display order.
    pub fn visible_choices(&self) -> Vec<VisibleChoice> {
        self.visible_choices.iter().map(|c| c.visible.clone()).collect()
    }

    /// `AwaitingChoice -> InPassage`. `index` is 1-based, matching
    /// [`Runtime::visible_choices`]'s ordering.
    pub fn make_choice(&mut self, index: usize) -> Result<(), StoryError> {
        if self.runtime_state != RuntimeState::AwaitingChoice {
            return Err(StoryError::without_span(ErrorKind::InvalidState, "make_choice() requires the AwaitingChoice state"));
        }
        let resolved = index
            .checked_sub(1)
            .and_then(|i| self.visible_choices.get(i))
            .cloned()
            .ok_or_else(|| StoryError::without_span(ErrorKind::NotFound, format!("no such choice: {index}")))?;
        self.take_choice(&resolved.origin_passage_id, resolved.choice_index, false)
    }

    pub fn save_state(&self) -> Snapshot {
        Snapshot {
            format_version: crate::snapshot::FORMAT_VERSION,
            story_id: self.story_id(),
            state_snapshot: self.state.variables_sorted(),
            visit_counts: self.state.visit_counts_sorted(),
            current_passage_id: self.current_passage_id.clone(),
            current_index: self.content_frames.first().map(|f| f.index).unwrap_or(0),
            tunnel_stack: self.tunnel_stack.clone(),
            consumed_onces: self.consumed_onces.iter().cloned().collect(),
            alive_flows: self.alive_flows.clone(),
            continue_buffer: self.continue_buffer.clone(),
        }
    }

    /// Restores a previously saved snapshot. Validates `format_version` and
    /// `story_id` and resolves `current_passage_id` against this runtime's
    /// story before mutating anything, so a rejected snapshot leaves the
    /// runtime exactly as it was (`spec.md` §4.7: "partial failure must leave
    /// the runtime unchanged"). Once accepted, restoration is total: anything
    /// not named in the snapshot (variables, visit counts) is cleared,
    /// matching `spec.md` §6.4's round-trip law. Emits `state:restored`.
    pub fn restore_state(&mut self, snapshot: Snapshot) -> Result<(), StoryError> {
        if snapshot.format_version != crate::snapshot::FORMAT_VERSION {
            return Err(StoryError::without_span(
                ErrorKind::InvalidState,
                format!(
                    "snapshot format_version {} does not match {}",
                    snapshot.format_version,
                    crate::snapshot::FORMAT_VERSION
                ),
            ));
        }
        let expected_story_id = self.story_id();
        if snapshot.story_id != expected_story_id {
            return Err(StoryError::without_span(
                ErrorKind::InvalidState,
                format!("snapshot story_id {:?} does not match loaded story {:?}", snapshot.story_id, expected_story_id),
            ));
        }

        let frame = if snapshot.current_passage_id.is_empty() {
            None
        } else {
            let passage = self.story.passage(&snapshot.current_passage_id).cloned().ok_or_else(|| {
                StoryError::without_span(ErrorKind::NotFound, format!("no such passage: {}", snapshot.current_passage_id))
            })?;
            Some(Frame { content: passage.content.clone(), index: snapshot.current_index })
        };

        self.state.restore(snapshot.state_snapshot, snapshot.visit_counts);
        self.tunnel_stack = snapshot.tunnel_stack;
        self.consumed_onces = snapshot.consumed_onces.into_iter().collect();
        self.alive_flows = snapshot.alive_flows;
        self.continue_buffer = snapshot.continue_buffer;
        self.current_passage_id = snapshot.current_passage_id;
        self.visible_choices.clear();
        self.pending_gathered_choices.clear();

        match frame {
            None => {
                self.content_frames.clear();
                self.runtime_state = RuntimeState::Loaded;
            }
            Some(frame) => {
                self.content_frames = vec![frame];
                self.runtime_state = RuntimeState::InPassage;
            }
        }

        self.bus.emit("state:restored", &self.current_passage_id.clone());
        Ok(())
    }

    fn story_id(&self) -> String {
        match self.story.metadata.get("id").or_else(|| self.story.metadata.get("title")) {
            Some(v) => Self::display(v),
            None => String::new(),
        }
    }

    fn evaluate(&self, expr: &ExprIr, context: CallContext) -> Result<Value, StoryError> {
        evaluate(expr, &self.state, &self.functions, context)
    }

    fn apply_assign(&mut self, name: &str, op: AssignOp, value_expr: &ExprIr) -> Result<(), StoryError> {
        let rhs = self.evaluate(value_expr, CallContext::Normal)?;
        let new_value = match op {
            AssignOp::Assign => rhs,
            AssignOp::AddAssign | AssignOp::SubAssign | AssignOp::MulAssign | AssignOp::DivAssign => {
                let bin_op = match op {
                    AssignOp::AddAssign => BinaryOp::Add,
                    AssignOp::SubAssign => BinaryOp::Sub,
                    AssignOp::MulAssign => BinaryOp::Mul,
                    AssignOp::DivAssign => BinaryOp::Div,
                    AssignOp::Assign => unreachable!(),
                };
                let current = self.state.get(name);
                let combined = ExprIr::Binary {
                    op: bin_op,
                    lhs: Box::new(ExprIr::Literal(current)),
                    rhs: Box::new(ExprIr::Literal(rhs)),
                };
                self.evaluate(&combined, CallContext::Normal)?
            }
        };
        self.state.set(name, new_value)
    }

    fn enter_passage(&mut self, passage_id: &str) -> Result<(), StoryError> {
        let passage = self
            .story
            .passage(passage_id)
            .cloned()
            .ok_or_else(|| StoryError::without_span(ErrorKind::NotFound, format!("no such passage: {passage_id}")))?;
        self.current_passage_id = passage_id.to_string();
        self.state.record_visit(passage_id);
        for element in passage.on_enter_script.clone() {
            if let ContentElement::Assign { name, op, value } = element {
                self.apply_assign(&name, op, &value)?;
            }
        }
        self.content_frames = vec![Frame { content: passage.content.clone(), index: 0 }];
        self.bus.emit("passage:entered", &self.current_passage_id.clone());
        Ok(())
    }

    /// Walks `content_frames`, accumulating text into `continue_buffer` and
    /// following diverts/tunnels/conditionals/thread-starts, until either a
    /// suspension point is reached (choices presented, story ended) or, when
    /// `stop_on_passage_change` is set, the instant a new passage is
    /// entered — used by `make_choice` so its synchronous action body halts
    /// right after `passage:entered`, before any further content is pulled.
    fn drain_frames(&mut self, stop_on_passage_change: bool) -> Result<(), StoryError> {
        loop {
            if self.runtime_state != RuntimeState::InPassage {
                return Ok(());
            }

            let exhausted = match self.content_frames.last() {
                Some(frame) => frame.index >= frame.content.len(),
                None => true,
            };
            if exhausted {
                if self.content_frames.len() > 1 {
                    self.content_frames.pop();
                    continue;
                }
                match self.present_or_end()? {
                    AfterContent::Presented | AfterContent::Ended => return Ok(()),
                    AfterContent::AutoFallback => continue,
                }
            }

            let element = {
                let frame = self.content_frames.last_mut().expect("checked non-empty above");
                let element = frame.content[frame.index].clone();
                frame.index += 1;
                element
            };

            match element {
                ContentElement::Text(s) => self.continue_buffer.push_str(&s),
                ContentElement::InlineExpr(expr) => {
                    let v = self.evaluate(&expr, CallContext::Normal)?;
                    self.continue_buffer.push_str(&Self::display(&v));
                }
                ContentElement::InlineConditional { condition, then_branch, else_branch } => {
                    let cond = self.evaluate(&condition, CallContext::Normal)?;
                    let branch = if cond.is_truthy() { then_branch } else { else_branch };
                    self.content_frames.push(Frame { content: branch, index: 0 });
                }
                ContentElement::Conditional { branches, else_branch } => {
                    let mut taken = None;
                    for (cond, body) in branches {
                        if self.evaluate(&cond, CallContext::Normal)?.is_truthy() {
                            taken = Some(body);
                            break;
                        }
                    }
                    let body = taken.or(else_branch).unwrap_or_default();
                    self.content_frames.push(Frame { content: body, index: 0 });
                }
                ContentElement::Assign { name, op, value } => self.apply_assign(&name, op, &value)?,
                ContentElement::Divert { target } => {
                    self.bus.emit("passage:exited", &self.current_passage_id.clone());
                    self.enter_passage(&target)?;
                    if stop_on_passage_change {
                        return Ok(());
                    }
                }
                ContentElement::TunnelCall { target } => {
                    if self.tunnel_stack.len() >= self.config.max_tunnel_depth {
                        return Err(StoryError::without_span(
                            ErrorKind::InvalidState,
                            "tunnel call stack exceeded its configured maximum depth",
                        ));
                    }
                    let return_index = self.content_frames.last().expect("just consumed an element from it").index;
                    self.tunnel_stack.push(TunnelFrame {
                        return_passage_id: self.current_passage_id.clone(),
                        return_index,
                    });
                    self.enter_passage(&target)?;
                    if stop_on_passage_change {
                        return Ok(());
                    }
                }
                ContentElement::TunnelReturn => {
                    let frame = self.tunnel_stack.pop().ok_or_else(|| {
                        StoryError::without_span(ErrorKind::InvalidState, "tunnel_return with an empty tunnel stack")
                    })?;
                    let passage = self.story.passage(&frame.return_passage_id).cloned().ok_or_else(|| {
                        StoryError::without_span(ErrorKind::NotFound, format!("no such passage: {}", frame.return_passage_id))
                    })?;
                    self.current_passage_id = frame.return_passage_id;
                    self.content_frames = vec![Frame { content: passage.content.clone(), index: frame.return_index }];
                }
                ContentElement::ThreadStart { target } => {
                    let passage = self.story.passage(&target).cloned().ok_or_else(|| {
                        StoryError::without_span(ErrorKind::NotFound, format!("no such passage: {target}"))
                    })?;
                    let mut gathered = passage.on_enter_script.clone();
                    gathered.extend(passage.content.iter().cloned());
                    self.content_frames.push(Frame { content: gathered, index: 0 });
                    for i in 0..passage.choices.len() {
                        self.pending_gathered_choices.push((target.clone(), i));
                    }
                }
            }
        }
    }

    /// Builds the visible choice list for the current passage, auto-taking
    /// a fallback choice if no real (non-fallback) choice survives
    /// filtering, or ending the story if nothing survives at all
    /// (`spec.md` §4.7 items i-iv).
    fn present_or_end(&mut self) -> Result<AfterContent, StoryError> {
        let passage = self
            .story
            .passage(&self.current_passage_id)
            .cloned()
            .expect("current_passage_id always names a passage in this story");

        let mut real = Vec::new();
        let mut fallback = None;
        for (i, choice) in passage.choices.iter().enumerate() {
            if self.choice_is_spent(&self.current_passage_id, i, choice)? {
                continue;
            }
            if choice.fallback {
                if fallback.is_none() {
                    fallback = Some((self.current_passage_id.clone(), i));
                }
                continue;
            }
            let text = self.render_text(&choice.text, CallContext::Normal)?;
            real.push(ResolvedChoice {
                origin_passage_id: self.current_passage_id.clone(),
                choice_index: i,
                visible: VisibleChoice { index: real.len() + 1, text, tags: choice.tags.clone() },
            });
        }

        for (origin, idx) in std::mem::take(&mut self.pending_gathered_choices) {
            let origin_passage = match self.story.passage(&origin) {
                Some(p) => p.clone(),
                None => continue,
            };
            let choice = match origin_passage.choices.get(idx) {
                Some(c) => c,
                None => continue,
            };
            if choice.fallback || self.choice_is_spent(&origin, idx, choice)? {
                continue;
            }
            let text = self.render_text(&choice.text, CallContext::Normal)?;
            real.push(ResolvedChoice {
                origin_passage_id: origin,
                choice_index: idx,
                visible: VisibleChoice { index: real.len() + 1, text, tags: choice.tags.clone() },
            });
        }

        if !real.is_empty() {
            self.visible_choices = real;
            self.runtime_state = RuntimeState::AwaitingChoice;
            let summary = self.visible_choices();
            self.bus.emit("choices:available", &summary);
            return Ok(AfterContent::Presented);
        }

        if let Some((origin, idx)) = fallback {
            self.take_choice(&origin, idx, true)?;
            return Ok(AfterContent::AutoFallback);
        }

        self.bus.emit("passage:exited", &self.current_passage_id.clone());
        self.runtime_state = RuntimeState::Ended;
        self.bus.emit("story:ended", &());
        Ok(AfterContent::Ended)
    }

    fn choice_is_spent(
        &self,
        passage_id: &str,
        choice_index: usize,
        choice: &story_compile::Choice,
    ) -> Result<bool, StoryError> {
        let key = format!("{passage_id}#{choice_index}");
        if choice.once && self.consumed_onces.contains(&key) {
            return Ok(true);
        }
        if let Some(condition) = &choice.condition {
            if !self.evaluate(condition, CallContext::Lookahead)?.is_truthy() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Runs a choice (real or auto-taken fallback): marks it consumed if
    /// `once`, then executes its action body followed by an implicit divert
    /// to its target (if any), stopping at the first passage entered. Does
    /// not emit `passage:exited` itself — the action body always resolves
    /// to a `Divert` (explicit, in the action, or implicitly appended from
    /// `target_passage_id` below), and that divert is the single source of
    /// `passage:exited` for this transition (`spec.md` §5's fixed event
    /// order has exactly one `passage.exited` per `choice.made`).
    fn take_choice(&mut self, origin_passage_id: &str, choice_index: usize, automatic: bool) -> Result<(), StoryError> {
        let passage = self.story.passage(origin_passage_id).cloned().ok_or_else(|| {
            StoryError::without_span(ErrorKind::NotFound, format!("no such passage: {origin_passage_id}"))
        })?;
        let choice = passage
            .choices
            .get(choice_index)
            .cloned()
            .ok_or_else(|| StoryError::without_span(ErrorKind::NotFound, format!("no such choice: {choice_index}")))?;

        self.bus.emit("choice:made", &(choice_index, automatic));
        if choice.once {
            self.consumed_onces.insert(format!("{origin_passage_id}#{choice_index}"));
        }

        let mut body = choice.action.clone();
        if let Some(target) = &choice.target_passage_id {
            body.push(ContentElement::Divert { target: target.clone() });
        }
        self.content_frames = vec![Frame { content: body, index: 0 }];
        self.runtime_state = RuntimeState::InPassage;
        self.visible_choices.clear();

        self.drain_frames(true)
    }

    fn render_text(&self, elements: &[ContentElement], context: CallContext) -> Result<String, StoryError> {
        let mut out = String::new();
        for element in elements {
            match element {
                ContentElement::Text(s) => out.push_str(s),
                ContentElement::InlineExpr(expr) => {
                    let v = self.evaluate(expr, context)?;
                    out.push_str(&Self::display(&v));
                }
                ContentElement::InlineConditional { condition, then_branch, else_branch } => {
                    let cond = self.evaluate(condition, context)?;
                    let branch = if cond.is_truthy() { then_branch } else { else_branch };
                    out.push_str(&self.render_text(branch, context)?);
                }
                other => {
                    return Err(StoryError::without_span(
                        ErrorKind::InvalidState,
                        format!("non-text content element in choice text: {other:?}"),
                    ))
                }
            }
        }
        Ok(out)
    }

    fn display(value: &Value) -> String {
        match value {
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 => format!("{}", *n as i64),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Nil => String::new(),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Self::display).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Map(_) => "[object]".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use story_compile::lower;

    fn runtime(source: &str) -> Runtime {
        let (script, diagnostics) = story_lang::parse("test.story", source);
        let story = lower(&script, &diagnostics).expect("story compiles");
        Runtime::load(Rc::new(story))
    }

    #[test]
    fn minimal_passage_produces_its_text_and_ends() {
        let mut rt = runtime(":: start\n  hello\n");
        rt.start().unwrap();
        let (text, _) = rt.continue_story().unwrap();
        assert_eq!(text, "hello");
        assert_eq!(rt.runtime_state(), RuntimeState::Ended);
    }

    #[test]
    fn choice_diverts_to_its_target() {
        let mut rt = runtime(":: start\n  go\n  * [door] -> end\n:: end\n  done\n");
        rt.start().unwrap();
        rt.continue_story().unwrap();
        assert_eq!(rt.runtime_state(), RuntimeState::AwaitingChoice);
        assert_eq!(rt.visible_choices().len(), 1);
        rt.make_choice(1).unwrap();
        assert_eq!(rt.current_passage_id(), "end");
        let (text, _) = rt.continue_story().unwrap();
        assert_eq!(text, "done");
    }

    #[test]
    fn minus_assign_subtracts_from_the_current_value() {
        let mut rt = runtime(":: start\n  ~ waited = 5\n  ~ waited -= 2\n  left: {waited}\n");
        rt.start().unwrap();
        let (text, _) = rt.continue_story().unwrap();
        assert_eq!(text, "left: 3");
    }

    #[test]
    fn sticky_choice_with_action_only_divert_increments_state() {
        let mut rt = runtime(":: start\n  + [wait]\n    ~ n += 1\n    -> start\n");
        rt.start().unwrap();
        rt.continue_story().unwrap();
        rt.make_choice(1).unwrap();
        assert_eq!(rt.state().get("n"), Value::Number(1.0));
        rt.continue_story().unwrap();
        assert_eq!(rt.visible_choices().len(), 1, "sticky choice remains available");
    }

    #[test]
    fn once_choice_is_not_offered_again() {
        let mut rt = runtime(":: start\n  * [go] -> start\n");
        rt.start().unwrap();
        rt.continue_story().unwrap();
        rt.make_choice(1).unwrap();
        rt.continue_story().unwrap();
        assert_eq!(rt.runtime_state(), RuntimeState::Ended);
    }

    #[test]
    fn fallback_choice_auto_taken_when_no_real_choice_survives() {
        let mut rt = runtime(":: a\n  * [q] {false} -> x\n  * -> y\n:: x\n  nope\n:: y\n  landed\n");
        rt.start().unwrap();
        let (text, _) = rt.continue_story().unwrap();
        assert_eq!(text, "landed");
        assert_eq!(rt.current_passage_id(), "y");
    }

    #[test]
    fn tunnel_call_and_return_produce_text_from_both_passages() {
        let mut rt = runtime(":: a\n  ->-> b\n  tail\n:: b\n  middle\n  ->->\n");
        rt.start().unwrap();
        let (text, _) = rt.continue_story().unwrap();
        assert_eq!(text, "middletail");
        assert_eq!(rt.runtime_state(), RuntimeState::Ended);
    }

    #[test]
    fn tunnel_return_with_empty_stack_is_invalid_state() {
        let mut rt = runtime(":: a\n  ->->\n");
        rt.start().unwrap();
        let err = rt.continue_story().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn save_and_restore_round_trips_variables_and_position() {
        let mut rt = runtime(":: a\n  ~ n = 1\n  * [go] -> b\n:: b\n  bye\n");
        rt.start().unwrap();
        rt.continue_story().unwrap();
        let snapshot = rt.save_state();

        let mut fresh = runtime(":: a\n  ~ n = 1\n  * [go] -> b\n:: b\n  bye\n");
        fresh.start().unwrap();
        fresh.restore_state(snapshot).unwrap();
        assert_eq!(fresh.state().get("n"), Value::Number(1.0));
        assert_eq!(fresh.visible_choices().len(), 0);
        assert_eq!(fresh.runtime_state(), RuntimeState::InPassage);
        fresh.continue_story().unwrap();
        assert_eq!(fresh.visible_choices().len(), 1);
    }

    #[test]
    fn restore_rejects_snapshot_from_a_different_story_without_mutating() {
        let mut rt = runtime("@@ id: \"story-a\"\n:: a\n  ~ n = 1\n  hi\n");
        rt.start().unwrap();
        let snapshot = rt.save_state();

        let mut other = runtime("@@ id: \"story-b\"\n:: a\n  ~ n = 9\n  hi\n");
        other.start().unwrap();
        let err = other.restore_state(snapshot).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        // Rejected restore must leave the runtime exactly as it was.
        assert_eq!(other.state().get("n"), Value::Number(9.0));
    }

    #[test]
    fn restore_rejects_mismatched_format_version() {
        let mut rt = runtime(":: a\n  hi\n");
        rt.start().unwrap();
        let mut snapshot = rt.save_state();
        snapshot.format_version += 1;
        let err = rt.restore_state(snapshot).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn reset_clears_state_and_returns_to_loaded() {
        let mut rt = runtime(":: a\n  ~ n = 1\n  hi\n");
        rt.start().unwrap();
        rt.continue_story().unwrap();
        rt.reset().unwrap();
        assert_eq!(rt.runtime_state(), RuntimeState::Loaded);
        assert_eq!(rt.state().get("n"), Value::Nil);
    }

    #[test]
    fn interpolated_text_renders_the_current_variable_value() {
        let mut rt = runtime(":: a\n  ~ n = 3\n  count: {n}\n");
        rt.start().unwrap();
        let (text, _) = rt.continue_story().unwrap();
        assert_eq!(text, "count: 3");
    }

    #[test]
    fn make_choice_outside_awaiting_choice_is_invalid_state() {
        let mut rt = runtime(":: a\n  hi\n");
        rt.start().unwrap();
        let err = rt.make_choice(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn unknown_divert_target_is_not_found() {
        let mut rt = runtime(":: a\n  -> nowhere\n");
        rt.start().unwrap();
        let err = rt.continue_story().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn start_at_enters_the_named_knot_instead_of_the_default_start() {
        let mut rt = runtime(":: a\n  first\n:: b\n  second\n");
        rt.start_at("b").unwrap();
        assert_eq!(rt.current_passage_id(), "b");
        let (text, _) = rt.continue_story().unwrap();
        assert_eq!(text, "second");
    }

    #[test]
    fn go_to_path_jumps_mid_story_and_can_reset_the_tunnel_stack() {
        let mut rt = runtime(":: a\n  ->-> b\n  tail\n:: b\n  middle\n  ->->\n:: c\n  elsewhere\n");
        rt.start().unwrap();
        // Jump away while a tunnel frame is still pending; without resetting
        // the call stack it remains non-empty.
        rt.go_to_path("c", false).unwrap();
        assert_eq!(rt.current_passage_id(), "c");
        let (text, _) = rt.continue_story().unwrap();
        assert_eq!(text, "elsewhere");
    }

    #[test]
    fn go_to_path_rejects_an_unknown_passage() {
        let mut rt = runtime(":: a\n  hi\n");
        rt.start().unwrap();
        let err = rt.go_to_path("nowhere", false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
