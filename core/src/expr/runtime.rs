use super::ast::ExprDebug;
use crate::{
    service::Services,
    value::{Value, Variables},
};
use std::{fmt::Write, sync::Arc};

/// Pending control flow.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    pub return_requested: bool,
    pub break_requested: bool,
    pub continue_requested: bool,
}

/// A debug node being evaluated and its receiver.
#[derive(Debug)]
pub struct Frame<'a> {
    pub node: &'a ExprDebug,
    pub this: Value,
}

/// State of a single evaluation.
///
/// Created for each call and discarded when it returns,
/// so nothing in here is ever shared between threads.
#[derive(Debug)]
pub struct Runtime<'a> {
    root: Value,
    variables: Arc<Variables>,
    slots: Vec<Value>,
    flags: Flags,

    /// Allocated on the first debug frame.
    stack: Option<Vec<Frame<'a>>>,
    services: Services,
}

impl<'a> Runtime<'a> {
    /// Slots whose name is an external variable start with its value,
    /// the others start as `null`.
    pub fn new(
        root: Value,
        variables: Arc<Variables>,
        slot_names: &[String],
        services: Services,
    ) -> Self {
        let slots = slot_names
            .iter()
            .map(|name| variables.get(name).cloned().unwrap_or_default())
            .collect();

        Self::with_slots(root, variables, slots, services)
    }

    /// Runtime over existing slot values.
    pub fn with_slots(
        root: Value,
        variables: Arc<Variables>,
        slots: Vec<Value>,
        services: Services,
    ) -> Self {
        Self {
            root,
            variables,
            slots,
            flags: Flags::default(),
            stack: None,
            services,
        }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn variables(&self) -> &Arc<Variables> {
        &self.variables
    }

    /// External variable.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn slots(&self) -> &[Value] {
        &self.slots
    }

    /// `null` for slots outside of the unit.
    pub fn slot(&self, idx: usize) -> Value {
        self.slots.get(idx).cloned().unwrap_or_default()
    }

    pub fn set_slot(&mut self, idx: usize, value: Value) {
        if idx >= self.slots.len() {
            self.slots.resize(idx + 1, Value::Null);
        }
        self.slots[idx] = value;
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn request_return(&mut self) {
        self.flags.return_requested = true;
    }

    pub fn request_break(&mut self) {
        self.flags.break_requested = true;
    }

    pub fn request_continue(&mut self) {
        self.flags.continue_requested = true;
    }

    /// If any control flow is pending.
    pub fn is_stop_requested(&self) -> bool {
        self.flags.return_requested || self.flags.break_requested || self.flags.continue_requested
    }

    pub fn is_return_requested(&self) -> bool {
        self.flags.return_requested
    }

    /// Clear a pending break.
    /// # Returns
    /// If a break was pending.
    pub fn take_break(&mut self) -> bool {
        std::mem::take(&mut self.flags.break_requested)
    }

    /// Clear a pending continue.
    /// # Returns
    /// If a continue was pending.
    pub fn take_continue(&mut self) -> bool {
        std::mem::take(&mut self.flags.continue_requested)
    }

    pub fn clear_flags(&mut self) {
        self.flags = Flags::default();
    }

    pub fn push_frame(&mut self, node: &'a ExprDebug, this: Value) {
        self.stack
            .get_or_insert_with(Vec::new)
            .push(Frame { node, this });
    }

    pub fn pop_frame(&mut self) -> Option<Frame<'a>> {
        self.stack.as_mut().and_then(|stack| stack.pop())
    }

    /// Debug frames, innermost last.
    pub fn stack(&self) -> &[Frame<'a>] {
        self.stack.as_deref().unwrap_or_default()
    }

    /// One line per frame, innermost first.
    /// e.g. `at 1:5 in $a.b (self = null)`
    pub fn render_stack(&self) -> String {
        let mut out = String::new();
        for (idx, frame) in self.stack().iter().rev().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            let _ = write!(
                out,
                "at {} in {} (self = {})",
                frame.node.span.start, frame.node.inner, frame.this
            );
        }
        out
    }
}
