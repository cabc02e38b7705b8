//! Break / continue / return signalling.
//!
//! A [`Flow`] is created per top-level evaluation and per function call.
//! Statements raise signals into it; blocks and loops consult it after every
//! statement to decide whether to keep going.

use super::value::{Value, Variable};

/// Control-transfer state after evaluating a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowStatus {
    /// Normal sequential execution.
    #[default]
    Normal,
    Break,
    Continue,
    Return,
    /// A flow operation was attempted without a context.
    Error,
}

/// A control-transfer request raised by a statement.
#[derive(Debug, Clone)]
pub enum Signal {
    Break,
    Continue,
    Return(Value),
}

#[derive(Debug, Default)]
pub struct Flow {
    status: FlowStatus,
    return_value: Option<Variable>,
    /// Loops currently executing in this context.
    pub loop_depth: usize,
    /// Function calls this context belongs to (0 at top level).
    pub function_depth: usize,
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh context for the body of a function called from `depth - 1`.
    pub fn for_function(depth: usize) -> Self {
        Flow { function_depth: depth, ..Self::default() }
    }

    pub fn status(&self) -> FlowStatus {
        self.status
    }

    /// True while a signal is pending and the enclosing block must stop.
    pub fn is_interrupted(&self) -> bool {
        self.status != FlowStatus::Normal
    }

    /// Apply a signal.  A pending `Return` is never downgraded by `Break` or
    /// `Continue`; `Return` always wins and replaces the payload.
    pub fn raise(&mut self, signal: Signal) -> FlowStatus {
        match signal {
            Signal::Break | Signal::Continue if self.status == FlowStatus::Return => {}
            Signal::Break => self.status = FlowStatus::Break,
            Signal::Continue => self.status = FlowStatus::Continue,
            Signal::Return(value) => {
                self.status = FlowStatus::Return;
                self.return_value = Some(Variable::new(value));
            }
        }
        self.status
    }

    /// Clear a consumed `Break`/`Continue`.
    pub fn reset(&mut self) {
        self.status = FlowStatus::Normal;
    }

    /// Take the return payload (null when none was given), resetting status.
    pub fn take_return(&mut self) -> Value {
        self.status = FlowStatus::Normal;
        self.return_value.take().map(|v| v.get()).unwrap_or_default()
    }
}

/// Raise a signal on an optional context.  A missing context yields
/// [`FlowStatus::Error`] instead of panicking.
pub fn raise(flow: Option<&mut Flow>, signal: Signal) -> FlowStatus {
    match flow {
        Some(flow) => flow.raise(signal),
        None => FlowStatus::Error,
    }
}
