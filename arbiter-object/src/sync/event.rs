use crate::{ArbError, ArbResult};

/// Signalable event.
///
/// A manual-reset event stays signaled until explicitly reset; an
/// auto-reset event is cleared as part of the same wait-resolution step
/// that satisfies a waiter, never as two observable steps.
pub struct EventState {
    manual_reset: bool,
    signaled: bool,
}

/// A state-changing event operation, as carried in an `EVENT_OP` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOp {
    /// Signal the event.
    Set = 0,
    /// Deassert the event unconditionally.
    Reset = 1,
    /// Wake currently-satisfiable waiters, then deassert. Nothing
    /// persists for waiters that arrive later.
    Pulse = 2,
}

impl EventOp {
    /// Decode the wire representation.
    pub fn from_raw(raw: u32) -> ArbResult<EventOp> {
        match raw {
            0 => Ok(EventOp::Set),
            1 => Ok(EventOp::Reset),
            2 => Ok(EventOp::Pulse),
            _ => Err(ArbError::INVALID_ARGS),
        }
    }
}

impl EventState {
    /// Create a new event.
    pub fn new(manual_reset: bool, initial: bool) -> Self {
        EventState {
            manual_reset,
            signaled: initial,
        }
    }

    /// Whether a wait on the event would be satisfied now.
    pub fn satisfiable(&self) -> bool {
        self.signaled
    }

    /// `SetEvent`.
    pub fn set(&mut self) {
        self.signaled = true;
    }

    /// `ResetEvent`.
    pub fn reset(&mut self) {
        self.signaled = false;
    }

    /// Consumption side effect of a satisfied wait: auto-reset events
    /// clear, manual-reset events are untouched.
    pub fn consume(&mut self) {
        if !self.manual_reset {
            self.signaled = false;
        }
    }
}
