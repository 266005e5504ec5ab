//! Synchronization object state machines.
//!
//! These are plain data types; signaling and wake-up ordering live in the
//! wait multiplexer ([`crate::state`]), which applies the consumption side
//! effects defined here atomically with wait resolution.

mod event;
mod mutex;
mod semaphore;

pub use self::{event::*, mutex::*, semaphore::*};
