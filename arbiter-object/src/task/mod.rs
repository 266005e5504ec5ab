//! Process and thread payloads.
//!
//! Processes own the handle table shared by all of their threads; threads
//! track the mutexes they hold so owner death can abandon them. The
//! registry driving creation and the termination cascade lives in
//! [`crate::state`].

mod process;
mod thread;

pub use self::{process::*, thread::*};
