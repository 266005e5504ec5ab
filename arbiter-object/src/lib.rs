//! Win32-style kernel objects for the arbiter server.
//!
//! This crate is the object model of the server: events, mutexes,
//! semaphores, processes and threads, the per-process handle tables that
//! refer to them, and the wait multiplexer that resolves
//! `WaitForSingleObject`/`WaitForMultipleObjects`-style requests.
//!
//! Everything hangs off one [`ServerState`] value. There are no process-wide
//! globals, so tests can instantiate as many independent server states as
//! they like. All mutation happens inside request-level methods of
//! `ServerState`, one request run to completion before the next; the
//! per-object locks exist only so `Arc<KObject>` can be aliased across
//! tasks, never for concurrent mutation.
//!
//! [`ServerState`]: crate::state::ServerState

#![deny(unused_must_use)]

#[macro_use]
extern crate log;

mod error;
pub mod object;
pub mod state;
pub mod sync;
pub mod task;
pub mod wait;

pub use self::error::*;
