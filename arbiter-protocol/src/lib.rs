//! Wire protocol between `arbiterd` and its clients.
//!
//! Every message is one frame: a 12-byte little-endian header
//! `{len, type, seq}` followed by a type-specific payload. `len` includes
//! the header. Replies echo the request's `type` and `seq` and start with
//! an `i32` status; a non-zero status carries no further payload.
//!
//! Decoding is strict. Any violation is a [`ProtocolError`], and the
//! daemon answers one by dropping the connection.

#![deny(unused_must_use)]

mod frame;
mod request;
mod reply;

pub use self::frame::*;
pub use self::reply::*;
pub use self::request::*;

/// Hard cap on a frame, header included.
pub const MAX_FRAME: usize = 16384;

/// Maximum number of handles in one `SELECT`.
pub const MAX_SELECT_OBJECTS: usize = 64;

pub const REQ_NEW_PROCESS: u32 = 1;
pub const REQ_NEW_THREAD: u32 = 2;
pub const REQ_CLOSE_HANDLE: u32 = 3;
pub const REQ_DUP_HANDLE: u32 = 4;
pub const REQ_CREATE_EVENT: u32 = 5;
pub const REQ_EVENT_OP: u32 = 6;
pub const REQ_CREATE_MUTEX: u32 = 7;
pub const REQ_RELEASE_MUTEX: u32 = 8;
pub const REQ_CREATE_SEMAPHORE: u32 = 9;
pub const REQ_RELEASE_SEMAPHORE: u32 = 10;
pub const REQ_OPEN_NAMED_OBJ: u32 = 11;
pub const REQ_SELECT: u32 = 12;
pub const REQ_GET_PROCESS_INFO: u32 = 13;
pub const REQ_GET_THREAD_INFO: u32 = 14;
pub const REQ_TERMINATE_PROCESS: u32 = 15;
pub const REQ_TERMINATE_THREAD: u32 = 16;
pub const REQ_SUSPEND_THREAD: u32 = 17;
pub const REQ_RESUME_THREAD: u32 = 18;

/// A malformed frame. Fatal for the connection that sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload shorter than the opcode requires.
    Truncated,
    /// Frame length outside `[HEADER_SIZE, MAX_FRAME]` or inconsistent
    /// with the payload.
    BadLength(u32),
    /// Unknown opcode.
    BadOpcode(u32),
    /// Name vararg is not valid UTF-8.
    BadString,
    /// `SELECT` with more than `MAX_SELECT_OBJECTS` handles.
    TooManyObjects,
}
