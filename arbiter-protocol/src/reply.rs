use byteorder::{ByteOrder, LittleEndian};

use crate::request::put_u32;
use crate::*;

/// `SELECT` outcome discriminants on the wire.
pub const SELECT_SATISFIED: u32 = 0;
pub const SELECT_ABANDONED: u32 = 1;
pub const SELECT_TIMED_OUT: u32 = 2;

/// A reply payload. `Error` carries the failing status; every other
/// variant is a status-0 reply with the opcode's result fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Error(i32),
    /// OK with no result fields.
    Empty,
    NewProcess {
        pid: u32,
        tid: u32,
        process_handle: u32,
        thread_handle: u32,
        parent_handle: u32,
    },
    NewThread { tid: u32, handle: u32 },
    /// `CREATE_*` and `OPEN_NAMED_OBJ`: the handle, and whether an
    /// existing named object was reused.
    Handle { handle: u32, existed: bool },
    ReleaseSemaphore { prev_count: u32 },
    /// `outcome` is one of the `SELECT_*` constants; `index` refers to the
    /// request's handle list.
    Select { outcome: u32, index: u32 },
    ProcessInfo { pid: u32, alive: bool, exit_code: i32, thread_count: u32 },
    ThreadInfo { tid: u32, pid: u32, alive: bool, suspend_count: u32, exit_code: i32 },
    /// `SUSPEND_THREAD`/`RESUME_THREAD`: the count before the change.
    SuspendCount { prev_count: u32 },
}

impl Reply {
    /// Encode a full frame echoing the request's `ty` and `seq`.
    pub fn encode(&self, ty: u32, seq: u32) -> Vec<u8> {
        let mut body = Vec::new();
        let status = match self {
            Reply::Error(status) => *status,
            _ => 0,
        };
        put_u32(&mut body, status as u32);
        match self {
            Reply::Error(_) | Reply::Empty => {}
            Reply::NewProcess { pid, tid, process_handle, thread_handle, parent_handle } => {
                put_u32(&mut body, *pid);
                put_u32(&mut body, *tid);
                put_u32(&mut body, *process_handle);
                put_u32(&mut body, *thread_handle);
                put_u32(&mut body, *parent_handle);
            }
            Reply::NewThread { tid, handle } => {
                put_u32(&mut body, *tid);
                put_u32(&mut body, *handle);
            }
            Reply::Handle { handle, existed } => {
                put_u32(&mut body, *handle);
                put_u32(&mut body, *existed as u32);
            }
            Reply::ReleaseSemaphore { prev_count } => put_u32(&mut body, *prev_count),
            Reply::Select { outcome, index } => {
                put_u32(&mut body, *outcome);
                put_u32(&mut body, *index);
            }
            Reply::ProcessInfo { pid, alive, exit_code, thread_count } => {
                put_u32(&mut body, *pid);
                put_u32(&mut body, *alive as u32);
                put_u32(&mut body, *exit_code as u32);
                put_u32(&mut body, *thread_count);
            }
            Reply::ThreadInfo { tid, pid, alive, suspend_count, exit_code } => {
                put_u32(&mut body, *tid);
                put_u32(&mut body, *pid);
                put_u32(&mut body, *alive as u32);
                put_u32(&mut body, *suspend_count);
                put_u32(&mut body, *exit_code as u32);
            }
            Reply::SuspendCount { prev_count } => put_u32(&mut body, *prev_count),
        }
        frame(ty, seq, &body)
    }

    /// Decode a reply payload for the request opcode that produced it.
    /// The client side of `encode`.
    pub fn decode(opcode: u32, body: &[u8]) -> Result<Self, ProtocolError> {
        if body.len() < 4 {
            return Err(ProtocolError::Truncated);
        }
        let status = LittleEndian::read_u32(&body[0..4]) as i32;
        if status != 0 {
            return Ok(Reply::Error(status));
        }
        let fields = &body[4..];
        let u32_at = |i: usize| -> Result<u32, ProtocolError> {
            if fields.len() < (i + 1) * 4 {
                return Err(ProtocolError::Truncated);
            }
            Ok(LittleEndian::read_u32(&fields[i * 4..i * 4 + 4]))
        };
        let reply = match opcode {
            REQ_NEW_PROCESS => Reply::NewProcess {
                pid: u32_at(0)?,
                tid: u32_at(1)?,
                process_handle: u32_at(2)?,
                thread_handle: u32_at(3)?,
                parent_handle: u32_at(4)?,
            },
            REQ_NEW_THREAD => Reply::NewThread { tid: u32_at(0)?, handle: u32_at(1)? },
            REQ_CREATE_EVENT | REQ_CREATE_MUTEX | REQ_CREATE_SEMAPHORE | REQ_OPEN_NAMED_OBJ
            | REQ_DUP_HANDLE => {
                Reply::Handle { handle: u32_at(0)?, existed: u32_at(1)? != 0 }
            }
            REQ_RELEASE_SEMAPHORE => Reply::ReleaseSemaphore { prev_count: u32_at(0)? },
            REQ_SELECT => Reply::Select { outcome: u32_at(0)?, index: u32_at(1)? },
            REQ_GET_PROCESS_INFO => Reply::ProcessInfo {
                pid: u32_at(0)?,
                alive: u32_at(1)? != 0,
                exit_code: u32_at(2)? as i32,
                thread_count: u32_at(3)?,
            },
            REQ_GET_THREAD_INFO => Reply::ThreadInfo {
                tid: u32_at(0)?,
                pid: u32_at(1)?,
                alive: u32_at(2)? != 0,
                suspend_count: u32_at(3)?,
                exit_code: u32_at(4)? as i32,
            },
            REQ_SUSPEND_THREAD | REQ_RESUME_THREAD => {
                Reply::SuspendCount { prev_count: u32_at(0)? }
            }
            _ => Reply::Empty,
        };
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(opcode: u32, reply: Reply) {
        let buf = reply.encode(opcode, 9);
        let mut header = [0; HEADER_SIZE];
        header.copy_from_slice(&buf[..HEADER_SIZE]);
        let header = FrameHeader::decode(&header).unwrap();
        assert_eq!((header.ty, header.seq), (opcode, 9));
        assert_eq!(header.len as usize, buf.len());
        assert_eq!(Reply::decode(opcode, &buf[HEADER_SIZE..]), Ok(reply));
    }

    #[test]
    fn typical_replies() {
        roundtrip(REQ_CLOSE_HANDLE, Reply::Empty);
        roundtrip(
            REQ_NEW_PROCESS,
            Reply::NewProcess { pid: 1, tid: 2, process_handle: 1, thread_handle: 2, parent_handle: 0 },
        );
        roundtrip(REQ_CREATE_EVENT, Reply::Handle { handle: 3, existed: true });
        roundtrip(REQ_SELECT, Reply::Select { outcome: SELECT_ABANDONED, index: 4 });
        roundtrip(
            REQ_GET_THREAD_INFO,
            Reply::ThreadInfo { tid: 2, pid: 1, alive: false, suspend_count: 0, exit_code: -9 },
        );
    }

    #[test]
    fn error_status_short_circuits() {
        let buf = Reply::Error(-11).encode(REQ_SELECT, 1);
        assert_eq!(buf.len(), HEADER_SIZE + 4);
        assert_eq!(
            Reply::decode(REQ_SELECT, &buf[HEADER_SIZE..]),
            Ok(Reply::Error(-11))
        );
    }
}
