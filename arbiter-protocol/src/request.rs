use byteorder::{ByteOrder, LittleEndian};

use crate::*;

/// A decoded request payload. Field meanings follow the Win32-style calls
/// they carry; handle value 0 means "the caller's own process/thread"
/// where a task handle is expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Register this connection as a new process's initial thread.
    /// `parent_pid` 0 means no parent.
    NewProcess { parent_pid: u32, inherit: bool },
    /// Register this connection as a new thread of an existing process.
    NewThread { pid: u32 },
    CloseHandle { handle: u32 },
    DupHandle { src: u32, dst_process: u32, access: u32, inherit: bool },
    CreateEvent { manual_reset: bool, initial: bool, name: Option<String> },
    /// `op`: 0 set, 1 reset, 2 pulse.
    EventOp { handle: u32, op: u32 },
    CreateMutex { owned: bool, name: Option<String> },
    ReleaseMutex { handle: u32 },
    CreateSemaphore { initial: u32, max: u32, name: Option<String> },
    ReleaseSemaphore { handle: u32, count: u32 },
    OpenNamedObj { access: u32, name: String },
    /// `wait_all` selects wait-all over wait-any. `timeout_ms`: -1
    /// infinite, 0 poll, otherwise a relative deadline.
    Select { wait_all: bool, timeout_ms: i64, handles: Vec<u32> },
    GetProcessInfo { handle: u32 },
    GetThreadInfo { handle: u32 },
    TerminateProcess { handle: u32, exit_code: i32 },
    TerminateThread { handle: u32, exit_code: i32 },
    SuspendThread { handle: u32 },
    ResumeThread { handle: u32 },
}

/// Sequential little-endian reader over a request payload.
struct Body<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Body<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Body { buf, pos: 0 }
    }

    fn u32(&mut self) -> Result<u32, ProtocolError> {
        let end = self.pos.checked_add(4).ok_or(ProtocolError::Truncated)?;
        if end > self.buf.len() {
            return Err(ProtocolError::Truncated);
        }
        let v = LittleEndian::read_u32(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(v)
    }

    fn i32(&mut self) -> Result<i32, ProtocolError> {
        self.u32().map(|v| v as i32)
    }

    fn i64(&mut self) -> Result<i64, ProtocolError> {
        let end = self.pos.checked_add(8).ok_or(ProtocolError::Truncated)?;
        if end > self.buf.len() {
            return Err(ProtocolError::Truncated);
        }
        let v = LittleEndian::read_i64(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(v)
    }

    fn flag(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.u32()? != 0)
    }

    /// The trailing name vararg: everything left, empty meaning none.
    fn name(self) -> Result<Option<String>, ProtocolError> {
        let rest = &self.buf[self.pos..];
        if rest.is_empty() {
            return Ok(None);
        }
        match std::str::from_utf8(rest) {
            Ok(s) => Ok(Some(s.to_string())),
            Err(_) => Err(ProtocolError::BadString),
        }
    }

    /// All fixed fields consumed; anything left over is a framing bug.
    fn finish(self) -> Result<(), ProtocolError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(ProtocolError::BadLength(self.buf.len() as u32))
        }
    }
}

impl Request {
    pub fn opcode(&self) -> u32 {
        match self {
            Request::NewProcess { .. } => REQ_NEW_PROCESS,
            Request::NewThread { .. } => REQ_NEW_THREAD,
            Request::CloseHandle { .. } => REQ_CLOSE_HANDLE,
            Request::DupHandle { .. } => REQ_DUP_HANDLE,
            Request::CreateEvent { .. } => REQ_CREATE_EVENT,
            Request::EventOp { .. } => REQ_EVENT_OP,
            Request::CreateMutex { .. } => REQ_CREATE_MUTEX,
            Request::ReleaseMutex { .. } => REQ_RELEASE_MUTEX,
            Request::CreateSemaphore { .. } => REQ_CREATE_SEMAPHORE,
            Request::ReleaseSemaphore { .. } => REQ_RELEASE_SEMAPHORE,
            Request::OpenNamedObj { .. } => REQ_OPEN_NAMED_OBJ,
            Request::Select { .. } => REQ_SELECT,
            Request::GetProcessInfo { .. } => REQ_GET_PROCESS_INFO,
            Request::GetThreadInfo { .. } => REQ_GET_THREAD_INFO,
            Request::TerminateProcess { .. } => REQ_TERMINATE_PROCESS,
            Request::TerminateThread { .. } => REQ_TERMINATE_THREAD,
            Request::SuspendThread { .. } => REQ_SUSPEND_THREAD,
            Request::ResumeThread { .. } => REQ_RESUME_THREAD,
        }
    }

    /// Decode the payload of a frame whose header carried `opcode`.
    pub fn decode(opcode: u32, body: &[u8]) -> Result<Self, ProtocolError> {
        let mut b = Body::new(body);
        let req = match opcode {
            REQ_NEW_PROCESS => {
                let parent_pid = b.u32()?;
                let inherit = b.flag()?;
                b.finish()?;
                Request::NewProcess { parent_pid, inherit }
            }
            REQ_NEW_THREAD => {
                let pid = b.u32()?;
                b.finish()?;
                Request::NewThread { pid }
            }
            REQ_CLOSE_HANDLE => {
                let handle = b.u32()?;
                b.finish()?;
                Request::CloseHandle { handle }
            }
            REQ_DUP_HANDLE => {
                let src = b.u32()?;
                let dst_process = b.u32()?;
                let access = b.u32()?;
                let inherit = b.flag()?;
                b.finish()?;
                Request::DupHandle { src, dst_process, access, inherit }
            }
            REQ_CREATE_EVENT => {
                let manual_reset = b.flag()?;
                let initial = b.flag()?;
                Request::CreateEvent { manual_reset, initial, name: b.name()? }
            }
            REQ_EVENT_OP => {
                let handle = b.u32()?;
                let op = b.u32()?;
                b.finish()?;
                Request::EventOp { handle, op }
            }
            REQ_CREATE_MUTEX => {
                let owned = b.flag()?;
                Request::CreateMutex { owned, name: b.name()? }
            }
            REQ_RELEASE_MUTEX => {
                let handle = b.u32()?;
                b.finish()?;
                Request::ReleaseMutex { handle }
            }
            REQ_CREATE_SEMAPHORE => {
                let initial = b.u32()?;
                let max = b.u32()?;
                Request::CreateSemaphore { initial, max, name: b.name()? }
            }
            REQ_RELEASE_SEMAPHORE => {
                let handle = b.u32()?;
                let count = b.u32()?;
                b.finish()?;
                Request::ReleaseSemaphore { handle, count }
            }
            REQ_OPEN_NAMED_OBJ => {
                let access = b.u32()?;
                let name = b.name()?.ok_or(ProtocolError::BadString)?;
                Request::OpenNamedObj { access, name }
            }
            REQ_SELECT => {
                let wait_all = b.flag()?;
                let count = b.u32()? as usize;
                let timeout_ms = b.i64()?;
                if count > MAX_SELECT_OBJECTS {
                    return Err(ProtocolError::TooManyObjects);
                }
                let mut handles = Vec::with_capacity(count);
                for _ in 0..count {
                    handles.push(b.u32()?);
                }
                b.finish()?;
                Request::Select { wait_all, timeout_ms, handles }
            }
            REQ_GET_PROCESS_INFO => {
                let handle = b.u32()?;
                b.finish()?;
                Request::GetProcessInfo { handle }
            }
            REQ_GET_THREAD_INFO => {
                let handle = b.u32()?;
                b.finish()?;
                Request::GetThreadInfo { handle }
            }
            REQ_TERMINATE_PROCESS => {
                let handle = b.u32()?;
                let exit_code = b.i32()?;
                b.finish()?;
                Request::TerminateProcess { handle, exit_code }
            }
            REQ_TERMINATE_THREAD => {
                let handle = b.u32()?;
                let exit_code = b.i32()?;
                b.finish()?;
                Request::TerminateThread { handle, exit_code }
            }
            REQ_SUSPEND_THREAD => {
                let handle = b.u32()?;
                b.finish()?;
                Request::SuspendThread { handle }
            }
            REQ_RESUME_THREAD => {
                let handle = b.u32()?;
                b.finish()?;
                Request::ResumeThread { handle }
            }
            other => return Err(ProtocolError::BadOpcode(other)),
        };
        Ok(req)
    }

    /// Encode the payload. The client side of `decode`.
    pub fn encode_body(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Request::NewProcess { parent_pid, inherit } => {
                put_u32(&mut buf, *parent_pid);
                put_flag(&mut buf, *inherit);
            }
            Request::NewThread { pid } => put_u32(&mut buf, *pid),
            Request::CloseHandle { handle } => put_u32(&mut buf, *handle),
            Request::DupHandle { src, dst_process, access, inherit } => {
                put_u32(&mut buf, *src);
                put_u32(&mut buf, *dst_process);
                put_u32(&mut buf, *access);
                put_flag(&mut buf, *inherit);
            }
            Request::CreateEvent { manual_reset, initial, name } => {
                put_flag(&mut buf, *manual_reset);
                put_flag(&mut buf, *initial);
                put_name(&mut buf, name);
            }
            Request::EventOp { handle, op } => {
                put_u32(&mut buf, *handle);
                put_u32(&mut buf, *op);
            }
            Request::CreateMutex { owned, name } => {
                put_flag(&mut buf, *owned);
                put_name(&mut buf, name);
            }
            Request::ReleaseMutex { handle } => put_u32(&mut buf, *handle),
            Request::CreateSemaphore { initial, max, name } => {
                put_u32(&mut buf, *initial);
                put_u32(&mut buf, *max);
                put_name(&mut buf, name);
            }
            Request::ReleaseSemaphore { handle, count } => {
                put_u32(&mut buf, *handle);
                put_u32(&mut buf, *count);
            }
            Request::OpenNamedObj { access, name } => {
                put_u32(&mut buf, *access);
                buf.extend_from_slice(name.as_bytes());
            }
            Request::Select { wait_all, timeout_ms, handles } => {
                put_flag(&mut buf, *wait_all);
                put_u32(&mut buf, handles.len() as u32);
                put_i64(&mut buf, *timeout_ms);
                for &h in handles {
                    put_u32(&mut buf, h);
                }
            }
            Request::GetProcessInfo { handle } => put_u32(&mut buf, *handle),
            Request::GetThreadInfo { handle } => put_u32(&mut buf, *handle),
            Request::TerminateProcess { handle, exit_code } => {
                put_u32(&mut buf, *handle);
                put_u32(&mut buf, *exit_code as u32);
            }
            Request::TerminateThread { handle, exit_code } => {
                put_u32(&mut buf, *handle);
                put_u32(&mut buf, *exit_code as u32);
            }
            Request::SuspendThread { handle } => put_u32(&mut buf, *handle),
            Request::ResumeThread { handle } => put_u32(&mut buf, *handle),
        }
        buf
    }
}

pub(crate) fn put_u32(buf: &mut Vec<u8>, v: u32) {
    let mut tmp = [0; 4];
    LittleEndian::write_u32(&mut tmp, v);
    buf.extend_from_slice(&tmp);
}

pub(crate) fn put_i64(buf: &mut Vec<u8>, v: i64) {
    let mut tmp = [0; 8];
    LittleEndian::write_i64(&mut tmp, v);
    buf.extend_from_slice(&tmp);
}

fn put_flag(buf: &mut Vec<u8>, v: bool) {
    put_u32(buf, v as u32);
}

fn put_name(buf: &mut Vec<u8>, name: &Option<String>) {
    if let Some(name) = name {
        buf.extend_from_slice(name.as_bytes());
    }
}
