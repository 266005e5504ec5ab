use {
    crate::object::{Handle, HandleValue, ProcessId, ThreadId, INVALID_HANDLE},
    crate::{ArbError, ArbResult},
    std::collections::BTreeMap,
};

/// Exit code reported for tasks that are still running, Win32's
/// `STILL_ACTIVE`.
pub const STILL_ACTIVE: i32 = 259;

/// Process payload: the process tree node plus the handle table shared by
/// all of the process's threads.
pub struct ProcessState {
    pid: ProcessId,
    parent: Option<ProcessId>,
    exit_code: Option<i32>,
    threads: Vec<ThreadId>,
    handles: BTreeMap<HandleValue, Handle>,
}

impl ProcessState {
    /// Create a process payload with an empty handle table.
    pub fn new(pid: ProcessId, parent: Option<ProcessId>) -> Self {
        ProcessState {
            pid,
            parent,
            exit_code: None,
            threads: Vec::new(),
            handles: BTreeMap::new(),
        }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn parent(&self) -> Option<ProcessId> {
        self.parent
    }

    /// Whether the process has not yet terminated.
    pub fn alive(&self) -> bool {
        self.exit_code.is_none()
    }

    /// Exit code, `STILL_ACTIVE` while running.
    pub fn exit_code(&self) -> i32 {
        self.exit_code.unwrap_or(STILL_ACTIVE)
    }

    /// Record termination. Only the registry calls this.
    pub fn set_exit_code(&mut self, code: i32) {
        self.exit_code = Some(code);
    }

    /// Live threads of the process.
    pub fn threads(&self) -> &[ThreadId] {
        &self.threads
    }

    pub fn add_thread(&mut self, tid: ThreadId) {
        self.threads.push(tid);
    }

    pub fn remove_thread(&mut self, tid: ThreadId) {
        self.threads.retain(|&t| t != tid);
    }

    /// Add a handle, allocating the lowest free value. Values start at 1;
    /// 0 is reserved as the invalid handle.
    pub fn add_handle(&mut self, handle: Handle) -> HandleValue {
        let value = (INVALID_HANDLE + 1..)
            .find(|v| !self.handles.contains_key(v))
            .expect("handle table full");
        trace!("process {}: new handle {}", self.pid, value);
        self.handles.insert(value, handle);
        value
    }

    /// Install a handle at a fixed value, used when a child inherits its
    /// parent's table. The value must be free.
    pub fn put_handle(&mut self, value: HandleValue, handle: Handle) {
        let prev = self.handles.insert(value, handle);
        assert!(prev.is_none(), "inherited handle value collision");
    }

    /// Remove a handle from the table, handing the entry (and its object
    /// reference) to the caller.
    pub fn remove_handle(&mut self, value: HandleValue) -> ArbResult<Handle> {
        self.handles.remove(&value).ok_or(ArbError::INVALID_HANDLE)
    }

    /// Copy a handle table entry out. Entries are cloned rather than
    /// borrowed so no table lock is held while the object is used.
    pub fn handle(&self, value: HandleValue) -> ArbResult<Handle> {
        self.handles
            .get(&value)
            .cloned()
            .ok_or(ArbError::INVALID_HANDLE)
    }

    /// Entries marked inheritable, for `new_process` with inheritance.
    pub fn inheritable_handles(&self) -> Vec<(HandleValue, Handle)> {
        self.handles
            .iter()
            .filter(|(_, h)| h.inherit)
            .map(|(&v, h)| (v, h.clone()))
            .collect()
    }

    /// Empty the handle table, handing every entry to the caller. Part of
    /// the termination cascade: the caller drops the entries after
    /// releasing the payload lock.
    pub fn take_handles(&mut self) -> BTreeMap<HandleValue, Handle> {
        std::mem::take(&mut self.handles)
    }
}
