use {
    super::process::STILL_ACTIVE,
    crate::object::{KObject, ObjectRef, ProcessId, ThreadId},
    crate::{ArbError, ArbResult},
    std::sync::{Arc, Weak},
};

/// Thread payload.
///
/// The owned-mutex list holds `Weak` references: ownership must not keep a
/// mutex alive, since closing the last handle to an owned mutex frees it.
pub struct ThreadState {
    tid: ThreadId,
    process: ProcessId,
    suspend_count: u32,
    exit_code: Option<i32>,
    owned_mutexes: Vec<Weak<KObject>>,
}

impl ThreadState {
    pub fn new(tid: ThreadId, process: ProcessId) -> Self {
        ThreadState {
            tid,
            process,
            suspend_count: 0,
            exit_code: None,
            owned_mutexes: Vec::new(),
        }
    }

    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    pub fn process(&self) -> ProcessId {
        self.process
    }

    /// Whether the thread has not yet terminated.
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

    pub fn suspend_count(&self) -> u32 {
        self.suspend_count
    }

    /// `SuspendThread` bookkeeping; returns the previous count.
    pub fn suspend(&mut self) -> ArbResult<u32> {
        if !self.alive() {
            return Err(ArbError::BAD_STATE);
        }
        let prev = self.suspend_count;
        self.suspend_count += 1;
        Ok(prev)
    }

    /// `ResumeThread` bookkeeping; returns the previous count. Resuming a
    /// running thread fails with `BAD_STATE`.
    pub fn resume(&mut self) -> ArbResult<u32> {
        if !self.alive() || self.suspend_count == 0 {
            return Err(ArbError::BAD_STATE);
        }
        let prev = self.suspend_count;
        self.suspend_count -= 1;
        Ok(prev)
    }

    /// Record that the thread took ownership of `mutex`.
    pub fn note_owned(&mut self, mutex: &ObjectRef) {
        if !self
            .owned_mutexes
            .iter()
            .any(|w| w.as_ptr() == Arc::as_ptr(mutex))
        {
            self.owned_mutexes.push(Arc::downgrade(mutex));
        }
    }

    /// Record that the thread fully released `mutex`.
    pub fn drop_owned(&mut self, mutex: &ObjectRef) {
        self.owned_mutexes
            .retain(|w| w.as_ptr() != Arc::as_ptr(mutex));
    }

    /// Hand the owned-mutex list to the termination cascade.
    pub fn take_owned(&mut self) -> Vec<Weak<KObject>> {
        std::mem::take(&mut self.owned_mutexes)
    }
}
