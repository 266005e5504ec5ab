//! The shared object graph and the request-level operations on it.
//!
//! One [`ServerState`] value is the single root of everything the server
//! owns: the process/thread registry, the named-object namespace, and the
//! queue of pending waits. It is owned by the dispatcher task and mutated
//! only from request handlers, one request run to completion before the
//! next, so the wait fast path and the termination cascade are atomic by
//! construction.

use {
    crate::object::*,
    crate::sync::{EventOp, EventState, MutexState, SemaphoreState},
    crate::task::{ProcessState, ThreadState},
    crate::wait::*,
    crate::{ArbError, ArbResult},
    std::collections::{BTreeMap, VecDeque},
    std::convert::TryFrom,
    std::sync::{Arc, Weak},
    std::time::Instant,
};

/// Result of `new_process`: the ids plus the handles preinstalled in the
/// new process's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewProcessResult {
    pub pid: ProcessId,
    pub tid: ThreadId,
    /// Handle to the new process itself.
    pub process_handle: HandleValue,
    /// Handle to the initial thread.
    pub thread_handle: HandleValue,
    /// Handle to the parent process, `INVALID_HANDLE` when created without
    /// a parent.
    pub parent_handle: HandleValue,
}

/// Result of `new_thread`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewThreadResult {
    pub tid: ThreadId,
    /// Handle to the new thread, in its process's table.
    pub handle: HandleValue,
}

/// Information reported for a process handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: ProcessId,
    pub alive: bool,
    pub exit_code: i32,
    pub thread_count: u32,
}

/// Information reported for a thread handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo {
    pub tid: ThreadId,
    pub pid: ProcessId,
    pub alive: bool,
    pub suspend_count: u32,
    pub exit_code: i32,
}

/// Report for a process handle.
pub fn process_info(obj: &ObjectRef) -> ArbResult<ProcessInfo> {
    obj.with_process(|p| ProcessInfo {
        pid: p.pid(),
        alive: p.alive(),
        exit_code: p.exit_code(),
        thread_count: p.threads().len() as u32,
    })
}

/// Report for a thread handle.
pub fn thread_info(obj: &ObjectRef) -> ArbResult<ThreadInfo> {
    obj.with_thread(|t| ThreadInfo {
        tid: t.tid(),
        pid: t.process(),
        alive: t.alive(),
        suspend_count: t.suspend_count(),
        exit_code: t.exit_code(),
    })
}

/// The root of the object graph.
#[derive(Default)]
pub struct ServerState {
    processes: BTreeMap<ProcessId, ObjectRef>,
    threads: BTreeMap<ThreadId, ObjectRef>,
    named: BTreeMap<String, Weak<KObject>>,
    waits: WaitQueue,
    next_koid: KoID,
    next_task_id: u32,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_koid(&mut self) -> KoID {
        self.next_koid += 1;
        self.next_koid
    }

    fn new_task_id(&mut self) -> u32 {
        self.next_task_id += 1;
        self.next_task_id
    }

    /// The registry entry for a live process.
    pub fn process_object(&self, pid: ProcessId) -> Option<ObjectRef> {
        self.processes.get(&pid).cloned()
    }

    /// The registry entry for a live thread.
    pub fn thread_object(&self, tid: ThreadId) -> Option<ObjectRef> {
        self.threads.get(&tid).cloned()
    }

    // ==================== process/thread registry ====================

    /// Create a process and its initial thread. When `parent` is given the
    /// child's table starts with a handle to the parent process and, if
    /// `inherit` is set, copies of the parent's inheritable handles at
    /// their original values.
    pub fn new_process(
        &mut self,
        parent: Option<ProcessId>,
        inherit: bool,
    ) -> ArbResult<NewProcessResult> {
        let parent_obj = match parent {
            Some(ppid) => Some(self.processes.get(&ppid).cloned().ok_or(ArbError::NOT_FOUND)?),
            None => None,
        };
        let pid = self.new_task_id();
        let tid = self.new_task_id();
        let process = KObject::new(
            self.new_koid(),
            None,
            Payload::Process(ProcessState::new(pid, parent)),
        );
        let thread = KObject::new(
            self.new_koid(),
            None,
            Payload::Thread(ThreadState::new(tid, pid)),
        );
        process
            .with_process(|p| {
                p.add_thread(tid);
                if let Some(parent_obj) = &parent_obj {
                    if inherit {
                        let inherited = parent_obj
                            .with_process(|pp| pp.inheritable_handles())
                            .expect("parent payload");
                        for (value, handle) in inherited {
                            p.put_handle(value, handle);
                        }
                    }
                }
            })
            .expect("process payload");
        let process_handle = process
            .with_process(|p| {
                p.add_handle(Handle::new(process.clone(), Rights::DEFAULT_PROCESS, false))
            })
            .expect("process payload");
        let thread_handle = process
            .with_process(|p| {
                p.add_handle(Handle::new(thread.clone(), Rights::DEFAULT_THREAD, false))
            })
            .expect("process payload");
        let parent_handle = match &parent_obj {
            Some(parent_obj) => process
                .with_process(|p| {
                    p.add_handle(Handle::new(
                        parent_obj.clone(),
                        Rights::DEFAULT_PROCESS,
                        false,
                    ))
                })
                .expect("process payload"),
            None => INVALID_HANDLE,
        };
        self.processes.insert(pid, process);
        self.threads.insert(tid, thread);
        info!("new process {} (initial thread {})", pid, tid);
        Ok(NewProcessResult {
            pid,
            tid,
            process_handle,
            thread_handle,
            parent_handle,
        })
    }

    /// Attach a further thread to a live process. The thread handle goes
    /// into the process's table.
    pub fn new_thread(&mut self, pid: ProcessId) -> ArbResult<NewThreadResult> {
        let process = self.processes.get(&pid).cloned().ok_or(ArbError::NOT_FOUND)?;
        let tid = self.new_task_id();
        let thread = KObject::new(
            self.new_koid(),
            None,
            Payload::Thread(ThreadState::new(tid, pid)),
        );
        let handle = process
            .with_process(|p| {
                p.add_thread(tid);
                p.add_handle(Handle::new(thread.clone(), Rights::DEFAULT_THREAD, false))
            })
            .expect("process payload");
        self.threads.insert(tid, thread);
        info!("new thread {} in process {}", tid, pid);
        Ok(NewThreadResult { tid, handle })
    }

    /// Terminate a thread: abandon its mutexes, signal its death, drop its
    /// registry entry, and finish the process if this was its last thread.
    /// Returns the threads that died.
    pub fn terminate_thread_obj(
        &mut self,
        thread: &ObjectRef,
        exit_code: i32,
    ) -> ArbResult<Vec<ThreadId>> {
        let (tid, pid, alive) = thread.with_thread(|t| (t.tid(), t.process(), t.alive()))?;
        if !alive {
            return Err(ArbError::BAD_STATE);
        }
        self.finish_thread(thread, exit_code);
        if let Some(process) = self.processes.get(&pid).cloned() {
            let last = process
                .with_process(|p| p.threads().is_empty())
                .expect("process payload");
            if last {
                // the process dies with its last thread, carrying its code
                self.finish_process(&process, exit_code);
            }
        }
        Ok(vec![tid])
    }

    /// Terminate a process and all of its threads. Returns the threads
    /// that died.
    pub fn terminate_process_obj(
        &mut self,
        process: &ObjectRef,
        exit_code: i32,
    ) -> ArbResult<Vec<ThreadId>> {
        let (alive, tids) = process.with_process(|p| (p.alive(), p.threads().to_vec()))?;
        if !alive {
            return Err(ArbError::BAD_STATE);
        }
        for &tid in &tids {
            if let Some(thread) = self.threads.get(&tid).cloned() {
                self.finish_thread(&thread, exit_code);
            }
        }
        self.finish_process(process, exit_code);
        Ok(tids)
    }

    /// Thread-level part of the termination cascade. Runs to completion
    /// with no other request interleaved.
    fn finish_thread(&mut self, thread: &ObjectRef, exit_code: i32) {
        let (tid, pid, owned) = thread
            .with_thread(|t| {
                t.set_exit_code(exit_code);
                (t.tid(), t.process(), t.take_owned())
            })
            .expect("thread payload");
        // the dead thread's own pending wait can never complete
        self.waits.cancel_thread(tid);
        for weak in owned {
            if let Some(mutex) = weak.upgrade() {
                mutex.with_mutex(|m| m.abandon()).expect("owned list holds mutexes");
                self.wake_object(&mutex);
            }
        }
        // death signal: handle-based waits on the thread now succeed
        self.wake_object(thread);
        self.threads.remove(&tid);
        if let Some(process) = self.processes.get(&pid).cloned() {
            process
                .with_process(|p| p.remove_thread(tid))
                .expect("process payload");
        }
        debug!("thread {} terminated ({})", tid, exit_code);
    }

    /// Process-level part of the cascade: mark dead, signal death, close
    /// every handle, drop the registry reference.
    fn finish_process(&mut self, process: &ObjectRef, exit_code: i32) {
        let (pid, handles) = process
            .with_process(|p| {
                p.set_exit_code(exit_code);
                (p.pid(), p.take_handles())
            })
            .expect("process payload");
        self.wake_object(process);
        // closing the table may drop the last reference to other objects
        drop(handles);
        self.processes.remove(&pid);
        info!("process {} terminated ({})", pid, exit_code);
    }

    // ==================== handle table ====================

    /// Resolve a handle in `pid`'s table, checking `required` rights.
    pub fn object_for_handle(
        &self,
        pid: ProcessId,
        value: HandleValue,
        required: Rights,
    ) -> ArbResult<ObjectRef> {
        let process = self.processes.get(&pid).ok_or(ArbError::BAD_STATE)?;
        let handle = process.with_process(|p| p.handle(value))??;
        handle.object_with_rights(required)
    }

    /// Close a handle; the object is finalized when the last reference
    /// (table entry or wait registration) goes away.
    pub fn close_handle(&mut self, pid: ProcessId, value: HandleValue) -> ArbResult {
        let process = self.processes.get(&pid).ok_or(ArbError::BAD_STATE)?;
        let handle = process.with_process(|p| p.remove_handle(value))??;
        trace!("process {}: closed handle {} ({:?})", pid, value, handle.object);
        drop(handle);
        Ok(())
    }

    /// Duplicate a handle, possibly into another process. The source needs
    /// `DUPLICATE`; requested rights must be a subset of the source's
    /// (`SAME_RIGHTS` copies them verbatim); widening fails with
    /// `ACCESS_DENIED`. A non-zero `dst_process` names a process handle
    /// with `DUPLICATE` in the caller's table.
    pub fn dup_handle(
        &mut self,
        pid: ProcessId,
        src: HandleValue,
        dst_process: HandleValue,
        access: u32,
        inherit: bool,
    ) -> ArbResult<HandleValue> {
        let process = self.processes.get(&pid).cloned().ok_or(ArbError::BAD_STATE)?;
        let handle = process.with_process(|p| p.handle(src))??;
        if !handle.rights.contains(Rights::DUPLICATE) {
            return Err(ArbError::ACCESS_DENIED);
        }
        let requested = Rights::try_from(access)?;
        let rights = if requested.contains(Rights::SAME_RIGHTS) {
            handle.rights
        } else {
            if !handle.rights.contains(requested) {
                return Err(ArbError::ACCESS_DENIED);
            }
            requested
        };
        let target = if dst_process == INVALID_HANDLE {
            process
        } else {
            self.object_for_handle(pid, dst_process, Rights::DUPLICATE)?
        };
        let duplicate = Handle::new(handle.object, rights, inherit);
        let value = target.with_process(|p| {
            if !p.alive() {
                return Err(ArbError::BAD_STATE);
            }
            Ok(p.add_handle(duplicate))
        })??;
        Ok(value)
    }

    fn insert_handle(&mut self, pid: ProcessId, handle: Handle) -> ArbResult<HandleValue> {
        let process = self.processes.get(&pid).ok_or(ArbError::BAD_STATE)?;
        process.with_process(|p| p.add_handle(handle))
    }

    // ==================== named objects ====================

    fn lookup_named(&mut self, name: &str) -> Option<ObjectRef> {
        match self.named.get(name).and_then(Weak::upgrade) {
            Some(obj) => Some(obj),
            None => {
                // purge a dead entry so the name can be reused
                self.named.remove(name);
                None
            }
        }
    }

    fn publish(&mut self, name: &str, obj: &ObjectRef) {
        self.named.insert(name.to_string(), Arc::downgrade(obj));
    }

    /// Open a named object with the requested access mask (or the type's
    /// default rights when zero).
    pub fn open_named(
        &mut self,
        pid: ProcessId,
        access: u32,
        name: &str,
    ) -> ArbResult<HandleValue> {
        let requested = Rights::try_from(access)?;
        if requested.contains(Rights::SAME_RIGHTS) {
            return Err(ArbError::INVALID_ARGS);
        }
        let obj = self.lookup_named(name).ok_or(ArbError::NOT_FOUND)?;
        let rights = if requested.is_empty() {
            obj.default_rights()
        } else {
            requested
        };
        self.insert_handle(pid, Handle::new(obj, rights, false))
    }

    // ==================== creation ====================

    /// Create (or, by name, open) an event. Returns the handle and whether
    /// an existing object was reused.
    pub fn create_event(
        &mut self,
        pid: ProcessId,
        manual_reset: bool,
        initial: bool,
        name: Option<&str>,
    ) -> ArbResult<(HandleValue, bool)> {
        if let Some(n) = name {
            if let Some(existing) = self.lookup_named(n) {
                existing.with_event(|_| ())?;
                let value =
                    self.insert_handle(pid, Handle::new(existing, Rights::DEFAULT_EVENT, false))?;
                return Ok((value, true));
            }
        }
        let obj = KObject::new(
            self.new_koid(),
            name.map(String::from),
            Payload::Event(EventState::new(manual_reset, initial)),
        );
        if let Some(n) = name {
            self.publish(n, &obj);
        }
        let value = self.insert_handle(pid, Handle::new(obj, Rights::DEFAULT_EVENT, false))?;
        Ok((value, false))
    }

    /// Create (or open) a mutex. Initial ownership is granted only on a
    /// fresh object, never when a named mutex already exists.
    pub fn create_mutex(
        &mut self,
        pid: ProcessId,
        tid: ThreadId,
        owned: bool,
        name: Option<&str>,
    ) -> ArbResult<(HandleValue, bool)> {
        if let Some(n) = name {
            if let Some(existing) = self.lookup_named(n) {
                existing.with_mutex(|_| ())?;
                let value =
                    self.insert_handle(pid, Handle::new(existing, Rights::DEFAULT_MUTEX, false))?;
                return Ok((value, true));
            }
        }
        let owner = if owned { Some(tid) } else { None };
        let obj = KObject::new(
            self.new_koid(),
            name.map(String::from),
            Payload::Mutex(MutexState::new(owner)),
        );
        if owned {
            self.note_mutex_owned(tid, &obj);
        }
        if let Some(n) = name {
            self.publish(n, &obj);
        }
        let value = self.insert_handle(pid, Handle::new(obj, Rights::DEFAULT_MUTEX, false))?;
        Ok((value, false))
    }

    /// Create (or open) a semaphore.
    pub fn create_semaphore(
        &mut self,
        pid: ProcessId,
        initial: u32,
        max: u32,
        name: Option<&str>,
    ) -> ArbResult<(HandleValue, bool)> {
        if let Some(n) = name {
            if let Some(existing) = self.lookup_named(n) {
                existing.with_semaphore(|_| ())?;
                let value = self
                    .insert_handle(pid, Handle::new(existing, Rights::DEFAULT_SEMAPHORE, false))?;
                return Ok((value, true));
            }
        }
        let obj = KObject::new(
            self.new_koid(),
            name.map(String::from),
            Payload::Semaphore(SemaphoreState::new(initial, max)?),
        );
        if let Some(n) = name {
            self.publish(n, &obj);
        }
        let value = self.insert_handle(pid, Handle::new(obj, Rights::DEFAULT_SEMAPHORE, false))?;
        Ok((value, false))
    }

    // ==================== state changes ====================

    /// `SetEvent`/`ResetEvent`/`PulseEvent` through a handle.
    pub fn event_op(&mut self, pid: ProcessId, value: HandleValue, op: EventOp) -> ArbResult {
        let obj = self.object_for_handle(pid, value, Rights::MODIFY_STATE)?;
        match op {
            EventOp::Set => {
                obj.with_event(|e| e.set())?;
                self.wake_object(&obj);
            }
            EventOp::Reset => {
                obj.with_event(|e| e.reset())?;
            }
            EventOp::Pulse => {
                // wake currently-pending satisfiable waiters, then
                // deassert; nothing persists for later arrivals
                obj.with_event(|e| e.set())?;
                self.wake_object(&obj);
                obj.with_event(|e| e.reset())?;
            }
        }
        Ok(())
    }

    /// `ReleaseMutex` by the calling thread.
    pub fn release_mutex(
        &mut self,
        pid: ProcessId,
        tid: ThreadId,
        value: HandleValue,
    ) -> ArbResult {
        let obj = self.object_for_handle(pid, value, Rights::MODIFY_STATE)?;
        let freed = obj.with_mutex(|m| m.release(tid))??;
        if freed {
            if let Some(thread) = self.threads.get(&tid) {
                thread
                    .with_thread(|t| t.drop_owned(&obj))
                    .expect("thread payload");
            }
            self.wake_object(&obj);
        }
        Ok(())
    }

    /// `ReleaseSemaphore(n)`. Returns the previous count.
    pub fn release_semaphore(
        &mut self,
        pid: ProcessId,
        value: HandleValue,
        n: u32,
    ) -> ArbResult<u32> {
        let obj = self.object_for_handle(pid, value, Rights::MODIFY_STATE)?;
        let prev = obj.with_semaphore(|s| s.release(n))??;
        self.wake_object(&obj);
        Ok(prev)
    }

    // ==================== wait multiplexer ====================

    /// Resolve or park a wait request. `Ok(Some(..))` is an immediate
    /// outcome; `Ok(None)` means the entry was registered and the reply is
    /// deferred until a wake, the deadline, or cancellation.
    pub fn select(
        &mut self,
        pid: ProcessId,
        tid: ThreadId,
        cookie: WaitCookie,
        handles: &[HandleValue],
        mode: WaitMode,
        timeout: WaitTimeout,
    ) -> ArbResult<Option<WaitResult>> {
        if handles.is_empty() || handles.len() > MAX_WAIT_OBJECTS {
            return Err(ArbError::INVALID_ARGS);
        }
        let mut objects = Vec::with_capacity(handles.len());
        for &value in handles {
            objects.push(self.object_for_handle(pid, value, Rights::SYNCHRONIZE)?);
        }
        for i in 0..objects.len() {
            for j in i + 1..objects.len() {
                if Arc::ptr_eq(&objects[i], &objects[j]) {
                    return Err(ArbError::INVALID_ARGS);
                }
            }
        }
        let entry = WaitEntry {
            cookie,
            thread: tid,
            objects,
            mode,
            deadline: match timeout {
                WaitTimeout::Deadline(t) => Some(t),
                _ => None,
            },
        };
        // fast path: satisfied now, consumed with nothing interleaved
        if self.entry_ready(&entry) {
            return Ok(Some(self.consume_entry(&entry)));
        }
        if let WaitTimeout::Poll = timeout {
            return Ok(Some(WaitResult::TimedOut));
        }
        self.waits.register(entry);
        Ok(None)
    }

    /// Drop a parked wait on disconnect. Returns whether one was pending.
    pub fn cancel_wait(&mut self, cookie: WaitCookie) -> bool {
        self.waits.cancel(cookie)
    }

    /// Earliest pending deadline, the reactor's poll timeout.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.waits.next_deadline()
    }

    /// Complete every wait whose deadline is at or before `now` with
    /// `TimedOut`, exactly once each.
    pub fn fire_timeouts(&mut self, now: Instant) {
        while let Some(cookie) = self.waits.first_due(now) {
            let entry = self.waits.remove(cookie).expect("due timer without entry");
            self.waits.push_completion(entry.cookie, WaitResult::TimedOut);
        }
    }

    /// Pop the next resolved deferred wait.
    pub fn pop_completion(&mut self) -> Option<WaitCompletion> {
        self.waits.pop_completion()
    }

    /// Whether the full condition of `entry` holds right now.
    fn entry_ready(&self, entry: &WaitEntry) -> bool {
        match entry.mode {
            WaitMode::Any => entry.objects.iter().any(|o| o.signaled_for(entry.thread)),
            WaitMode::All => entry.objects.iter().all(|o| o.signaled_for(entry.thread)),
        }
    }

    /// Apply the consumption of a satisfied entry: one object for
    /// wait-any, every object for wait-all, in one uninterleaved step.
    fn consume_entry(&mut self, entry: &WaitEntry) -> WaitResult {
        match entry.mode {
            WaitMode::Any => {
                let index = entry
                    .objects
                    .iter()
                    .position(|o| o.signaled_for(entry.thread))
                    .expect("satisfied wait-any has a ready object");
                if self.consume_object(entry.thread, &entry.objects[index]) {
                    WaitResult::Abandoned(index as u32)
                } else {
                    WaitResult::Satisfied(index as u32)
                }
            }
            WaitMode::All => {
                let mut first_abandoned = None;
                for (index, obj) in entry.objects.iter().enumerate() {
                    if self.consume_object(entry.thread, obj) && first_abandoned.is_none() {
                        first_abandoned = Some(index as u32);
                    }
                }
                match first_abandoned {
                    Some(index) => WaitResult::Abandoned(index),
                    None => WaitResult::Satisfied(0),
                }
            }
        }
    }

    fn consume_object(&mut self, tid: ThreadId, obj: &ObjectRef) -> bool {
        let (abandoned, newly_owned) = obj.consume(tid);
        if newly_owned {
            self.note_mutex_owned(tid, obj);
        }
        abandoned
    }

    fn note_mutex_owned(&mut self, tid: ThreadId, mutex: &ObjectRef) {
        if let Some(thread) = self.threads.get(&tid) {
            thread
                .with_thread(|t| t.note_owned(mutex))
                .expect("thread payload");
        }
    }

    /// Re-evaluate pending waits referencing `obj`, oldest-registered
    /// first. Each satisfied entry's consumption is applied before the
    /// next entry is examined, so one signal wakes exactly the waiters it
    /// can satisfy, in FIFO order.
    fn wake_object(&mut self, obj: &ObjectRef) {
        let mut pending = self.waits.take_entries();
        let mut kept = VecDeque::with_capacity(pending.len());
        for entry in pending.drain(..) {
            if entry.references(obj) && self.entry_ready(&entry) {
                let result = self.consume_entry(&entry);
                if let Some(deadline) = entry.deadline {
                    self.waits.remove_timer(deadline, entry.cookie);
                }
                self.waits.push_completion(entry.cookie, result);
            } else {
                kept.push_back(entry);
            }
        }
        self.waits.put_entries(kept);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn boot(state: &mut ServerState) -> NewProcessResult {
        state.new_process(None, false).unwrap()
    }

    fn object(state: &ServerState, pid: ProcessId, value: HandleValue) -> ObjectRef {
        state.object_for_handle(pid, value, Rights::empty()).unwrap()
    }

    fn event_signaled(state: &ServerState, pid: ProcessId, value: HandleValue) -> bool {
        object(state, pid, value).with_event(|e| e.satisfiable()).unwrap()
    }

    fn sem_count(state: &ServerState, pid: ProcessId, value: HandleValue) -> u32 {
        object(state, pid, value).with_semaphore(|s| s.count()).unwrap()
    }

    #[test]
    fn ids_never_reused() {
        let mut state = ServerState::new();
        let a = boot(&mut state);
        let b = boot(&mut state);
        assert!(b.pid > a.tid);
        state
            .terminate_process_obj(&state.process_object(a.pid).unwrap(), 0)
            .unwrap();
        let c = boot(&mut state);
        assert!(c.pid > b.tid);
    }

    #[test]
    fn handle_values_lowest_free_per_process() {
        let mut state = ServerState::new();
        let p = boot(&mut state);
        // 1 and 2 are taken by the self/thread handles
        let (h, _) = state.create_event(p.pid, false, false, None).unwrap();
        assert_eq!(h, 3);
        state.close_handle(p.pid, h).unwrap();
        let (h2, _) = state.create_event(p.pid, false, false, None).unwrap();
        assert_eq!(h2, 3);
        assert_eq!(
            state.close_handle(p.pid, 99).unwrap_err(),
            ArbError::INVALID_HANDLE
        );
    }

    #[test]
    fn rights_enforced_on_use() {
        let mut state = ServerState::new();
        let p = boot(&mut state);
        let (ev, _) = state.create_event(p.pid, false, false, None).unwrap();
        let narrowed = state
            .dup_handle(p.pid, ev, INVALID_HANDLE, Rights::SYNCHRONIZE.bits(), false)
            .unwrap();
        assert_eq!(
            state.event_op(p.pid, narrowed, EventOp::Set).unwrap_err(),
            ArbError::ACCESS_DENIED
        );
        // SYNCHRONIZE still allows waiting
        let r = state
            .select(p.pid, p.tid, 1, &[narrowed], WaitMode::Any, WaitTimeout::Poll)
            .unwrap();
        assert_eq!(r, Some(WaitResult::TimedOut));
    }

    #[test]
    fn dup_cannot_widen() {
        let mut state = ServerState::new();
        let p = boot(&mut state);
        let (ev, _) = state.create_event(p.pid, false, false, None).unwrap();
        let narrowed = state
            .dup_handle(
                p.pid,
                ev,
                INVALID_HANDLE,
                (Rights::SYNCHRONIZE | Rights::DUPLICATE).bits(),
                false,
            )
            .unwrap();
        assert_eq!(
            state
                .dup_handle(
                    p.pid,
                    narrowed,
                    INVALID_HANDLE,
                    (Rights::SYNCHRONIZE | Rights::MODIFY_STATE).bits(),
                    false
                )
                .unwrap_err(),
            ArbError::ACCESS_DENIED
        );
        // a handle without DUPLICATE cannot be duplicated at all
        let sealed = state
            .dup_handle(p.pid, ev, INVALID_HANDLE, Rights::SYNCHRONIZE.bits(), false)
            .unwrap();
        assert_eq!(
            state
                .dup_handle(p.pid, sealed, INVALID_HANDLE, Rights::SAME_RIGHTS.bits(), false)
                .unwrap_err(),
            ArbError::ACCESS_DENIED
        );
    }

    #[test]
    fn dup_into_parent_process() {
        let mut state = ServerState::new();
        let parent = boot(&mut state);
        let child = state.new_process(Some(parent.pid), false).unwrap();
        assert_ne!(child.parent_handle, INVALID_HANDLE);
        let (ev, _) = state.create_event(child.pid, true, false, None).unwrap();
        let in_parent = state
            .dup_handle(child.pid, ev, child.parent_handle, Rights::SAME_RIGHTS.bits(), false)
            .unwrap();
        state.event_op(parent.pid, in_parent, EventOp::Set).unwrap();
        assert!(event_signaled(&state, child.pid, ev));
    }

    #[test]
    fn inheritable_handles_copied_at_same_values() {
        let mut state = ServerState::new();
        let parent = boot(&mut state);
        let (ev, _) = state.create_event(parent.pid, false, false, None).unwrap();
        let heir = state
            .dup_handle(parent.pid, ev, INVALID_HANDLE, Rights::SAME_RIGHTS.bits(), true)
            .unwrap();
        let (sealed, _) = state.create_event(parent.pid, false, false, None).unwrap();
        let child = state.new_process(Some(parent.pid), true).unwrap();
        let obj = object(&state, child.pid, heir);
        assert!(Arc::ptr_eq(&obj, &object(&state, parent.pid, ev)));
        // the non-inheritable handles did not cross over
        assert_eq!(
            state
                .object_for_handle(child.pid, sealed, Rights::empty())
                .unwrap_err(),
            ArbError::INVALID_HANDLE
        );
    }

    #[test]
    fn named_create_and_open() {
        let mut state = ServerState::new();
        let a = boot(&mut state);
        let b = boot(&mut state);
        let (h1, existed) = state.create_event(a.pid, true, false, Some("boot")).unwrap();
        assert!(!existed);
        let (h2, existed) = state.create_event(b.pid, false, true, Some("boot")).unwrap();
        assert!(existed);
        assert!(Arc::ptr_eq(&object(&state, a.pid, h1), &object(&state, b.pid, h2)));
        // creation parameters of the second caller were ignored
        assert!(!event_signaled(&state, b.pid, h2));
        assert_eq!(
            state.create_mutex(b.pid, b.tid, false, Some("boot")).unwrap_err(),
            ArbError::WRONG_TYPE
        );
        assert_eq!(
            state.open_named(b.pid, 0, "missing").unwrap_err(),
            ArbError::NOT_FOUND
        );
        let h3 = state.open_named(b.pid, 0, "boot").unwrap();
        state.event_op(b.pid, h3, EventOp::Set).unwrap();
    }

    #[test]
    fn name_released_when_object_freed() {
        let mut state = ServerState::new();
        let p = boot(&mut state);
        let (h, _) = state.create_semaphore(p.pid, 0, 4, Some("pool")).unwrap();
        state.close_handle(p.pid, h).unwrap();
        assert_eq!(
            state.open_named(p.pid, 0, "pool").unwrap_err(),
            ArbError::NOT_FOUND
        );
        let (_, existed) = state.create_event(p.pid, false, false, Some("pool")).unwrap();
        assert!(!existed);
    }

    #[test]
    fn mutex_mutual_exclusion_and_recursion() {
        let mut state = ServerState::new();
        let a = boot(&mut state);
        let b = boot(&mut state);
        let (ma, _) = state.create_mutex(a.pid, a.tid, false, Some("m")).unwrap();
        let (mb, _) = state.create_mutex(b.pid, b.tid, false, Some("m")).unwrap();
        let r = state
            .select(a.pid, a.tid, 1, &[ma], WaitMode::Any, WaitTimeout::Infinite)
            .unwrap();
        assert_eq!(r, Some(WaitResult::Satisfied(0)));
        // recursive acquisition by the owner succeeds immediately
        let r = state
            .select(a.pid, a.tid, 1, &[ma], WaitMode::Any, WaitTimeout::Infinite)
            .unwrap();
        assert_eq!(r, Some(WaitResult::Satisfied(0)));
        let r = state
            .select(b.pid, b.tid, 2, &[mb], WaitMode::Any, WaitTimeout::Infinite)
            .unwrap();
        assert_eq!(r, None);
        state.release_mutex(a.pid, a.tid, ma).unwrap();
        assert!(state.pop_completion().is_none());
        state.release_mutex(a.pid, a.tid, ma).unwrap();
        let c = state.pop_completion().unwrap();
        assert_eq!(c.cookie, 2);
        assert_eq!(c.result, WaitResult::Satisfied(0));
        assert_eq!(
            state.release_mutex(a.pid, a.tid, ma).unwrap_err(),
            ArbError::NOT_OWNER
        );
    }

    #[test]
    fn semaphore_count_is_bounded() {
        let mut state = ServerState::new();
        let p = boot(&mut state);
        let (s, _) = state.create_semaphore(p.pid, 0, 1, None).unwrap();
        assert_eq!(state.release_semaphore(p.pid, s, 1).unwrap(), 0);
        assert_eq!(
            state.release_semaphore(p.pid, s, 1).unwrap_err(),
            ArbError::LIMIT_EXCEEDED
        );
        assert_eq!(sem_count(&state, p.pid, s), 1);
        let r = state
            .select(p.pid, p.tid, 1, &[s], WaitMode::Any, WaitTimeout::Poll)
            .unwrap();
        assert_eq!(r, Some(WaitResult::Satisfied(0)));
        assert_eq!(sem_count(&state, p.pid, s), 0);
    }

    #[test]
    fn auto_reset_event_wakes_exactly_one() {
        let mut state = ServerState::new();
        let a = boot(&mut state);
        let b = boot(&mut state);
        let (ha, _) = state.create_event(a.pid, false, false, Some("e")).unwrap();
        let (hb, _) = state.create_event(b.pid, false, false, Some("e")).unwrap();
        assert_eq!(
            state
                .select(a.pid, a.tid, 1, &[ha], WaitMode::Any, WaitTimeout::Infinite)
                .unwrap(),
            None
        );
        assert_eq!(
            state
                .select(b.pid, b.tid, 2, &[hb], WaitMode::Any, WaitTimeout::Infinite)
                .unwrap(),
            None
        );
        state.event_op(a.pid, ha, EventOp::Set).unwrap();
        let c = state.pop_completion().unwrap();
        assert_eq!((c.cookie, c.result), (1, WaitResult::Satisfied(0)));
        assert!(state.pop_completion().is_none());
        assert!(!event_signaled(&state, a.pid, ha));
    }

    #[test]
    fn manual_reset_event_wakes_all_in_order() {
        let mut state = ServerState::new();
        let mut procs = Vec::new();
        let owner = boot(&mut state);
        let (he, _) = state.create_event(owner.pid, true, false, Some("go")).unwrap();
        for cookie in 1..=3u64 {
            let p = boot(&mut state);
            let (h, _) = state.create_event(p.pid, true, false, Some("go")).unwrap();
            assert_eq!(
                state
                    .select(p.pid, p.tid, cookie, &[h], WaitMode::Any, WaitTimeout::Infinite)
                    .unwrap(),
                None
            );
            procs.push(p);
        }
        state.event_op(owner.pid, he, EventOp::Set).unwrap();
        for cookie in 1..=3u64 {
            assert_eq!(state.pop_completion().unwrap().cookie, cookie);
        }
        assert!(event_signaled(&state, owner.pid, he));
    }

    #[test]
    fn fifo_wakeup_on_repeated_signals() {
        let mut state = ServerState::new();
        let owner = boot(&mut state);
        let (he, _) = state.create_event(owner.pid, false, false, Some("turn")).unwrap();
        for cookie in 1..=3u64 {
            let p = boot(&mut state);
            let (h, _) = state.create_event(p.pid, false, false, Some("turn")).unwrap();
            assert_eq!(
                state
                    .select(p.pid, p.tid, cookie, &[h], WaitMode::Any, WaitTimeout::Infinite)
                    .unwrap(),
                None
            );
        }
        for cookie in 1..=3u64 {
            state.event_op(owner.pid, he, EventOp::Set).unwrap();
            let c = state.pop_completion().unwrap();
            assert_eq!(c.cookie, cookie);
            assert!(state.pop_completion().is_none());
        }
    }

    #[test]
    fn pulse_wakes_pending_only() {
        let mut state = ServerState::new();
        let owner = boot(&mut state);
        let any = boot(&mut state);
        let all = boot(&mut state);
        let (he, _) = state.create_event(owner.pid, true, false, Some("p")).unwrap();
        let (h_any, _) = state.create_event(any.pid, true, false, Some("p")).unwrap();
        let (h_all, _) = state.create_event(all.pid, true, false, Some("p")).unwrap();
        let (blocker, _) = state.create_event(all.pid, false, false, None).unwrap();
        assert_eq!(
            state
                .select(any.pid, any.tid, 1, &[h_any], WaitMode::Any, WaitTimeout::Infinite)
                .unwrap(),
            None
        );
        assert_eq!(
            state
                .select(all.pid, all.tid, 2, &[h_all, blocker], WaitMode::All, WaitTimeout::Infinite)
                .unwrap(),
            None
        );
        state.event_op(owner.pid, he, EventOp::Pulse).unwrap();
        // only the satisfiable waiter wakes, and nothing persists
        let c = state.pop_completion().unwrap();
        assert_eq!((c.cookie, c.result), (1, WaitResult::Satisfied(0)));
        assert!(state.pop_completion().is_none());
        assert!(!event_signaled(&state, owner.pid, he));
        // a later arrival sees the event unset
        assert_eq!(
            state
                .select(owner.pid, owner.tid, 3, &[he], WaitMode::Any, WaitTimeout::Poll)
                .unwrap(),
            Some(WaitResult::TimedOut)
        );
    }

    #[test]
    fn wait_all_consumes_atomically() {
        let mut state = ServerState::new();
        let p = boot(&mut state);
        let (e1, _) = state.create_event(p.pid, false, false, None).unwrap();
        let (e2, _) = state.create_event(p.pid, false, false, None).unwrap();
        assert_eq!(
            state
                .select(p.pid, p.tid, 1, &[e1, e2], WaitMode::All, WaitTimeout::Infinite)
                .unwrap(),
            None
        );
        state.event_op(p.pid, e1, EventOp::Set).unwrap();
        // condition incomplete: nothing woken, nothing consumed
        assert!(state.pop_completion().is_none());
        assert!(event_signaled(&state, p.pid, e1));
        state.event_op(p.pid, e2, EventOp::Set).unwrap();
        let c = state.pop_completion().unwrap();
        assert_eq!((c.cookie, c.result), (1, WaitResult::Satisfied(0)));
        assert!(!event_signaled(&state, p.pid, e1));
        assert!(!event_signaled(&state, p.pid, e2));
    }

    #[test]
    fn timeout_fires_once_at_deadline() {
        let mut state = ServerState::new();
        let p = boot(&mut state);
        let (s, _) = state.create_semaphore(p.pid, 0, 8, None).unwrap();
        let base = Instant::now();
        let deadline = base + Duration::from_millis(50);
        assert_eq!(
            state
                .select(p.pid, p.tid, 7, &[s], WaitMode::Any, WaitTimeout::Deadline(deadline))
                .unwrap(),
            None
        );
        assert_eq!(state.next_deadline(), Some(deadline));
        state.fire_timeouts(base + Duration::from_millis(49));
        assert!(state.pop_completion().is_none());
        state.fire_timeouts(deadline);
        let c = state.pop_completion().unwrap();
        assert_eq!((c.cookie, c.result), (7, WaitResult::TimedOut));
        assert_eq!(state.next_deadline(), None);
        state.fire_timeouts(base + Duration::from_millis(60));
        assert!(state.pop_completion().is_none());
        assert_eq!(sem_count(&state, p.pid, s), 0);
    }

    #[test]
    fn poll_never_parks() {
        let mut state = ServerState::new();
        let p = boot(&mut state);
        let (e, _) = state.create_event(p.pid, false, true, None).unwrap();
        assert_eq!(
            state
                .select(p.pid, p.tid, 1, &[e], WaitMode::Any, WaitTimeout::Poll)
                .unwrap(),
            Some(WaitResult::Satisfied(0))
        );
        assert_eq!(
            state
                .select(p.pid, p.tid, 1, &[e], WaitMode::Any, WaitTimeout::Poll)
                .unwrap(),
            Some(WaitResult::TimedOut)
        );
    }

    #[test]
    fn select_rejects_bad_object_lists() {
        let mut state = ServerState::new();
        let p = boot(&mut state);
        let (e, _) = state.create_event(p.pid, false, false, None).unwrap();
        assert_eq!(
            state
                .select(p.pid, p.tid, 1, &[], WaitMode::Any, WaitTimeout::Poll)
                .unwrap_err(),
            ArbError::INVALID_ARGS
        );
        let too_many = vec![e; MAX_WAIT_OBJECTS + 1];
        assert_eq!(
            state
                .select(p.pid, p.tid, 1, &too_many, WaitMode::Any, WaitTimeout::Poll)
                .unwrap_err(),
            ArbError::INVALID_ARGS
        );
        // two handles to the same object are one object twice
        let alias = state
            .dup_handle(p.pid, e, INVALID_HANDLE, Rights::SAME_RIGHTS.bits(), false)
            .unwrap();
        assert_eq!(
            state
                .select(p.pid, p.tid, 1, &[e, alias], WaitMode::All, WaitTimeout::Poll)
                .unwrap_err(),
            ArbError::INVALID_ARGS
        );
    }

    #[test]
    fn abandoned_mutex_reported_once() {
        let mut state = ServerState::new();
        let a = boot(&mut state);
        let b = boot(&mut state);
        let c = boot(&mut state);
        let (_ma, _) = state.create_mutex(a.pid, a.tid, true, Some("m")).unwrap();
        let (mb, _) = state.create_mutex(b.pid, b.tid, false, Some("m")).unwrap();
        let (mc, _) = state.create_mutex(c.pid, c.tid, false, Some("m")).unwrap();
        assert_eq!(
            state
                .select(b.pid, b.tid, 2, &[mb], WaitMode::Any, WaitTimeout::Infinite)
                .unwrap(),
            None
        );
        let thread = state.thread_object(a.tid).unwrap();
        state.terminate_thread_obj(&thread, 1).unwrap();
        let comp = state.pop_completion().unwrap();
        assert_eq!((comp.cookie, comp.result), (2, WaitResult::Abandoned(0)));
        // the next acquisition sees a clean mutex
        state.release_mutex(b.pid, b.tid, mb).unwrap();
        assert_eq!(
            state
                .select(c.pid, c.tid, 3, &[mc], WaitMode::Any, WaitTimeout::Poll)
                .unwrap(),
            Some(WaitResult::Satisfied(0))
        );
    }

    #[test]
    fn thread_death_satisfies_handle_waits() {
        let mut state = ServerState::new();
        let p = boot(&mut state);
        let worker = state.new_thread(p.pid).unwrap();
        assert_eq!(
            state
                .select(p.pid, p.tid, 1, &[worker.handle], WaitMode::Any, WaitTimeout::Infinite)
                .unwrap(),
            None
        );
        let thread = state.thread_object(worker.tid).unwrap();
        state.terminate_thread_obj(&thread, 5).unwrap();
        let c = state.pop_completion().unwrap();
        assert_eq!((c.cookie, c.result), (1, WaitResult::Satisfied(0)));
        // the process is still alive, the worker is not
        assert!(state.process_object(p.pid).is_some());
        assert!(state.thread_object(worker.tid).is_none());
        let info = thread_info(&object(&state, p.pid, worker.handle)).unwrap();
        assert_eq!((info.alive, info.exit_code), (false, 5));
    }

    #[test]
    fn process_termination_cascades() {
        let mut state = ServerState::new();
        let watcher = boot(&mut state);
        let victim = state.new_process(Some(watcher.pid), false).unwrap();
        let extra = state.new_thread(victim.pid).unwrap();
        // watcher waits on the victim through a handle duplicated over
        let victim_in_watcher = state
            .dup_handle(
                victim.pid,
                victim.process_handle,
                victim.parent_handle,
                Rights::SAME_RIGHTS.bits(),
                false,
            )
            .unwrap();
        assert_eq!(
            state
                .select(watcher.pid, watcher.tid, 9, &[victim_in_watcher], WaitMode::Any, WaitTimeout::Infinite)
                .unwrap(),
            None
        );
        let (ev, _) = state.create_event(victim.pid, false, false, None).unwrap();
        let ev_weak = Arc::downgrade(&object(&state, victim.pid, ev));
        let process = state.process_object(victim.pid).unwrap();
        let died = state.terminate_process_obj(&process, 42).unwrap();
        assert_eq!(died, vec![victim.tid, extra.tid]);
        let c = state.pop_completion().unwrap();
        assert_eq!((c.cookie, c.result), (9, WaitResult::Satisfied(0)));
        assert!(state.process_object(victim.pid).is_none());
        assert!(state.thread_object(extra.tid).is_none());
        // the victim's handle table was closed, freeing its objects
        assert!(ev_weak.upgrade().is_none());
        let info = process_info(&object(&state, watcher.pid, victim_in_watcher)).unwrap();
        assert_eq!((info.alive, info.exit_code, info.thread_count), (false, 42, 0));
        assert_eq!(
            state.terminate_process_obj(&process, 0).unwrap_err(),
            ArbError::BAD_STATE
        );
    }

    #[test]
    fn dead_threads_pending_wait_is_dropped() {
        let mut state = ServerState::new();
        let p = boot(&mut state);
        let worker = state.new_thread(p.pid).unwrap();
        let (ev, _) = state.create_event(p.pid, false, false, None).unwrap();
        assert_eq!(
            state
                .select(p.pid, worker.tid, 4, &[ev], WaitMode::Any, WaitTimeout::Infinite)
                .unwrap(),
            None
        );
        let thread = state.thread_object(worker.tid).unwrap();
        state.terminate_thread_obj(&thread, 0).unwrap();
        state.event_op(p.pid, ev, EventOp::Set).unwrap();
        // the signal stays pending instead of waking the dead thread
        assert!(state.pop_completion().is_none());
        assert!(event_signaled(&state, p.pid, ev));
    }

    #[test]
    fn exit_codes_report_still_active_until_death() {
        let mut state = ServerState::new();
        let p = boot(&mut state);
        let info = process_info(&object(&state, p.pid, p.process_handle)).unwrap();
        assert_eq!((info.alive, info.exit_code), (true, crate::task::STILL_ACTIVE));
        let tinfo = thread_info(&object(&state, p.pid, p.thread_handle)).unwrap();
        assert_eq!((tinfo.alive, tinfo.exit_code), (true, crate::task::STILL_ACTIVE));
    }

    #[test]
    fn wait_keeps_object_alive_after_close() {
        let mut state = ServerState::new();
        let p = boot(&mut state);
        let other = boot(&mut state);
        let (ev, _) = state.create_event(p.pid, false, false, Some("keep")).unwrap();
        let (hother, _) = state.create_event(other.pid, false, false, Some("keep")).unwrap();
        assert_eq!(
            state
                .select(other.pid, other.tid, 6, &[hother], WaitMode::Any, WaitTimeout::Infinite)
                .unwrap(),
            None
        );
        // both table entries go away; the registration still pins it
        let weak = Arc::downgrade(&object(&state, p.pid, ev));
        state.close_handle(p.pid, ev).unwrap();
        state.close_handle(other.pid, hother).unwrap();
        assert!(weak.upgrade().is_some());
        state.cancel_wait(6);
        assert!(weak.upgrade().is_none());
    }
}
