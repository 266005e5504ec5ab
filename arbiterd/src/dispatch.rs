//! The single-writer dispatcher.
//!
//! One task owns the [`ServerState`] and consumes connection events from a
//! channel. Each request runs to completion before the next is looked at;
//! deferred wait replies come back as completions and are flushed after
//! every event. Timeouts ride on the channel receive itself: the loop
//! sleeps at most until the earliest pending deadline.

use {
    crate::conn::{ConnId, Event, Incoming},
    arbiter_object::object::*,
    arbiter_object::state::{process_info, thread_info, ServerState},
    arbiter_object::sync::EventOp,
    arbiter_object::wait::{WaitMode, WaitResult, WaitTimeout},
    arbiter_object::{ArbError, ArbResult},
    arbiter_protocol::{
        Reply, Request, SELECT_ABANDONED, SELECT_SATISFIED, SELECT_TIMED_OUT,
    },
    async_std::channel::Receiver,
    futures::channel::oneshot,
    std::collections::BTreeMap,
    std::time::{Duration, Instant},
};

/// What the dispatcher knows about one connection.
enum Binding {
    /// Connected, handshake not seen yet.
    Fresh,
    /// Acting for one client thread.
    Bound {
        pid: ProcessId,
        tid: ThreadId,
        /// Reply sender of a parked `SELECT`.
        parked: Option<oneshot::Sender<Reply>>,
    },
    /// Thread terminated; any further request closes the connection.
    Dead,
}

enum Outcome {
    Reply(Reply),
    /// `SELECT` deferred; park the reply sender.
    Park,
    /// Drop the reply sender to close the connection.
    Close,
}

pub struct Dispatcher {
    state: ServerState,
    conns: BTreeMap<ConnId, Binding>,
    thread_conns: BTreeMap<ThreadId, ConnId>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher {
            state: ServerState::new(),
            conns: BTreeMap::new(),
            thread_conns: BTreeMap::new(),
        }
    }

    /// The reactor loop. Returns when every event sender is gone.
    pub async fn run(mut self, events: Receiver<Event>) {
        loop {
            let event = match self.state.next_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match async_std::future::timeout(wait, events.recv()).await {
                        Ok(event) => event,
                        Err(_) => {
                            self.state.fire_timeouts(Instant::now());
                            self.flush_completions();
                            continue;
                        }
                    }
                }
                None => events.recv().await,
            };
            let event = match event {
                Ok(event) => event,
                Err(_) => break,
            };
            match event {
                Event::Request(incoming) => self.handle_request(incoming),
                Event::Disconnected(conn) => self.handle_disconnect(conn),
            }
            self.state.fire_timeouts(Instant::now());
            self.flush_completions();
        }
    }

    fn handle_request(&mut self, incoming: Incoming) {
        let Incoming { conn, request, reply, .. } = incoming;
        let binding = self.conns.entry(conn).or_insert(Binding::Fresh);
        let (pid, tid) = match binding {
            Binding::Dead => {
                drop(reply);
                return;
            }
            Binding::Fresh => {
                self.handshake(conn, request, reply);
                return;
            }
            Binding::Bound { pid, tid, .. } => (*pid, *tid),
        };
        if let Request::NewProcess { .. } | Request::NewThread { .. } = request {
            let _ = reply.send(Reply::Error(ArbError::BAD_STATE as i32));
            return;
        }
        match self.perform(conn, pid, tid, request) {
            Ok(Outcome::Reply(r)) => {
                let _ = reply.send(r);
            }
            Ok(Outcome::Park) => {
                if let Some(Binding::Bound { parked, .. }) = self.conns.get_mut(&conn) {
                    *parked = Some(reply);
                }
            }
            Ok(Outcome::Close) => drop(reply),
            Err(err) => {
                let _ = reply.send(Reply::Error(err as i32));
            }
        }
    }

    /// First request on a connection: bind it to a client thread or drop
    /// it.
    fn handshake(&mut self, conn: ConnId, request: Request, reply: oneshot::Sender<Reply>) {
        let bound = match request {
            Request::NewProcess { parent_pid, inherit } => {
                let parent = if parent_pid == 0 { None } else { Some(parent_pid) };
                match self.state.new_process(parent, inherit) {
                    Ok(r) => {
                        let _ = reply.send(Reply::NewProcess {
                            pid: r.pid,
                            tid: r.tid,
                            process_handle: r.process_handle,
                            thread_handle: r.thread_handle,
                            parent_handle: r.parent_handle,
                        });
                        Some((r.pid, r.tid))
                    }
                    Err(err) => {
                        let _ = reply.send(Reply::Error(err as i32));
                        None
                    }
                }
            }
            Request::NewThread { pid } => match self.state.new_thread(pid) {
                Ok(r) => {
                    let _ = reply.send(Reply::NewThread { tid: r.tid, handle: r.handle });
                    Some((pid, r.tid))
                }
                Err(err) => {
                    let _ = reply.send(Reply::Error(err as i32));
                    None
                }
            },
            other => {
                warn!("conn {}: {:?} before handshake", conn, other.opcode());
                self.conns.insert(conn, Binding::Dead);
                drop(reply);
                return;
            }
        };
        if let Some((pid, tid)) = bound {
            self.conns.insert(conn, Binding::Bound { pid, tid, parked: None });
            self.thread_conns.insert(tid, conn);
        }
    }

    fn perform(
        &mut self,
        conn: ConnId,
        pid: ProcessId,
        tid: ThreadId,
        request: Request,
    ) -> ArbResult<Outcome> {
        let reply = match request {
            Request::NewProcess { .. } | Request::NewThread { .. } => {
                unreachable!("handled before perform")
            }
            Request::CloseHandle { handle } => {
                self.state.close_handle(pid, handle)?;
                Reply::Empty
            }
            Request::DupHandle { src, dst_process, access, inherit } => {
                let handle = self.state.dup_handle(pid, src, dst_process, access, inherit)?;
                Reply::Handle { handle, existed: false }
            }
            Request::CreateEvent { manual_reset, initial, name } => {
                let (handle, existed) =
                    self.state.create_event(pid, manual_reset, initial, name.as_deref())?;
                Reply::Handle { handle, existed }
            }
            Request::EventOp { handle, op } => {
                let op = EventOp::from_raw(op)?;
                self.state.event_op(pid, handle, op)?;
                Reply::Empty
            }
            Request::CreateMutex { owned, name } => {
                let (handle, existed) =
                    self.state.create_mutex(pid, tid, owned, name.as_deref())?;
                Reply::Handle { handle, existed }
            }
            Request::ReleaseMutex { handle } => {
                self.state.release_mutex(pid, tid, handle)?;
                Reply::Empty
            }
            Request::CreateSemaphore { initial, max, name } => {
                let (handle, existed) =
                    self.state.create_semaphore(pid, initial, max, name.as_deref())?;
                Reply::Handle { handle, existed }
            }
            Request::ReleaseSemaphore { handle, count } => {
                let prev_count = self.state.release_semaphore(pid, handle, count)?;
                Reply::ReleaseSemaphore { prev_count }
            }
            Request::OpenNamedObj { access, name } => {
                let handle = self.state.open_named(pid, access, &name)?;
                Reply::Handle { handle, existed: true }
            }
            Request::Select { wait_all, timeout_ms, handles } => {
                let mode = if wait_all { WaitMode::All } else { WaitMode::Any };
                let timeout = if timeout_ms < 0 {
                    WaitTimeout::Infinite
                } else if timeout_ms == 0 {
                    WaitTimeout::Poll
                } else {
                    WaitTimeout::Deadline(Instant::now() + Duration::from_millis(timeout_ms as u64))
                };
                match self.state.select(pid, tid, conn, &handles, mode, timeout)? {
                    Some(result) => select_reply(result),
                    None => return Ok(Outcome::Park),
                }
            }
            Request::GetProcessInfo { handle } => {
                let obj = self.process_object(pid, handle, Rights::QUERY_INFO)?;
                let info = process_info(&obj)?;
                Reply::ProcessInfo {
                    pid: info.pid,
                    alive: info.alive,
                    exit_code: info.exit_code,
                    thread_count: info.thread_count,
                }
            }
            Request::GetThreadInfo { handle } => {
                let obj = self.thread_object(pid, tid, handle, Rights::QUERY_INFO)?;
                let info = thread_info(&obj)?;
                Reply::ThreadInfo {
                    tid: info.tid,
                    pid: info.pid,
                    alive: info.alive,
                    suspend_count: info.suspend_count,
                    exit_code: info.exit_code,
                }
            }
            Request::TerminateProcess { handle, exit_code } => {
                let obj = self.process_object(pid, handle, Rights::TERMINATE)?;
                let died = self.state.terminate_process_obj(&obj, exit_code)?;
                let killed_self = died.contains(&tid);
                self.sever_threads(&died);
                if killed_self {
                    return Ok(Outcome::Close);
                }
                Reply::Empty
            }
            Request::TerminateThread { handle, exit_code } => {
                let obj = self.thread_object(pid, tid, handle, Rights::TERMINATE)?;
                let died = self.state.terminate_thread_obj(&obj, exit_code)?;
                let killed_self = died.contains(&tid);
                self.sever_threads(&died);
                if killed_self {
                    return Ok(Outcome::Close);
                }
                Reply::Empty
            }
            Request::SuspendThread { handle } => {
                let obj = self.thread_object(pid, tid, handle, Rights::MODIFY_STATE)?;
                let prev_count = obj.with_thread(|t| t.suspend())??;
                Reply::SuspendCount { prev_count }
            }
            Request::ResumeThread { handle } => {
                let obj = self.thread_object(pid, tid, handle, Rights::MODIFY_STATE)?;
                let prev_count = obj.with_thread(|t| t.resume())??;
                Reply::SuspendCount { prev_count }
            }
        };
        Ok(Outcome::Reply(reply))
    }

    /// Resolve a process handle, 0 meaning the caller's own process.
    fn process_object(
        &self,
        pid: ProcessId,
        handle: HandleValue,
        rights: Rights,
    ) -> ArbResult<ObjectRef> {
        if handle == INVALID_HANDLE {
            return self.state.process_object(pid).ok_or(ArbError::BAD_STATE);
        }
        let obj = self.state.object_for_handle(pid, handle, rights)?;
        obj.with_process(|_| ())?;
        Ok(obj)
    }

    /// Resolve a thread handle, 0 meaning the calling thread.
    fn thread_object(
        &self,
        pid: ProcessId,
        tid: ThreadId,
        handle: HandleValue,
        rights: Rights,
    ) -> ArbResult<ObjectRef> {
        if handle == INVALID_HANDLE {
            return self.state.thread_object(tid).ok_or(ArbError::BAD_STATE);
        }
        let obj = self.state.object_for_handle(pid, handle, rights)?;
        obj.with_thread(|_| ())?;
        Ok(obj)
    }

    /// Cut the connections of terminated threads. Dropping a parked reply
    /// sender closes a waiting connection at once; an idle one is closed
    /// on its next request.
    fn sever_threads(&mut self, died: &[ThreadId]) {
        for tid in died {
            if let Some(conn) = self.thread_conns.remove(tid) {
                if let Some(binding) = self.conns.get_mut(&conn) {
                    *binding = Binding::Dead;
                }
            }
        }
    }

    /// Disconnect is an implicit `terminate(thread, 0)`.
    fn handle_disconnect(&mut self, conn: ConnId) {
        match self.conns.remove(&conn) {
            Some(Binding::Bound { tid, .. }) => {
                self.state.cancel_wait(conn);
                self.thread_conns.remove(&tid);
                if let Some(thread) = self.state.thread_object(tid) {
                    if let Ok(died) = self.state.terminate_thread_obj(&thread, 0) {
                        self.sever_threads(&died);
                    }
                }
                info!("conn {}: disconnected, thread {} terminated", conn, tid);
            }
            _ => debug!("conn {}: disconnected", conn),
        }
    }

    /// Deliver resolved deferred waits to their parked connections.
    fn flush_completions(&mut self) {
        while let Some(completion) = self.state.pop_completion() {
            let conn = completion.cookie as ConnId;
            if let Some(Binding::Bound { parked, .. }) = self.conns.get_mut(&conn) {
                if let Some(sender) = parked.take() {
                    let _ = sender.send(select_reply(completion.result));
                    continue;
                }
            }
            warn!("completion for conn {} with no parked wait", conn);
        }
    }
}

fn select_reply(result: WaitResult) -> Reply {
    let (outcome, index) = match result {
        WaitResult::Satisfied(index) => (SELECT_SATISFIED, index),
        WaitResult::Abandoned(index) => (SELECT_ABANDONED, index),
        WaitResult::TimedOut => (SELECT_TIMED_OUT, 0),
    };
    Reply::Select { outcome, index }
}
