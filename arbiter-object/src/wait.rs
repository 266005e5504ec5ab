//! Pending wait registrations.
//!
//! The queue keeps entries in registration order; wake evaluation walks it
//! oldest-first so a stream of signals cannot starve an early waiter.
//! Deadlines live in a sorted map keyed by `(Instant, cookie)`,
//! independent of object state, so the reactor can sleep exactly until the
//! next one. Completions are queued here and drained by the dispatcher
//! after every request, which is what turns a "blocking" wait into a
//! deferred reply.

use {
    crate::object::{ObjectRef, ThreadId},
    std::collections::{BTreeMap, VecDeque},
    std::sync::Arc,
    std::time::Instant,
};

/// Maximum number of objects in one wait request.
pub const MAX_WAIT_OBJECTS: usize = 64;

/// Identifies the parked requester of a deferred wait reply; the daemon
/// uses the connection id. Unique among pending waits because a connection
/// has at most one request outstanding.
pub type WaitCookie = u64;

/// Wait-any succeeds when any object is satisfiable, wait-all when all of
/// them are at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    Any,
    All,
}

/// How a wait request may bound its duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    /// Wait until satisfied or cancelled.
    Infinite,
    /// Never park: report `TimedOut` if not immediately satisfiable.
    Poll,
    /// Park until the deadline passes.
    Deadline(Instant),
}

/// The outcome of a resolved wait. Indices refer to the request's object
/// list; a satisfied wait-all reports index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Satisfied(u32),
    /// The wait was satisfied by a mutex whose previous owner died while
    /// holding it.
    Abandoned(u32),
    TimedOut,
}

/// A pending wait registration. Holds strong references: an object cannot
/// be freed while a wait refers to it.
pub struct WaitEntry {
    pub cookie: WaitCookie,
    pub thread: ThreadId,
    pub objects: Vec<ObjectRef>,
    pub mode: WaitMode,
    pub deadline: Option<Instant>,
}

impl WaitEntry {
    /// Whether the entry waits on `obj`.
    pub fn references(&self, obj: &ObjectRef) -> bool {
        self.objects.iter().any(|o| Arc::ptr_eq(o, obj))
    }
}

/// A resolved wait, ready to be delivered as the deferred reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitCompletion {
    pub cookie: WaitCookie,
    pub result: WaitResult,
}

/// FIFO queue of pending waits plus the deadline map and the completion
/// out-queue.
#[derive(Default)]
pub struct WaitQueue {
    entries: VecDeque<WaitEntry>,
    timers: BTreeMap<(Instant, WaitCookie), ()>,
    completions: VecDeque<WaitCompletion>,
}

impl WaitQueue {
    /// Park an entry at the back of the queue.
    pub fn register(&mut self, entry: WaitEntry) {
        if let Some(deadline) = entry.deadline {
            self.timers.insert((deadline, entry.cookie), ());
        }
        self.entries.push_back(entry);
    }

    /// Remove an entry (and its timer) by cookie.
    pub(crate) fn remove(&mut self, cookie: WaitCookie) -> Option<WaitEntry> {
        let pos = self.entries.iter().position(|e| e.cookie == cookie)?;
        let entry = self.entries.remove(pos).unwrap();
        if let Some(deadline) = entry.deadline {
            self.timers.remove(&(deadline, cookie));
        }
        Some(entry)
    }

    /// Drop the timer of an entry already detached by `take_entries`.
    pub(crate) fn remove_timer(&mut self, deadline: Instant, cookie: WaitCookie) {
        self.timers.remove(&(deadline, cookie));
    }

    /// Drop a pending wait without completing it. Returns whether one was
    /// pending. Used for disconnects and for threads that die while
    /// parked.
    pub fn cancel(&mut self, cookie: WaitCookie) -> bool {
        self.remove(cookie).is_some()
    }

    /// Drop every pending wait registered by `tid`.
    pub fn cancel_thread(&mut self, tid: ThreadId) {
        let cookies: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.thread == tid)
            .map(|e| e.cookie)
            .collect();
        for cookie in cookies {
            self.remove(cookie);
        }
    }

    /// Earliest pending deadline, the reactor's poll timeout.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.keys().next().map(|&(t, _)| t)
    }

    /// Cookie of the earliest deadline at or before `now`, if any.
    pub(crate) fn first_due(&self, now: Instant) -> Option<WaitCookie> {
        self.timers
            .keys()
            .next()
            .filter(|&&(t, _)| t <= now)
            .map(|&(_, c)| c)
    }

    /// Detach all entries for wake evaluation; the caller re-registers the
    /// ones that stay pending.
    pub(crate) fn take_entries(&mut self) -> VecDeque<WaitEntry> {
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn put_entries(&mut self, entries: VecDeque<WaitEntry>) {
        debug_assert!(self.entries.is_empty());
        self.entries = entries;
    }

    pub(crate) fn push_completion(&mut self, cookie: WaitCookie, result: WaitResult) {
        self.completions.push_back(WaitCompletion { cookie, result });
    }

    /// Pop the next resolved wait, in resolution order.
    pub fn pop_completion(&mut self) -> Option<WaitCompletion> {
        self.completions.pop_front()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
