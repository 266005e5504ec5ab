//! Kernel object basis.
//!
//! Every kernel entity the server hands out — event, mutex, semaphore,
//! process, thread — is a reference-counted [`KObject`]: an immutable id
//! and optional name, plus a type-specific payload behind a lock. The
//! payload is a closed sum type dispatched by pattern matching, so the
//! state machines stay exhaustively checked by the compiler.
//!
//! The `Arc` count *is* the object's reference count: a handle table entry
//! and a pending wait registration each hold one strong reference, and the
//! object is finalized when the last of them is dropped. Waiter lists and
//! mutex-ownership lists only ever hold `Weak` references, so the object
//! graph has no strong cycles.

use {
    crate::sync::{EventState, MutexState, SemaphoreState},
    crate::task::{ProcessState, ThreadState},
    crate::{ArbError, ArbResult},
    spin::Mutex,
    std::fmt::Debug,
    std::sync::Arc,
};

pub use {self::handle::*, self::rights::*};

mod handle;
mod rights;

/// The type of a kernel object id. Ids are never reused for the life of
/// the server.
pub type KoID = u64;

/// Process identifier, visible to clients.
pub type ProcessId = u32;

/// Thread identifier, visible to clients.
pub type ThreadId = u32;

/// A shared reference to a kernel object.
pub type ObjectRef = Arc<KObject>;

/// Type-specific object state. One variant per object type the server
/// implements; adding a variant forces every dispatch site to handle it.
pub enum Payload {
    Event(EventState),
    Mutex(MutexState),
    Semaphore(SemaphoreState),
    Process(ProcessState),
    Thread(ThreadState),
}

impl Payload {
    /// Object type name, used by logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Event(_) => "Event",
            Payload::Mutex(_) => "Mutex",
            Payload::Semaphore(_) => "Semaphore",
            Payload::Process(_) => "Process",
            Payload::Thread(_) => "Thread",
        }
    }

    /// Object type tag, as reported on the wire.
    pub fn type_tag(&self) -> u32 {
        match self {
            Payload::Event(_) => 1,
            Payload::Mutex(_) => 2,
            Payload::Semaphore(_) => 3,
            Payload::Process(_) => 4,
            Payload::Thread(_) => 5,
        }
    }
}

/// A kernel object.
pub struct KObject {
    id: KoID,
    name: Option<String>,
    payload: Mutex<Payload>,
}

impl KObject {
    /// Create a new kernel object. Ids are allocated by
    /// [`ServerState`](crate::state::ServerState).
    pub fn new(id: KoID, name: Option<String>, payload: Payload) -> ObjectRef {
        Arc::new(KObject {
            id,
            name,
            payload: Mutex::new(payload),
        })
    }

    /// The object's id.
    pub fn id(&self) -> KoID {
        self.id
    }

    /// The object's name in the shared namespace, if it was created with
    /// one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Object type name, used by logs.
    pub fn type_name(&self) -> &'static str {
        self.payload.lock().type_name()
    }

    /// Object type tag, as reported on the wire.
    pub fn type_tag(&self) -> u32 {
        self.payload.lock().type_tag()
    }

    /// The full rights a fresh handle to this object carries by default.
    pub fn default_rights(&self) -> Rights {
        match &*self.payload.lock() {
            Payload::Event(_) => Rights::DEFAULT_EVENT,
            Payload::Mutex(_) => Rights::DEFAULT_MUTEX,
            Payload::Semaphore(_) => Rights::DEFAULT_SEMAPHORE,
            Payload::Process(_) => Rights::DEFAULT_PROCESS,
            Payload::Thread(_) => Rights::DEFAULT_THREAD,
        }
    }

    /// Whether a wait by `tid` on this object could be satisfied right now,
    /// without consuming anything.
    pub fn signaled_for(&self, tid: ThreadId) -> bool {
        match &*self.payload.lock() {
            Payload::Event(e) => e.satisfiable(),
            Payload::Mutex(m) => m.satisfiable(tid),
            Payload::Semaphore(s) => s.satisfiable(),
            Payload::Process(p) => !p.alive(),
            Payload::Thread(t) => !t.alive(),
        }
    }

    /// Apply the consumption side effect of a satisfied wait by `tid`:
    /// clear an auto-reset event, acquire a mutex, decrement a semaphore.
    /// Process and thread death signals are not consumed.
    ///
    /// The caller must have observed [`signaled_for`](KObject::signaled_for)
    /// and must not let another request interleave in between.
    ///
    /// Returns `(abandoned, newly_owned_mutex)`.
    pub fn consume(&self, tid: ThreadId) -> (bool, bool) {
        match &mut *self.payload.lock() {
            Payload::Event(e) => {
                e.consume();
                (false, false)
            }
            Payload::Mutex(m) => m.acquire(tid),
            Payload::Semaphore(s) => {
                s.consume();
                (false, false)
            }
            Payload::Process(_) | Payload::Thread(_) => (false, false),
        }
    }

    /// Run `f` on the event state, or fail with `WRONG_TYPE`.
    pub fn with_event<R>(&self, f: impl FnOnce(&mut EventState) -> R) -> ArbResult<R> {
        match &mut *self.payload.lock() {
            Payload::Event(e) => Ok(f(e)),
            _ => Err(ArbError::WRONG_TYPE),
        }
    }

    /// Run `f` on the mutex state, or fail with `WRONG_TYPE`.
    pub fn with_mutex<R>(&self, f: impl FnOnce(&mut MutexState) -> R) -> ArbResult<R> {
        match &mut *self.payload.lock() {
            Payload::Mutex(m) => Ok(f(m)),
            _ => Err(ArbError::WRONG_TYPE),
        }
    }

    /// Run `f` on the semaphore state, or fail with `WRONG_TYPE`.
    pub fn with_semaphore<R>(&self, f: impl FnOnce(&mut SemaphoreState) -> R) -> ArbResult<R> {
        match &mut *self.payload.lock() {
            Payload::Semaphore(s) => Ok(f(s)),
            _ => Err(ArbError::WRONG_TYPE),
        }
    }

    /// Run `f` on the process state, or fail with `WRONG_TYPE`.
    pub fn with_process<R>(&self, f: impl FnOnce(&mut ProcessState) -> R) -> ArbResult<R> {
        match &mut *self.payload.lock() {
            Payload::Process(p) => Ok(f(p)),
            _ => Err(ArbError::WRONG_TYPE),
        }
    }

    /// Run `f` on the thread state, or fail with `WRONG_TYPE`.
    pub fn with_thread<R>(&self, f: impl FnOnce(&mut ThreadState) -> R) -> ArbResult<R> {
        match &mut *self.payload.lock() {
            Payload::Thread(t) => Ok(f(t)),
            _ => Err(ArbError::WRONG_TYPE),
        }
    }
}

impl Debug for KObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("KObject")
            .field(&self.id)
            .field(&self.type_name())
            .field(&self.name)
            .finish()
    }
}
