use crate::object::ThreadId;
use crate::{ArbError, ArbResult};

/// Mutual-exclusion object with recursive ownership and abandonment.
///
/// States: free (`owner == None`, not abandoned), owned (recursive,
/// counted), abandoned (`owner == None`, flag set). The abandoned flag is
/// raised when the owning thread dies while holding the mutex and is
/// reported to exactly one subsequent acquirer.
pub struct MutexState {
    owner: Option<ThreadId>,
    recursion: u32,
    abandoned: bool,
}

impl MutexState {
    /// Create a new mutex, optionally owned by its creator.
    pub fn new(owner: Option<ThreadId>) -> Self {
        MutexState {
            owner,
            recursion: owner.map_or(0, |_| 1),
            abandoned: false,
        }
    }

    /// Current owner, if any.
    pub fn owner(&self) -> Option<ThreadId> {
        self.owner
    }

    /// Whether a wait by `tid` would be satisfied now: the mutex is free,
    /// or `tid` already owns it (recursive acquire).
    pub fn satisfiable(&self, tid: ThreadId) -> bool {
        match self.owner {
            None => true,
            Some(owner) => owner == tid,
        }
    }

    /// Acquire for `tid` as the consumption side effect of a satisfied
    /// wait. Returns `(was_abandoned, newly_owned)`; the abandoned flag is
    /// cleared here so it is observed exactly once.
    pub fn acquire(&mut self, tid: ThreadId) -> (bool, bool) {
        let was_abandoned = self.abandoned;
        self.abandoned = false;
        match self.owner {
            Some(owner) => {
                assert_eq!(owner, tid, "mutex acquired while owned by another thread");
                self.recursion += 1;
                (was_abandoned, false)
            }
            None => {
                self.owner = Some(tid);
                self.recursion = 1;
                (was_abandoned, true)
            }
        }
    }

    /// `ReleaseMutex` by `tid`. Fails with `NOT_OWNER` unless `tid` holds
    /// the mutex. Returns `true` when the mutex became free.
    pub fn release(&mut self, tid: ThreadId) -> ArbResult<bool> {
        if self.owner != Some(tid) {
            return Err(ArbError::NOT_OWNER);
        }
        self.recursion -= 1;
        if self.recursion == 0 {
            self.owner = None;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Owner death: drop ownership and flag the mutex abandoned.
    pub fn abandon(&mut self) {
        self.owner = None;
        self.recursion = 0;
        self.abandoned = true;
    }
}
