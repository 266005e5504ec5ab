use crate::{ArbError, ArbResult};

/// Counted semaphore.
///
/// The count stays in `[0, max]` always. A release that would overflow the
/// maximum fails with `LIMIT_EXCEEDED` and leaves the count unchanged; a
/// count underflow is a server bug and panics.
pub struct SemaphoreState {
    count: u32,
    max: u32,
}

impl SemaphoreState {
    /// Create a new semaphore. `max` must be non-zero and `initial` must
    /// not exceed it.
    pub fn new(initial: u32, max: u32) -> ArbResult<Self> {
        if max == 0 || initial > max {
            return Err(ArbError::INVALID_ARGS);
        }
        Ok(SemaphoreState {
            count: initial,
            max,
        })
    }

    /// Current count.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Whether a wait would be satisfied now.
    pub fn satisfiable(&self) -> bool {
        self.count > 0
    }

    /// Consumption side effect of a satisfied wait.
    pub fn consume(&mut self) {
        assert!(self.count > 0, "semaphore consumed at zero");
        self.count -= 1;
    }

    /// `ReleaseSemaphore(n)`. Returns the previous count. No partial
    /// release: on overflow the count is untouched.
    pub fn release(&mut self, n: u32) -> ArbResult<u32> {
        if n == 0 {
            return Err(ArbError::INVALID_ARGS);
        }
        if u64::from(self.count) + u64::from(n) > u64::from(self.max) {
            return Err(ArbError::LIMIT_EXCEEDED);
        }
        let prev = self.count;
        self.count += n;
        Ok(prev)
    }
}
