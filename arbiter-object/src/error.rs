/// The type returned by object and handle operations.
pub type ArbResult<T = ()> = Result<T, ArbError>;

/// Statuses are signed 32 bit integers. Zero is the OK status, negative
/// values are errors defined here and travel on the wire as the reply
/// status. Wait outcomes (timed out, abandoned) are not errors and are
/// reported in the select reply payload instead.
#[allow(non_camel_case_types)]
#[allow(clippy::upper_case_acronyms)]
#[repr(i32)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ArbError {
    /// Success.
    OK = 0,

    // ======= Parameter errors =======
    /// An argument is invalid: unknown flag bits, a zero semaphore
    /// maximum, too many or duplicate objects in a wait.
    INVALID_ARGS = -10,

    /// A handle value does not refer to a live entry in the caller's
    /// handle table.
    INVALID_HANDLE = -11,

    /// The object is the wrong type for the operation, e.g. releasing a
    /// semaphore through an event handle.
    WRONG_TYPE = -12,

    // ======= State errors =======
    /// The current state of the object does not allow the operation,
    /// e.g. terminating an already-dead task or resuming a thread with a
    /// zero suspend count.
    BAD_STATE = -20,

    /// The named object does not exist.
    NOT_FOUND = -25,

    // ======= Permission errors =======
    /// The handle's access mask does not include the right required by
    /// the operation. Never silently downgraded.
    ACCESS_DENIED = -30,

    /// A mutex release by a thread that does not own the mutex.
    NOT_OWNER = -31,

    /// A semaphore release that would push the count above its maximum.
    /// The count is left unchanged.
    LIMIT_EXCEEDED = -32,
}

impl ArbError {
    /// Recover a status from its wire representation.
    pub fn from_raw(raw: i32) -> Option<ArbError> {
        Some(match raw {
            0 => ArbError::OK,
            -10 => ArbError::INVALID_ARGS,
            -11 => ArbError::INVALID_HANDLE,
            -12 => ArbError::WRONG_TYPE,
            -20 => ArbError::BAD_STATE,
            -25 => ArbError::NOT_FOUND,
            -30 => ArbError::ACCESS_DENIED,
            -31 => ArbError::NOT_OWNER,
            -32 => ArbError::LIMIT_EXCEEDED,
            _ => return None,
        })
    }
}
