use {
    crate::{ArbError, ArbResult},
    bitflags::bitflags,
    core::convert::TryFrom,
};

bitflags! {
    /// Rights are associated with handles and convey privileges to perform
    /// actions on the object the handle refers to. Every access through a
    /// handle is checked against its mask; a missing right fails with
    /// `ACCESS_DENIED` and is never silently downgraded.
    #[derive(Default)]
    pub struct Rights: u32 {
        /// Allows the handle to be used in wait requests.
        #[allow(clippy::identity_op)]
        const SYNCHRONIZE = 1 << 0;

        /// Allows state changes: event set/reset/pulse, mutex and
        /// semaphore release, thread suspend/resume.
        const MODIFY_STATE = 1 << 1;

        /// Allows process/thread information queries.
        const QUERY_INFO = 1 << 2;

        /// Allows terminating the process or thread.
        const TERMINATE = 1 << 3;

        /// Allows handle duplication; on a process handle, also allows
        /// duplicating handles *into* that process.
        const DUPLICATE = 1 << 4;

        /// Used to duplicate a handle with the same rights as the source.
        const SAME_RIGHTS = 1 << 31;

        /// SYNCHRONIZE | MODIFY_STATE | QUERY_INFO | DUPLICATE
        const DEFAULT_EVENT = Self::SYNCHRONIZE.bits | Self::MODIFY_STATE.bits
            | Self::QUERY_INFO.bits | Self::DUPLICATE.bits;

        /// SYNCHRONIZE | MODIFY_STATE | QUERY_INFO | DUPLICATE
        const DEFAULT_MUTEX = Self::DEFAULT_EVENT.bits;

        /// SYNCHRONIZE | MODIFY_STATE | QUERY_INFO | DUPLICATE
        const DEFAULT_SEMAPHORE = Self::DEFAULT_EVENT.bits;

        /// SYNCHRONIZE | QUERY_INFO | TERMINATE | DUPLICATE
        const DEFAULT_PROCESS = Self::SYNCHRONIZE.bits | Self::QUERY_INFO.bits
            | Self::TERMINATE.bits | Self::DUPLICATE.bits;

        /// SYNCHRONIZE | MODIFY_STATE | QUERY_INFO | TERMINATE | DUPLICATE
        const DEFAULT_THREAD = Self::DEFAULT_PROCESS.bits | Self::MODIFY_STATE.bits;
    }
}

impl TryFrom<u32> for Rights {
    type Error = ArbError;

    fn try_from(x: u32) -> ArbResult<Self> {
        Self::from_bits(x).ok_or(ArbError::INVALID_ARGS)
    }
}
