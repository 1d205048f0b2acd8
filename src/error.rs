//! IPC error codes
//!
//! Every operation returns a discriminated error. The taxonomy matters:
//! `BadHandle` is a malformed handle value while `NotFound` is a well-formed
//! handle that denotes nothing - callers and tests rely on the distinction.
//! `TimedOut`, `ChannelClosed` and `NotEnoughBuffer` are expected conditions
//! in normal operation, not bugs.

/// IPC error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Handle value is out of range (negative or >= table capacity)
    BadHandle,
    /// In-range handle (or path) that denotes no live object
    NotFound,
    /// Semantically wrong operation or malformed parameters
    InvalidArgs,
    /// Handle table, port namespace or buffer pool capacity exhausted
    NoResources,
    /// A port already owns the requested path
    AlreadyExists,
    /// Peer or port side of a connection is gone
    ChannelClosed,
    /// Blocking call expired before its condition fired
    TimedOut,
    /// No pending message or connection to retrieve
    NoMsg,
    /// Receiving side has no free buffer - transient, retry later
    NotEnoughBuffer,
    /// Handle transfer requested but not supported
    NotSupported,
    /// Message exceeds the port's configured buffer size
    TooBig,
    /// Null or invalid memory reference from the caller
    Fault,
}

/// Result type for IPC operations
pub type Result<T> = core::result::Result<T, Error>;

/// Success code reported by the C-style surface
pub const NO_ERROR: i32 = 0;

impl Error {
    /// LK/Trusty numeric error code
    pub const fn code(self) -> i32 {
        match self {
            Error::NotFound => -2,
            Error::NoMsg => -4,
            Error::InvalidArgs => -8,
            Error::NotEnoughBuffer => -9,
            Error::TimedOut => -13,
            Error::AlreadyExists => -14,
            Error::ChannelClosed => -15,
            Error::NotSupported => -24,
            Error::TooBig => -25,
            Error::Fault => -40,
            Error::NoResources => -41,
            Error::BadHandle => -42,
        }
    }

    /// Short symbolic name for diagnostics
    pub const fn name(self) -> &'static str {
        match self {
            Error::BadHandle => "ERR_BAD_HANDLE",
            Error::NotFound => "ERR_NOT_FOUND",
            Error::InvalidArgs => "ERR_INVALID_ARGS",
            Error::NoResources => "ERR_NO_RESOURCES",
            Error::AlreadyExists => "ERR_ALREADY_EXISTS",
            Error::ChannelClosed => "ERR_CHANNEL_CLOSED",
            Error::TimedOut => "ERR_TIMED_OUT",
            Error::NoMsg => "ERR_NO_MSG",
            Error::NotEnoughBuffer => "ERR_NOT_ENOUGH_BUFFER",
            Error::NotSupported => "ERR_NOT_SUPPORTED",
            Error::TooBig => "ERR_TOO_BIG",
            Error::Fault => "ERR_FAULT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let all = [
            Error::BadHandle,
            Error::NotFound,
            Error::InvalidArgs,
            Error::NoResources,
            Error::AlreadyExists,
            Error::ChannelClosed,
            Error::TimedOut,
            Error::NoMsg,
            Error::NotEnoughBuffer,
            Error::NotSupported,
            Error::TooBig,
            Error::Fault,
        ];
        for i in 0..all.len() {
            for j in (i + 1)..all.len() {
                assert_ne!(all[i].code(), all[j].code());
            }
            assert!(all[i].code() < 0);
        }
    }

    #[test]
    fn test_lk_code_values() {
        assert_eq!(Error::BadHandle.code(), -42);
        assert_eq!(Error::NotFound.code(), -2);
        assert_eq!(Error::TimedOut.code(), -13);
        assert_eq!(Error::ChannelClosed.code(), -15);
    }
}
