//! Unified error type for the bridge.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` (with the `defmt` feature) for on-target logging.

/// Top-level error type used across the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Every capture pool slot is in use; the advertisement was dropped.
    ResourceExhausted,

    /// A ring buffer could not take all bytes; `dropped` were discarded.
    TransportOverflow { dropped: usize },

    /// Host command or sensor payload could not be interpreted.
    Protocol(ProtocolError),

    /// A connection step failed; the link has been (or is being) torn down.
    ConnectionFailed(ConnectError),

    /// The wireless stack itself is unusable. Fatal.
    StackFailure(StackError),
}

/// Reasons a command line or payload is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// Terminated line without a `,` separator.
    MissingDelimiter,
    /// Line is not valid ASCII/UTF-8.
    NotText,
    /// Command token names no supported device kind.
    UnknownDevice,
    /// Argument is not a `XX:XX:XX:XX:XX:XX` address.
    InvalidAddress,
    /// Sensor notification shorter than the fixed layout.
    MalformedPayload { len: usize },
}

/// Connection lifecycle failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectError {
    /// A connection is already outstanding.
    Busy,
    /// The stack refused to start the connection.
    Rejected,
    /// Connection-established callback reported a nonzero status.
    Status(u8),
    /// Configuration write failed (request or completion status).
    Write(u8),
    /// Subscription failed (request or completion status).
    Subscribe(u8),
    /// Link closed (by the peer or the stack) before a reading arrived.
    LinkLost(u8),
    /// No wireless event within the supervision window.
    Timeout,
}

/// Fatal stack conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StackError {
    /// Passive scanning could not be (re)started.
    ScanStart,
    /// The radio task stopped accepting requests.
    RequestQueueFull,
}

// Convenience conversions

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<ConnectError> for Error {
    fn from(e: ConnectError) -> Self {
        Error::ConnectionFailed(e)
    }
}

impl From<StackError> for Error {
    fn from(e: StackError) -> Self {
        Error::StackFailure(e)
    }
}

impl Error {
    /// `true` for conditions the firmware cannot recover from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::StackFailure(_))
    }
}
