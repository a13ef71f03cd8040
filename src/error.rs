use std::io;
use thiserror::Error;

/// The error kinds a session can surface to application code, either as the
///  result of an operation or through a registered receive callback.
///
/// A session reports at most one fatal error over its lifetime: the first of
///  [`ParseError`](TransportError::ParseError), [`TimedOut`](TransportError::TimedOut),
///  [`ConnectionReset`](TransportError::ConnectionReset) or [`Io`](TransportError::Io)
///  closes the session and is broadcast once to whichever receive callbacks are
///  registered at that moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    /// decoder underflow or an unknown message type tag in an inbound datagram
    #[error("malformed datagram from peer")]
    ParseError,

    /// no datagram arrived within the inactivity window
    #[error("no datagram received within the inactivity window")]
    TimedOut,

    /// the peer sent a `close` message
    #[error("session closed by peer")]
    ConnectionReset,

    /// a local `close` cancelled the operation; never delivered to callbacks
    #[error("operation aborted by local close")]
    OperationAborted,

    /// the rendezvous probe exchange did not produce a datagram from the peer
    #[error("hole punching failed")]
    HolePunchFailed,

    /// the payload does not fit the wire format's 16 bit message size
    #[error("message of {size} bytes exceeds the maximum of {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// the session is already closed
    #[error("session is closed")]
    Closed,

    /// the underlying UDP socket reported an error
    #[error("socket i/o error: {0:?}")]
    Io(io::ErrorKind),
}
