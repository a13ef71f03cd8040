//! A connection-oriented datagram transport layered over UDP for peers that
//!  first have to find each other through their NATs. A session is
//!  established by simultaneous hole punching - both sides probe the other's
//!  advertised endpoint until a datagram crosses - and then carries two
//!  logical streams over one socket pair:
//!
//! * a *reliable* stream: messages are chunked across MTU-bounded datagrams,
//!   re-sent until acknowledged, reassembled and delivered to the application
//!   strictly in send order with no gaps
//! * an *unreliable* stream: messages are chunked and sent exactly once;
//!   the receiver delivers whatever completes and abandons an in-progress
//!   message as soon as a newer one overtakes it
//!
//! ## Design goals
//!
//! * One session per socket pair, exactly one remote peer - no multiplexing,
//!    no server role. Higher-level routing composes sessions instead.
//! * The abstraction is sending / receiving *messages* (defined-length chunks
//!    of data), not byte streams.
//! * Datagrams are never IP-fragmented: chunking happens above UDP against a
//!    configured MTU, since path MTU discovery does not work reliably.
//! * Every datagram carries the receiver's cumulative acks in its header, so
//!    acknowledgement piggybacks on whatever traffic flows anyway; an
//!    ack-only datagram is emitted when there is something to ack and nothing
//!    to say.
//! * Sessions stay alive through NAT bindings by exchanging keep-alives when
//!    idle, and detect a dead peer through a receive-inactivity timeout.
//! * Send pacing is proportional to the previous datagram's size - a crude
//!    stand-in for congestion control that at least prevents bursts.
//! * Receive callbacks are single-shot: they are moved out of their slot
//!    before being invoked, so a delivery can never re-enter itself, and the
//!    application decides when it is ready for the next message by
//!    re-registering.
//!
//! ## Datagram layout
//!
//! All numbers in network byte order (BE):
//!
//! ```ascii
//! 0:  ack set (9 bytes): u8 flags | u32 highest | u32 predecessor bitmask
//! 9:  message count (u16)
//! 11: message parts, each:
//!       u8 type | u32 sequence number | u16 original size
//!       | u16 chunk start | u16 chunk len | chunk payload
//! type := 0 sync | 1 keep_alive | 2 unreliable | 3 reliable | 4 close
//! ```
//!
//! The `sync` message is this side's first reliable message (an empty one):
//!  it rides on the hole-punch probe and seeds the peer's sequence number
//!  baseline. `keep_alive` and `close` always use sequence number 0 and are
//!  neither acknowledged nor reassembled.
//!
//! ## Timing
//!
//! Keepalive period 200 ms; inactivity timeout 5x the keepalive period;
//!  pacing delay 200 us per sent byte (zero towards loopback); MTU 1452.
//!  All configurable, see [`config::SocketConfig`].

mod ack_set;
pub mod config;
mod datagram_buffer;
pub mod error;
mod hole_punch;
mod in_message;
mod message_header;
mod out_message;
mod send_socket;
mod sequence_number;
pub mod socket;
mod transmit_queue;

pub use config::SocketConfig;
pub use error::TransportError;
pub use sequence_number::SequenceNumber;
pub use socket::{OnFlush, OnReceive, Socket};
