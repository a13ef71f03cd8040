use anyhow::bail;
use std::time::Duration;

use crate::ack_set::AckSet;
use crate::message_header::MessageHeader;

/// Tuning knobs for a session. [`SocketConfig::default_internet`] holds the
///  values the protocol was designed around; deviating from them is mostly
///  useful for tests.
pub struct SocketConfig {
    /// The full datagram size, including the ack prefix and all message
    ///  headers.
    ///
    /// Datagrams are never IP-fragmented by this protocol - messages larger
    ///  than what fits next to the header are chunked across datagrams
    ///  instead. The value must therefore be supported end-to-end by the
    ///  network path. The default of 1452 is the UDP payload of a full
    ///  Ethernet frame with an IPV6 header and no IP options; choosing it
    ///  bigger risks silent drops, choosing it smaller wastes bandwidth.
    pub mtu: usize,

    /// When the send scheduler finds nothing to transmit, it re-checks after
    ///  this period and emits an empty `keep_alive` message so NAT bindings
    ///  stay warm and the peer's inactivity alarm stays quiet.
    pub keepalive_period: Duration,

    /// The receive-inactivity timeout is this multiple of the keepalive
    ///  period. If no datagram at all arrives within that window the session
    ///  closes with a timeout error.
    pub recv_timeout_multiplier: u32,

    /// Artificial delay between consecutive datagrams, per byte of the
    ///  previously sent datagram. Models a ~40 kbit/s worst-case link.
    ///  Not applied to loopback remotes.
    ///
    /// TODO proper congestion control
    pub pacing_delay_per_byte: Duration,

    /// How often the rendezvous helper re-fires its probe datagram while
    ///  waiting for the peer's probe to arrive.
    pub punch_probe_interval: Duration,

    /// Overall deadline for the rendezvous probe exchange.
    pub punch_deadline: Duration,

    /// Upper bound for the buffer of reliable messages received ahead of the
    ///  in-order delivery cursor. Parts that would create an entry beyond
    ///  this bound are dropped; the peer re-sends them until they are acked,
    ///  so this only delays (and never loses) delivery.
    pub max_pending_reliable_messages: usize,
}

impl SocketConfig {
    pub fn default_internet() -> SocketConfig {
        SocketConfig {
            mtu: 1452,
            keepalive_period: Duration::from_millis(200),
            recv_timeout_multiplier: 5,
            pacing_delay_per_byte: Duration::from_micros(200),
            punch_probe_interval: Duration::from_millis(200),
            punch_deadline: Duration::from_secs(10),
            max_pending_reliable_messages: 1024,
        }
    }

    /// If no datagram arrives during this duration, the session is closed and
    ///  registered receivers execute with a timeout error.
    pub fn recv_timeout(&self) -> Duration {
        self.keepalive_period * self.recv_timeout_multiplier
    }

    /// The largest payload accepted for a single message: the wire format
    ///  carries the original message size as a u16.
    pub fn max_message_size(&self) -> usize {
        u16::MAX as usize
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        // every datagram must fit the ack prefix, the message count and at
        //  least one header with one payload byte
        if self.mtu < AckSet::WIRE_LEN + 2 + MessageHeader::SERIALIZED_LEN + 1 {
            bail!("mtu of {} is too small for a single-message datagram", self.mtu);
        }
        if self.mtu > u16::MAX as usize {
            bail!("mtu of {} exceeds the wire format's chunk addressing", self.mtu);
        }
        if self.keepalive_period.is_zero() {
            bail!("keepalive period must be non-zero");
        }
        if self.recv_timeout_multiplier < 2 {
            bail!("receive timeout below twice the keepalive period cannot be kept quiet");
        }
        if self.max_pending_reliable_messages == 0 {
            bail!("pending reliable buffer needs room for at least one message");
        }
        Ok(())
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig::default_internet()
    }
}
