use bytes::{Buf, BufMut};
use std::collections::BTreeMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace};

use crate::ack_set::AckSet;
use crate::config::SocketConfig;
use crate::datagram_buffer::DatagramBuffer;
use crate::error::TransportError;
use crate::hole_punch;
use crate::in_message::{InMessageFull, InMessagePart, PendingMessage};
use crate::message_header::MessageType;
use crate::out_message::OutMessage;
use crate::send_socket::SendSocket;
use crate::sequence_number::SequenceNumber;
use crate::transmit_queue::TransmitQueue;

/// Single-shot receive callback: it is moved out of its slot before being
///  invoked, so each registration yields at most one delivery. Re-register
///  from inside the callback (or any time later) to keep receiving.
pub type OnReceive = Box<dyn FnOnce(Result<Vec<u8>, TransportError>) + Send + 'static>;

/// Invoked the next time the send scheduler finds nothing left to transmit.
pub type OnFlush = Box<dyn FnOnce() + Send + 'static>;

enum Command {
    SendReliable(Vec<u8>),
    SendUnreliable(Vec<u8>),
    ReceiveReliable(OnReceive),
    ReceiveUnreliable(OnReceive),
    Flush(OnFlush),
    Close,
}

/// A rendezvous-connected session to a single remote endpoint, carrying one
///  reliable ordered stream and one unreliable best-effort stream over a
///  dedicated UDP socket.
///
/// The handle is cheap to clone; all clones refer to the same session. The
///  session itself lives on a spawned driver task that owns every piece of
///  session state exclusively - handles talk to it through a command channel,
///  which is what makes the registration and close operations safe to call
///  from inside a delivery callback. Dropping the last handle tears the
///  session down silently.
#[derive(Clone)]
pub struct Socket {
    command_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<SharedState>,
    config: Arc<SocketConfig>,
}

struct SharedState {
    /// flipped by `close()` (and by teardown); the driver re-reads this after
    ///  every excursion into user code, so a callback closing the session
    ///  stops all further deliveries
    closed: AtomicBool,
    local_addr: SocketAddr,
    remote_addr: OnceLock<SocketAddr>,
    pre_connect: Mutex<Option<PreConnect>>,
}

/// the parts the driver takes over once the rendezvous has succeeded
struct PreConnect {
    udp: UdpSocket,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Socket {
    /// Bind a fresh UDP socket for a session. The usual choice is an
    ///  ephemeral port, e.g. `"0.0.0.0:0"`.
    pub async fn bind(bind_addr: SocketAddr, config: SocketConfig) -> anyhow::Result<Socket> {
        config.validate()?;
        let udp = UdpSocket::bind(bind_addr).await?;
        Self::from_socket(udp, config)
    }

    /// Build a session around an already-bound UDP socket. The session owns
    ///  the socket exclusively from here on.
    pub fn from_socket(udp: UdpSocket, config: SocketConfig) -> anyhow::Result<Socket> {
        config.validate()?;
        let local_addr = udp.local_addr()?;
        info!("bound transport socket to {:?}", local_addr);

        let (command_tx, command_rx) = mpsc::unbounded_channel();

        Ok(Socket {
            command_tx,
            shared: Arc::new(SharedState {
                closed: AtomicBool::new(false),
                local_addr,
                remote_addr: OnceLock::new(),
                pre_connect: Mutex::new(Some(PreConnect { udp, commands: command_rx })),
            }),
            config: Arc::new(config),
        })
    }

    pub fn local_endpoint(&self) -> SocketAddr {
        self.shared.local_addr
    }

    pub fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.shared.remote_addr.get().copied()
    }

    /// Establish the session by simultaneous hole punching: both peers call
    ///  this towards each other's address at roughly the same time. The probe
    ///  datagram carries this side's SYN message, which also seeds the peer's
    ///  sequence number baseline.
    ///
    /// On success the remote endpoint is bound and the session driver starts
    ///  sending and receiving. On failure the session is unusable.
    pub async fn rendezvous_connect(&self, remote: SocketAddr) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let Some(PreConnect { udp, commands }) = self.shared.pre_connect.lock().unwrap().take() else {
            debug!("rendezvous_connect on a session that is already connecting");
            return Err(TransportError::Closed);
        };

        let remote = sanitize_address(remote);

        // the SYN consumes the first reliable sequence number
        let syn_sn = SequenceNumber::ZERO;
        let mut syn = OutMessage::new(true, MessageType::Sync, syn_sn, Vec::new());
        let probe = construct_packet_with_one_message(&AckSet::new(), self.config.mtu, &mut syn);

        match hole_punch::punch_hole(&udp, remote, probe.as_ref(), &self.config).await {
            Ok(observed_remote) => {
                let _ = self.shared.remote_addr.set(observed_remote);

                let udp = Arc::new(udp);
                let mut driver = SessionDriver::new(
                    udp.clone(),
                    Arc::new(udp),
                    observed_remote,
                    commands,
                    self.shared.clone(),
                    self.config.clone(),
                );
                driver.next_reliable_sn = syn_sn.next();
                // queue the SYN so it is re-sent until the peer acks it
                driver.transmit_queue.insert(syn);

                tokio::spawn(driver.run());
                Ok(())
            }
            Err(error) => {
                self.shared.closed.store(true, Ordering::SeqCst);
                Err(error)
            }
        }
    }

    /// Queue a message for in-order, retransmitted-until-acked delivery.
    pub fn send_reliable(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.check_payload_size(&data)?;
        self.send_command(Command::SendReliable(data))
    }

    /// Queue a message for best-effort delivery: it is sent exactly once, and
    ///  the receiver abandons it if a newer unreliable message overtakes it.
    pub fn send_unreliable(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.check_payload_size(&data)?;
        self.send_command(Command::SendUnreliable(data))
    }

    /// Register the single-shot receiver for the reliable stream.
    pub fn receive_reliable(&self, on_receive: OnReceive) {
        let _ = self.send_command(Command::ReceiveReliable(on_receive));
    }

    /// Register the single-shot receiver for the unreliable stream.
    pub fn receive_unreliable(&self, on_receive: OnReceive) {
        let _ = self.send_command(Command::ReceiveUnreliable(on_receive));
    }

    /// Invoke `on_flush` the next time the scheduler has nothing to send;
    ///  that includes right away if the session is already idle.
    pub fn flush(&self, on_flush: OnFlush) {
        let _ = self.send_command(Command::Flush(on_flush));
    }

    /// Close the session: a best-effort `close` datagram is sent to the peer,
    ///  the socket is closed and all timers stop. No callback fires after
    ///  this returns. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.command_tx.send(Command::Close);
    }

    /// If no datagram arrives during this duration, the session closes and
    ///  registered receivers execute with a timeout error.
    pub fn recv_timeout_duration(&self) -> Duration {
        self.config.recv_timeout()
    }

    fn check_payload_size(&self, data: &[u8]) -> Result<(), TransportError> {
        if data.len() > self.config.max_message_size() {
            return Err(TransportError::MessageTooLarge {
                size: data.len(),
                max: self.config.max_message_size(),
            });
        }
        Ok(())
    }

    fn send_command(&self, command: Command) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.command_tx.send(command).map_err(|_| TransportError::Closed)
    }
}

fn sanitize_address(ep: SocketAddr) -> SocketAddr {
    if ep.ip().is_unspecified() {
        match ep.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), ep.port()),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), ep.port()),
        }
    }
    else {
        ep
    }
}

/// ack prefix + message count of one + a single message - the shape of both
///  the SYN probe and the close datagram
fn construct_packet_with_one_message(acks: &AckSet, mtu: usize, message: &mut OutMessage) -> DatagramBuffer {
    let mut buf = DatagramBuffer::new(mtu);
    acks.ser(&mut buf);
    buf.put_u16(1);
    let encoded = message.try_encode(&mut buf);
    debug_assert!(encoded, "a fresh datagram always has room for one message");
    buf
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    /// nothing in flight, the scheduler may assemble the next datagram
    Pending,
    /// a datagram is being handed to the UDP socket
    Sending,
    /// sent, pacing timer armed; the scheduler stays quiet until it fires
    Waiting,
}

/// the peer's sequence number baseline, established by its SYN message
struct SyncState {
    last_used_reliable_sn: SequenceNumber,
    last_used_unreliable_sn: SequenceNumber,
}

/// Owns all session state and the UDP socket. Runs as a spawned task,
///  multiplexing the command channel, the socket and the three timers
///  (pacing, keepalive, receive-inactivity) - so all state transitions and
///  user callbacks are serialized without any locking.
struct SessionDriver {
    config: Arc<SocketConfig>,
    shared: Arc<SharedState>,
    commands: mpsc::UnboundedReceiver<Command>,
    receive_socket: Arc<UdpSocket>,
    send_socket: Arc<dyn SendSocket>,
    remote_endpoint: SocketAddr,

    open: bool,
    send_state: SendState,
    transmit_queue: TransmitQueue,
    /// `None` until the peer's SYN arrives; non-SYN inbound messages are
    ///  discarded (beyond scheduling acks) while this is unset
    sync: Option<SyncState>,
    pending_reliable_messages: BTreeMap<SequenceNumber, PendingMessage>,
    pending_unreliable_message: Option<PendingMessage>,
    scheduled_ack_flush: bool,
    /// what we have received - sent to the peer in every datagram header
    received_message_ids: AckSet,
    /// what the peer reports having received - replaced on every inbound datagram
    received_message_ids_by_peer: AckSet,
    next_reliable_sn: SequenceNumber,
    next_unreliable_sn: SequenceNumber,

    on_receive_reliable: Option<OnReceive>,
    on_receive_unreliable: Option<OnReceive>,
    on_flush: Option<OnFlush>,

    tx_buffer: DatagramBuffer,
    rx_buffer: Vec<u8>,

    pace_deadline: Option<Instant>,
    keepalive_deadline: Option<Instant>,
    recv_deadline: Instant,
}

impl SessionDriver {
    fn new(
        receive_socket: Arc<UdpSocket>,
        send_socket: Arc<dyn SendSocket>,
        remote_endpoint: SocketAddr,
        commands: mpsc::UnboundedReceiver<Command>,
        shared: Arc<SharedState>,
        config: Arc<SocketConfig>,
    ) -> SessionDriver {
        let mtu = config.mtu;
        SessionDriver {
            config,
            shared,
            commands,
            receive_socket,
            send_socket,
            remote_endpoint,
            open: true,
            send_state: SendState::Pending,
            transmit_queue: TransmitQueue::new(),
            sync: None,
            pending_reliable_messages: BTreeMap::new(),
            pending_unreliable_message: None,
            scheduled_ack_flush: false,
            received_message_ids: AckSet::new(),
            received_message_ids_by_peer: AckSet::new(),
            next_reliable_sn: SequenceNumber::ZERO,
            next_unreliable_sn: SequenceNumber::ZERO.next(),
            on_receive_reliable: None,
            on_receive_unreliable: None,
            on_flush: None,
            tx_buffer: DatagramBuffer::new(mtu),
            rx_buffer: vec![0; mtu],
            pace_deadline: None,
            keepalive_deadline: None,
            recv_deadline: Instant::now(),
        }
    }

    async fn run(mut self) {
        debug!("session driver starting, remote {:?}", self.remote_endpoint);

        self.recv_deadline = Instant::now() + self.config.recv_timeout();
        self.start_sending().await;

        while self.open {
            select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            debug!("all session handles dropped - tearing down");
                            self.close_session(true).await;
                        }
                    }
                }
                _ = sleep_until_opt(self.pace_deadline), if self.pace_deadline.is_some() => {
                    self.pace_deadline = None;
                    self.send_state = SendState::Pending;
                    self.start_sending().await;
                }
                _ = sleep_until_opt(self.keepalive_deadline), if self.keepalive_deadline.is_some() => {
                    self.keepalive_deadline = None;
                    self.on_send_keepalive_alarm().await;
                }
                _ = time::sleep_until(self.recv_deadline) => {
                    self.on_recv_timeout_alarm().await;
                }
                received = self.receive_socket.recv_from(&mut self.rx_buffer) => {
                    self.on_receive(received).await;
                }
            }
        }

        debug!("session driver for remote {:?} stopped", self.remote_endpoint);
    }

    async fn handle_command(&mut self, command: Command) {
        if self.enforce_external_close().await {
            return;
        }

        match command {
            Command::SendReliable(data) => {
                let sn = self.next_reliable_sn;
                self.next_reliable_sn = sn.next();
                trace!("queueing reliable message #{} of {} bytes", sn, data.len());
                self.transmit_queue.emplace(true, MessageType::Reliable, sn, data);
                self.start_sending().await;
            }
            Command::SendUnreliable(data) => {
                let sn = self.next_unreliable_sn;
                self.next_unreliable_sn = sn.next();
                trace!("queueing unreliable message #{} of {} bytes", sn, data.len());
                self.transmit_queue.emplace(false, MessageType::Unreliable, sn, data);
                self.start_sending().await;
            }
            Command::ReceiveReliable(on_receive) => {
                self.on_receive_reliable = Some(on_receive);
                // deliveries may have been held back while no receiver was
                //  registered
                self.replay_pending_messages().await;
            }
            Command::ReceiveUnreliable(on_receive) => {
                self.on_receive_unreliable = Some(on_receive);
            }
            Command::Flush(on_flush) => {
                self.on_flush = Some(on_flush);
                self.start_sending().await;
            }
            Command::Close => {
                self.close_session(true).await;
            }
        }
    }

    // ---- send path ---------------------------------------------------------

    /// Entry point of the send scheduler, called whenever new payload shows
    ///  up, a datagram arrives (ack piggyback), or one of the send-side
    ///  alarms fires. Gated by `SendState` so there is never more than one
    ///  datagram in flight.
    async fn start_sending(&mut self) {
        if self.enforce_external_close().await {
            return;
        }
        if self.send_state != SendState::Pending {
            return;
        }

        self.tx_buffer.clear();
        self.received_message_ids.ser(&mut self.tx_buffer);

        let count = self.encode_payload();

        if count == 0 && !self.scheduled_ack_flush {
            // nothing to send and no acks owed: flush, then stay quiet until
            //  the keepalive alarm fires
            if let Some(on_flush) = self.on_flush.take() {
                on_flush();
                if self.enforce_external_close().await {
                    return;
                }
            }
            self.keepalive_deadline = Some(Instant::now() + self.config.keepalive_period);
            return;
        }

        self.scheduled_ack_flush = false;
        self.keepalive_deadline = None;
        self.send_state = SendState::Sending;

        let result = self.send_socket
            .send_datagram(self.remote_endpoint, self.tx_buffer.as_ref())
            .await;
        self.on_send(result).await;
    }

    /// Walk one transmit queue cycle, packing message parts after the `u16`
    ///  count placeholder until the datagram is full. Returns the number of
    ///  parts encoded.
    fn encode_payload(&mut self) -> usize {
        let count_offset = self.tx_buffer.len();
        self.tx_buffer.put_u16(0);

        let mut count: u16 = 0;
        let mut cycle = self.transmit_queue.cycle();

        while let Some(message) = cycle.current() {
            if message.resend_until_acked
                && self.received_message_ids_by_peer.is_in(message.sequence_number)
            {
                cycle.erase();
                continue;
            }

            if !message.try_encode(&mut self.tx_buffer) {
                break;
            }
            count += 1;

            if !message.fully_sent() {
                // the datagram is full mid-message; the continuation goes out
                //  first thing in the next one
                break;
            }

            if !message.resend_until_acked {
                // unreliable entries are sent only once
                cycle.erase();
            }
            else {
                cycle.advance();
            }
        }

        self.tx_buffer.overwrite_u16_at(count_offset, count);
        count as usize
    }

    async fn on_send(&mut self, result: io::Result<usize>) {
        self.send_state = SendState::Pending;

        let size = match result {
            Ok(size) => size,
            Err(e) => {
                debug!("error sending datagram to {:?}: {}", self.remote_endpoint, e);
                self.handle_error(TransportError::Io(e.kind())).await;
                return;
            }
        };

        self.send_state = SendState::Waiting;

        // Pace the next datagram proportionally to this one's size. The
        //  factor models a 40 kbit/s worst-case link:
        //    delay_us = 10^6 * size / (40000/8) = 200 * size
        // TODO proper congestion control
        let delay = if self.remote_endpoint.ip().is_loopback() {
            // no artificial delay on the same host
            Duration::ZERO
        }
        else {
            self.config.pacing_delay_per_byte * size as u32
        };
        self.pace_deadline = Some(Instant::now() + delay);
    }

    async fn on_send_keepalive_alarm(&mut self) {
        trace!("idle for a keepalive period - scheduling keep-alive");
        self.transmit_queue.emplace(false, MessageType::KeepAlive, SequenceNumber::ZERO, Vec::new());
        self.start_sending().await;
    }

    // ---- receive path ------------------------------------------------------

    async fn on_receive(&mut self, received: io::Result<(usize, SocketAddr)>) {
        if self.enforce_external_close().await {
            return;
        }

        let (size, from) = match received {
            Ok(x) => x,
            Err(e) => {
                debug!("receive error on socket: {}", e);
                self.handle_error(TransportError::Io(e.kind())).await;
                return;
            }
        };

        // ignore datagrams from unknown sources
        if from != self.remote_endpoint {
            trace!("discarding datagram from unknown source {:?}", from);
            self.recv_deadline = Instant::now() + self.config.recv_timeout();
            return;
        }

        trace!("received {} byte datagram from {:?}", size, from);
        let datagram = self.rx_buffer[..size].to_vec();
        let mut parse_buf: &[u8] = &datagram;

        let acks = match AckSet::deser(&mut parse_buf) {
            Ok(acks) => acks,
            Err(_) => {
                self.handle_error(TransportError::ParseError).await;
                return;
            }
        };
        // Full replacement: a reordered older datagram reduces our knowledge
        //  until the next one arrives. TODO merge instead of replacing
        self.received_message_ids_by_peer = acks;

        let message_count = match parse_buf.try_get_u16() {
            Ok(count) => count,
            Err(_) => {
                self.handle_error(TransportError::ParseError).await;
                return;
            }
        };

        for _ in 0..message_count {
            let part = match InMessagePart::deser(&mut parse_buf) {
                Ok(part) => part,
                Err(e) => {
                    debug!("unparsable message part from {:?}: {}", from, e);
                    self.handle_error(TransportError::ParseError).await;
                    return;
                }
            };
            self.handle_message(part).await;
            if !self.open {
                return;
            }
        }

        // piggyback acks (and whatever else is queued) onto the reply
        self.start_sending().await;
        if !self.open {
            return;
        }
        self.recv_deadline = Instant::now() + self.config.recv_timeout();
    }

    async fn handle_message(&mut self, part: InMessagePart) {
        match part.message_type {
            MessageType::Sync => self.handle_sync_message(&part),
            MessageType::KeepAlive => {}
            MessageType::Unreliable => self.handle_unreliable_message(part).await,
            MessageType::Reliable => self.handle_reliable_message(part).await,
            MessageType::Close => self.handle_close_message().await,
        }
    }

    fn handle_sync_message(&mut self, part: &InMessagePart) {
        self.scheduled_ack_flush = true;
        if self.sync.is_none() {
            debug!("received SYN #{} from {:?} - session established", part.sequence_number, self.remote_endpoint);
            self.received_message_ids.try_add(part.sequence_number);
            self.sync = Some(SyncState {
                last_used_reliable_sn: part.sequence_number,
                last_used_unreliable_sn: part.sequence_number,
            });
        }
    }

    async fn handle_close_message(&mut self) {
        debug!("peer {:?} closed the session", self.remote_endpoint);
        // the peer is gone - no point in echoing a close datagram back
        self.close_session(false).await;
        self.dispatch_error(TransportError::ConnectionReset);
    }

    async fn handle_unreliable_message(&mut self, part: InMessagePart) {
        if self.on_receive_unreliable.is_none() {
            return;
        }
        let Some(last_used) = self.sync.as_ref().map(|s| s.last_used_unreliable_sn) else {
            return;
        };
        if part.sequence_number <= last_used {
            return;
        }

        if part.is_complete() {
            let full = part.into_complete_message().expect("checked complete");
            self.deliver_unreliable(full).await;
            return;
        }

        let replace_slot = match &self.pending_unreliable_message {
            None => true,
            // an older in-progress message is abandoned for a newer one
            Some(pending) if pending.sequence_number < part.sequence_number => true,
            Some(pending) if pending.sequence_number > part.sequence_number => {
                trace!("discarding fragment of outdated unreliable message #{}", part.sequence_number);
                return;
            }
            Some(_) => false,
        };

        if replace_slot {
            self.pending_unreliable_message = Some(PendingMessage::from_part(&part));
            return;
        }

        let pending = self.pending_unreliable_message.as_mut().expect("merge case has a slot");
        pending.update_payload(part.chunk_start, &part.payload);
        if pending.is_complete() {
            let full = self.pending_unreliable_message
                .take()
                .expect("just merged into it")
                .into_complete_message()
                .expect("checked complete");
            self.deliver_unreliable(full).await;
        }
    }

    /// returns false if the message was not delivered or the callback closed
    ///  the session
    async fn deliver_unreliable(&mut self, message: InMessageFull) -> bool {
        let Some(on_receive) = self.on_receive_unreliable.take() else {
            return false;
        };
        let sn = message.sequence_number;

        on_receive(Ok(message.payload));

        if self.enforce_external_close().await {
            return false;
        }
        self.sync.as_mut().expect("checked by caller").last_used_unreliable_sn = sn;
        self.pending_unreliable_message = None;
        true
    }

    async fn handle_reliable_message(&mut self, part: InMessagePart) {
        self.scheduled_ack_flush = true;
        let Some(last_used) = self.sync.as_ref().map(|s| s.last_used_reliable_sn) else {
            return;
        };
        if !self.received_message_ids.can_add(part.sequence_number) {
            trace!("reliable message #{} was seen before - discarding", part.sequence_number);
            return;
        }

        // fast path: the next in-order message arriving in one piece is
        //  delivered without touching the pending buffer
        if part.sequence_number == last_used.next() && part.is_complete() {
            let full = part.into_complete_message().expect("checked complete");
            if self.user_handle_reliable_msg(full).await {
                self.replay_pending_messages().await;
            }
            return;
        }

        if let Some(pending) = self.pending_reliable_messages.get_mut(&part.sequence_number) {
            pending.update_payload(part.chunk_start, &part.payload);
            self.replay_pending_messages().await;
        }
        else {
            if self.pending_reliable_messages.len() >= self.config.max_pending_reliable_messages {
                debug!("pending reliable buffer full - dropping part #{} until the peer re-sends it", part.sequence_number);
                return;
            }
            self.pending_reliable_messages.insert(part.sequence_number, PendingMessage::from_part(&part));
        }
    }

    /// Deliver buffered reliable messages in strictly ascending order for as
    ///  long as the next expected one is complete and the user keeps a
    ///  receiver registered.
    async fn replay_pending_messages(&mut self) {
        loop {
            let Some(next) = self.sync.as_ref().map(|s| s.last_used_reliable_sn.next()) else {
                return;
            };
            let deliverable = match self.pending_reliable_messages.get(&next) {
                Some(pending) if pending.is_complete() => {
                    pending.complete_message().expect("checked complete")
                }
                _ => return,
            };

            if !self.user_handle_reliable_msg(deliverable).await {
                // no receiver registered (or the callback closed the
                //  session): keep the message buffered
                return;
            }
            self.pending_reliable_messages.remove(&next);
        }
    }

    /// Move the reliable receive callback out of its slot and invoke it. Only
    ///  when the callback returns with the session still alive is the message
    ///  acknowledged and the delivery cursor advanced - so a delivery that
    ///  tears the session down is never acked.
    async fn user_handle_reliable_msg(&mut self, message: InMessageFull) -> bool {
        let Some(on_receive) = self.on_receive_reliable.take() else {
            return false;
        };
        let sn = message.sequence_number;

        on_receive(Ok(message.payload));

        if self.enforce_external_close().await {
            return false;
        }
        self.received_message_ids.try_add(sn);
        self.sync.as_mut().expect("sync precedes reliable delivery").last_used_reliable_sn = sn;
        true
    }

    // ---- lifecycle ---------------------------------------------------------

    async fn on_recv_timeout_alarm(&mut self) {
        if self.enforce_external_close().await {
            return;
        }
        debug!("nothing received from {:?} for {:?}", self.remote_endpoint, self.config.recv_timeout());
        self.handle_error(TransportError::TimedOut).await;
    }

    /// Fatal error: tear down and broadcast the error once to whichever
    ///  receive callbacks are registered.
    async fn handle_error(&mut self, error: TransportError) {
        if !self.open {
            return;
        }
        debug!("fatal session error: {}", error);
        self.close_session(true).await;
        self.dispatch_error(error);
    }

    fn dispatch_error(&mut self, error: TransportError) {
        let unreliable = self.on_receive_unreliable.take();
        let reliable = self.on_receive_reliable.take();
        if let Some(on_receive) = unreliable {
            on_receive(Err(error));
        }
        if let Some(on_receive) = reliable {
            on_receive(Err(error));
        }
    }

    /// Stop all timers, optionally send the best-effort `close` datagram, and
    ///  leave the driver loop. Idempotent.
    async fn close_session(&mut self, send_close_message: bool) {
        if !self.open {
            return;
        }
        self.open = false;
        self.shared.closed.store(true, Ordering::SeqCst);
        self.pace_deadline = None;
        self.keepalive_deadline = None;

        if send_close_message {
            self.sync_send_close_message().await;
        }
        // dropping the driver drops the UDP socket, cancelling anything
        //  still in flight
    }

    async fn sync_send_close_message(&mut self) {
        let mut message = OutMessage::new(false, MessageType::Close, SequenceNumber::ZERO, Vec::new());
        let datagram = construct_packet_with_one_message(&self.received_message_ids, self.config.mtu, &mut message);

        if let Err(e) = self.send_socket.send_datagram(self.remote_endpoint, datagram.as_ref()).await {
            debug!("best-effort close datagram to {:?} failed: {}", self.remote_endpoint, e);
        }
    }

    /// The liveness check after every excursion into user code, and before
    ///  acting on anything the select loop wakes up for: `close()` on a
    ///  handle takes effect here, before any further callback can fire.
    ///  Returns true if the session is (now) down.
    async fn enforce_external_close(&mut self) -> bool {
        if self.shared.closed.load(Ordering::SeqCst) {
            self.close_session(true).await;
        }
        !self.open
    }
}

fn sleep_until_opt(deadline: Option<Instant>) -> time::Sleep {
    // only polled when the deadline is set; the fallback just needs to be
    //  a valid instant
    time::sleep_until(deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(24 * 60 * 60)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::send_socket::MockSendSocket;
    use rstest::rstest;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    fn test_config() -> SocketConfig {
        SocketConfig {
            keepalive_period: Duration::from_millis(50),
            punch_probe_interval: Duration::from_millis(10),
            punch_deadline: Duration::from_secs(5),
            ..SocketConfig::default_internet()
        }
    }

    fn localhost(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn connected_pair() -> (Socket, Socket) {
        let a = Socket::bind(localhost(0), test_config()).await.unwrap();
        let b = Socket::bind(localhost(0), test_config()).await.unwrap();

        let (ra, rb) = tokio::join!(
            a.rendezvous_connect(b.local_endpoint()),
            b.rendezvous_connect(a.local_endpoint()),
        );
        ra.unwrap();
        rb.unwrap();

        (a, b)
    }

    // ---- white-box driver tests --------------------------------------------

    fn noop_send_socket() -> Arc<dyn SendSocket> {
        let mut mock = MockSendSocket::new();
        mock.expect_send_datagram().returning(|_, datagram| Ok(datagram.len()));
        Arc::new(mock)
    }

    async fn whitebox_driver(send_socket: Arc<dyn SendSocket>) -> SessionDriver {
        let udp = Arc::new(UdpSocket::bind(localhost(0)).await.unwrap());
        // the driver loop is never run in these tests, so the command channel
        //  can be dropped right away
        let (_, commands) = mpsc::unbounded_channel();

        let shared = Arc::new(SharedState {
            closed: AtomicBool::new(false),
            local_addr: udp.local_addr().unwrap(),
            remote_addr: OnceLock::new(),
            pre_connect: Mutex::new(None),
        });

        SessionDriver::new(udp, send_socket, localhost(9), commands, shared, Arc::new(test_config()))
    }

    fn part(message_type: MessageType, sn: u32, original_size: u16, chunk_start: u16, payload: &[u8]) -> InMessagePart {
        InMessagePart {
            message_type,
            sequence_number: SequenceNumber::from_raw(sn),
            original_size,
            chunk_start,
            payload: payload.to_vec(),
        }
    }

    fn collecting_callback(collected: &Arc<Mutex<Vec<Vec<u8>>>>) -> OnReceive {
        let collected = collected.clone();
        Box::new(move |result| collected.lock().unwrap().push(result.unwrap()))
    }

    #[tokio::test]
    async fn test_out_of_order_parts_are_delivered_in_order() {
        let mut driver = whitebox_driver(noop_send_socket()).await;
        driver.sync = Some(SyncState {
            last_used_reliable_sn: SequenceNumber::from_raw(3),
            last_used_unreliable_sn: SequenceNumber::from_raw(3),
        });

        let delivered: Arc<Mutex<Vec<Vec<u8>>>> = Default::default();

        driver.on_receive_reliable = Some(collecting_callback(&delivered));
        driver.handle_reliable_message(part(MessageType::Reliable, 5, 4, 0, b"five")).await;
        driver.handle_reliable_message(part(MessageType::Reliable, 6, 3, 0, b"six")).await;
        assert!(delivered.lock().unwrap().is_empty());

        // the gap closes: #4 goes straight to the receiver, #5 and #6 wait
        //  for re-registration (single-shot contract)
        driver.handle_reliable_message(part(MessageType::Reliable, 4, 4, 0, b"four")).await;
        assert_eq!(*delivered.lock().unwrap(), vec![b"four".to_vec()]);

        driver.on_receive_reliable = Some(collecting_callback(&delivered));
        driver.replay_pending_messages().await;
        driver.on_receive_reliable = Some(collecting_callback(&delivered));
        driver.replay_pending_messages().await;

        assert_eq!(
            *delivered.lock().unwrap(),
            vec![b"four".to_vec(), b"five".to_vec(), b"six".to_vec()]
        );
        assert!(driver.pending_reliable_messages.is_empty());
        assert_eq!(driver.sync.as_ref().unwrap().last_used_reliable_sn, SequenceNumber::from_raw(6));
    }

    #[tokio::test]
    async fn test_pending_buffer_never_holds_delivered_sequence_numbers() {
        let mut driver = whitebox_driver(noop_send_socket()).await;
        driver.sync = Some(SyncState {
            last_used_reliable_sn: SequenceNumber::ZERO,
            last_used_unreliable_sn: SequenceNumber::ZERO,
        });

        let delivered: Arc<Mutex<Vec<Vec<u8>>>> = Default::default();
        for sn in [3u32, 2, 1] {
            driver.on_receive_reliable = Some(collecting_callback(&delivered));
            driver.handle_reliable_message(part(MessageType::Reliable, sn, 1, 0, &[sn as u8])).await;

            let last_used = driver.sync.as_ref().unwrap().last_used_reliable_sn;
            assert!(driver.pending_reliable_messages.keys().all(|&k| k > last_used));
        }
        driver.on_receive_reliable = Some(collecting_callback(&delivered));
        driver.replay_pending_messages().await;
        driver.on_receive_reliable = Some(collecting_callback(&delivered));
        driver.replay_pending_messages().await;

        assert_eq!(*delivered.lock().unwrap(), vec![vec![1], vec![2], vec![3]]);
    }

    #[tokio::test]
    async fn test_fragmented_reliable_message_is_reassembled() {
        let mut driver = whitebox_driver(noop_send_socket()).await;
        driver.sync = Some(SyncState {
            last_used_reliable_sn: SequenceNumber::ZERO,
            last_used_unreliable_sn: SequenceNumber::ZERO,
        });

        let delivered: Arc<Mutex<Vec<Vec<u8>>>> = Default::default();
        driver.on_receive_reliable = Some(collecting_callback(&delivered));

        driver.handle_reliable_message(part(MessageType::Reliable, 1, 6, 0, b"abc")).await;
        assert!(delivered.lock().unwrap().is_empty());
        driver.handle_reliable_message(part(MessageType::Reliable, 1, 6, 3, b"def")).await;

        assert_eq!(*delivered.lock().unwrap(), vec![b"abcdef".to_vec()]);
        assert!(driver.pending_reliable_messages.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_reliable_message_is_suppressed() {
        let mut driver = whitebox_driver(noop_send_socket()).await;
        driver.sync = Some(SyncState {
            last_used_reliable_sn: SequenceNumber::ZERO,
            last_used_unreliable_sn: SequenceNumber::ZERO,
        });

        let delivered: Arc<Mutex<Vec<Vec<u8>>>> = Default::default();
        driver.on_receive_reliable = Some(collecting_callback(&delivered));
        driver.handle_reliable_message(part(MessageType::Reliable, 1, 2, 0, b"hi")).await;

        driver.on_receive_reliable = Some(collecting_callback(&delivered));
        driver.handle_reliable_message(part(MessageType::Reliable, 1, 2, 0, b"hi")).await;

        assert_eq!(*delivered.lock().unwrap(), vec![b"hi".to_vec()]);
    }

    #[tokio::test]
    async fn test_reliable_messages_before_sync_are_discarded() {
        let mut driver = whitebox_driver(noop_send_socket()).await;

        let delivered: Arc<Mutex<Vec<Vec<u8>>>> = Default::default();
        driver.on_receive_reliable = Some(collecting_callback(&delivered));
        driver.handle_reliable_message(part(MessageType::Reliable, 1, 2, 0, b"hi")).await;

        assert!(delivered.lock().unwrap().is_empty());
        assert!(driver.pending_reliable_messages.is_empty());
        // but the ack flush is scheduled regardless
        assert!(driver.scheduled_ack_flush);
    }

    #[tokio::test]
    async fn test_sync_establishes_baseline_once() {
        let mut driver = whitebox_driver(noop_send_socket()).await;

        driver.handle_message(part(MessageType::Sync, 0, 0, 0, b"")).await;
        assert_eq!(driver.sync.as_ref().unwrap().last_used_reliable_sn, SequenceNumber::ZERO);
        assert!(driver.received_message_ids.is_in(SequenceNumber::ZERO));
        assert!(driver.scheduled_ack_flush);

        // a re-sent SYN only re-schedules the ack flush
        driver.scheduled_ack_flush = false;
        driver.handle_message(part(MessageType::Sync, 7, 0, 0, b"")).await;
        assert_eq!(driver.sync.as_ref().unwrap().last_used_reliable_sn, SequenceNumber::ZERO);
        assert!(driver.scheduled_ack_flush);
    }

    #[tokio::test]
    async fn test_unreliable_skip() {
        let mut driver = whitebox_driver(noop_send_socket()).await;
        driver.sync = Some(SyncState {
            last_used_reliable_sn: SequenceNumber::from_raw(9),
            last_used_unreliable_sn: SequenceNumber::from_raw(9),
        });

        let delivered: Arc<Mutex<Vec<Vec<u8>>>> = Default::default();
        driver.on_receive_unreliable = Some(collecting_callback(&delivered));

        // #10 arrives fragmented and is never finished
        driver.handle_unreliable_message(part(MessageType::Unreliable, 10, 4, 0, b"ab")).await;
        assert!(driver.pending_unreliable_message.is_some());
        assert!(delivered.lock().unwrap().is_empty());

        // #11 arrives whole: delivered, and #10's slot is gone
        driver.handle_unreliable_message(part(MessageType::Unreliable, 11, 2, 0, b"ok")).await;
        assert_eq!(*delivered.lock().unwrap(), vec![b"ok".to_vec()]);
        assert!(driver.pending_unreliable_message.is_none());

        // #10's late remainder is below the delivery cursor now
        driver.on_receive_unreliable = Some(collecting_callback(&delivered));
        driver.handle_unreliable_message(part(MessageType::Unreliable, 10, 4, 2, b"cd")).await;
        assert_eq!(*delivered.lock().unwrap(), vec![b"ok".to_vec()]);
        assert!(driver.pending_unreliable_message.is_none());
    }

    #[tokio::test]
    async fn test_unreliable_slot_prefers_newer_message() {
        let mut driver = whitebox_driver(noop_send_socket()).await;
        driver.sync = Some(SyncState {
            last_used_reliable_sn: SequenceNumber::ZERO,
            last_used_unreliable_sn: SequenceNumber::ZERO,
        });

        let delivered: Arc<Mutex<Vec<Vec<u8>>>> = Default::default();
        driver.on_receive_unreliable = Some(collecting_callback(&delivered));

        driver.handle_unreliable_message(part(MessageType::Unreliable, 2, 4, 0, b"ab")).await;
        // a fragment of a newer message replaces the older slot
        driver.handle_unreliable_message(part(MessageType::Unreliable, 4, 4, 0, b"xy")).await;
        assert_eq!(driver.pending_unreliable_message.as_ref().unwrap().sequence_number, SequenceNumber::from_raw(4));

        // a straggler of the replaced message is discarded
        driver.handle_unreliable_message(part(MessageType::Unreliable, 2, 4, 2, b"cd")).await;
        assert_eq!(driver.pending_unreliable_message.as_ref().unwrap().sequence_number, SequenceNumber::from_raw(4));

        // the newer message completes by merge and is delivered
        driver.handle_unreliable_message(part(MessageType::Unreliable, 4, 4, 2, b"zw")).await;
        assert_eq!(*delivered.lock().unwrap(), vec![b"xyzw".to_vec()]);
        assert_eq!(driver.sync.as_ref().unwrap().last_used_unreliable_sn, SequenceNumber::from_raw(4));
    }

    #[tokio::test]
    async fn test_unreliable_without_receiver_is_dropped() {
        let mut driver = whitebox_driver(noop_send_socket()).await;
        driver.sync = Some(SyncState {
            last_used_reliable_sn: SequenceNumber::ZERO,
            last_used_unreliable_sn: SequenceNumber::ZERO,
        });

        driver.handle_unreliable_message(part(MessageType::Unreliable, 1, 2, 0, b"hi")).await;
        assert!(driver.pending_unreliable_message.is_none());
        assert_eq!(driver.sync.as_ref().unwrap().last_used_unreliable_sn, SequenceNumber::ZERO);
    }

    #[tokio::test]
    async fn test_pending_reliable_buffer_is_bounded() {
        let mut driver = whitebox_driver(noop_send_socket()).await;
        driver.sync = Some(SyncState {
            last_used_reliable_sn: SequenceNumber::ZERO,
            last_used_unreliable_sn: SequenceNumber::ZERO,
        });

        let cap = driver.config.max_pending_reliable_messages;
        for sn in 0..cap as u32 + 5 {
            // all with a gap at #1, so nothing is deliverable
            driver.handle_reliable_message(part(MessageType::Reliable, sn + 2, 1, 0, &[0])).await;
        }
        assert_eq!(driver.pending_reliable_messages.len(), cap);
    }

    #[tokio::test]
    async fn test_close_sends_close_datagram() {
        let expected: Vec<u8> = vec![
            0, 0, 0, 0, 0, 0, 0, 0, 0, // empty ack set
            0, 1, // one message
            4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // close, sn 0, empty
        ];

        let mut mock = MockSendSocket::new();
        mock.expect_send_datagram()
            .once()
            .withf(move |addr, datagram| addr == &localhost(9) && datagram == expected.as_slice())
            .returning(|_, datagram| Ok(datagram.len()));

        let mut driver = whitebox_driver(Arc::new(mock)).await;
        driver.close_session(true).await;

        assert!(!driver.open);
        // idempotent: no second datagram
        driver.close_session(true).await;
    }

    #[tokio::test]
    async fn test_fatal_error_is_dispatched_once_to_both_receivers() {
        let mut driver = whitebox_driver(noop_send_socket()).await;

        let errors: Arc<Mutex<Vec<TransportError>>> = Default::default();
        let e1 = errors.clone();
        let e2 = errors.clone();
        driver.on_receive_reliable = Some(Box::new(move |result| e1.lock().unwrap().push(result.unwrap_err())));
        driver.on_receive_unreliable = Some(Box::new(move |result| e2.lock().unwrap().push(result.unwrap_err())));

        driver.handle_error(TransportError::ParseError).await;
        driver.handle_error(TransportError::TimedOut).await;

        assert_eq!(*errors.lock().unwrap(), vec![TransportError::ParseError, TransportError::ParseError]);
    }

    #[rstest]
    #[case::v4_unspecified("0.0.0.0:7", "127.0.0.1:7")]
    #[case::v6_unspecified("[::]:7", "[::1]:7")]
    #[case::v4_explicit("10.1.2.3:7", "10.1.2.3:7")]
    fn test_sanitize_address(#[case] input: &str, #[case] expected: &str) {
        let input: SocketAddr = input.parse().unwrap();
        let expected: SocketAddr = expected.parse().unwrap();
        assert_eq!(sanitize_address(input), expected);
    }

    // ---- end-to-end over loopback UDP --------------------------------------

    #[tokio::test]
    async fn test_handshake() {
        let (a, b) = connected_pair().await;

        assert_eq!(a.remote_endpoint(), Some(b.local_endpoint()));
        assert_eq!(b.remote_endpoint(), Some(a.local_endpoint()));

        a.close();
        b.close();
    }

    #[tokio::test]
    async fn test_reliable_echo() {
        let (a, b) = connected_pair().await;

        let (hello_tx, hello_rx) = oneshot::channel();
        let b_handle = b.clone();
        b.receive_reliable(Box::new(move |result| {
            assert_eq!(result.unwrap(), b"hello".to_vec());
            // answering from inside the delivery callback must work
            b_handle.send_reliable(b"world".to_vec()).unwrap();
            hello_tx.send(()).unwrap();
        }));

        let (world_tx, world_rx) = oneshot::channel();
        a.receive_reliable(Box::new(move |result| {
            world_tx.send(result.unwrap()).unwrap();
        }));

        a.send_reliable(b"hello".to_vec()).unwrap();

        timeout(Duration::from_secs(5), hello_rx).await.unwrap().unwrap();
        let answer = timeout(Duration::from_secs(5), world_rx).await.unwrap().unwrap();
        assert_eq!(answer, b"world".to_vec());
    }

    #[tokio::test]
    async fn test_fragmented_reliable_payload() {
        let (a, b) = connected_pair().await;

        // needs at least ceil(4000 / (mtu - headers)) = 3 datagrams
        let payload: Vec<u8> = (0..4000u32).map(|i| (i % 251) as u8).collect();

        let (done_tx, done_rx) = oneshot::channel();
        b.receive_reliable(Box::new(move |result| {
            done_tx.send(result.unwrap()).unwrap();
        }));

        a.send_reliable(payload.clone()).unwrap();

        let received = timeout(Duration::from_secs(5), done_rx).await.unwrap().unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_unreliable_delivery() {
        let (a, b) = connected_pair().await;

        let (done_tx, done_rx) = oneshot::channel();
        b.receive_unreliable(Box::new(move |result| {
            done_tx.send(result.unwrap()).unwrap();
        }));

        // give the registration and the handshake settle time before the
        //  send-once message goes out
        time::sleep(Duration::from_millis(200)).await;
        a.send_unreliable(b"fire and forget".to_vec()).unwrap();

        let received = timeout(Duration::from_secs(5), done_rx).await.unwrap().unwrap();
        assert_eq!(received, b"fire and forget".to_vec());
    }

    #[tokio::test]
    async fn test_empty_reliable_message_is_delivered() {
        let (a, b) = connected_pair().await;

        let (done_tx, done_rx) = oneshot::channel();
        b.receive_reliable(Box::new(move |result| {
            done_tx.send(result.unwrap()).unwrap();
        }));

        a.send_reliable(Vec::new()).unwrap();

        let received = timeout(Duration::from_secs(5), done_rx).await.unwrap().unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_flush_fires_when_idle() {
        let (a, _b) = connected_pair().await;

        let (flush_tx, flush_rx) = oneshot::channel();
        a.flush(Box::new(move || {
            flush_tx.send(()).unwrap();
        }));

        timeout(Duration::from_secs(2), flush_rx).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_close_delivers_connection_reset() {
        let (a, b) = connected_pair().await;

        let (r_tx, r_rx) = oneshot::channel();
        let (u_tx, u_rx) = oneshot::channel();
        b.receive_reliable(Box::new(move |result| {
            r_tx.send(result.unwrap_err()).unwrap();
        }));
        b.receive_unreliable(Box::new(move |result| {
            u_tx.send(result.unwrap_err()).unwrap();
        }));
        time::sleep(Duration::from_millis(100)).await;

        a.close();

        assert_eq!(timeout(Duration::from_secs(2), r_rx).await.unwrap().unwrap(), TransportError::ConnectionReset);
        assert_eq!(timeout(Duration::from_secs(2), u_rx).await.unwrap().unwrap(), TransportError::ConnectionReset);
    }

    #[tokio::test]
    async fn test_no_delivery_after_close() {
        let (a, b) = connected_pair().await;

        let deliveries = Arc::new(AtomicUsize::new(0));
        let counter = deliveries.clone();
        a.receive_reliable(Box::new(move |result| {
            if result.is_ok() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));
        time::sleep(Duration::from_millis(100)).await;

        a.close();
        let _ = b.send_reliable(b"too late".to_vec());

        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(deliveries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_inactivity_timeout() {
        let a = Socket::bind(localhost(0), test_config()).await.unwrap();

        let silent = UdpSocket::bind(localhost(0)).await.unwrap();
        let silent_addr = silent.local_addr().unwrap();

        // answer the first probe so the rendezvous completes, then fall silent
        let (hold_tx, hold_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            let (_, from) = silent.recv_from(&mut buf).await.unwrap();
            silent.send_to(&[0], from).await.unwrap();
            let _ = hold_rx.await; // keep the socket bound until the test is done
        });

        a.rendezvous_connect(silent_addr).await.unwrap();

        let (err_tx, err_rx) = oneshot::channel();
        a.receive_reliable(Box::new(move |result| {
            err_tx.send(result.unwrap_err()).unwrap();
        }));

        // keepalive 50ms -> inactivity window 250ms
        let error = timeout(Duration::from_secs(2), err_rx).await.unwrap().unwrap();
        assert_eq!(error, TransportError::TimedOut);

        drop(hold_tx);
    }

    #[tokio::test]
    async fn test_rendezvous_failure_leaves_session_unusable() {
        let config = SocketConfig {
            punch_deadline: Duration::from_millis(50),
            ..test_config()
        };
        let a = Socket::bind(localhost(0), config).await.unwrap();

        let silent = UdpSocket::bind(localhost(0)).await.unwrap();
        let result = a.rendezvous_connect(silent.local_addr().unwrap()).await;
        assert_eq!(result, Err(TransportError::HolePunchFailed));

        assert_eq!(a.send_reliable(b"nope".to_vec()), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_send_after_close_is_rejected() {
        let (a, b) = connected_pair().await;
        a.close();

        assert_eq!(a.send_reliable(b"x".to_vec()), Err(TransportError::Closed));
        assert_eq!(a.send_unreliable(b"x".to_vec()), Err(TransportError::Closed));

        b.close();
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let (a, _b) = connected_pair().await;

        let result = a.send_reliable(vec![0; 70_000]);
        assert_eq!(
            result,
            Err(TransportError::MessageTooLarge { size: 70_000, max: u16::MAX as usize })
        );
    }
}
