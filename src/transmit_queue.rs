use std::collections::VecDeque;

use crate::message_header::MessageType;
use crate::out_message::OutMessage;
use crate::sequence_number::SequenceNumber;

/// The queue of messages awaiting (re-)transmission, visited in round-robin
///  cycles by the send scheduler.
///
/// A cycle visits each message that was queued when the cycle started exactly
///  once; messages inserted during a cycle wait for the next one. The cursor
///  supports removing the current message in place (acked reliables,
///  sent-once unreliables) without being invalidated. Advancing rotates the
///  message to the back, which is what makes consecutive cycles fair between
///  old retransmissions and newly queued messages - and what keeps a message
///  that was only partially encoded at the front, so its next chunk goes out
///  first in the following datagram.
#[derive(Default)]
pub struct TransmitQueue {
    queue: VecDeque<OutMessage>,
}

impl TransmitQueue {
    pub fn new() -> TransmitQueue {
        TransmitQueue { queue: VecDeque::new() }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn insert(&mut self, message: OutMessage) {
        self.queue.push_back(message);
    }

    /// construct-and-insert convenience mirroring the message constructor
    pub fn emplace(
        &mut self,
        resend_until_acked: bool,
        message_type: MessageType,
        sequence_number: SequenceNumber,
        payload: Vec<u8>,
    ) {
        self.insert(OutMessage::new(resend_until_acked, message_type, sequence_number, payload));
    }

    pub fn cycle(&mut self) -> Cycle<'_> {
        let remaining = self.queue.len();
        Cycle { queue: self, remaining }
    }
}

/// One round-robin pass over the queue; see [`TransmitQueue::cycle`].
pub struct Cycle<'a> {
    queue: &'a mut TransmitQueue,
    remaining: usize,
}

impl Cycle<'_> {
    /// the message under the cursor, or `None` once the cycle is exhausted
    pub fn current(&mut self) -> Option<&mut OutMessage> {
        if self.remaining == 0 {
            return None;
        }
        self.queue.queue.front_mut()
    }

    /// keep the current message and move the cursor past it
    pub fn advance(&mut self) {
        debug_assert!(self.remaining > 0);
        if let Some(m) = self.queue.queue.pop_front() {
            self.queue.queue.push_back(m);
        }
        self.remaining -= 1;
    }

    /// remove the current message; the cursor lands on the next one
    pub fn erase(&mut self) {
        debug_assert!(self.remaining > 0);
        self.queue.queue.pop_front();
        self.remaining -= 1;
    }
}
