use std::cmp::min;

use crate::datagram_buffer::DatagramBuffer;
use crate::message_header::{MessageHeader, MessageType};
use crate::sequence_number::SequenceNumber;

/// A message scheduled for transmission. The `bytes_already_sent` cursor
///  tracks how much of the payload has gone onto the wire, so a message can
///  be chunked across several datagrams without copying.
///
/// For reliable messages the cursor wraps: once the whole payload has been
///  sent, the next encoding attempt restarts from offset 0, which is how
///  retransmission works - the message simply stays queued until its
///  sequence number shows up in the peer's acks.
#[derive(Debug)]
pub struct OutMessage {
    pub resend_until_acked: bool,
    pub message_type: MessageType,
    pub sequence_number: SequenceNumber,
    payload: Vec<u8>,
    pub bytes_already_sent: usize,
}

impl OutMessage {
    pub fn new(
        resend_until_acked: bool,
        message_type: MessageType,
        sequence_number: SequenceNumber,
        payload: Vec<u8>,
    ) -> OutMessage {
        OutMessage {
            resend_until_acked,
            message_type,
            sequence_number,
            payload,
            bytes_already_sent: 0,
        }
    }

    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    pub fn fully_sent(&self) -> bool {
        self.bytes_already_sent == self.payload.len()
    }

    /// Encode the next chunk of this message into `buf` if at least the
    ///  header and one payload byte fit (the header alone for an empty
    ///  payload). Returns false - leaving both the buffer and the cursor
    ///  untouched - if there is not enough space.
    pub fn try_encode(&mut self, buf: &mut DatagramBuffer) -> bool {
        let minimal_encoded_size =
            MessageHeader::SERIALIZED_LEN + min(1, self.payload_size());

        if minimal_encoded_size > buf.remaining_capacity() {
            return false;
        }

        self.encode_next_chunk(buf);
        true
    }

    fn encode_next_chunk(&mut self, buf: &mut DatagramBuffer) {
        if self.bytes_already_sent == self.payload.len() {
            // fully sent before: this is a retransmission, restart at 0
            self.bytes_already_sent = 0;
        }

        let chunk_start = self.bytes_already_sent;
        let available = buf.remaining_capacity() - MessageHeader::SERIALIZED_LEN;
        let chunk_len = min(available, self.payload.len() - chunk_start);

        MessageHeader {
            message_type: self.message_type,
            sequence_number: self.sequence_number,
            original_size: self.payload.len() as u16,
            chunk_start: chunk_start as u16,
            chunk_len: chunk_len as u16,
        }
        .ser(buf);
        bytes::BufMut::put_slice(buf, &self.payload[chunk_start..chunk_start + chunk_len]);

        self.bytes_already_sent += chunk_len;
    }
}
