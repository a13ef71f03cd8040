use anyhow::bail;
use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::sequence_number::SequenceNumber;

/// Wire tag of a message part. `Sync` and `Reliable` consume the reliable
///  sequence counter, `Unreliable` the unreliable one; `KeepAlive` and
///  `Close` always travel with sequence number 0 and are neither acknowledged
///  nor reassembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MessageType {
    Sync = 0,
    KeepAlive = 1,
    Unreliable = 2,
    Reliable = 3,
    Close = 4,
}

/// Fixed-size header preceding each message part inside a datagram - all
///  numbers in network byte order (BE):
///
/// ```ascii
/// 0: message type tag (u8)
/// 1: sequence number (u32)
/// 5: original size of the full message payload (u16)
/// 7: offset of this chunk within the full payload (u16)
/// 9: number of payload bytes following this header (u16)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: MessageType,
    pub sequence_number: SequenceNumber,
    pub original_size: u16,
    pub chunk_start: u16,
    pub chunk_len: u16,
}

impl MessageHeader {
    pub const SERIALIZED_LEN: usize = 11;

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.message_type.into());
        buf.put_u32(self.sequence_number.to_raw());
        buf.put_u16(self.original_size);
        buf.put_u16(self.chunk_start);
        buf.put_u16(self.chunk_len);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<MessageHeader> {
        let tag = buf.try_get_u8()?;
        let message_type = match MessageType::try_from(tag) {
            Ok(t) => t,
            Err(_) => bail!("unknown message type tag {}", tag),
        };
        let sequence_number = SequenceNumber::from_raw(buf.try_get_u32()?);
        let original_size = buf.try_get_u16()?;
        let chunk_start = buf.try_get_u16()?;
        let chunk_len = buf.try_get_u16()?;

        Ok(MessageHeader {
            message_type,
            sequence_number,
            original_size,
            chunk_start,
            chunk_len,
        })
    }
}
