use anyhow::bail;
use bytes::Buf;
use tracing::warn;

use crate::message_header::{MessageHeader, MessageType};
use crate::sequence_number::SequenceNumber;

/// One parsed wire fragment: a contiguous sub-range of some message's payload
///  together with enough header information to place it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMessagePart {
    pub message_type: MessageType,
    pub sequence_number: SequenceNumber,
    pub original_size: u16,
    pub chunk_start: u16,
    pub payload: Vec<u8>,
}

impl InMessagePart {
    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<InMessagePart> {
        let header = MessageHeader::deser(buf)?;

        if buf.remaining() < header.chunk_len as usize {
            bail!("message part payload truncated");
        }
        if header.chunk_start as usize + header.chunk_len as usize > header.original_size as usize {
            bail!("message part chunk exceeds the declared message size");
        }

        let mut payload = vec![0; header.chunk_len as usize];
        buf.copy_to_slice(&mut payload);

        Ok(InMessagePart {
            message_type: header.message_type,
            sequence_number: header.sequence_number,
            original_size: header.original_size,
            chunk_start: header.chunk_start,
            payload,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.chunk_start == 0 && self.payload.len() == self.original_size as usize
    }

    pub fn into_complete_message(self) -> Option<InMessageFull> {
        if !self.is_complete() {
            return None;
        }
        Some(InMessageFull {
            sequence_number: self.sequence_number,
            payload: self.payload,
        })
    }
}

/// A fully reassembled inbound message, ready for delivery to the
///  application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMessageFull {
    pub sequence_number: SequenceNumber,
    pub payload: Vec<u8>,
}

/// Partial reassembly buffer for a single inbound message. Chunks may arrive
///  in any order and may overlap (retransmissions restart at offset 0); the
///  filled ranges are tracked as a sorted, merged list and the message is
///  complete once a single range covers the whole payload.
#[derive(Debug)]
pub struct PendingMessage {
    pub sequence_number: SequenceNumber,
    original_size: u16,
    /// sorted, pairwise non-adjacent `[start, end)` ranges
    filled: Vec<(usize, usize)>,
    payload: Vec<u8>,
}

impl PendingMessage {
    pub fn from_part(part: &InMessagePart) -> PendingMessage {
        let mut pm = PendingMessage {
            sequence_number: part.sequence_number,
            original_size: part.original_size,
            filled: Vec::new(),
            payload: vec![0; part.original_size as usize],
        };
        pm.update_payload(part.chunk_start, &part.payload);
        pm
    }

    pub fn update_payload(&mut self, chunk_start: u16, bytes: &[u8]) {
        let start = chunk_start as usize;
        if start > self.payload.len() {
            warn!("chunk for message #{} starts beyond the declared size - ignoring", self.sequence_number);
            return;
        }

        // a peer re-declaring a different message size for the same sequence
        //  number is buggy; truncate rather than trust it
        let len = bytes.len().min(self.payload.len() - start);
        if len < bytes.len() {
            warn!("chunk for message #{} exceeds the declared size - truncating", self.sequence_number);
        }
        if len == 0 && self.original_size > 0 {
            return;
        }

        self.payload[start..start + len].copy_from_slice(&bytes[..len]);
        self.insert_range(start, start + len);
    }

    fn insert_range(&mut self, start: usize, end: usize) {
        let mut merged = (start, end);
        let mut result = Vec::with_capacity(self.filled.len() + 1);

        for &(s, e) in &self.filled {
            if e < merged.0 || s > merged.1 {
                result.push((s, e));
            }
            else {
                merged = (merged.0.min(s), merged.1.max(e));
            }
        }
        result.push(merged);
        result.sort_unstable();
        self.filled = result;
    }

    pub fn is_complete(&self) -> bool {
        self.filled == [(0, self.original_size as usize)] || self.original_size == 0
    }

    /// clone of the reassembled message, if complete
    pub fn complete_message(&self) -> Option<InMessageFull> {
        if !self.is_complete() {
            return None;
        }
        Some(InMessageFull {
            sequence_number: self.sequence_number,
            payload: self.payload.clone(),
        })
    }

    pub fn into_complete_message(self) -> Option<InMessageFull> {
        if !self.is_complete() {
            return None;
        }
        Some(InMessageFull {
            sequence_number: self.sequence_number,
            payload: self.payload,
        })
    }
}
