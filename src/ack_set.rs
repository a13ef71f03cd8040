use anyhow::bail;
use bytes::{Buf, BufMut};

use crate::sequence_number::SequenceNumber;

/// Compact set of recently received reliable sequence numbers. A copy of this
///  set travels in the header of every outbound datagram as the cumulative
///  acknowledgement; the peer's copy replaces ours wholesale on every inbound
///  datagram.
///
/// The representation is the highest member plus a bitmask of its 32
///  predecessors, so membership is only tracked within a sliding window.
///  Sequence numbers below the window cannot be added again - which doubles
///  as duplicate suppression for messages the peer re-sends after their ack
///  got lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AckSet {
    entries: Option<Entries>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entries {
    highest: SequenceNumber,
    /// bit N set means `highest - N - 1` is a member
    predecessors: u32,
}

const WINDOW: u32 = 32;

impl AckSet {
    pub const WIRE_LEN: usize = 9;

    pub fn new() -> AckSet {
        AckSet { entries: None }
    }

    pub fn is_in(&self, sn: SequenceNumber) -> bool {
        let Some(e) = self.entries else {
            return false;
        };
        match e.highest.checked_distance_from(sn) {
            Some(0) => true,
            Some(dist) if dist <= WINDOW => e.predecessors & (1 << (dist - 1)) != 0,
            _ => false,
        }
    }

    /// A sequence number can be added iff it is not a member yet and is not
    ///  below the representable window (below-window numbers were necessarily
    ///  seen before, so rejecting them suppresses duplicates).
    pub fn can_add(&self, sn: SequenceNumber) -> bool {
        let Some(e) = self.entries else {
            return true;
        };
        match e.highest.checked_distance_from(sn) {
            None => true, // above the current highest: the window slides up
            Some(0) => false,
            Some(dist) if dist <= WINDOW => e.predecessors & (1 << (dist - 1)) == 0,
            Some(_) => false,
        }
    }

    pub fn try_add(&mut self, sn: SequenceNumber) -> bool {
        if !self.can_add(sn) {
            return false;
        }

        match &mut self.entries {
            None => {
                self.entries = Some(Entries { highest: sn, predecessors: 0 });
            }
            Some(e) => {
                match sn.checked_distance_from(e.highest) {
                    Some(shift) => {
                        // sn becomes the new highest; previous members shift
                        //  down, falling off the window's far end
                        e.predecessors = if shift > WINDOW {
                            0
                        }
                        else {
                            let shifted = if shift == WINDOW { 0 } else { e.predecessors << shift };
                            shifted | (1 << (shift - 1))
                        };
                        e.highest = sn;
                    }
                    None => {
                        let dist = e.highest.checked_distance_from(sn)
                            .expect("one of the two orderings must hold");
                        e.predecessors |= 1 << (dist - 1);
                    }
                }
            }
        }
        true
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        match self.entries {
            None => {
                buf.put_u8(0);
                buf.put_u32(0);
                buf.put_u32(0);
            }
            Some(e) => {
                buf.put_u8(1);
                buf.put_u32(e.highest.to_raw());
                buf.put_u32(e.predecessors);
            }
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<AckSet> {
        let flags = buf.try_get_u8()?;
        let highest = buf.try_get_u32()?;
        let predecessors = buf.try_get_u32()?;

        match flags {
            0 => Ok(AckSet { entries: None }),
            1 => Ok(AckSet {
                entries: Some(Entries {
                    highest: SequenceNumber::from_raw(highest),
                    predecessors,
                }),
            }),
            _ => bail!("invalid ack set flags {}", flags),
        }
    }
}
