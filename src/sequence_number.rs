use std::fmt::{Display, Formatter};

/// Identifier of a message within one of the two logical streams. The
///  reliable and unreliable streams count independently; the reliable counter
///  starts at 0 (consumed by the SYN message), the unreliable counter at 1.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SequenceNumber(u32);

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SequenceNumber {
    pub const ZERO: SequenceNumber = SequenceNumber(0);

    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> SequenceNumber {
        SequenceNumber(
            self.0.checked_add(1)
                .expect("sequence number space exhausted"),
        )
    }

    /// distance from `other` up to self, if self is the larger one
    pub fn checked_distance_from(&self, other: SequenceNumber) -> Option<u32> {
        self.0.checked_sub(other.0)
    }
}
