//! Owned frame metadata and table storage.

use crate::error::{Error, ErrorKind, Result};

/// A dequantization table, stored in natural (row-major) 8×8 order.
///
/// DQT segments carry the 64 elements in zig-zag order with either 8-bit
/// or 16-bit precision; both are widened to `u16` and reordered when the
/// segment is parsed.
#[derive(Clone)]
pub struct QTable {
    pub values: [u16; 64],
}

/// Per-channel frame parameters from the SOF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub id: u8,
    /// Horizontal sampling factor (1-4).
    pub h: u8,
    /// Vertical sampling factor (1-4).
    pub v: u8,
    /// Quantization table destination (0-3).
    pub qtable: u8,
}

/// Frame-wide parameters from the SOF header.
#[derive(Debug, Clone)]
pub struct FrameInfo {
    pub width: u16,
    pub height: u16,
    pub channels: Vec<Channel>,
}

impl FrameInfo {
    pub fn by_id(&self, channel_id: u8) -> Result<&Channel> {
        self.channels
            .iter()
            .find(|c| c.id == channel_id)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::MalformedSegment,
                    format!("scan references channel id {channel_id} not present in frame header"),
                )
            })
    }

    /// Largest horizontal sampling factor of any channel.
    pub fn h_max(&self) -> u8 {
        self.channels.iter().map(|c| c.h).max().unwrap_or(1)
    }

    /// Largest vertical sampling factor of any channel.
    pub fn v_max(&self) -> u8 {
        self.channels.iter().map(|c| c.v).max().unwrap_or(1)
    }
}

/// Natural-order index of each zig-zag position: element `i` of a
/// zig-zag-serialized block lands at natural index `UNZIGZAG[i]`.
#[rustfmt::skip]
pub const UNZIGZAG: [usize; 64] = [
     0,  1,  8, 16,  9,  2,  3, 10,
    17, 24, 32, 25, 18, 11,  4,  5,
    12, 19, 26, 33, 40, 48, 41, 34,
    27, 20, 13,  6,  7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36,
    29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46,
    53, 60, 61, 54, 47, 55, 62, 63,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unzigzag_is_permutation() {
        let mut seen = [false; 64];
        for &i in &UNZIGZAG {
            assert!(!seen[i]);
            seen[i] = true;
        }
    }

    #[test]
    fn unzigzag_round_trip() {
        // The forward permutation (natural index -> zig-zag index) composed
        // with UNZIGZAG must be the identity on any 64-element sequence.
        let mut zigzag = [0usize; 64];
        for (zz, &nat) in UNZIGZAG.iter().enumerate() {
            zigzag[nat] = zz;
        }

        let natural: Vec<u32> = (100..164).collect();
        let mut serialized = [0u32; 64];
        for nat in 0..64 {
            serialized[zigzag[nat]] = natural[nat];
        }
        let mut restored = [0u32; 64];
        for zz in 0..64 {
            restored[UNZIGZAG[zz]] = serialized[zz];
        }
        assert_eq!(&restored[..], &natural[..]);
    }

    #[test]
    fn unzigzag_corners() {
        // First diagonal and both ends of the standard scan.
        assert_eq!(&UNZIGZAG[..4], &[0, 1, 8, 16]);
        assert_eq!(UNZIGZAG[63], 63);
    }
}
