//! Checksum utilities for hunk payloads

use serde::{Deserialize, Serialize};

/// CRC32C checksum of a hunk payload, stored alongside it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub crc32c: u32,
}

impl Checksum {
    /// Compute the checksum of `data`
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self {
            crc32c: crc32c::crc32c(data),
        }
    }

    /// Verify `data` against this checksum
    #[must_use]
    pub fn verify(&self, data: &[u8]) -> bool {
        crc32c::crc32c(data) == self.crc32c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_verify() {
        let data = b"ABCDEFGHI";
        let sum = Checksum::compute(data);
        assert!(sum.verify(data));
        assert!(!sum.verify(b"ABCDEFGHJ"));
    }

    #[test]
    fn test_checksum_empty() {
        let sum = Checksum::compute(&[]);
        assert_eq!(sum.crc32c, 0);
        assert!(sum.verify(&[]));
    }
}
