use std::collections::BTreeSet;

use crate::pattern::Key;

/// the number of leading bytes in a FLIRT pattern.
pub const DEFAULT_LEADING_LENGTH: usize = 0x20;

/// the .pat format records the crc16 length in a single byte.
pub const DEFAULT_MAX_CRC_LENGTH: usize = 0xFF;

/// parameters that control how a byte sequence is reduced to a tree key.
///
/// the same configuration must be used to build a tree and to query it,
/// otherwise keys derived at query time will not line up with the buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// maximum number of bytes compared verbatim before the crc16 region.
    pub leading_length: usize,
    /// maximum number of bytes passed to the crc16 checksum.
    pub max_crc_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            leading_length: DEFAULT_LEADING_LENGTH,
            max_crc_length: DEFAULT_MAX_CRC_LENGTH,
        }
    }
}

impl Config {
    pub fn with_leading_length(mut self, leading_length: usize) -> Self {
        self.leading_length = leading_length;
        self
    }

    /// the crc16 length is a single byte in a .pat line, so this is capped at 0xFF.
    pub fn with_max_crc_length(mut self, max_crc_length: usize) -> Self {
        self.max_crc_length = std::cmp::min(max_crc_length, DEFAULT_MAX_CRC_LENGTH);
        self
    }

    /// the number of bytes compared verbatim for a sequence of the given size.
    pub fn leading_length_of(&self, size: usize) -> usize {
        std::cmp::min(size, self.leading_length)
    }

    /// the number of bytes covered by the crc16, starting after the leading
    /// bytes and ending at the first relocation, end of input, or the cap.
    pub fn crc_length_of(&self, size: usize, relocations: &BTreeSet<usize>) -> usize {
        let leading_length = self.leading_length_of(size);
        let end = relocations
            .range(leading_length..)
            .next()
            .cloned()
            .unwrap_or(size)
            .min(size);

        std::cmp::min(end - leading_length, self.max_crc_length)
    }

    /// derive the `(crc16, leading length)` key and the crc16 length.
    ///
    /// this is used both when a descriptor is built from raw bytes and when
    /// a byte window is queried.
    ///
    /// ```
    /// use std::collections::BTreeSet;
    /// use flirt_sigtree::Config;
    ///
    /// let config = Config::default();
    /// let (key, crc_length) = config.key(b"\x55\x89\xE5\x5D\xC3", &BTreeSet::new());
    /// assert_eq!(key.leading_length, 5);
    /// assert_eq!(key.crc16, 0);
    /// assert_eq!(crc_length, 0);
    /// ```
    pub fn key(&self, bytes: &[u8], relocations: &BTreeSet<usize>) -> (Key, usize) {
        let leading_length = self.leading_length_of(bytes.len());
        let crc_length = self.crc_length_of(bytes.len(), relocations);
        let crc16 = crate::crc16(&bytes[leading_length..leading_length + crc_length]);

        (
            Key {
                crc16,
                leading_length,
            },
            crc_length,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relocs(offsets: &[usize]) -> BTreeSet<usize> {
        offsets.iter().cloned().collect()
    }

    #[test]
    fn test_short_sequence() {
        let config = Config::default();

        assert_eq!(config.leading_length_of(6), 6);
        assert_eq!(config.crc_length_of(6, &relocs(&[1, 2, 3, 4])), 0);

        let (key, crc_length) = config.key(b"\xE8\x00\x00\x00\x00\xC3", &relocs(&[1, 2, 3, 4]));
        assert_eq!(key.leading_length, 6);
        assert_eq!(key.crc16, 0);
        assert_eq!(crc_length, 0);
    }

    #[test]
    fn test_crc_stops_at_relocation() {
        let config = Config::default().with_leading_length(4);
        let bytes = b"\x55\x8B\xEC\xE8\x11\x22\x33\x44\x55\x66\x77\x88";

        // no relocations: everything after the leading bytes.
        assert_eq!(config.crc_length_of(bytes.len(), &relocs(&[])), 8);
        // relocations within the leading bytes don't matter.
        assert_eq!(config.crc_length_of(bytes.len(), &relocs(&[1])), 8);
        // stop at the first relocation after the leading bytes.
        assert_eq!(config.crc_length_of(bytes.len(), &relocs(&[1, 6, 7])), 2);
        // a relocation right at the boundary leaves nothing to checksum.
        assert_eq!(config.crc_length_of(bytes.len(), &relocs(&[4])), 0);

        let (key, _) = config.key(bytes, &relocs(&[6, 7]));
        assert_eq!(key.crc16, crate::crc16(b"\x11\x22"));
    }

    #[test]
    fn test_crc_cap() {
        let config = Config::default().with_leading_length(2).with_max_crc_length(3);
        assert_eq!(config.crc_length_of(16, &relocs(&[])), 3);
    }

    #[test]
    fn test_crc_cap_fits_pat() {
        let config = Config::default().with_max_crc_length(0x1000);
        assert_eq!(config.max_crc_length, 0xFF);

        let bytes = vec![0x90u8; 0x400];
        assert_eq!(config.crc_length_of(bytes.len(), &BTreeSet::new()), 0xFF);
    }

    #[test]
    fn test_relocation_changes_key() {
        let config = Config::default().with_leading_length(2);
        let a = config.key(b"\xAA\xBB\xCC\xDD", &relocs(&[])).0;
        let b = config.key(b"\xAA\xBB\xCC\xDD", &relocs(&[3])).0;
        assert_eq!(a.leading_length, b.leading_length);
        assert_ne!(a.crc16, b.crc16);
    }
}
