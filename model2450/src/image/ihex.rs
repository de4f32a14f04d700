//! Intel HEX firmware images.
//!
//! Only flat images up to 64 KiB are supported: data records (type `00`)
//! populate the memory map and every other record type is skipped. Images
//! relying on extended segment/linear address records will be mis-mapped,
//! so their presence is reported with a warning.
//!
//! Checksums are not verified.

use crate::error::{Error, Result};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Data record.
pub const RECORD_DATA: u8 = 0x00;
/// End-of-file record.
pub const RECORD_EOF: u8 = 0x01;
/// Extended segment address record.
pub const RECORD_EXT_SEGMENT: u8 = 0x02;
/// Start segment address record.
pub const RECORD_START_SEGMENT: u8 = 0x03;
/// Extended linear address record.
pub const RECORD_EXT_LINEAR: u8 = 0x04;
/// Start linear address record.
pub const RECORD_START_LINEAR: u8 = 0x05;

/// One decoded hex line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    /// Load offset.
    pub address: u16,
    /// Record type.
    pub record_type: u8,
    /// Data bytes.
    pub data: Vec<u8>,
}

impl HexRecord {
    /// Decode a single line. Returns `None` for lines that are not
    /// well-formed records (missing `:`, bad hex, or a data field whose
    /// length disagrees with the byte count).
    pub fn parse_line(line: &str) -> Option<Self> {
        let body = line.trim_end().strip_prefix(':')?;
        if body.len() < 8 {
            return None;
        }

        let byte_count = hex_byte(body.get(0..2)?)?;
        let address = u16::from_str_radix(body.get(2..6)?, 16).ok()?;
        let record_type = hex_byte(body.get(6..8)?)?;

        let data_len = usize::from(byte_count) * 2;
        // data followed by the two checksum digits
        if body.len() != 8 + data_len + 2 {
            return None;
        }
        let data_hex = body.get(8..8 + data_len)?;
        let data = (0..data_len)
            .step_by(2)
            .map(|i| hex_byte(&data_hex[i..i + 2]))
            .collect::<Option<Vec<u8>>>()?;

        Some(Self {
            address,
            record_type,
            data,
        })
    }
}

fn hex_byte(s: &str) -> Option<u8> {
    u8::from_str_radix(s, 16).ok()
}

/// Counters gathered while parsing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HexStats {
    /// Data records consumed.
    pub data_records: usize,
    /// Non-data records ignored (EOF, start address).
    pub other_records: usize,
    /// Extended address records ignored.
    pub extended_records: usize,
    /// Lines that were not well-formed records.
    pub skipped_lines: usize,
}

/// Sparse flash contents keyed by byte address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashImage {
    bytes: BTreeMap<u16, u8>,
    stats: HexStats,
}

impl FlashImage {
    /// Parse hex text leniently: malformed lines are skipped and logged.
    pub fn parse(text: &str) -> Self {
        let mut image = Self::default();

        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let Some(record) = HexRecord::parse_line(line) else {
                debug!("Skipping malformed hex line {}: {:?}", idx + 1, line);
                image.stats.skipped_lines += 1;
                continue;
            };

            match record.record_type {
                RECORD_DATA => {
                    image.stats.data_records += 1;
                    let mut addr = record.address;
                    for b in record.data {
                        image.bytes.insert(addr, b);
                        addr = addr.wrapping_add(1);
                    }
                },
                RECORD_EXT_SEGMENT | RECORD_EXT_LINEAR => {
                    debug!("Ignoring extended address record on line {}", idx + 1);
                    image.stats.extended_records += 1;
                },
                _ => image.stats.other_records += 1,
            }
        }

        if image.stats.extended_records > 0 {
            warn!(
                "Hex image contains {} extended address record(s); only flat 64 KiB images are supported",
                image.stats.extended_records
            );
        }

        image
    }

    /// Validate, parse and reject images without data.
    pub fn load(text: &str) -> Result<Self> {
        if !validate(text) {
            return Err(Error::InvalidHex(
                "every line must start with ':' and end with a line terminator".into(),
            ));
        }

        let image = Self::parse(text);
        if image.is_empty() {
            return Err(Error::InvalidHex("no address/data to write".into()));
        }
        Ok(image)
    }

    /// Read and [`load`](Self::load) a hex file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading hex image from: {}", path.display());
        let text = fs::read_to_string(path)?;
        let image = Self::load(&text)?;
        debug!(
            "Loaded {} bytes in {} data records ({:#06X}..={:#06X})",
            image.len(),
            image.stats.data_records,
            image.min_address().unwrap_or(0),
            image.max_address().unwrap_or(0)
        );
        Ok(image)
    }

    /// Byte at `address`, if the image populates it.
    pub fn get(&self, address: u32) -> Option<u8> {
        let address = u16::try_from(address).ok()?;
        self.bytes.get(&address).copied()
    }

    /// Populated addresses in ascending order.
    pub fn sorted_addresses(&self) -> impl Iterator<Item = u16> + '_ {
        self.bytes.keys().copied()
    }

    /// Lowest populated address.
    pub fn min_address(&self) -> Option<u16> {
        self.bytes.keys().next().copied()
    }

    /// Highest populated address.
    pub fn max_address(&self) -> Option<u16> {
        self.bytes.keys().next_back().copied()
    }

    /// Number of populated bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether no byte is populated.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Parse counters.
    pub fn stats(&self) -> HexStats {
        self.stats
    }
}

/// Structural check: every non-empty line starts with `:` and ends with a
/// line terminator. Checksums are not verified.
pub fn validate(text: &str) -> bool {
    text.split_inclusive('\n')
        .filter(|line| !line.trim().is_empty())
        .all(|line| line.starts_with(':') && line.ends_with('\n'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const BLINK: &str = "\
:100000000C9434000C943E000C943E000C943E0082
:100010000C943E000C943E000C943E000C943E0068
:020000021000EC
:00000001FF
";

    #[test]
    fn test_parse_record_fields() {
        let record = HexRecord::parse_line(":020000021000EC").unwrap();
        assert_eq!(record.address, 0x0000);
        assert_eq!(record.record_type, RECORD_EXT_SEGMENT);
        assert_eq!(record.data, vec![0x10, 0x00]);
    }

    #[test]
    fn test_record_type_follows_address() {
        // byte count 04, address 0000, type 00, data 02 00 00 02
        let record = HexRecord::parse_line(":0400000002000002F8").unwrap();
        assert_eq!(record.record_type, RECORD_DATA);
        assert_eq!(record.data, vec![0x02, 0x00, 0x00, 0x02]);

        let image = FlashImage::parse(":0400000002000002F8\n");
        assert_eq!(image.len(), 4);
        assert_eq!(image.get(3), Some(0x02));
    }

    #[test]
    fn test_non_data_record_contributes_nothing() {
        let image = FlashImage::parse(":020000021000EC\n");
        assert!(image.is_empty());
        assert_eq!(image.stats().extended_records, 1);
    }

    #[test]
    fn test_data_length_must_match_byte_count() {
        assert_eq!(HexRecord::parse_line(":02000000AABBCCDD99"), None);
        assert_eq!(HexRecord::parse_line(":04000000AABB99"), None);

        let image = FlashImage::parse(":02000000AABBCCDD99\n");
        assert!(image.is_empty());
        assert_eq!(image.stats().skipped_lines, 1);
    }

    #[test]
    fn test_parse_data_records() {
        let image = FlashImage::parse(BLINK);
        assert_eq!(image.len(), 32);
        assert_eq!(image.min_address(), Some(0x0000));
        assert_eq!(image.max_address(), Some(0x001F));
        assert_eq!(image.get(0), Some(0x0C));
        assert_eq!(image.get(3), Some(0x00));
        assert_eq!(image.get(0x20), None);
        assert_eq!(image.get(0x1_0000), None);

        let stats = image.stats();
        assert_eq!(stats.data_records, 2);
        assert_eq!(stats.other_records, 1);
        assert_eq!(stats.extended_records, 1);
    }

    #[test]
    fn test_parse_is_idempotent() {
        assert_eq!(FlashImage::parse(BLINK), FlashImage::parse(BLINK));
    }

    #[test]
    fn test_sorted_addresses_ascending() {
        let image = FlashImage::parse(":020010001122BB\n:02000000AABB99\n");
        let addrs: Vec<u16> = image.sorted_addresses().collect();
        assert_eq!(addrs, vec![0x00, 0x01, 0x10, 0x11]);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let text = ":0400000001\n:02000000ZZ0000\nnot hex\n:0100050042B8\n";
        let image = FlashImage::parse(text);
        assert_eq!(image.len(), 1);
        assert_eq!(image.get(5), Some(0x42));
        assert_eq!(image.stats().skipped_lines, 3);
    }

    #[test]
    fn test_validate() {
        assert!(validate(BLINK));
        assert!(validate(":00000001FF\r\n"));
        assert!(!validate(":00000001FF"));
        assert!(!validate("garbage\n:00000001FF\n"));
        assert!(!validate(":100000000C9434000C943E000C943E000C943E0082\n;comment\n"));
    }

    #[test]
    fn test_load_rejects_invalid_text() {
        let err = FlashImage::load("garbage\n").unwrap_err();
        assert!(matches!(err, Error::InvalidHex(_)));
    }

    #[test]
    fn test_load_rejects_empty_image() {
        let err = FlashImage::load(":00000001FF\n").unwrap_err();
        assert!(err.to_string().contains("no address/data"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BLINK.as_bytes()).unwrap();
        let image = FlashImage::from_file(file.path()).unwrap();
        assert_eq!(image.len(), 32);
    }

    #[test]
    fn test_from_file_missing() {
        let err = FlashImage::from_file("/nonexistent/firmware.hex").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
