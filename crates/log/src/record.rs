use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Corruption, Error, Result};

/// Bytes of the on-disk record header: `data_length: u32`, `timestamp_ms: i64`,
/// `checksum: u32`, all little-endian. The payload follows immediately.
pub const HEADER_LEN: usize = 4 + 8 + 4;

/// Sanity bound applied when decoding `data_length` from disk. Anything larger
/// is treated as corruption rather than an allocation request.
pub const MAX_DECODE_DATA_LEN: u64 = 16 * 1024 * 1024;

/// A single message in a topic.
///
/// The offset is not part of the stored bytes; it is recovered positionally
/// from the index, so the store stays a plain concatenation of
/// `header + payload` frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub offset: u64,
    pub timestamp_ms: i64,
    pub data: Vec<u8>,
    pub checksum: u32,
}

impl Record {
    pub fn new(offset: u64, data: Vec<u8>) -> Self {
        Self::with_timestamp(offset, timestamp_now_ms(), data)
    }

    pub fn with_timestamp(offset: u64, timestamp_ms: i64, data: Vec<u8>) -> Self {
        let checksum = checksum(&data);
        Self {
            offset,
            timestamp_ms,
            data,
            checksum,
        }
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.data.len()
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.reserve(self.encoded_len());
        out.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        out.extend_from_slice(&self.checksum.to_le_bytes());
        out.extend_from_slice(&self.data);
    }

    /// Decode a record from its serialized form, attributing it to `offset`.
    ///
    /// `bytes` is the slice the index entry pointed at; it must contain the
    /// full header and payload, and the stored checksum must match the
    /// recomputed one.
    pub fn decode(bytes: &[u8], offset: u64) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::corrupt_at(Corruption::TruncatedHeader, offset));
        }
        let data_len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as u64;
        if data_len == 0 || data_len > MAX_DECODE_DATA_LEN {
            return Err(Error::corrupt_at(
                Corruption::LengthOutOfBounds { len: data_len },
                offset,
            ));
        }
        let timestamp_ms = i64::from_le_bytes(bytes[4..12].try_into().unwrap());
        let stored = u32::from_le_bytes(bytes[12..16].try_into().unwrap());

        let expected = HEADER_LEN + data_len as usize;
        if bytes.len() < expected {
            return Err(Error::corrupt_at(
                Corruption::TruncatedData {
                    expected,
                    got: bytes.len(),
                },
                offset,
            ));
        }
        let data = bytes[HEADER_LEN..expected].to_vec();

        let computed = checksum(&data);
        if stored != computed {
            return Err(Error::corrupt_at(
                Corruption::ChecksumMismatch { stored, computed },
                offset,
            ));
        }

        Ok(Self {
            offset,
            timestamp_ms,
            data,
            checksum: stored,
        })
    }
}

/// XOR fold of the payload, widened to `u32`.
pub fn checksum(data: &[u8]) -> u32 {
    data.iter().fold(0u8, |acc, b| acc ^ b) as u32
}

pub(crate) fn timestamp_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
