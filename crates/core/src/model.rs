use crate::codec::{decode_varint, encode_varint};
use crate::error::{ProtocolError, Result};

/// Negentropy protocol version 1.
pub const PROTOCOL_VERSION: u8 = 0x61;

/// Timestamp of the open-ended upper bound. Wire-encoded as delta 0 and
/// sorts above every record.
pub const TIMESTAMP_INFINITY: u64 = (1 << 63) - 1;

/// Record and id-list entries are raw 32-byte event ids.
pub const ID_SIZE: usize = 32;

/// Default advisory cap on outbound message size. The driver carries it as
/// configuration; chunking across messages is not performed.
pub const DEFAULT_FRAME_SIZE_LIMIT: usize = 60_000;

/// A 256-bit event id.
pub type EventId = [u8; ID_SIZE];

/// One element of the reconciled set: an event's creation time and id.
///
/// Records are totally ordered by `(timestamp, id)` with lexicographic id
/// comparison, which the derived ordering provides via field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Record {
    pub timestamp: u64,
    pub id: EventId,
}

impl Record {
    pub fn new(timestamp: u64, id: EventId) -> Self {
        Self { timestamp, id }
    }

    /// Build a record from a 64-character hex id.
    pub fn from_hex(timestamp: u64, id_hex: &str) -> Result<Self> {
        if id_hex.len() != 2 * ID_SIZE {
            return Err(ProtocolError::InvalidRecord(format!(
                "id must be {} hex characters, got {}",
                2 * ID_SIZE,
                id_hex.len()
            )));
        }
        let bytes = hex::decode(id_hex)
            .map_err(|error| ProtocolError::InvalidRecord(format!("id is not hex: {}", error)))?;
        let mut id = [0u8; ID_SIZE];
        id.copy_from_slice(&bytes);
        Ok(Self { timestamp, id })
    }

    /// Lowercase hex rendering of the id.
    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }

    /// Whether this record falls strictly below `bound` in the
    /// `(timestamp, id)` total order. Id comparison is truncated to the
    /// bound's prefix length.
    pub fn is_below(&self, bound: &Bound) -> bool {
        if self.timestamp != bound.timestamp {
            return self.timestamp < bound.timestamp;
        }
        let len = bound.id_prefix.len().min(ID_SIZE);
        self.id[..len] < bound.id_prefix[..len]
    }
}

/// Exclusive upper frontier of a range: a timestamp plus an id prefix of
/// up to 32 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub timestamp: u64,
    pub id_prefix: Vec<u8>,
}

impl Bound {
    /// Create a bound, rejecting prefixes longer than an id.
    pub fn new(timestamp: u64, id_prefix: Vec<u8>) -> Result<Self> {
        if id_prefix.len() > ID_SIZE {
            return Err(ProtocolError::Malformed(format!(
                "id prefix is {} bytes, max {}",
                id_prefix.len(),
                ID_SIZE
            )));
        }
        Ok(Self {
            timestamp,
            id_prefix,
        })
    }

    /// The bound below every record: timestamp 0, empty prefix.
    pub fn zero() -> Self {
        Self {
            timestamp: 0,
            id_prefix: Vec::new(),
        }
    }

    /// The bound above every record.
    pub fn infinity() -> Self {
        Self {
            timestamp: TIMESTAMP_INFINITY,
            id_prefix: Vec::new(),
        }
    }

    pub fn is_infinity(&self) -> bool {
        self.timestamp == TIMESTAMP_INFINITY
    }

    /// Encode relative to the outbound timestamp cursor.
    ///
    /// Infinity is the reserved delta 0; any other timestamp is written as
    /// `ts - prev + 1`. This client only generates non-decreasing
    /// timestamps, so the delta never goes negative.
    ///
    /// ```
    /// use negentropy::Bound;
    ///
    /// let bound = Bound::new(12345, vec![0xAB, 0xCD]).unwrap();
    /// let encoded = bound.encode(0);
    /// let (decoded, read) = Bound::decode(&encoded, 0).unwrap();
    /// assert_eq!(decoded, bound);
    /// assert_eq!(read, encoded.len());
    /// ```
    pub fn encode(&self, prev_timestamp: u64) -> Vec<u8> {
        let delta = if self.is_infinity() {
            0
        } else {
            1 + self.timestamp.saturating_sub(prev_timestamp)
        };

        let mut bytes = encode_varint(delta);
        bytes.extend_from_slice(&encode_varint(self.id_prefix.len() as u64));
        bytes.extend_from_slice(&self.id_prefix);
        bytes
    }

    /// Decode relative to the inbound timestamp cursor. Returns the bound
    /// and the number of bytes consumed.
    pub fn decode(data: &[u8], prev_timestamp: u64) -> Result<(Self, usize)> {
        let (delta, mut offset) = decode_varint(data)?;
        let timestamp = if delta == 0 {
            TIMESTAMP_INFINITY
        } else {
            prev_timestamp.saturating_add(delta - 1)
        };

        let (prefix_len, len_read) = decode_varint(&data[offset..])?;
        offset += len_read;
        if prefix_len > ID_SIZE as u64 {
            return Err(ProtocolError::Malformed(format!(
                "id prefix length {} exceeds {}",
                prefix_len, ID_SIZE
            )));
        }
        let prefix_len = prefix_len as usize;
        if data.len() < offset + prefix_len {
            return Err(ProtocolError::Malformed(
                "truncated bound id prefix".to_string(),
            ));
        }
        let id_prefix = data[offset..offset + prefix_len].to_vec();
        offset += prefix_len;

        Ok((
            Self {
                timestamp,
                id_prefix,
            },
            offset,
        ))
    }
}

/// How a range is summarized on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangePayload {
    /// Mode 0: nothing to say about this range.
    Skip,
    /// Mode 1: 16-byte fingerprint of the range's id multiset.
    Fingerprint([u8; 16]),
    /// Mode 2: full enumeration of the range's ids.
    IdList(Vec<EventId>),
}

/// A contiguous interval of the sorted record sequence, identified by its
/// exclusive upper bound; the lower bound is the previous range's upper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub upper_bound: Bound,
    pub payload: RangePayload,
}

impl Range {
    pub fn skip(upper_bound: Bound) -> Self {
        Self {
            upper_bound,
            payload: RangePayload::Skip,
        }
    }

    pub fn fingerprint(upper_bound: Bound, fingerprint: [u8; 16]) -> Self {
        Self {
            upper_bound,
            payload: RangePayload::Fingerprint(fingerprint),
        }
    }

    pub fn id_list(upper_bound: Bound, ids: Vec<EventId>) -> Self {
        Self {
            upper_bound,
            payload: RangePayload::IdList(ids),
        }
    }

    fn encode_onto(&self, bytes: &mut Vec<u8>, prev_timestamp: u64) {
        bytes.extend_from_slice(&self.upper_bound.encode(prev_timestamp));
        match &self.payload {
            RangePayload::Skip => {
                bytes.extend_from_slice(&encode_varint(0));
            }
            RangePayload::Fingerprint(fingerprint) => {
                bytes.extend_from_slice(&encode_varint(1));
                bytes.extend_from_slice(fingerprint);
            }
            RangePayload::IdList(ids) => {
                bytes.extend_from_slice(&encode_varint(2));
                bytes.extend_from_slice(&encode_varint(ids.len() as u64));
                for id in ids {
                    bytes.extend_from_slice(id);
                }
            }
        }
    }

    fn decode(data: &[u8], prev_timestamp: u64) -> Result<(Self, usize)> {
        let (upper_bound, mut offset) = Bound::decode(data, prev_timestamp)?;

        let (mode, mode_read) = decode_varint(&data[offset..])?;
        offset += mode_read;

        let payload = match mode {
            0 => RangePayload::Skip,
            1 => {
                if data.len() < offset + 16 {
                    return Err(ProtocolError::Malformed(
                        "truncated fingerprint".to_string(),
                    ));
                }
                let mut fingerprint = [0u8; 16];
                fingerprint.copy_from_slice(&data[offset..offset + 16]);
                offset += 16;
                RangePayload::Fingerprint(fingerprint)
            }
            2 => {
                let (count, count_read) = decode_varint(&data[offset..])?;
                offset += count_read;
                let mut ids = Vec::new();
                for _ in 0..count {
                    if data.len() < offset + ID_SIZE {
                        return Err(ProtocolError::Malformed("truncated id list".to_string()));
                    }
                    let mut id = [0u8; ID_SIZE];
                    id.copy_from_slice(&data[offset..offset + ID_SIZE]);
                    offset += ID_SIZE;
                    ids.push(id);
                }
                RangePayload::IdList(ids)
            }
            other => {
                return Err(ProtocolError::Malformed(format!(
                    "unknown range mode {}",
                    other
                )));
            }
        };

        Ok((
            Self {
                upper_bound,
                payload,
            },
            offset,
        ))
    }
}

/// One protocol message: the version byte followed by zero or more ranges.
///
/// A message carrying no ranges means the sender has nothing more to
/// exchange. Encoding and decoding each start from a zero timestamp
/// cursor, so delta state never leaks across messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub ranges: Vec<Range>,
}

impl Message {
    pub fn new(ranges: Vec<Range>) -> Self {
        Self { ranges }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = vec![PROTOCOL_VERSION];
        let mut prev_timestamp = 0;
        for range in &self.ranges {
            range.encode_onto(&mut bytes, prev_timestamp);
            prev_timestamp = range.upper_bound.timestamp;
        }
        bytes
    }

    pub fn encode_hex(&self) -> String {
        hex::encode(self.encode())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let version = *data
            .first()
            .ok_or_else(|| ProtocolError::Malformed("empty message".to_string()))?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let mut ranges = Vec::new();
        let mut offset = 1;
        let mut prev_timestamp = 0;
        while offset < data.len() {
            let (range, read) = Range::decode(&data[offset..], prev_timestamp)?;
            offset += read;
            prev_timestamp = range.upper_bound.timestamp;
            ranges.push(range);
        }

        Ok(Self { ranges })
    }

    pub fn decode_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|error| ProtocolError::Malformed(format!("message is not hex: {}", error)))?;
        Self::decode(&bytes)
    }
}
