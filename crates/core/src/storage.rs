use sha2::{Digest, Sha256};

use crate::codec::encode_varint;
use crate::model::{Bound, EventId, Record, ID_SIZE};

/// Running sum of event ids, interpreted as little-endian 256-bit integers
/// added modulo 2^256.
///
/// Addition is commutative and associative, so the fingerprint of a range
/// does not depend on the order records were accumulated.
///
/// ```
/// use negentropy::Accumulator;
///
/// let mut forward = Accumulator::new();
/// forward.add(&[0x01; 32]);
/// forward.add(&[0x02; 32]);
///
/// let mut reverse = Accumulator::new();
/// reverse.add(&[0x02; 32]);
/// reverse.add(&[0x01; 32]);
///
/// assert_eq!(forward.fingerprint(2), reverse.fingerprint(2));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    state: [u8; ID_SIZE],
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero the running sum.
    pub fn reset(&mut self) {
        self.state = [0; ID_SIZE];
    }

    /// Add one id, byte-wise from index 0 upward, discarding the final
    /// carry.
    pub fn add(&mut self, id: &EventId) {
        let mut carry = 0u16;
        for (slot, byte) in self.state.iter_mut().zip(id.iter()) {
            let sum = u16::from(*slot) + u16::from(*byte) + carry;
            *slot = sum as u8;
            carry = sum >> 8;
        }
    }

    /// Derive the 16-byte range tag: `SHA256(state || varint(count))`
    /// truncated. The hash input is the raw little-endian state; neither
    /// side is byte-reversed.
    pub fn fingerprint(&self, count: u64) -> [u8; 16] {
        let mut hasher = Sha256::new();
        hasher.update(self.state);
        hasher.update(encode_varint(count));
        let digest = hasher.finalize();

        let mut tag = [0u8; 16];
        tag.copy_from_slice(&digest[..16]);
        tag
    }
}

/// The local side of a reconciliation: an immutable record sequence sorted
/// by `(timestamp, id)`.
///
/// Built once from the caller's event set and never mutated by the engine.
/// Duplicates are the caller's responsibility; if present they are treated
/// as distinct records.
#[derive(Debug, Clone)]
pub struct RecordStore {
    records: Vec<Record>,
}

impl RecordStore {
    pub fn new(mut records: Vec<Record>) -> Self {
        records.sort_unstable();
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// First index at or after `start` whose record sorts at or above
    /// `bound`. Binary search; the store is sorted and record-vs-bound
    /// comparison is monotone along it.
    pub fn first_at_or_after(&self, start: usize, bound: &Bound) -> usize {
        start + self.records[start..].partition_point(|record| record.is_below(bound))
    }

    /// Fingerprint of the records in `[lower, upper)`.
    pub fn fingerprint(&self, lower: usize, upper: usize) -> [u8; 16] {
        let mut accumulator = Accumulator::new();
        for record in &self.records[lower..upper] {
            accumulator.add(&record.id);
        }
        accumulator.fingerprint((upper - lower) as u64)
    }
}
