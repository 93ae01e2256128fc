use std::collections::HashSet;

use crate::error::{ProtocolError, Result};
use crate::model::{
    Bound, EventId, Message, Range, RangePayload, Record, DEFAULT_FRAME_SIZE_LIMIT, ID_SIZE,
};
use crate::storage::RecordStore;

/// Fan-out of a fingerprinted range when it must be subdivided.
const BUCKETS: usize = 16;

/// Ranges smaller than this are enumerated outright instead of bucketed.
const ENUMERATION_LIMIT: usize = 2 * BUCKETS;

/// Client-side reconciliation driver.
///
/// Wraps the local [`RecordStore`] and runs the message exchange: one call
/// to [`initiate`](Self::initiate) produces the opening message, then each
/// peer reply goes through [`reconcile`](Self::reconcile) until it returns
/// `None`. Along the way the driver collects the two witness sets — ids we
/// hold that the peer enumerated without, and ids the peer enumerated that
/// we lack.
///
/// The driver is synchronous and owns no shared state; concurrent sessions
/// each construct their own with their own store.
#[derive(Debug)]
pub struct Reconciler {
    storage: RecordStore,
    frame_size_limit: usize,
    initiated: bool,
    have: Vec<EventId>,
    need: Vec<EventId>,
}

impl Reconciler {
    pub fn new(storage: RecordStore) -> Self {
        Self::with_frame_size_limit(storage, DEFAULT_FRAME_SIZE_LIMIT)
    }

    /// Create a driver with a non-default frame-size hint. The hint is
    /// advisory: replies are not chunked across messages.
    pub fn with_frame_size_limit(storage: RecordStore, frame_size_limit: usize) -> Self {
        Self {
            storage,
            frame_size_limit,
            initiated: false,
            have: Vec::new(),
            need: Vec::new(),
        }
    }

    pub fn frame_size_limit(&self) -> usize {
        self.frame_size_limit
    }

    /// Produce the opening message: one description of the whole store up
    /// to the open-ended bound. Callable exactly once.
    pub fn initiate(&mut self) -> Result<Vec<u8>> {
        if self.initiated {
            return Err(ProtocolError::InvalidState("initiate called twice"));
        }
        self.initiated = true;

        let ranges = self.split_range(0, self.storage.len(), Bound::infinity());
        Ok(Message::new(ranges).encode())
    }

    /// Consume one peer message and build the reply.
    ///
    /// Returns `Some(reply)` while the exchange is still narrowing ranges,
    /// `None` once the reply would carry no ranges — the peer infers
    /// convergence from our silence about every remaining range.
    pub fn reconcile(&mut self, input: &[u8]) -> Result<Option<Vec<u8>>> {
        if !self.initiated {
            return Err(ProtocolError::InvalidState("reconcile before initiate"));
        }

        let incoming = Message::decode(input)?;

        let mut reply: Vec<Range> = Vec::new();
        let mut prev_bound = Bound::zero();
        let mut prev_index = 0usize;
        let mut skipping = false;

        for range in incoming.ranges {
            let upper_index = self.storage.first_at_or_after(prev_index, &range.upper_bound);

            match range.payload {
                RangePayload::Skip => {
                    skipping = true;
                }
                RangePayload::Fingerprint(theirs) => {
                    let ours = self.storage.fingerprint(prev_index, upper_index);
                    if ours == theirs {
                        skipping = true;
                    } else {
                        flush_skip(&mut reply, &mut skipping, &prev_bound);
                        reply.extend(self.split_range(
                            prev_index,
                            upper_index,
                            range.upper_bound.clone(),
                        ));
                    }
                }
                RangePayload::IdList(their_ids) => {
                    self.sweep_id_list(prev_index, upper_index, &their_ids);
                    skipping = true;
                }
            }

            prev_bound = range.upper_bound;
            prev_index = upper_index;
        }

        // A trailing skip is implied by the absence of further ranges.
        if reply.is_empty() {
            return Ok(None);
        }
        Ok(Some(Message::new(reply).encode()))
    }

    /// Ids we hold that the peer enumerated without, lowercase hex, in
    /// discovery order.
    pub fn have_ids(&self) -> Vec<String> {
        self.have.iter().map(hex::encode).collect()
    }

    /// Ids the peer enumerated that we lack, lowercase hex, in discovery
    /// order.
    pub fn need_ids(&self) -> Vec<String> {
        self.need.iter().map(hex::encode).collect()
    }

    /// Both witness sets as hex.
    pub fn result(&self) -> (Vec<String>, Vec<String>) {
        (self.have_ids(), self.need_ids())
    }

    /// Describe `[lower, upper)` with `upper_bound` as its frontier: a
    /// single enumeration when small, otherwise sixteen fingerprinted
    /// buckets cut at shortest-distinguishing bounds.
    fn split_range(&self, lower: usize, upper: usize, upper_bound: Bound) -> Vec<Range> {
        let count = upper - lower;
        if count < ENUMERATION_LIMIT {
            let ids = self.storage.records()[lower..upper]
                .iter()
                .map(|record| record.id)
                .collect();
            return vec![Range::id_list(upper_bound, ids)];
        }

        let per_bucket = count / BUCKETS;
        let buckets_with_extra = count % BUCKETS;
        let records = self.storage.records();

        let mut ranges = Vec::with_capacity(BUCKETS);
        let mut cursor = lower;
        for bucket in 0..BUCKETS {
            let size = per_bucket + usize::from(bucket < buckets_with_extra);
            let end = cursor + size;
            let bound = if end == upper {
                upper_bound.clone()
            } else {
                separating_bound(&records[end - 1], &records[end])
            };
            ranges.push(Range::fingerprint(
                bound,
                self.storage.fingerprint(cursor, end),
            ));
            cursor = end;
        }
        ranges
    }

    /// Compare our records in `[lower, upper)` against a peer enumeration.
    /// Local ids the peer lacks become `have` witnesses; peer ids we lack
    /// become `need`. The peer's enumeration is never answered in kind —
    /// the caller records a skip for this range.
    fn sweep_id_list(&mut self, lower: usize, upper: usize, their_ids: &[EventId]) {
        let mut remaining: HashSet<EventId> = their_ids.iter().copied().collect();
        for record in &self.storage.records()[lower..upper] {
            if !remaining.remove(&record.id) {
                push_unique(&mut self.have, record.id);
            }
        }
        for id in their_ids {
            if remaining.contains(id) {
                push_unique(&mut self.need, *id);
            }
        }
    }
}

/// Emit the coalesced skip for every range suppressed since the last real
/// output, bounded by the frontier reached so far.
fn flush_skip(reply: &mut Vec<Range>, skipping: &mut bool, prev_bound: &Bound) {
    if *skipping {
        *skipping = false;
        reply.push(Range::skip(prev_bound.clone()));
    }
}

fn push_unique(ids: &mut Vec<EventId>, id: EventId) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

/// Smallest bound that separates two adjacent records: timestamp alone
/// when they differ, otherwise the next record's id one byte past the
/// shared prefix.
pub(crate) fn separating_bound(prev: &Record, next: &Record) -> Bound {
    if prev.timestamp != next.timestamp {
        return Bound {
            timestamp: next.timestamp,
            id_prefix: Vec::new(),
        };
    }

    let shared = prev
        .id
        .iter()
        .zip(next.id.iter())
        .take_while(|(a, b)| a == b)
        .count();
    Bound {
        timestamp: next.timestamp,
        id_prefix: next.id[..(shared + 1).min(ID_SIZE)].to_vec(),
    }
}
