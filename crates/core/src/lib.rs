//! Client-side Negentropy set reconciliation.
//!
//! Negentropy is a range-based set reconciliation protocol: two parties
//! holding overlapping sets of `(timestamp, id)` records determine the
//! symmetric difference without transferring either full set. Large ranges
//! travel as 16-byte fingerprints; ranges the two sides disagree on are
//! subdivided until they are small enough to enumerate outright.
//!
//! Internal module boundaries:
//! - `codec`: varint primitives
//! - `error`: protocol error and result types
//! - `model`: records, bounds, ranges, and the binary message codec
//! - `frames`: NEG-* JSON array envelopes carried over the relay channel
//! - `storage`: fingerprint accumulator and the sorted record store
//! - `reconciliation`: the client reconciliation driver
//!
//! # Protocol Flow
//!
//! ```text
//! Client                                  Relay
//!   |                                       |
//!   |  NEG-OPEN (filter, initial msg) ---→  |
//!   |                                       | (compute fingerprints)
//!   | ←--- NEG-MSG (ranges with fps)        |
//!   |                                       |
//!   | (compare, subdivide disagreements)    |
//!   |  NEG-MSG (refined ranges) ---------→  |
//!   |  ...until a reply would be empty...   |
//!   |                                       |
//!   |  NEG-CLOSE ------------------------→  |
//! ```
//!
//! This crate implements the client half only: it initiates, narrows
//! fingerprint disagreements, and records witnesses from the peer's id
//! enumerations, but never answers an enumeration with one of its own.
//! Convergence relies on the peer eventually enumerating every remaining
//! disagreement.
//!
//! # Usage
//!
//! ```
//! use negentropy::{Record, RecordStore, Reconciler};
//!
//! let store = RecordStore::new(vec![
//!     Record::new(1000, [0x01; 32]),
//!     Record::new(2000, [0x02; 32]),
//!     Record::new(3000, [0x03; 32]),
//! ]);
//!
//! let mut reconciler = Reconciler::new(store);
//! let initial = reconciler.initiate().unwrap();
//! assert_eq!(initial[0], negentropy::PROTOCOL_VERSION);
//!
//! // Feed each relay reply through `reconcile` until it returns None,
//! // then read off the two witness sets.
//! let (have, need) = reconciler.result();
//! assert!(have.is_empty() && need.is_empty());
//! ```
//!
//! # References
//!
//! - NIP-77: <https://github.com/nostr-protocol/nips/blob/master/77.md>
//! - Negentropy protocol: <https://github.com/hoytech/negentropy>
//! - RBSR paper: <https://logperiodic.com/rbsr.html>

mod codec;
mod error;
mod frames;
mod model;
mod reconciliation;
mod storage;

pub use codec::{decode_varint, encode_varint};
pub use error::{ProtocolError, Result};
pub use frames::{NegClose, NegErr, NegMsg, NegOpen};
pub use model::{
    Bound, EventId, Message, Range, RangePayload, Record, DEFAULT_FRAME_SIZE_LIMIT, ID_SIZE,
    PROTOCOL_VERSION, TIMESTAMP_INFINITY,
};
pub use reconciliation::Reconciler;
pub use storage::{Accumulator, RecordStore};
