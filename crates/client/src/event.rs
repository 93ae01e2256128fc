//! Relay event model.

use serde::{Deserialize, Serialize};

/// An event as carried in `EVENT` frames and publish requests.
///
/// The session layer treats events as opaque beyond the `id` (routing the
/// publish acknowledgement) and `created_at` (the reconciliation
/// timestamp); signing and validation happen upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}
