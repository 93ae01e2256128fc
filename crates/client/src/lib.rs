//! Relay session layer for Negentropy set reconciliation.
//!
//! This crate intentionally exposes a small surface:
//! - a single-relay WebSocket duplex channel
//! - NEG-* session framing with per-subscription routing
//! - `sync` / `sync_and_fetch` / `publish` / `close` drivers over the
//!   synchronous [`negentropy`] core

pub mod error;
pub mod event;
pub mod relay;
pub mod session;

pub use error::{ClientError, Result};
pub use event::Event;
pub use relay::{parse_relay_message, RelayConfig, RelayConnection, RelayMessage};
pub use session::{PublishConfirmation, SyncClient, SyncConfig, SyncOutcome};
