//! NDEF Writer - writes URI NDEF messages to NFC tags through PC/SC readers
//!
//! The engine detects the tag family on the active reader and writes with
//! the matching protocol: raw 4-byte page writes for NFC Forum Type 2 tags
//! (NTAG / Ultralight), or the ISO 7816-4 NDEF file sequence for Type 4 tags.
//! [`server`] exposes the engine over HTTP.

pub mod apdu;
pub mod card;
pub mod config;
pub mod error;
pub mod ndef;
pub mod reader;
pub mod server;
pub mod tracker;
pub mod type2;
pub mod type4;
pub mod types;
pub mod utils;
pub mod writer;

pub use apdu::{CardChannel, Transport};
pub use error::{TransportError, WriteError};
pub use tracker::{ReaderPolicy, SharedTracker, Tracker, TrackerEvent};
pub use types::{CardInfo, CardType, StatusReport};
pub use writer::{Orchestrator, WritePath, WriteReport};
