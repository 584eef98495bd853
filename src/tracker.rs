//! Reader and card tracking
//!
//! Hardware events arrive on a bounded channel and are applied one at a time
//! by [`run_event_loop`]. The event loop is the only writer of tracker state;
//! status queries and the write path take short read locks.

use crate::apdu::CardChannel;
use crate::error::WriteError;
use crate::types::{CardInfo, StatusReport};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Hardware notification delivered to the tracker
pub enum TrackerEvent {
    ReaderAttached { reader: String },
    ReaderDetached { reader: String },
    CardPresent {
        reader: String,
        card: CardInfo,
        channel: CardChannel,
    },
    CardAbsent { reader: String },
    ReaderError { reader: String, message: String },
}

impl std::fmt::Debug for TrackerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerEvent::ReaderAttached { reader } => write!(f, "ReaderAttached({})", reader),
            TrackerEvent::ReaderDetached { reader } => write!(f, "ReaderDetached({})", reader),
            TrackerEvent::CardPresent { reader, card, .. } => {
                write!(f, "CardPresent({}, {:?})", reader, card)
            }
            TrackerEvent::CardAbsent { reader } => write!(f, "CardAbsent({})", reader),
            TrackerEvent::ReaderError { reader, message } => {
                write!(f, "ReaderError({}, {})", reader, message)
            }
        }
    }
}

/// Which readers may become active, and which win over others.
///
/// Markers match as case-insensitive substrings of the reader name.
#[derive(Debug, Clone, Default)]
pub struct ReaderPolicy {
    preferred: Vec<String>,
    blocked: Vec<String>,
}

impl ReaderPolicy {
    pub fn new<P, B>(preferred: P, blocked: B) -> Self
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        B: IntoIterator,
        B::Item: AsRef<str>,
    {
        let normalize = |m: &str| m.trim().to_lowercase();
        Self {
            preferred: preferred
                .into_iter()
                .map(|m| normalize(m.as_ref()))
                .filter(|m| !m.is_empty())
                .collect(),
            blocked: blocked
                .into_iter()
                .map(|m| normalize(m.as_ref()))
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn is_preferred(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.preferred.iter().any(|m| name.contains(m.as_str()))
    }

    pub fn is_blocked(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.blocked.iter().any(|m| name.contains(m.as_str()))
    }
}

struct PresentCard {
    info: CardInfo,
    channel: CardChannel,
}

/// Per-reader slot; card and error state belong to the slot that reported them
struct ReaderSlot {
    name: String,
    card: Option<PresentCard>,
    error: Option<String>,
}

/// Snapshot of the active card handed to the write path
#[derive(Clone)]
pub struct ActiveCard {
    pub reader: String,
    pub info: CardInfo,
    pub channel: CardChannel,
}

/// Owned reader/card state machine
pub struct Tracker {
    policy: ReaderPolicy,
    readers: Vec<ReaderSlot>,
    active: Option<String>,
}

impl Tracker {
    pub fn new(policy: ReaderPolicy) -> Self {
        Self {
            policy,
            readers: Vec::new(),
            active: None,
        }
    }

    pub fn active_reader(&self) -> Option<&str> {
        self.active.as_deref()
    }

    fn slot_mut(&mut self, reader: &str) -> Option<&mut ReaderSlot> {
        self.readers.iter_mut().find(|s| s.name == reader)
    }

    fn active_slot(&self) -> Option<&ReaderSlot> {
        let active = self.active.as_deref()?;
        self.readers.iter().find(|s| s.name == active)
    }

    /// Apply one hardware event
    pub fn apply(&mut self, event: TrackerEvent) {
        match event {
            TrackerEvent::ReaderAttached { reader } => self.attach(reader),
            TrackerEvent::ReaderDetached { reader } => self.detach(&reader),
            TrackerEvent::CardPresent {
                reader,
                card,
                channel,
            } => {
                let Some(slot) = self.slot_mut(&reader) else {
                    warn!(reader = %reader, "Card event for unknown reader ignored");
                    return;
                };
                info!(
                    reader = %reader,
                    uid = %hex::encode(&card.uid),
                    card_type = ?card.card_type,
                    "Card detected"
                );
                slot.card = Some(PresentCard {
                    info: card,
                    channel,
                });
                slot.error = None;
            }
            TrackerEvent::CardAbsent { reader } => {
                if let Some(slot) = self.slot_mut(&reader) {
                    info!(reader = %reader, "Card removed");
                    slot.card = None;
                    slot.error = None;
                }
            }
            TrackerEvent::ReaderError { reader, message } => {
                error!(reader = %reader, error = %message, "Reader error");
                if let Some(slot) = self.slot_mut(&reader) {
                    slot.error = Some(message);
                }
            }
        }
    }

    fn attach(&mut self, reader: String) {
        if self.policy.is_blocked(&reader) {
            info!(reader = %reader, "Ignoring blocked reader");
            return;
        }
        if self.readers.iter().any(|s| s.name == reader) {
            return;
        }

        let take_over = match self.active.as_deref() {
            None => true,
            Some(current) => {
                self.policy.is_preferred(&reader) && !self.policy.is_preferred(current)
            }
        };
        if take_over {
            if let Some(previous) = self.active.replace(reader.clone()) {
                info!(reader = %reader, previous = %previous, "Switching to preferred reader");
            }
        }

        info!(
            reader = %reader,
            role = if take_over { "active" } else { "standby" },
            "Reader connected"
        );
        self.readers.push(ReaderSlot {
            name: reader,
            card: None,
            error: None,
        });
    }

    fn detach(&mut self, reader: &str) {
        let before = self.readers.len();
        self.readers.retain(|s| s.name != reader);
        if self.readers.len() == before {
            return;
        }
        info!(reader = %reader, "Reader removed");

        if self.active.as_deref() == Some(reader) {
            self.active = self
                .readers
                .iter()
                .find(|s| self.policy.is_preferred(&s.name))
                .or_else(|| self.readers.first())
                .map(|s| s.name.clone());
            if let Some(next) = &self.active {
                info!(reader = %next, "Promoted standby reader");
            }
        }
    }

    /// The card on the active reader, or why there is none
    pub fn active_card(&self) -> Result<ActiveCard, WriteError> {
        let slot = self.active_slot().ok_or(WriteError::NoReaderConnected)?;
        let card = slot.card.as_ref().ok_or(WriteError::NoCardPresent)?;
        Ok(ActiveCard {
            reader: slot.name.clone(),
            info: card.info.clone(),
            channel: card.channel.clone(),
        })
    }

    pub fn status(&self) -> StatusReport {
        let slot = self.active_slot();
        let card = slot.and_then(|s| s.card.as_ref());
        StatusReport {
            reader: slot.map(|s| s.name.clone()),
            readers: self.readers.iter().map(|s| s.name.clone()).collect(),
            card_present: card.is_some(),
            card_type: card.map(|c| c.info.card_type),
            // cards that refuse GET UID report no uid rather than ""
            card_uid: card.and_then(|c| hex_or_none(&c.info.uid)),
            card_atr: card.and_then(|c| hex_or_none(&c.info.atr)),
            error: slot.and_then(|s| s.error.clone()),
        }
    }
}

fn hex_or_none(bytes: &[u8]) -> Option<String> {
    (!bytes.is_empty()).then(|| hex::encode(bytes))
}

/// Tracker state shared between the event loop and readers of it
#[derive(Clone)]
pub struct SharedTracker {
    inner: Arc<RwLock<Tracker>>,
}

impl SharedTracker {
    pub fn new(tracker: Tracker) -> Self {
        Self {
            inner: Arc::new(RwLock::new(tracker)),
        }
    }

    pub fn apply(&self, event: TrackerEvent) {
        match self.inner.write() {
            Ok(mut tracker) => tracker.apply(event),
            Err(poisoned) => poisoned.into_inner().apply(event),
        }
    }

    pub fn status(&self) -> StatusReport {
        match self.inner.read() {
            Ok(tracker) => tracker.status(),
            Err(poisoned) => poisoned.into_inner().status(),
        }
    }

    pub fn active_card(&self) -> Result<ActiveCard, WriteError> {
        match self.inner.read() {
            Ok(tracker) => tracker.active_card(),
            Err(poisoned) => poisoned.into_inner().active_card(),
        }
    }
}

/// Apply events until every sender is dropped
pub async fn run_event_loop(mut events: mpsc::Receiver<TrackerEvent>, tracker: SharedTracker) {
    while let Some(event) = events.recv().await {
        tracker.apply(event);
    }
    info!("Tracker event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apdu::{channel, testing::ScriptedTag};
    use crate::types::CardType;

    fn policy() -> ReaderPolicy {
        ReaderPolicy::new(["ACR", "ACS", "NFC"], ["Windows Hello"])
    }

    fn attach(name: &str) -> TrackerEvent {
        TrackerEvent::ReaderAttached {
            reader: name.to_string(),
        }
    }

    fn card_on(reader: &str, card_type: CardType) -> TrackerEvent {
        TrackerEvent::CardPresent {
            reader: reader.to_string(),
            card: CardInfo {
                uid: vec![0x04, 0xA2, 0x2B, 0x1A],
                atr: vec![0x3B, 0x8F],
                card_type,
            },
            channel: channel(ScriptedTag::acking()),
        }
    }

    #[test]
    fn test_first_reader_becomes_active() {
        let mut tracker = Tracker::new(policy());
        tracker.apply(attach("Generic Smart Card Reader 0"));
        tracker.apply(attach("Other Reader 1"));
        assert_eq!(tracker.active_reader(), Some("Generic Smart Card Reader 0"));
        assert_eq!(tracker.status().readers.len(), 2);
    }

    #[test]
    fn test_preferred_reader_supersedes() {
        let mut tracker = Tracker::new(policy());
        tracker.apply(attach("Generic Smart Card Reader 0"));
        tracker.apply(attach("ACS ACR122U PICC Interface 0"));
        assert_eq!(tracker.active_reader(), Some("ACS ACR122U PICC Interface 0"));

        // a second preferred reader does not steal from the first
        tracker.apply(attach("acs acr1252 1"));
        assert_eq!(tracker.active_reader(), Some("ACS ACR122U PICC Interface 0"));
    }

    #[test]
    fn test_blocked_reader_is_never_used() {
        let mut tracker = Tracker::new(policy());
        tracker.apply(attach("Windows Hello Face NFC 0"));
        assert_eq!(tracker.active_reader(), None);
        assert!(tracker.status().readers.is_empty());
        assert!(matches!(tracker.active_card(), Err(WriteError::NoReaderConnected)));
    }

    #[test]
    fn test_card_presence_cycle() {
        let mut tracker = Tracker::new(policy());
        tracker.apply(attach("ACS ACR122U"));
        assert!(matches!(tracker.active_card(), Err(WriteError::NoCardPresent)));

        tracker.apply(TrackerEvent::ReaderError {
            reader: "ACS ACR122U".to_string(),
            message: "transaction failed".to_string(),
        });
        assert_eq!(tracker.status().error.as_deref(), Some("transaction failed"));

        tracker.apply(card_on("ACS ACR122U", CardType::Type2));
        let status = tracker.status();
        assert!(status.card_present);
        assert_eq!(status.card_type, Some(CardType::Type2));
        assert_eq!(status.card_uid.as_deref(), Some("04a22b1a"));
        assert_eq!(status.error, None);

        let active = tracker.active_card().unwrap();
        assert_eq!(active.reader, "ACS ACR122U");
        assert_eq!(active.info.card_type, CardType::Type2);
    }

    #[test]
    fn test_card_without_uid_reports_null() {
        let mut tracker = Tracker::new(policy());
        tracker.apply(attach("ACS ACR122U"));
        tracker.apply(TrackerEvent::CardPresent {
            reader: "ACS ACR122U".to_string(),
            card: CardInfo {
                uid: Vec::new(),
                atr: vec![0x3B, 0x81, 0x80, 0x01, 0x80, 0x80],
                card_type: CardType::Type4,
            },
            channel: channel(ScriptedTag::acking()),
        });

        let status = tracker.status();
        assert!(status.card_present);
        assert_eq!(status.card_uid, None);
        assert_eq!(status.card_atr.as_deref(), Some("3b8180018080"));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["cardUid"], serde_json::Value::Null);
    }

    #[test]
    fn test_card_removal_clears_error() {
        let mut tracker = Tracker::new(policy());
        tracker.apply(attach("ACS ACR122U"));
        tracker.apply(TrackerEvent::ReaderError {
            reader: "ACS ACR122U".to_string(),
            message: "boom".to_string(),
        });
        tracker.apply(TrackerEvent::CardAbsent {
            reader: "ACS ACR122U".to_string(),
        });
        let status = tracker.status();
        assert!(!status.card_present);
        assert_eq!(status.error, None);
        assert_eq!(status.card_type, None);
    }

    #[test]
    fn test_errors_stay_with_their_reader() {
        let mut tracker = Tracker::new(policy());
        tracker.apply(attach("ACS ACR122U"));
        tracker.apply(attach("Generic Reader"));
        tracker.apply(TrackerEvent::ReaderError {
            reader: "Generic Reader".to_string(),
            message: "driver fault".to_string(),
        });
        assert_eq!(tracker.status().error, None);

        tracker.apply(card_on("Generic Reader", CardType::Type4));
        assert!(!tracker.status().card_present);
    }

    #[test]
    fn test_active_detach_promotes_standby() {
        let mut tracker = Tracker::new(policy());
        tracker.apply(attach("ACS ACR122U"));
        tracker.apply(card_on("ACS ACR122U", CardType::Type2));
        tracker.apply(attach("Generic Reader"));

        tracker.apply(TrackerEvent::ReaderDetached {
            reader: "ACS ACR122U".to_string(),
        });
        assert_eq!(tracker.active_reader(), Some("Generic Reader"));
        assert!(!tracker.status().card_present);

        tracker.apply(TrackerEvent::ReaderDetached {
            reader: "Generic Reader".to_string(),
        });
        assert_eq!(tracker.active_reader(), None);
        assert_eq!(tracker.status().reader, None);
    }

    #[tokio::test]
    async fn test_event_loop_applies_events_in_order() {
        let shared = SharedTracker::new(Tracker::new(policy()));
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_event_loop(rx, shared.clone()));

        tx.send(attach("ACS ACR122U")).await.unwrap();
        tx.send(card_on("ACS ACR122U", CardType::Type4)).await.unwrap();
        tx.send(TrackerEvent::CardAbsent {
            reader: "ACS ACR122U".to_string(),
        })
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let status = shared.status();
        assert_eq!(status.reader.as_deref(), Some("ACS ACR122U"));
        assert!(!status.card_present);
    }
}
