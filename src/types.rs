use serde::{Deserialize, Serialize};

/// Tag family detected on a reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardType {
    /// NTAG / Ultralight and other page-addressed storage tags
    #[serde(rename = "TAG_ISO_14443_3")]
    Type2,
    /// ISO 14443-4 tags exposing an ISO 7816-4 file system
    #[serde(rename = "TAG_ISO_14443_4")]
    Type4,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl CardType {
    /// Classify a tag from the ATR the reader synthesized for it.
    ///
    /// PC/SC part 3 storage cards carry `4F` followed by the RID
    /// `A0 00 00 03 06` at byte 5; ISO 14443-4 cards start `3B 8n 80 01`.
    pub fn from_atr(atr: &[u8]) -> Self {
        match atr {
            [0x3B, _, _, _, _, 0x4F, ..] => CardType::Type2,
            [0x3B, t0, 0x80, 0x01, ..] if t0 & 0xF0 == 0x80 => CardType::Type4,
            _ => CardType::Unknown,
        }
    }
}

/// Identity of the tag currently on a reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardInfo {
    pub uid: Vec<u8>,
    pub atr: Vec<u8>,
    pub card_type: CardType,
}

/// Body of `GET /status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub reader: Option<String>,
    pub readers: Vec<String>,
    pub card_present: bool,
    pub card_type: Option<CardType>,
    pub card_uid: Option<String>,
    pub card_atr: Option<String>,
    pub error: Option<String>,
}

/// Body of `POST /write`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WriteRequest {
    #[serde(default)]
    pub url: Option<String>,
}
