//! Error taxonomy for tag writes

use thiserror::Error;

/// Failure of a single command/response exchange with the reader
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    #[error("response too short: {0} bytes, expected at least a status word")]
    ShortResponse(usize),

    #[error("card channel unavailable: {0}")]
    Channel(String),
}

/// Result of a failed write attempt
///
/// The first three variants describe tracker state that prevents a write from
/// starting at all. Everything else happened on the wire.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("No reader connected")]
    NoReaderConnected,

    #[error("No card present")]
    NoCardPresent,

    #[error("Missing url")]
    MissingUrl,

    #[error("CcParseError: NDEF file control TLV not found in capability container")]
    CcParse,

    #[error("PayloadTooLarge: NDEF data needs {needed} bytes but the tag allows {max}")]
    PayloadTooLarge { needed: usize, max: usize },

    #[error("ApduFailure: WRITE block {block} failed with status {sw:04X}")]
    BlockWrite { block: u8, sw: u16 },

    #[error("ApduFailure: {step} failed with status {sw:04X}")]
    Apdu { step: String, sw: u16 },

    #[error("{step}: {source}")]
    Transport {
        step: String,
        #[source]
        source: TransportError,
    },

    #[error("write task failed: {0}")]
    Internal(String),
}

impl WriteError {
    /// HTTP status class of this failure
    pub fn status_code(&self) -> u16 {
        match self {
            WriteError::NoReaderConnected => 503,
            WriteError::NoCardPresent => 409,
            WriteError::MissingUrl => 400,
            _ => 500,
        }
    }

    pub(crate) fn transport(step: impl Into<String>, source: TransportError) -> Self {
        WriteError::Transport {
            step: step.into(),
            source,
        }
    }
}
