//! NFC Forum Type 4 (ISO 14443-4) NDEF file writer
//!
//! The sequence is strictly ordered: select the NDEF Tag Application, select
//! and read the capability container, select the NDEF file it names, then
//! write NLEN followed by the message. File selection only lives as long as
//! the tag stays in the field, so a failed step ends the whole write and the
//! next attempt starts again from the application select.

use crate::apdu::{commands, exchange, Transport};
use crate::error::WriteError;
use tracing::{debug, info};

/// NDEF Tag Application AID (mapping version 2.0)
pub const NDEF_APP_AID: [u8; 7] = [0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];

/// Capability container file identifier
pub const CC_FILE_ID: u16 = 0xE103;

/// Bytes of the CC file read before parsing
pub const CC_READ_LEN: u8 = 0x0F;

/// CCLEN(2) + mapping version(1) + MLe(2) + MLc(2)
const CC_HEADER_LEN: usize = 7;

/// NDEF File Control TLV tag
const TLV_NDEF_FILE_CONTROL: u8 = 0x04;

/// Largest UPDATE BINARY data field sent in one command
pub const MAX_CHUNK: usize = 0xF0;

/// What the capability container says about the NDEF file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityContainer {
    pub ndef_file_id: u16,
    pub max_ndef_size: u16,
}

impl CapabilityContainer {
    /// Locate the NDEF File Control TLV after the fixed CC header
    pub fn parse(cc: &[u8]) -> Result<Self, WriteError> {
        let mut offset = CC_HEADER_LEN;
        while offset + 2 <= cc.len() {
            let tag = cc[offset];
            let len = cc[offset + 1] as usize;
            let value = cc.get(offset + 2..offset + 2 + len).ok_or(WriteError::CcParse)?;

            if tag == TLV_NDEF_FILE_CONTROL && len >= 6 {
                let ndef_file_id = u16::from_be_bytes([value[0], value[1]]);
                let max_ndef_size = u16::from_be_bytes([value[2], value[3]]);
                if ndef_file_id == 0 || max_ndef_size == 0 {
                    return Err(WriteError::CcParse);
                }
                return Ok(Self {
                    ndef_file_id,
                    max_ndef_size,
                });
            }
            offset += 2 + len;
        }
        Err(WriteError::CcParse)
    }
}

/// NLEN followed by the message, checked against the advertised file size
pub fn build_file_payload(ndef: &[u8], max_ndef_size: u16) -> Result<Vec<u8>, WriteError> {
    let needed = ndef.len() + 2;
    if needed > max_ndef_size as usize || ndef.len() > u16::MAX as usize {
        return Err(WriteError::PayloadTooLarge {
            needed,
            max: max_ndef_size as usize,
        });
    }

    let mut payload = Vec::with_capacity(needed);
    payload.extend_from_slice(&(ndef.len() as u16).to_be_bytes());
    payload.extend_from_slice(ndef);
    Ok(payload)
}

/// Run the full Type 4 write sequence. Returns the bytes written to the file.
pub fn write(transport: &mut dyn Transport, ndef: &[u8]) -> Result<usize, WriteError> {
    info!("Attempting Type 4 / ISO 14443-4 NDEF write");

    exchange(transport, "SELECT NDEF App", &commands::select_aid(&NDEF_APP_AID).build(), 0)?;
    exchange(transport, "SELECT CC", &commands::select_file(CC_FILE_ID).build(), 0)?;
    let cc = exchange(
        transport,
        "READ CC",
        &commands::read_binary(0, CC_READ_LEN).build(),
        CC_READ_LEN as usize,
    )?;

    let container = CapabilityContainer::parse(&cc)?;
    debug!(
        file_id = %format!("{:04X}", container.ndef_file_id),
        max_size = container.max_ndef_size,
        "Parsed capability container"
    );

    exchange(
        transport,
        "SELECT NDEF file",
        &commands::select_file(container.ndef_file_id).build(),
        0,
    )?;

    let payload = build_file_payload(ndef, container.max_ndef_size)?;

    let mut offset = 0usize;
    for part in payload.chunks(MAX_CHUNK) {
        let step = format!("UPDATE BINARY @{}", offset);
        exchange(transport, &step, &commands::update_binary(offset as u16, part).build(), 0)?;
        offset += part.len();
    }

    info!(bytes = offset, "Type 4 write completed");
    Ok(offset)
}
