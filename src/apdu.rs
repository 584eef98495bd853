//! APDU command building and single-exchange transport

use crate::error::{TransportError, WriteError};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Status word for a successful command
pub const SW_SUCCESS: u16 = 0x9000;

/// One command/response exchange with whatever sits behind a reader handle.
///
/// `response_len` is the expected data length, not counting the status word.
/// Implementations return the raw response including SW1 SW2.
pub trait Transport: Send {
    fn transmit(&mut self, apdu: &[u8], response_len: usize) -> Result<Vec<u8>, TransportError>;
}

/// Connected card shared between the tracker and in-flight writes.
///
/// The mutex serializes writes to one physical reader.
pub type CardChannel = Arc<Mutex<dyn Transport>>;

/// Wrap a transport into a [`CardChannel`]
pub fn channel<T: Transport + 'static>(transport: T) -> CardChannel {
    Arc::new(Mutex::new(transport))
}

/// Trailing status word of a raw response
pub fn status_word(response: &[u8]) -> Option<u16> {
    match response {
        [.., sw1, sw2] => Some(u16::from_be_bytes([*sw1, *sw2])),
        _ => None,
    }
}

/// Check that a response ends in `90 00` and return its data part
pub fn expect_ok<'a>(response: &'a [u8], context: &str) -> Result<&'a [u8], WriteError> {
    let sw = status_word(response).ok_or_else(|| {
        WriteError::transport(context, TransportError::ShortResponse(response.len()))
    })?;
    if sw != SW_SUCCESS {
        return Err(WriteError::Apdu {
            step: context.to_string(),
            sw,
        });
    }
    Ok(&response[..response.len() - 2])
}

/// Send one command and log both directions, without judging the status word
pub fn transmit_logged(
    transport: &mut dyn Transport,
    step: &str,
    apdu: &[u8],
    response_len: usize,
) -> Result<Vec<u8>, WriteError> {
    debug!(step, command = %hex::encode_upper(apdu), "APDU >>");
    let response = transport
        .transmit(apdu, response_len)
        .map_err(|e| WriteError::transport(step, e))?;
    debug!(step, response = %hex::encode_upper(&response), "APDU <<");
    Ok(response)
}

/// Send one command and require `90 00`, returning the response data
pub fn exchange(
    transport: &mut dyn Transport,
    step: &str,
    apdu: &[u8],
    response_len: usize,
) -> Result<Vec<u8>, WriteError> {
    let response = transmit_logged(transport, step, apdu, response_len)?;
    expect_ok(&response, step).map(<[u8]>::to_vec)
}

/// Short APDU command builder
#[derive(Debug, Clone)]
pub struct ApduCommand {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
    le: Option<u8>,
}

impl ApduCommand {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    /// Set command data.
    ///
    /// Only short APDUs are built, so `data` must fit a one-byte Lc (255 bytes).
    pub fn data(mut self, data: &[u8]) -> Self {
        debug_assert!(
            data.len() <= u8::MAX as usize,
            "command data of {} bytes exceeds a short APDU",
            data.len()
        );
        self.data = data.to_vec();
        self
    }

    /// Set expected response length
    pub fn le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut apdu = vec![self.cla, self.ins, self.p1, self.p2];

        if !self.data.is_empty() {
            apdu.push(self.data.len() as u8);
            apdu.extend_from_slice(&self.data);
        }

        if let Some(le) = self.le {
            apdu.push(le);
        }

        apdu
    }
}

/// Commands used by the tag writers
pub mod commands {
    use super::ApduCommand;

    /// SELECT by DF name (AID), first or only occurrence
    pub fn select_aid(aid: &[u8]) -> ApduCommand {
        ApduCommand::new(0x00, 0xA4, 0x04, 0x00).data(aid).le(0x00)
    }

    /// SELECT EF by file identifier, no response data
    pub fn select_file(file_id: u16) -> ApduCommand {
        ApduCommand::new(0x00, 0xA4, 0x00, 0x0C).data(&file_id.to_be_bytes())
    }

    /// READ BINARY from the selected EF
    pub fn read_binary(offset: u16, len: u8) -> ApduCommand {
        let [p1, p2] = offset.to_be_bytes();
        ApduCommand::new(0x00, 0xB0, p1, p2).le(len)
    }

    /// UPDATE BINARY into the selected EF
    pub fn update_binary(offset: u16, data: &[u8]) -> ApduCommand {
        let [p1, p2] = offset.to_be_bytes();
        ApduCommand::new(0x00, 0xD6, p1, p2).data(data)
    }

    /// PC/SC pseudo-APDU: GET DATA (UID)
    pub fn get_uid() -> ApduCommand {
        ApduCommand::new(0xFF, 0xCA, 0x00, 0x00).le(0x00)
    }

    /// PC/SC pseudo-APDU: READ BINARY of one 4-byte page
    pub fn read_page(block: u8) -> ApduCommand {
        ApduCommand::new(0xFF, 0xB0, 0x00, block).le(0x04)
    }

    /// PC/SC pseudo-APDU: UPDATE BINARY of one 4-byte page
    pub fn update_page(block: u8, data: &[u8; 4]) -> ApduCommand {
        ApduCommand::new(0xFF, 0xD6, 0x00, block).data(data)
    }
}
