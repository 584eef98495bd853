use crate::apdu::{commands, Transport};
use crate::error::TransportError;
use crate::types::{CardInfo, CardType};
use pcsc::MAX_BUFFER_SIZE;
use tracing::warn;

/// Upper bound on chained GET RESPONSE exchanges for one command
const MAX_GET_RESPONSE: u32 = 3;

/// A card connected through PC/SC
pub struct PcscCard {
    inner: pcsc::Card,
}

impl PcscCard {
    pub fn new(inner: pcsc::Card) -> Self {
        Self { inner }
    }

    /// ATR as reported by the reader for the connected card
    pub fn atr(&self) -> Result<Vec<u8>, TransportError> {
        let status = self.inner.status2_owned()?;
        Ok(status.atr().to_vec())
    }

    /// Read ATR and UID and classify the tag family
    pub fn identify(&mut self) -> Result<CardInfo, TransportError> {
        let atr = self.atr()?;
        let response = self.transmit(&commands::get_uid().build(), 10)?;

        let uid = match response.as_slice() {
            [data @ .., 0x90, 0x00] => data.to_vec(),
            _ => {
                warn!(response = %hex::encode_upper(&response), "GET UID rejected by card");
                Vec::new()
            }
        };

        Ok(CardInfo {
            card_type: CardType::from_atr(&atr),
            uid,
            atr,
        })
    }
}

impl Transport for PcscCard {
    fn transmit(&mut self, command: &[u8], response_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut response = vec![0u8; (response_len + 2).min(MAX_BUFFER_SIZE)];
        let first = self.inner.transmit(command, &mut response)?;

        let (mut data, mut sw1, mut sw2) = match first {
            [data @ .., sw1, sw2] => (data.to_vec(), *sw1, *sw2),
            _ => return Err(TransportError::ShortResponse(first.len())),
        };

        // SW1 = 0x61 means more data is waiting for GET RESPONSE
        let mut get_response_count = 0;
        while sw1 == 0x61 && get_response_count < MAX_GET_RESPONSE {
            let remaining = if sw2 == 0 { 0x100 } else { sw2 as usize };
            let get_response_cmd = [0x00, 0xC0, 0x00, 0x00, sw2];
            let mut buf = vec![0u8; remaining + 2];
            let next = self.inner.transmit(&get_response_cmd, &mut buf)?;

            match next {
                [chunk @ .., next_sw1, next_sw2] => {
                    data.extend_from_slice(chunk);
                    sw1 = *next_sw1;
                    sw2 = *next_sw2;
                }
                _ => return Err(TransportError::ShortResponse(next.len())),
            }
            get_response_count += 1;
        }

        data.push(sw1);
        data.push(sw2);
        Ok(data)
    }
}
