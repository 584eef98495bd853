//! NFC Forum Type 2 (NTAG / Ultralight) page writer

use crate::apdu::{commands, expect_ok, status_word, transmit_logged, Transport, SW_SUCCESS};
use crate::error::{TransportError, WriteError};
use crate::ndef::wrap_type2_tlv;
use tracing::{info, warn};

/// First user data page, after UID, lock bytes and capability container
pub const FIRST_DATA_BLOCK: u8 = 4;

/// Page size of Type 2 tags
pub const BLOCK_SIZE: usize = 4;

/// Split a TLV into pages, zero-padding the last one
pub fn split_blocks(tlv: &[u8]) -> Vec<[u8; BLOCK_SIZE]> {
    tlv.chunks(BLOCK_SIZE)
        .map(|chunk| {
            let mut block = [0u8; BLOCK_SIZE];
            block[..chunk.len()].copy_from_slice(chunk);
            block
        })
        .collect()
}

/// Write an NDEF message as a TLV starting at [`FIRST_DATA_BLOCK`].
///
/// Returns the number of pages written. The first page that is not
/// acknowledged with `90 00` aborts the write.
pub fn write(transport: &mut dyn Transport, ndef: &[u8]) -> Result<usize, WriteError> {
    let tlv = wrap_type2_tlv(ndef);
    let blocks = split_blocks(&tlv);

    let max_blocks = (u8::MAX - FIRST_DATA_BLOCK) as usize + 1;
    if blocks.len() > max_blocks {
        return Err(WriteError::PayloadTooLarge {
            needed: tlv.len(),
            max: max_blocks * BLOCK_SIZE,
        });
    }

    info!(bytes = tlv.len(), blocks = blocks.len(), "Writing Type 2 tag");

    for (block, data) in (FIRST_DATA_BLOCK..=u8::MAX).zip(&blocks) {
        let step = format!("WRITE block {}", block);
        let apdu = commands::update_page(block, data).build();
        let response = transmit_logged(transport, &step, &apdu, 0)?;
        match status_word(&response) {
            Some(SW_SUCCESS) => {}
            Some(sw) => return Err(WriteError::BlockWrite { block, sw }),
            None => {
                return Err(WriteError::transport(
                    step,
                    TransportError::ShortResponse(response.len()),
                ))
            }
        }
    }

    info!("Type 2 write completed");
    Ok(blocks.len())
}

/// Read `count` pages starting at `start`
pub fn read_blocks(
    transport: &mut dyn Transport,
    start: u8,
    count: u8,
) -> Result<Vec<u8>, WriteError> {
    let mut pages = Vec::with_capacity(count as usize * BLOCK_SIZE);
    for block in (start..=u8::MAX).take(count as usize) {
        let step = format!("READ block {}", block);
        let apdu = commands::read_page(block).build();
        let response = transmit_logged(transport, &step, &apdu, BLOCK_SIZE)?;
        pages.extend_from_slice(expect_ok(&response, &step)?);
    }
    Ok(pages)
}

/// Read back the first written pages and log them.
///
/// Runs after the write already succeeded, so a failure here only logs.
pub fn verify(transport: &mut dyn Transport, count: u8) {
    if count == 0 {
        return;
    }
    match read_blocks(transport, FIRST_DATA_BLOCK, count) {
        Ok(data) => info!(data = %hex::encode(&data), "Verify read-back"),
        Err(e) => warn!(error = %e, "Verification read failed (non-fatal)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apdu::testing::ScriptedTag;
    use crate::ndef::encode_uri;

    #[test]
    fn test_split_blocks_pads_last_block() {
        let blocks = split_blocks(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(blocks, vec![[1, 2, 3, 4], [5, 6, 0, 0]]);

        for n in 1..=40usize {
            let data = vec![0xAB; n];
            assert_eq!(split_blocks(&data).len(), n.div_ceil(4));
        }
    }

    #[test]
    fn test_write_issues_sequential_page_writes() {
        let ndef = encode_uri("https://example.com/u/42");
        let tlv = wrap_type2_tlv(&ndef);
        let mut tag = ScriptedTag::acking();

        let written = write(&mut tag, &ndef).unwrap();
        assert_eq!(written, tlv.len() / 4);

        let sent = tag.sent();
        assert_eq!(sent.len(), written);
        for (i, apdu) in sent.iter().enumerate() {
            assert_eq!(&apdu[..5], &[0xFF, 0xD6, 0x00, FIRST_DATA_BLOCK + i as u8, 0x04]);
            assert_eq!(&apdu[5..], &tlv[i * 4..i * 4 + 4]);
        }
    }

    #[test]
    fn test_write_aborts_on_first_rejected_page() {
        let mut tag = ScriptedTag::default()
            .reply(&[0x90, 0x00])
            .reply(&[0x63, 0x00])
            .reply(&[0x90, 0x00]);
        let ndef = encode_uri("https://example.com/a/long/enough/path");

        let err = write(&mut tag, &ndef).unwrap_err();
        assert!(matches!(err, WriteError::BlockWrite { block: 5, sw: 0x6300 }));
        assert_eq!(tag.sent().len(), 2);
    }

    #[test]
    fn test_write_rejects_tlv_beyond_page_space() {
        let mut tag = ScriptedTag::acking();
        let err = write(&mut tag, &[0u8; 1100]).unwrap_err();
        assert!(matches!(err, WriteError::PayloadTooLarge { .. }));
        assert!(tag.sent().is_empty());
    }

    #[test]
    fn test_read_blocks_concatenates_pages() {
        let mut tag = ScriptedTag::default()
            .reply(&[0x03, 0x10, 0xD1, 0x01, 0x90, 0x00])
            .reply(&[0x0C, 0x55, 0x04, 0x65, 0x90, 0x00]);
        let data = read_blocks(&mut tag, 4, 2).unwrap();
        assert_eq!(data, vec![0x03, 0x10, 0xD1, 0x01, 0x0C, 0x55, 0x04, 0x65]);
        assert_eq!(tag.sent()[1], vec![0xFF, 0xB0, 0x00, 0x05, 0x04]);
    }

    #[test]
    fn test_verify_failure_is_swallowed() {
        let mut tag = ScriptedTag::default().reply(&[0x6A, 0x82]);
        verify(&mut tag, 4);
        assert_eq!(tag.sent().len(), 1);
    }
}
