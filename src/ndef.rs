//! NDEF URI record construction and Type 2 TLV framing

/// NDEF record header flags
const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_SR: u8 = 0x10;
const TNF_WELL_KNOWN: u8 = 0x01;

/// Record type of a URI record ("U")
const RTD_URI: u8 = 0x55;

/// Type 2 TLV tags
pub const TLV_NDEF: u8 = 0x03;
pub const TLV_TERMINATOR: u8 = 0xFE;

/// Longest NDEF message that fits the one-byte TLV length
pub const TLV_SHORT_MAX: usize = 0xFE;

/// URI identifier codes (NFC Forum URI RTD, table 3)
const URI_PREFIXES: &[(u8, &str)] = &[
    (0x01, "http://www."),
    (0x02, "https://www."),
    (0x03, "http://"),
    (0x04, "https://"),
    (0x05, "tel:"),
    (0x06, "mailto:"),
    (0x07, "ftp://anonymous:anonymous@"),
    (0x08, "ftp://ftp."),
    (0x09, "ftps://"),
    (0x0A, "sftp://"),
    (0x0B, "smb://"),
    (0x0C, "nfs://"),
    (0x0D, "ftp://"),
    (0x0E, "dav://"),
    (0x0F, "news:"),
    (0x10, "telnet://"),
    (0x11, "imap:"),
    (0x12, "rtsp://"),
    (0x13, "urn:"),
    (0x14, "pop:"),
    (0x15, "sip:"),
    (0x16, "sips:"),
    (0x17, "tftp:"),
    (0x18, "btspp://"),
    (0x19, "btl2cap://"),
    (0x1A, "btgoep://"),
    (0x1B, "tcpobex://"),
    (0x1C, "irdaobex://"),
    (0x1D, "file://"),
    (0x1E, "urn:epc:id:"),
    (0x1F, "urn:epc:tag:"),
    (0x20, "urn:epc:pat:"),
    (0x21, "urn:epc:raw:"),
    (0x22, "urn:epc:"),
    (0x23, "urn:nfc:"),
];

/// Collapse a repeated `http(s)://` prefix into one.
///
/// The last scheme wins, so `http://https://x` becomes `https://x`.
pub fn normalize_url(url: &str) -> &str {
    let mut current = url.trim();
    loop {
        let Some(rest) = strip_http_scheme(current) else {
            return current;
        };
        if strip_http_scheme(rest).is_some() {
            current = rest;
        } else {
            return current;
        }
    }
}

fn strip_http_scheme(s: &str) -> Option<&str> {
    ["http://", "https://"].iter().find_map(|scheme| {
        let head = s.get(..scheme.len())?;
        if head.eq_ignore_ascii_case(scheme) {
            s.get(scheme.len()..)
        } else {
            None
        }
    })
}

/// Pick the longest well-known prefix of `uri`, returning its code and the remainder
fn compress_prefix(uri: &str) -> (u8, &str) {
    URI_PREFIXES
        .iter()
        .filter(|(_, prefix)| uri.starts_with(prefix))
        .max_by_key(|(_, prefix)| prefix.len())
        .map(|(code, prefix)| (*code, &uri[prefix.len()..]))
        .unwrap_or((0x00, uri))
}

/// Build a one-record NDEF message holding `url` as a URI record
pub fn encode_uri(url: &str) -> Vec<u8> {
    let (code, rest) = compress_prefix(normalize_url(url));

    let mut payload = Vec::with_capacity(rest.len() + 1);
    payload.push(code);
    payload.extend_from_slice(rest.as_bytes());

    let mut record = Vec::with_capacity(payload.len() + 7);
    if payload.len() <= 0xFF {
        record.push(FLAG_MB | FLAG_ME | FLAG_SR | TNF_WELL_KNOWN);
        record.push(0x01);
        record.push(payload.len() as u8);
    } else {
        record.push(FLAG_MB | FLAG_ME | TNF_WELL_KNOWN);
        record.push(0x01);
        record.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    }
    record.push(RTD_URI);
    record.extend_from_slice(&payload);
    record
}

/// Frame an NDEF message as a Type 2 NDEF TLV, zero padded to whole pages.
///
/// The TLV length field holds at most `u16::MAX` bytes; callers must not pass
/// a longer message.
pub fn wrap_type2_tlv(ndef: &[u8]) -> Vec<u8> {
    debug_assert!(
        ndef.len() <= u16::MAX as usize,
        "NDEF message of {} bytes exceeds the TLV length field",
        ndef.len()
    );
    let mut tlv = Vec::with_capacity(ndef.len() + 8);
    tlv.push(TLV_NDEF);
    if ndef.len() <= TLV_SHORT_MAX {
        tlv.push(ndef.len() as u8);
    } else {
        tlv.push(0xFF);
        tlv.extend_from_slice(&(ndef.len() as u16).to_be_bytes());
    }
    tlv.extend_from_slice(ndef);
    tlv.push(TLV_TERMINATOR);

    let padded = tlv.len().div_ceil(4) * 4;
    tlv.resize(padded, 0x00);
    tlv
}
