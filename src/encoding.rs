//! Declared-encoding detection, input decoding and output encoding.

use crate::error::{Error, Result};
use encoding_rs::{Encoding, REPLACEMENT, UTF_16BE, UTF_16LE, UTF_8};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;

/// Only this many leading bytes are searched for the declaration.
pub const DECL_SCAN_LEN: usize = 128;

/// Returns the `encoding` value of the XML declaration, if there is one.
///
/// This is a tolerant scan, not a declaration parser: it looks at the first
/// [`DECL_SCAN_LEN`] bytes, keeps the ASCII among them, and takes the
/// text between the first two double quotes after the first `encoding`
/// token. NUL bytes are skipped so UTF-16 headers scan like ASCII ones.
///
/// ```
/// use xml_batch_edit::detect_declared_encoding;
///
/// let xml = br#"<?xml version="1.0" encoding="windows-1251"?><a/>"#;
/// assert_eq!(detect_declared_encoding(xml).as_deref(), Some("windows-1251"));
/// assert_eq!(detect_declared_encoding(b"<a/>"), None);
/// ```
pub fn detect_declared_encoding(bytes: &[u8]) -> Option<String> {
    let head: String = bytes
        .iter()
        .take(DECL_SCAN_LEN)
        .filter(|b| b.is_ascii() && **b != 0)
        .map(|&b| b as char)
        .collect();
    if !head.contains("<?xml") {
        return None;
    }
    let rest = &head[head.find("encoding")?..];
    let open = rest.find('"')? + 1;
    let len = rest[open..].find('"')?;
    let value = rest[open..open + len].trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Encoding given by a byte order mark or the first bytes of a declaration,
/// and the length of the BOM.
pub(crate) fn sniff(bytes: &[u8]) -> (Option<&'static Encoding>, usize) {
    match bytes {
        [0xfe, 0xff, ..] => (Some(UTF_16BE), 2),
        [0xff, 0xfe, ..] => (Some(UTF_16LE), 2),
        [0xef, 0xbb, 0xbf, ..] => (Some(UTF_8), 3),
        [0x00, 0x3c, 0x00, 0x3f, ..] => (Some(UTF_16BE), 0),
        [0x3c, 0x00, 0x3f, 0x00, ..] => (Some(UTF_16LE), 0),
        _ => (None, 0),
    }
}

// Full declaration parse, any quote style. Only called on ASCII compatible input.
fn declared_label(bytes: &[u8]) -> Result<Option<String>> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::with_capacity(150);
    match reader.read_event(&mut buf) {
        Ok(Event::Decl(ev)) => match ev.encoding() {
            Some(res) => Ok(Some(String::from_utf8(res?.to_vec())?)),
            None => Ok(None),
        },
        _ => Ok(None),
    }
}

/// Decodes a document into UTF-8.
///
/// A BOM wins over the declaration. Without either, UTF-8 is assumed.
/// `lossy` accepts malformed sequences, replacing them with U+FFFD.
pub(crate) fn decode(bytes: &[u8], lossy: bool) -> Result<(&'static Encoding, Cow<'_, str>)> {
    let (sniffed, bom_len) = sniff(bytes);
    let body = &bytes[bom_len..];
    let encoding = match sniffed {
        Some(encoding) => encoding,
        None => match declared_label(body)? {
            Some(label) => Encoding::for_label(label.trim().as_bytes())
                .ok_or(Error::UnsupportedEncoding(label))?,
            None => UTF_8,
        },
    };
    if encoding == REPLACEMENT {
        return Err(Error::UnsupportedEncoding(encoding.name().to_string()));
    }
    let (text, had_errors) = encoding.decode_without_bom_handling(body);
    if had_errors && !lossy {
        return Err(Error::CannotDecode);
    }
    Ok((encoding, text))
}

/// Encodes serialized xml into the encoding named by `label`.
///
/// Characters the target can't represent become numeric character
/// references. UTF-16 is written with a BOM only for the bare `UTF-16`
/// label, whose byte order follows `source`.
pub(crate) fn encode(text: &str, label: &str, source: &'static Encoding) -> Result<Vec<u8>> {
    let encoding = Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| Error::UnsupportedEncoding(label.to_string()))?;
    if encoding == REPLACEMENT {
        return Err(Error::UnsupportedEncoding(label.to_string()));
    }
    if encoding == UTF_16LE || encoding == UTF_16BE {
        let generic = label.trim().eq_ignore_ascii_case("utf-16");
        // Encoding::for_label("UTF-16") defaults to UTF-16 LE, even though it could be UTF-16 BE
        let big_endian = encoding == UTF_16BE || (generic && source == UTF_16BE);
        return Ok(encode_utf16(text, big_endian, generic));
    }
    let (bytes, _, _) = encoding.encode(text);
    Ok(bytes.into_owned())
}

fn encode_utf16(text: &str, big_endian: bool, bom: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * 2 + 2);
    let units = bom.then_some(0xfeff_u16).into_iter().chain(text.encode_utf16());
    for unit in units {
        let bytes = if big_endian {
            unit.to_be_bytes()
        } else {
            unit.to_le_bytes()
        };
        out.extend_from_slice(&bytes);
    }
    out
}
