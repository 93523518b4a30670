//! Raw central directory access.
//!
//! The zip reader hides the originating-system byte and the external
//! attribute word of an entry, and merges records that share a name. The
//! writer always tags entries as made on Unix. This module reads the
//! records as they are stored and patches a finished archive in place.

use std::io::{self, Read, Seek, SeekFrom, Write};

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;

const EOCD_LEN: usize = 22;
const ZIP64_LOCATOR_LEN: u64 = 20;
const ZIP64_EOCD_LEN: usize = 56;
const CENTRAL_HEADER_LEN: usize = 46;
const ZIP64_EXTRA_ID: u16 = 0x0001;

/// Central header fields the zip writer has no setter for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryAttributes {
    /// High byte of "version made by": 0 is MS-DOS, 3 is Unix.
    pub system: u8,
    pub external: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct CentralRecord {
    pub name: Vec<u8>,
    /// Offset of the local header, shifted the way the zip reader shifts
    /// archives with a prefix.
    pub header_start: u64,
    pub attributes: EntryAttributes,
}

impl CentralRecord {
    pub fn display_name(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

struct Directory {
    start: u64,
    size: u64,
    // `start` minus the offset the end record declares
    shift: u64,
}

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn le_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn read_at<R: Read + Seek>(reader: &mut R, at: u64, len: u64) -> io::Result<Vec<u8>> {
    let len = usize::try_from(len).map_err(|_| invalid("central directory too large"))?;
    reader.seek(SeekFrom::Start(at))?;
    let mut buf = vec![0; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn locate<R: Read + Seek>(reader: &mut R) -> io::Result<Directory> {
    let len = reader.seek(SeekFrom::End(0))?;
    let tail_len = len.min((EOCD_LEN + u16::MAX as usize) as u64);
    let tail = read_at(reader, len - tail_len, tail_len)?;
    if tail.len() < EOCD_LEN {
        return Err(invalid("no end of central directory record"));
    }
    let pos = (0..=tail.len() - EOCD_LEN)
        .rev()
        .find(|&at| le_u32(&tail, at) == EOCD_SIGNATURE)
        .ok_or_else(|| invalid("no end of central directory record"))?;
    let eocd = &tail[pos..];
    let eocd_offset = len - tail_len + pos as u64;

    let mut size = u64::from(le_u32(eocd, 12));
    let mut declared = u64::from(le_u32(eocd, 16));
    let mut end = eocd_offset;
    if le_u16(eocd, 10) == u16::MAX || size == u64::from(u32::MAX) || declared == u64::from(u32::MAX)
    {
        let locator_offset = eocd_offset
            .checked_sub(ZIP64_LOCATOR_LEN)
            .ok_or_else(|| invalid("missing zip64 locator"))?;
        let locator = read_at(reader, locator_offset, ZIP64_LOCATOR_LEN)?;
        if le_u32(&locator, 0) != ZIP64_LOCATOR_SIGNATURE {
            return Err(invalid("missing zip64 locator"));
        }
        // the declared offset is off by the archive prefix, if any
        let adjacent = locator_offset.checked_sub(ZIP64_EOCD_LEN as u64);
        let candidates = [Some(le_u64(&locator, 8)), adjacent];
        let mut found = None;
        for at in candidates.iter().flatten() {
            if at + ZIP64_EOCD_LEN as u64 > len {
                continue;
            }
            let record = read_at(reader, *at, ZIP64_EOCD_LEN as u64)?;
            if le_u32(&record, 0) == ZIP64_EOCD_SIGNATURE {
                found = Some((*at, record));
                break;
            }
        }
        let (at, record) = found.ok_or_else(|| invalid("missing zip64 end record"))?;
        size = le_u64(&record, 40);
        declared = le_u64(&record, 48);
        end = at;
    }

    let start = end
        .checked_sub(size)
        .ok_or_else(|| invalid("central directory larger than archive"))?;
    let shift = start
        .checked_sub(declared)
        .ok_or_else(|| invalid("central directory offset past its position"))?;
    Ok(Directory { start, size, shift })
}

// Offsets of the records within the directory.
fn record_starts(bytes: &[u8]) -> io::Result<Vec<usize>> {
    let mut starts = Vec::new();
    let mut at = 0;
    while at < bytes.len() {
        let header = bytes
            .get(at..at + CENTRAL_HEADER_LEN)
            .ok_or_else(|| invalid("truncated central directory record"))?;
        if le_u32(header, 0) != CENTRAL_HEADER_SIGNATURE {
            return Err(invalid("bad central directory record signature"));
        }
        let variable = usize::from(le_u16(header, 28))
            + usize::from(le_u16(header, 30))
            + usize::from(le_u16(header, 32));
        let end = at + CENTRAL_HEADER_LEN + variable;
        if end > bytes.len() {
            return Err(invalid("truncated central directory record"));
        }
        starts.push(at);
        at = end;
    }
    Ok(starts)
}

// Local header offset from the zip64 extra field. Its values are present
// only for header fields saturated at u32::MAX, in this order.
fn zip64_header_start(header: &[u8], mut extra: &[u8]) -> Option<u64> {
    let skip = [24, 20]
        .iter()
        .filter(|&&at| le_u32(header, at) == u32::MAX)
        .count()
        * 8;
    while extra.len() >= 4 {
        let id = le_u16(extra, 0);
        let len = usize::from(le_u16(extra, 2));
        let data = extra.get(4..4 + len)?;
        if id == ZIP64_EXTRA_ID {
            return data.get(skip..skip + 8).map(|field| le_u64(field, 0));
        }
        extra = &extra[4 + len..];
    }
    None
}

/// Every record of the central directory, in stored order, duplicates
/// included.
pub(crate) fn read_records<R: Read + Seek>(reader: &mut R) -> io::Result<Vec<CentralRecord>> {
    let dir = locate(reader)?;
    let bytes = read_at(reader, dir.start, dir.size)?;
    let mut records = Vec::new();
    for start in record_starts(&bytes)? {
        let header = &bytes[start..start + CENTRAL_HEADER_LEN];
        let name_start = start + CENTRAL_HEADER_LEN;
        let name_end = name_start + usize::from(le_u16(header, 28));
        let extra = &bytes[name_end..name_end + usize::from(le_u16(header, 30))];

        let mut header_start = u64::from(le_u32(header, 42));
        if header_start == u64::from(u32::MAX) {
            header_start = zip64_header_start(header, extra)
                .ok_or_else(|| invalid("zip64 record without a header offset"))?;
        }
        records.push(CentralRecord {
            name: bytes[name_start..name_end].to_vec(),
            header_start: header_start + dir.shift,
            attributes: EntryAttributes {
                system: header[5],
                external: le_u32(header, 38),
            },
        });
    }
    Ok(records)
}

/// Overwrites the system byte and external attributes of the records of a
/// finished archive. `attributes` has one item per record, in order; `None`
/// leaves the record as written. The stream is left at its end.
///
/// Returns `false`, without writing, when the archive doesn't hold one
/// record per item.
pub(crate) fn patch_attributes<W: Read + Write + Seek>(
    archive: &mut W,
    attributes: &[Option<EntryAttributes>],
) -> io::Result<bool> {
    if attributes.iter().all(Option::is_none) {
        return Ok(true);
    }
    let dir = locate(archive)?;
    let mut bytes = read_at(archive, dir.start, dir.size)?;
    let starts = record_starts(&bytes)?;
    if starts.len() != attributes.len() {
        archive.seek(SeekFrom::End(0))?;
        return Ok(false);
    }
    for (start, attrs) in starts.into_iter().zip(attributes) {
        if let Some(attrs) = attrs {
            bytes[start + 5] = attrs.system;
            bytes[start + 38..start + 42].copy_from_slice(&attrs.external.to_le_bytes());
        }
    }
    archive.seek(SeekFrom::Start(dir.start))?;
    archive.write_all(&bytes)?;
    archive.seek(SeekFrom::End(0))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build(names: &[&str]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for name in names {
            writer
                .start_file(*name, SimpleFileOptions::default().unix_permissions(0o644))
                .unwrap();
            writer.write_all(name.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_read_records() {
        let bytes = build(&["a.txt", "dir/b.xml"]);
        let records = read_records(&mut Cursor::new(&bytes)).unwrap();
        let names: Vec<String> = records.iter().map(CentralRecord::display_name).collect();
        assert_eq!(names, vec!["a.txt", "dir/b.xml"]);
        assert_eq!(records[0].header_start, 0);
        assert!(records[1].header_start > 0);
        assert_eq!(records[0].attributes.system, 3);
        assert_eq!(records[0].attributes.external >> 16 & 0o777, 0o644);
    }

    #[test]
    fn test_prefixed_archive_is_shifted() {
        let mut bytes = b"#!prefix\n".to_vec();
        bytes.extend(build(&["a.txt"]));
        let records = read_records(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(records[0].header_start, 9);
    }

    #[test]
    fn test_patch_attributes() {
        let mut archive = Cursor::new(build(&["a.txt", "b.txt"]));
        let dos = EntryAttributes {
            system: 0,
            external: 0x21,
        };
        assert!(patch_attributes(&mut archive, &[None, Some(dos)]).unwrap());
        assert_eq!(archive.position(), archive.get_ref().len() as u64);

        let records = read_records(&mut archive).unwrap();
        assert_eq!(records[0].attributes.system, 3);
        assert_eq!(records[1].attributes, dos);

        let before = archive.get_ref().clone();
        assert!(!patch_attributes(&mut archive, &[Some(dos)]).unwrap());
        assert_eq!(archive.get_ref(), &before);
    }

    #[test]
    fn test_not_an_archive() {
        assert!(read_records(&mut Cursor::new(b"plain text".to_vec())).is_err());
        assert!(read_records(&mut Cursor::new(Vec::new())).is_err());
    }
}
