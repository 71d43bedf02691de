//! Subunit v2 test-result stream.
//!
//! Packet layout (big-endian):
//! - 1 byte: signature `0xB3`
//! - 2 bytes: flags (version `0x2` in the top nibble, status in the low 3 bits)
//! - variable-length number: total packet length, CRC included
//! - optional fields, in flag order: timestamp, test id, tags, mime type,
//!   file content, route code
//! - 4 bytes: CRC32 of everything before it

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::Crc;
use tempfile::NamedTempFile;
use thiserror::Error;

const SIGNATURE: u8 = 0xB3;
const VERSION: u16 = 0x2000;

const FLAG_TEST_ID: u16 = 0x0800;
const FLAG_ROUTE_CODE: u16 = 0x0400;
const FLAG_TIMESTAMP: u16 = 0x0200;
const FLAG_RUNNABLE: u16 = 0x0100;
const FLAG_TAGS: u16 = 0x0080;
const FLAG_MIME_TYPE: u16 = 0x0040;
const FLAG_EOF: u16 = 0x0020;
const FLAG_FILE_CONTENT: u16 = 0x0010;

/// Largest packet a consumer is required to accept.
pub const MAX_PACKET_LENGTH: usize = 4 * 1024 * 1024 - 1;

/// Subunit error types.
#[derive(Error, Debug)]
pub enum SubunitError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("number {0} too large for a subunit varint")]
    NumberTooLarge(u64),
    #[error("packet of {0} bytes exceeds the subunit limit")]
    PacketTooLarge(usize),
    #[error("timestamp {0} not representable in a subunit packet")]
    Timestamp(DateTime<Utc>),
    #[error("malformed packet: {0}")]
    Malformed(String),
}

/// Test status carried in the low three flag bits. Only the statuses an
/// uptime run reports are modelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestStatus {
    #[default]
    Undefined,
    Success,
    Fail,
}

impl TestStatus {
    fn mask(self) -> u16 {
        match self {
            TestStatus::Undefined => 0,
            TestStatus::Success => 3,
            TestStatus::Fail => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Undefined => "undefined",
            TestStatus::Success => "success",
            TestStatus::Fail => "fail",
        }
    }
}

/// One status packet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TestEvent {
    pub test_id: Option<String>,
    pub status: TestStatus,
    pub timestamp: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub runnable: bool,
    pub eof: bool,
    pub mime_type: Option<String>,
    /// File name and bytes attached to the event.
    pub file: Option<(String, Vec<u8>)>,
    pub route_code: Option<String>,
}

/// Append a subunit variable-length number (up to 30 bits).
pub fn encode_number(value: u64, out: &mut Vec<u8>) -> Result<(), SubunitError> {
    if value < 0x40 {
        out.push(value as u8);
    } else if value < 0x4000 {
        out.extend_from_slice(&((value as u16) | 0x4000).to_be_bytes());
    } else if value < 0x40_0000 {
        let v = (value as u32) | 0x80_0000;
        out.push((v >> 16) as u8);
        out.extend_from_slice(&(v as u16).to_be_bytes());
    } else if value < 0x4000_0000 {
        out.extend_from_slice(&((value as u32) | 0xC000_0000).to_be_bytes());
    } else {
        return Err(SubunitError::NumberTooLarge(value));
    }
    Ok(())
}

fn encode_utf8(s: &str, out: &mut Vec<u8>) -> Result<(), SubunitError> {
    encode_number(s.len() as u64, out)?;
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(bytes);
    crc.sum()
}

/// Encode one event as a complete packet.
pub fn encode_packet(event: &TestEvent) -> Result<Vec<u8>, SubunitError> {
    let mut flags = VERSION | event.status.mask();
    let mut body = Vec::new();

    if let Some(ts) = event.timestamp {
        let seconds = u32::try_from(ts.timestamp()).map_err(|_| SubunitError::Timestamp(ts))?;
        flags |= FLAG_TIMESTAMP;
        body.extend_from_slice(&seconds.to_be_bytes());
        encode_number(ts.timestamp_subsec_nanos() as u64, &mut body)?;
    }
    if let Some(id) = &event.test_id {
        flags |= FLAG_TEST_ID;
        encode_utf8(id, &mut body)?;
    }
    if !event.tags.is_empty() {
        flags |= FLAG_TAGS;
        encode_number(event.tags.len() as u64, &mut body)?;
        for tag in &event.tags {
            encode_utf8(tag, &mut body)?;
        }
    }
    if event.runnable {
        flags |= FLAG_RUNNABLE;
    }
    if let Some(mime) = &event.mime_type {
        flags |= FLAG_MIME_TYPE;
        encode_utf8(mime, &mut body)?;
    }
    if let Some((name, bytes)) = &event.file {
        flags |= FLAG_FILE_CONTENT;
        encode_utf8(name, &mut body)?;
        encode_number(bytes.len() as u64, &mut body)?;
        body.extend_from_slice(bytes);
    }
    if event.eof {
        flags |= FLAG_EOF;
    }
    if let Some(route) = &event.route_code {
        flags |= FLAG_ROUTE_CODE;
        encode_utf8(route, &mut body)?;
    }

    // The length field counts itself, so its width depends on the total
    let base_length = 1 + 2 + body.len() + 4;
    let length_length = match base_length {
        0..=62 => 1,
        63..=16381 => 2,
        _ => 3,
    };
    let total = base_length + length_length;
    if total > MAX_PACKET_LENGTH {
        return Err(SubunitError::PacketTooLarge(total));
    }

    let mut packet = Vec::with_capacity(total);
    packet.push(SIGNATURE);
    packet.extend_from_slice(&flags.to_be_bytes());
    encode_number(total as u64, &mut packet)?;
    packet.extend_from_slice(&body);
    let crc = crc32(&packet);
    packet.extend_from_slice(&crc.to_be_bytes());

    debug_assert_eq!(packet.len(), total);
    Ok(packet)
}

/// Writer for one test run.
///
/// Creating the writer starts the run and [`finish`](Self::finish) stops it.
/// Packets go to a staging file beside the target, which only replaces the
/// target once the run is stopped; a writer dropped before that removes the
/// staging file and leaves the target untouched.
pub struct SubunitWriter {
    target: PathBuf,
    out: Option<BufWriter<NamedTempFile>>,
    packets: usize,
}

impl SubunitWriter {
    /// Start a test run that will be written to `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, SubunitError> {
        let target = path.as_ref().to_path_buf();
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let staging = tempfile::Builder::new()
            .prefix(".subunit-")
            .tempfile_in(dir)?;

        Ok(Self {
            target,
            out: Some(BufWriter::new(staging)),
            packets: 0,
        })
    }

    /// Write one status packet.
    pub fn status(&mut self, event: &TestEvent) -> Result<(), SubunitError> {
        let packet = encode_packet(event)?;
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| SubunitError::Malformed("test run already stopped".to_string()))?;
        out.write_all(&packet)?;
        self.packets += 1;
        Ok(())
    }

    /// Stop the test run and move the stream into place.
    pub fn finish(mut self) -> Result<File, SubunitError> {
        let out = self
            .out
            .take()
            .ok_or_else(|| SubunitError::Malformed("test run already stopped".to_string()))?;

        let staging = out.into_inner().map_err(|e| e.into_error())?;
        staging.as_file().sync_all()?;
        let file = staging.persist(&self.target).map_err(|e| e.error)?;

        tracing::debug!("Wrote {} subunit packets to {}", self.packets, self.target.display());
        Ok(file)
    }
}

impl Drop for SubunitWriter {
    fn drop(&mut self) {
        if self.out.is_some() {
            tracing::warn!(
                "Discarding unfinished subunit stream for {}",
                self.target.display()
            );
        }
    }
}

/// Packet decoder for checking written streams.
#[cfg(test)]
pub(crate) mod decode {
    use super::*;

    const VERSION_MASK: u16 = 0xF000;
    const STATUS_MASK: u16 = 0x0007;

    /// Read a variable-length number, returning it and the bytes consumed.
    pub fn decode_number(buf: &[u8]) -> Result<(u64, usize), SubunitError> {
        let first = *buf
            .first()
            .ok_or_else(|| SubunitError::Malformed("truncated number".to_string()))?;
        let len = 1 + (first >> 6) as usize;
        if buf.len() < len {
            return Err(SubunitError::Malformed("truncated number".to_string()));
        }

        let mut value = (first & 0x3F) as u64;
        for b in &buf[1..len] {
            value = (value << 8) | *b as u64;
        }
        Ok((value, len))
    }

    fn status_from_mask(bits: u16) -> Result<TestStatus, SubunitError> {
        match bits & STATUS_MASK {
            0 => Ok(TestStatus::Undefined),
            3 => Ok(TestStatus::Success),
            6 => Ok(TestStatus::Fail),
            other => Err(SubunitError::Malformed(format!("unexpected status {}", other))),
        }
    }

    struct Cursor<'a> {
        buf: &'a [u8],
        pos: usize,
    }

    impl<'a> Cursor<'a> {
        fn rest(&self) -> Result<&'a [u8], SubunitError> {
            self.buf
                .get(self.pos..)
                .ok_or_else(|| SubunitError::Malformed("field runs past packet end".to_string()))
        }

        fn take(&mut self, n: usize) -> Result<&'a [u8], SubunitError> {
            let out = self
                .rest()?
                .get(..n)
                .ok_or_else(|| SubunitError::Malformed("field runs past packet end".to_string()))?;
            self.pos += n;
            Ok(out)
        }

        fn number(&mut self) -> Result<u64, SubunitError> {
            let (value, len) = decode_number(self.rest()?)?;
            self.pos += len;
            Ok(value)
        }

        fn utf8(&mut self) -> Result<String, SubunitError> {
            let len = self.number()? as usize;
            let bytes = self.take(len)?;
            String::from_utf8(bytes.to_vec()).map_err(|e| SubunitError::Malformed(e.to_string()))
        }
    }

    /// Decode the packet at the start of `buf`, returning it and its length.
    pub fn decode_packet(buf: &[u8]) -> Result<(TestEvent, usize), SubunitError> {
        if buf.first() != Some(&SIGNATURE) {
            return Err(SubunitError::Malformed("missing signature".to_string()));
        }
        if buf.len() < 3 {
            return Err(SubunitError::Malformed("truncated header".to_string()));
        }

        let flags = u16::from_be_bytes([buf[1], buf[2]]);
        if flags & VERSION_MASK != VERSION {
            return Err(SubunitError::Malformed(format!(
                "unsupported version in flags {:#06x}",
                flags
            )));
        }

        let (total, length_len) = decode_number(&buf[3..])?;
        let total = total as usize;
        if total > MAX_PACKET_LENGTH {
            return Err(SubunitError::PacketTooLarge(total));
        }
        if total < 8 || buf.len() < total {
            return Err(SubunitError::Malformed(format!("packet length {} out of range", total)));
        }

        let content = &buf[..total - 4];
        let crc = &buf[total - 4..total];
        let expected = u32::from_be_bytes([crc[0], crc[1], crc[2], crc[3]]);
        let actual = crc32(content);
        if expected != actual {
            return Err(SubunitError::Malformed(format!(
                "CRC mismatch: packet says {:#010x}, content is {:#010x}",
                expected, actual
            )));
        }

        // A padded length field can run into the CRC
        if 3 + length_len > content.len() {
            return Err(SubunitError::Malformed("length field overlaps the CRC".to_string()));
        }

        let mut cursor = Cursor {
            buf: content,
            pos: 3 + length_len,
        };
        let mut event = TestEvent {
            runnable: flags & FLAG_RUNNABLE != 0,
            eof: flags & FLAG_EOF != 0,
            ..Default::default()
        };

        if flags & FLAG_TIMESTAMP != 0 {
            let secs = cursor.take(4)?;
            let secs = u32::from_be_bytes([secs[0], secs[1], secs[2], secs[3]]);
            let nanos = cursor.number()? as u32;
            event.timestamp = Some(
                DateTime::from_timestamp(secs as i64, nanos)
                    .ok_or_else(|| SubunitError::Malformed("invalid timestamp".to_string()))?,
            );
        }
        if flags & FLAG_TEST_ID != 0 {
            event.test_id = Some(cursor.utf8()?);
        }
        if flags & FLAG_TAGS != 0 {
            let count = cursor.number()?;
            for _ in 0..count {
                event.tags.push(cursor.utf8()?);
            }
        }
        if flags & FLAG_MIME_TYPE != 0 {
            event.mime_type = Some(cursor.utf8()?);
        }
        if flags & FLAG_FILE_CONTENT != 0 {
            let name = cursor.utf8()?;
            let len = cursor.number()? as usize;
            event.file = Some((name, cursor.take(len)?.to_vec()));
        }
        if flags & FLAG_ROUTE_CODE != 0 {
            event.route_code = Some(cursor.utf8()?);
        }

        event.status = status_from_mask(flags)?;
        Ok((event, total))
    }

    /// Decode every packet in a stream.
    pub fn decode_stream(mut buf: &[u8]) -> Result<Vec<TestEvent>, SubunitError> {
        let mut events = Vec::new();
        while !buf.is_empty() {
            let (event, len) = decode_packet(buf)?;
            events.push(event);
            buf = &buf[len..];
        }
        Ok(events)
    }
}
