//! Shared protocol logic for the backup client and server
//!
//! Frame encoding, transfer-header derivation and the server's output-name policy
//! live here so both sides agree on them.

use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use chrono::NaiveDate;

use crate::error::{BackupError, Result};
use crate::protocol::{FRAME_HEADER_LEN, MAGIC, MAX_FRAME_SIZE, VERSION};

/// Validate frame payload size against protocol::MAX_FRAME_SIZE
pub fn validate_frame_size(size: usize) -> Result<()> {
    if size > MAX_FRAME_SIZE {
        return Err(BackupError::FrameTooLarge {
            len: size,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(())
}

/// Build frame header (11 bytes)
/// Format: MAGIC (4) | VERSION (2) | TYPE (1) | LENGTH (4)
pub fn build_frame_header(frame_type: u8, payload_len: u32) -> [u8; FRAME_HEADER_LEN] {
    let mut header = [0u8; FRAME_HEADER_LEN];
    header[0..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6] = frame_type;
    header[7..11].copy_from_slice(&payload_len.to_le_bytes());
    header
}

/// Parse frame header
/// Returns: (frame_type, payload_length)
pub fn parse_frame_header(header: &[u8; FRAME_HEADER_LEN]) -> Result<(u8, usize)> {
    if &header[0..4] != MAGIC {
        return Err(BackupError::bad_frame("invalid magic in frame header"));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(BackupError::bad_frame(format!(
            "protocol version mismatch: got {}, expected {}",
            version, VERSION
        )));
    }
    let frame_type = header[6];
    let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
    validate_frame_size(payload_len)?;
    Ok((frame_type, payload_len))
}

pub fn write_frame<W: Write>(stream: &mut W, frame_type: u8, payload: &[u8]) -> Result<()> {
    validate_frame_size(payload.len())?;
    let hdr = build_frame_header(frame_type, payload.len() as u32);
    stream.write_all(&hdr)?;
    if !payload.is_empty() {
        stream.write_all(payload)?;
    }
    Ok(())
}

/// Reads one frame header.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly before sending any
/// byte of the header; a header cut short is an `UnexpectedEof` I/O error.
pub fn read_frame_header<R: Read>(stream: &mut R) -> Result<Option<(u8, usize)>> {
    let mut hdr = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        match stream.read(&mut hdr[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed inside a frame header",
                )
                .into())
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    parse_frame_header(&hdr).map(Some)
}

pub fn read_payload<R: Read>(stream: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf)?;
    Ok(buf)
}

/// Header line sent ahead of a payload.
///
/// A path with an extension marker is reduced to its final segment; anything
/// else (an archive path) is sent verbatim.
pub fn transfer_header(path: &str) -> String {
    if path.contains('.') {
        path.rsplit(['/', '\\']).next().unwrap_or(path).to_string()
    } else {
        path.to_string()
    }
}

/// Name the server writes a transfer to.
///
/// Headers containing `.` are used literally and must be a single safe file
/// name; all others are archive payloads stored as `<YYYY-MM-DD>.iso`.
pub fn output_name_for_header(header: &str, today: NaiveDate) -> Result<String> {
    if header.contains('.') {
        if !is_safe_file_name(header) {
            return Err(BackupError::UnsafeHeader {
                header: header.to_string(),
            });
        }
        Ok(header.to_string())
    } else {
        Ok(archive_output_name(today))
    }
}

/// Dated name for archive payloads. The bytes are whatever archive format the
/// client built (tar for `TarArchiveBuilder`), not an ISO 9660 image.
pub fn archive_output_name(today: NaiveDate) -> String {
    format!("{}.iso", today.format("%Y-%m-%d"))
}

/// True when `name` is exactly one normal path component.
pub fn is_safe_file_name(name: &str) -> bool {
    if name.is_empty() || name.contains(['\0', '/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Joins a validated output name under the server's output directory.
pub fn output_path(root: &Path, name: &str) -> Result<PathBuf> {
    if !is_safe_file_name(name) {
        return Err(BackupError::UnsafeHeader {
            header: name.to_string(),
        });
    }
    Ok(root.join(name))
}
