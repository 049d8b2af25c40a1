//! Binary event record codec
//!
//! A record is a 16 byte header followed by a NUL padded name:
//!
//! ```text
//! i32 handle | u32 mask | u32 cookie | u32 name_len | name_len bytes
//! ```
//!
//! All fields are in native byte order. Names are carried as raw bytes
//! (`OsString`), so file names that are not valid UTF-8 survive intact.

use crate::error::{Result, WatchError};
use crate::mask::EventMask;
use crate::registry::WatchHandle;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use tracing::trace;

/// Size of the fixed record header
pub const HEADER_LEN: usize = 16;

/// Longest name field a well-formed record can carry
pub const MAX_NAME_LEN: usize = 4096;

/// Smallest read buffer that always fits one record
pub const MIN_BUFFER_LEN: usize = HEADER_LEN + MAX_NAME_LEN;

/// A record as delivered by the device, before path resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Watch the record belongs to (`-1` for queue overflow)
    pub handle: WatchHandle,
    /// Event category bits
    pub mask: EventMask,
    /// Pairs MOVED_FROM with MOVED_TO for one rename
    pub cookie: u32,
    /// Entry name inside the watched directory, absent for the watched entry itself
    pub name: Option<OsString>,
}

/// Outcome of decoding at the front of a byte slice
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A full record and the number of bytes it occupied
    Record(RawEvent, usize),
    /// Not enough bytes yet for a full record
    Incomplete,
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut field = [0u8; 4];
    field.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_ne_bytes(field)
}

/// Decode the record at the start of `bytes`
pub fn decode(bytes: &[u8]) -> Result<Decoded> {
    if bytes.len() < HEADER_LEN {
        return Ok(Decoded::Incomplete);
    }

    let handle = WatchHandle::new(read_u32(bytes, 0) as i32);
    let mask = EventMask::from_bits_retain(read_u32(bytes, 4));
    let cookie = read_u32(bytes, 8);
    let name_len = read_u32(bytes, 12) as usize;

    if name_len > MAX_NAME_LEN {
        return Err(WatchError::Corrupt(format!(
            "name length {} exceeds {}",
            name_len, MAX_NAME_LEN
        )));
    }

    let total = HEADER_LEN + name_len;
    if bytes.len() < total {
        return Ok(Decoded::Incomplete);
    }

    let name = if name_len == 0 {
        None
    } else {
        let field = &bytes[HEADER_LEN..total];
        let end = field.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        Some(OsStr::from_bytes(&field[..end]).to_os_string())
    };

    Ok(Decoded::Record(
        RawEvent {
            handle,
            mask,
            cookie,
            name,
        },
        total,
    ))
}

/// Append `event` to `out` in wire format
///
/// The name is NUL terminated and padded to a multiple of the header size,
/// the way the kernel lays records out.
pub fn encode(event: &RawEvent, out: &mut Vec<u8>) {
    let name = event.name.as_deref().map(OsStr::as_bytes).unwrap_or_default();
    let name_len = if name.is_empty() {
        0
    } else {
        (name.len() + 1).div_ceil(HEADER_LEN) * HEADER_LEN
    };

    out.extend_from_slice(&event.handle.raw().to_ne_bytes());
    out.extend_from_slice(&event.mask.bits().to_ne_bytes());
    out.extend_from_slice(&event.cookie.to_ne_bytes());
    out.extend_from_slice(&(name_len as u32).to_ne_bytes());
    out.extend_from_slice(name);
    out.resize(out.len() + name_len - name.len(), 0);
}

/// Read buffer that keeps partial records between reads
pub struct EventBuffer {
    bytes: Vec<u8>,
    start: usize,
    end: usize,
}

impl EventBuffer {
    /// Create a buffer of at least [`MIN_BUFFER_LEN`] bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity.max(MIN_BUFFER_LEN)],
            start: 0,
            end: 0,
        }
    }

    /// Number of undecoded bytes held
    pub fn pending(&self) -> usize {
        self.end - self.start
    }

    /// Free space for the next read, compacting first if needed
    pub fn spare_mut(&mut self) -> &mut [u8] {
        if self.start > 0 {
            self.bytes.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        &mut self.bytes[self.end..]
    }

    /// Mark `n` bytes of the spare area as filled
    pub fn commit(&mut self, n: usize) {
        self.end = (self.end + n).min(self.bytes.len());
    }

    /// Decode the next buffered record, if a full one is present
    pub fn next_record(&mut self) -> Result<Option<RawEvent>> {
        match decode(&self.bytes[self.start..self.end])? {
            Decoded::Record(event, used) => {
                self.start += used;
                if self.start == self.end {
                    self.start = 0;
                    self.end = 0;
                }
                trace!(handle = %event.handle, mask = %event.mask, name = ?event.name, "decoded record");
                Ok(Some(event))
            }
            Decoded::Incomplete => Ok(None),
        }
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }
}
