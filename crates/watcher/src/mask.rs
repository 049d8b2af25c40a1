//! Event category bitsets
//!
//! Bit values are the ones the Linux inotify facility uses on the wire and
//! in `inotify_add_watch(2)`. They must never be renumbered.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

bitflags! {
    /// Event categories reported by the kernel, plus the modifier bits that
    /// are only meaningful when registering a watch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u32 {
        /// File was accessed
        const ACCESS        = 0x0000_0001;
        /// File was modified
        const MODIFY        = 0x0000_0002;
        /// Metadata changed
        const ATTRIB        = 0x0000_0004;
        /// File opened for writing was closed
        const CLOSE_WRITE   = 0x0000_0008;
        /// File not opened for writing was closed
        const CLOSE_NOWRITE = 0x0000_0010;
        /// File or directory was opened
        const OPEN          = 0x0000_0020;
        /// Entry renamed out of a watched directory
        const MOVED_FROM    = 0x0000_0040;
        /// Entry renamed into a watched directory
        const MOVED_TO      = 0x0000_0080;
        /// Entry created in a watched directory
        const CREATE        = 0x0000_0100;
        /// Entry deleted from a watched directory
        const DELETE        = 0x0000_0200;
        /// Watched entry itself was deleted
        const DELETE_SELF   = 0x0000_0400;
        /// Watched entry itself was moved
        const MOVE_SELF     = 0x0000_0800;

        /// Backing filesystem was unmounted
        const UNMOUNT       = 0x0000_2000;
        /// Kernel event queue overflowed
        const Q_OVERFLOW    = 0x0000_4000;
        /// Watch was removed by the kernel or explicitly
        const IGNORED       = 0x0000_8000;

        /// Only watch the path if it is a directory
        const ONLYDIR       = 0x0100_0000;
        /// Do not follow a symlink at the watched path
        const DONT_FOLLOW   = 0x0200_0000;
        /// Skip events for children after they were unlinked
        const EXCL_UNLINK   = 0x0400_0000;
        /// Fail if the path is already watched
        const MASK_CREATE   = 0x1000_0000;
        /// Merge into the existing watch mask instead of replacing it
        const MASK_ADD      = 0x2000_0000;
        /// Subject of the event is a directory
        const ISDIR         = 0x4000_0000;
        /// Remove the watch after the first event
        const ONESHOT       = 0x8000_0000;
    }
}

impl EventMask {
    /// Both close variants
    pub const CLOSE: Self = Self::from_bits_retain(0x0000_0018);

    /// Both rename halves
    pub const MOVE: Self = Self::from_bits_retain(0x0000_00c0);

    /// Every category a watch can subscribe to
    pub const ALL_EVENTS: Self = Self::from_bits_retain(0x0000_0fff);

    /// Bits a tree watch needs on every directory to follow the tree shape
    pub const TREE_SYNC: Self = Self::from_bits_retain(0x0000_01c0);

    /// Bits that only describe the watched entry itself
    pub const SELF_EVENTS: Self = Self::from_bits_retain(0x0000_0c00);

    /// Bits that change how a watch is installed rather than what it reports
    pub const MODIFIERS: Self = Self::from_bits_retain(0xb700_0000);

    /// Names of the set bits, in bit order
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        SINGLE_BITS
            .iter()
            .filter(move |(_, bit)| self.contains(*bit))
            .map(|(name, _)| *name)
    }

    /// The event category bits, without registration modifiers
    pub fn categories(self) -> Self {
        self - Self::MODIFIERS
    }
}

const SINGLE_BITS: &[(&str, EventMask)] = &[
    ("ACCESS", EventMask::ACCESS),
    ("MODIFY", EventMask::MODIFY),
    ("ATTRIB", EventMask::ATTRIB),
    ("CLOSE_WRITE", EventMask::CLOSE_WRITE),
    ("CLOSE_NOWRITE", EventMask::CLOSE_NOWRITE),
    ("OPEN", EventMask::OPEN),
    ("MOVED_FROM", EventMask::MOVED_FROM),
    ("MOVED_TO", EventMask::MOVED_TO),
    ("CREATE", EventMask::CREATE),
    ("DELETE", EventMask::DELETE),
    ("DELETE_SELF", EventMask::DELETE_SELF),
    ("MOVE_SELF", EventMask::MOVE_SELF),
    ("UNMOUNT", EventMask::UNMOUNT),
    ("Q_OVERFLOW", EventMask::Q_OVERFLOW),
    ("IGNORED", EventMask::IGNORED),
    ("ONLYDIR", EventMask::ONLYDIR),
    ("DONT_FOLLOW", EventMask::DONT_FOLLOW),
    ("EXCL_UNLINK", EventMask::EXCL_UNLINK),
    ("MASK_CREATE", EventMask::MASK_CREATE),
    ("MASK_ADD", EventMask::MASK_ADD),
    ("ISDIR", EventMask::ISDIR),
    ("ONESHOT", EventMask::ONESHOT),
];

const COMPOSITES: &[(&str, EventMask)] = &[
    ("CLOSE", EventMask::CLOSE),
    ("MOVE", EventMask::MOVE),
    ("ALL_EVENTS", EventMask::ALL_EVENTS),
];

/// Error returned when a mask string names an unknown flag
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event flag: {0}")]
pub struct MaskParseError(pub String);

fn lookup(token: &str) -> Option<EventMask> {
    let upper = token.to_ascii_uppercase();
    let name = upper.strip_prefix("IN_").unwrap_or(&upper);

    SINGLE_BITS
        .iter()
        .chain(COMPOSITES)
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, bits)| *bits)
}

fn parse_number(token: &str) -> Option<u32> {
    if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16).ok()
    } else {
        token.parse().ok()
    }
}

impl FromStr for EventMask {
    type Err = MaskParseError;

    /// Parses `"CREATE|DELETE"`, `"in_create, moved_to"` or `"0x300"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mask = EventMask::empty();

        for token in s.split(['|', ',']).map(str::trim) {
            if token.is_empty() {
                continue;
            }

            let bits = match lookup(token) {
                Some(bits) => bits,
                None => parse_number(token)
                    .map(EventMask::from_bits_retain)
                    .ok_or_else(|| MaskParseError(token.to_string()))?,
            };
            mask |= bits;
        }

        Ok(mask)
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("0");
        }

        let mut first = true;
        for name in self.names() {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(name)?;
            first = false;
        }

        let unnamed = self.bits() & !Self::all().bits();
        if unnamed != 0 {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "{:#x}", unnamed)?;
        }

        Ok(())
    }
}

impl Serialize for EventMask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EventMask {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

bitflags! {
    /// Flags accepted when opening the notification device
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InitFlags: i32 {
        /// Reads return immediately when no event is queued
        const NONBLOCK = libc::IN_NONBLOCK;
        /// Close the device on exec
        const CLOEXEC  = libc::IN_CLOEXEC;
    }
}
