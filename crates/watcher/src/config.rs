//! Watcher configuration

use crate::codec::MIN_BUFFER_LEN;
use crate::error::{Result, WatchError};
use crate::mask::{EventMask, InitFlags};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings shared by every watcher flavour
///
/// Loadable from TOML; missing keys take their defaults:
///
/// ```toml
/// nonblocking = true
/// buffer_size = 65536
/// default_mask = "CREATE|DELETE|MODIFY|MOVE"
/// terminal_events = "Q_OVERFLOW|UNMOUNT"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// Reads return immediately when nothing is queued
    pub nonblocking: bool,

    /// Do not leak the device descriptor into exec'd children
    pub close_on_exec: bool,

    /// Read buffer size in bytes
    pub buffer_size: usize,

    /// Mask used when the caller does not pass one
    pub default_mask: EventMask,

    /// Categories that end event processing with an error
    pub terminal_events: EventMask,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            nonblocking: true,
            close_on_exec: true,
            buffer_size: 64 * 1024,
            default_mask: EventMask::ALL_EVENTS,
            terminal_events: EventMask::Q_OVERFLOW | EventMask::UNMOUNT,
        }
    }
}

impl WatchConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| WatchError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    /// Parse from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| WatchError::Config(e.to_string()))
    }

    /// Flags to open the device with
    pub fn init_flags(&self) -> InitFlags {
        let mut flags = InitFlags::empty();
        flags.set(InitFlags::NONBLOCK, self.nonblocking);
        flags.set(InitFlags::CLOEXEC, self.close_on_exec);
        flags
    }

    /// Buffer size, raised to hold at least one maximal record
    pub fn effective_buffer_size(&self) -> usize {
        self.buffer_size.max(MIN_BUFFER_LEN)
    }
}
