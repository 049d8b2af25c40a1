//! Notification device backends

#[cfg(target_os = "linux")]
pub mod linux;

use crate::error::Result;
use crate::mask::EventMask;
use crate::registry::WatchHandle;
use std::path::Path;

/// Result of a single raw read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were written into the buffer
    Data(usize),
    /// Non-blocking device with nothing queued
    WouldBlock,
    /// Zero byte read, the device is gone
    EndOfStream,
}

/// Capability interface of a low level notification device
///
/// Implementations register one non-recursive watch per call and deliver the
/// raw record stream; everything recursive is built on top by delegation.
pub trait EventSource {
    /// Register `path`, returning the handle the device assigned
    fn add_watch(&mut self, path: &Path, mask: EventMask) -> Result<WatchHandle>;

    /// Release a registration
    ///
    /// Fails with `InvalidHandle` when the device no longer knows the handle.
    fn remove_watch(&mut self, handle: WatchHandle) -> Result<()>;

    /// Read raw record bytes into `buf`
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<ReadOutcome>;

    /// Release the device; calling it again is a no-op
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;
}
