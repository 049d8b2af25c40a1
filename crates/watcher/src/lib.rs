//! Recursive directory watching on top of inotify
//!
//! This crate provides:
//! - A byte-exact codec for the kernel's event records
//! - A bidirectional handle/path registry
//! - [`Watcher`], a plain per-path watch manager
//! - [`TreeWatcher`], which keeps a whole directory tree watched as it changes
//! - [`PollTreeWatcher`], a tree watcher with a blocking, stoppable wait

pub mod codec;
pub mod config;
pub mod error;
pub mod mask;
pub mod platform;
#[cfg(target_os = "linux")]
pub mod poll;
pub mod registry;
pub mod tree;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use config::WatchConfig;
pub use error::{Result, WatchError};
pub use mask::{EventMask, InitFlags, MaskParseError};
pub use platform::{EventSource, ReadOutcome};
#[cfg(target_os = "linux")]
pub use platform::linux::Inotify;
#[cfg(target_os = "linux")]
pub use poll::{PollTreeWatcher, Poller, WaitOutcome};
pub use registry::{WatchEntry, WatchHandle, WatchRegistry};
pub use tree::TreeWatcher;
pub use watcher::{canonical_path, Event, EventStream, Events, Watcher};
