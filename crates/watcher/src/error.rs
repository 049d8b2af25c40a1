//! Error types for the watcher

use crate::mask::EventMask;
use crate::registry::WatchHandle;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for watcher operations
pub type Result<T> = std::result::Result<T, WatchError>;

/// Errors that can occur while watching
#[derive(Error, Debug)]
pub enum WatchError {
    /// Path does not exist
    #[error("path not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Path exists but may not be watched by this process
    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// Path is already watched and MASK_CREATE was requested
    #[error("already watched: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// ONLYDIR was requested for something that is not a directory
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Path cannot be passed to the kernel
    #[error("invalid path: {}", .0.display())]
    InvalidPath(PathBuf),

    /// Handle is not (or no longer) registered with the device
    #[error("invalid watch handle: {0}")]
    InvalidHandle(WatchHandle),

    /// Watch, descriptor or memory limit reached
    #[error("resource limit exhausted: {0}")]
    ResourceExhausted(#[source] io::Error),

    /// Kernel facility not available
    #[error("notification facility unsupported: {0}")]
    Unsupported(#[source] io::Error),

    /// Operation on a device that was already closed
    #[error("watcher is closed")]
    Closed,

    /// The device reported end of stream
    #[error("event stream ended")]
    EndOfStream,

    /// A record could not be decoded
    #[error("corrupt event record: {0}")]
    Corrupt(String),

    /// Event after which the stream can no longer be trusted
    #[error("terminal event {mask} on watch {handle} ({})", describe(.path, .name))]
    Terminal {
        handle: WatchHandle,
        mask: EventMask,
        path: Option<PathBuf>,
        name: Option<OsString>,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Any other device failure
    #[error("device error: {0}")]
    Device(#[from] io::Error),
}

impl WatchError {
    /// Outcomes of expected races with the filesystem, absorbed by
    /// internal bookkeeping rather than surfaced
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            WatchError::InvalidHandle(_) | WatchError::NotFound(_) | WatchError::NotADirectory(_)
        )
    }
}

fn describe(path: &Option<PathBuf>, name: &Option<OsString>) -> String {
    match (path, name) {
        (Some(path), Some(name)) => path.join(name).display().to_string(),
        (Some(path), None) => path.display().to_string(),
        (None, Some(name)) => name.to_string_lossy().into_owned(),
        (None, None) => "no path".to_string(),
    }
}
