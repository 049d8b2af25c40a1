//! Bidirectional path <-> watch handle registry

use crate::mask::EventMask;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Opaque identifier the device hands out per registration
///
/// The kernel may reuse a number once the registration it named is gone, so
/// a handle only means something while it is present in a [`WatchRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(i32);

impl WatchHandle {
    /// Handle carried by queue overflow records
    pub const OVERFLOW: Self = Self(-1);

    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One live registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEntry {
    pub handle: WatchHandle,
    pub path: PathBuf,
    /// Categories the caller asked to see for this path
    pub requested: EventMask,
}

/// How [`WatchRegistry::register`] treats an existing mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskUpdate {
    Replace,
    Merge,
}

/// Mapping between canonical paths and watch handles
///
/// Holds at most one entry per path and per handle.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    by_path: HashMap<PathBuf, WatchHandle>,
    by_handle: HashMap<WatchHandle, WatchEntry>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update the entry for `path`
    ///
    /// If `handle` was registered under another path, it moves to `path`.
    /// If `path` was registered with a different handle, that handle's entry
    /// is dropped and returned so the caller can release it.
    pub fn register(
        &mut self,
        path: &Path,
        handle: WatchHandle,
        mask: EventMask,
        update: MaskUpdate,
    ) -> Option<WatchHandle> {
        let displaced = match self.by_path.get(path) {
            Some(&old) if old != handle => {
                self.by_handle.remove(&old);
                Some(old)
            }
            _ => None,
        };

        let previous = self.by_handle.get(&handle).map(|entry| entry.requested);
        if let Some(entry) = self.by_handle.get(&handle) {
            if entry.path != path {
                self.by_path.remove(&entry.path);
            }
        }

        let requested = match (update, previous) {
            (MaskUpdate::Merge, Some(old)) => old | mask,
            _ => mask,
        };

        self.by_path.insert(path.to_path_buf(), handle);
        self.by_handle.insert(
            handle,
            WatchEntry {
                handle,
                path: path.to_path_buf(),
                requested,
            },
        );

        displaced
    }

    /// Path registered for `handle`
    pub fn resolve(&self, handle: WatchHandle) -> Option<&Path> {
        self.by_handle.get(&handle).map(|entry| entry.path.as_path())
    }

    /// Handle registered for `path`
    pub fn lookup(&self, path: &Path) -> Option<WatchHandle> {
        self.by_path.get(path).copied()
    }

    /// Full entry for `handle`
    pub fn entry(&self, handle: WatchHandle) -> Option<&WatchEntry> {
        self.by_handle.get(&handle)
    }

    /// Remove the single entry for `handle`
    pub fn forget(&mut self, handle: WatchHandle) -> Option<WatchEntry> {
        let entry = self.by_handle.remove(&handle)?;
        self.by_path.remove(&entry.path);
        Some(entry)
    }

    /// Remove `path` and every entry below it, returning the removed handles
    ///
    /// Descendants are matched by path component, so `/a/b` does not
    /// remove `/a/bc`.
    pub fn forget_subtree(&mut self, path: &Path) -> Vec<WatchHandle> {
        let doomed: Vec<WatchHandle> = self
            .by_path
            .iter()
            .filter(|(candidate, _)| candidate.starts_with(path))
            .map(|(_, &handle)| handle)
            .collect();

        for handle in &doomed {
            self.forget(*handle);
        }

        doomed
    }

    /// Every watched path, in no particular order
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.by_path.keys().map(PathBuf::as_path)
    }

    /// Every live entry, in no particular order
    pub fn entries(&self) -> impl Iterator<Item = &WatchEntry> {
        self.by_handle.values()
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    /// Drop every entry at once
    pub fn clear(&mut self) {
        self.by_path.clear();
        self.by_handle.clear();
    }
}
