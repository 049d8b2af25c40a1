//! Recursive tree watches
//!
//! The kernel watches one directory per registration. A tree watch keeps a
//! registration on every directory below a root and follows the tree as it
//! changes:
//!
//! - a directory created or moved into a watched directory is registered
//!   (recursively) as soon as its event is read
//! - a directory moved out of a watched directory has its registrations
//!   released
//! - IGNORED records purge their handle
//!
//! Every directory carries CREATE, MOVED_FROM and MOVED_TO in its kernel
//! mask regardless of what the caller asked for; events are only surfaced
//! when they intersect the caller's own mask.
//!
//! Synchronization is best effort. Entries created inside a new directory
//! before its registration lands produce no events of their own, but the
//! walk that registers the directory also registers any subdirectories that
//! already exist by then.

use crate::config::WatchConfig;
use crate::error::{Result, WatchError};
use crate::mask::EventMask;
use crate::platform::EventSource;
use crate::registry::WatchHandle;
use crate::watcher::{canonical_path, Event, EventStream, Resolved, Watcher};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

/// Modifier bits a newly discovered directory takes over from its root
const INHERITED_MODIFIERS: EventMask = EventMask::from_bits_retain(
    EventMask::ONLYDIR.bits() | EventMask::DONT_FOLLOW.bits() | EventMask::EXCL_UNLINK.bits(),
);

/// Watch manager for whole directory trees
///
/// Built on a [`Watcher`] by delegation; it owns the same registry and adds
/// the tree bookkeeping on top.
pub struct TreeWatcher<S> {
    watcher: Watcher<S>,
    /// Roots added through [`TreeWatcher::add_tree`] and the mask they were added with
    roots: HashMap<PathBuf, EventMask>,
}

#[cfg(target_os = "linux")]
impl TreeWatcher<crate::platform::linux::Inotify> {
    /// Open an inotify backed tree watcher
    pub fn open(config: &WatchConfig) -> Result<Self> {
        Ok(Self::new(Watcher::open(config)?))
    }
}

impl<S: EventSource> TreeWatcher<S> {
    pub fn new(watcher: Watcher<S>) -> Self {
        Self {
            watcher,
            roots: HashMap::new(),
        }
    }

    /// Build a tree watcher over an already opened source
    pub fn with_source(source: S, config: &WatchConfig) -> Self {
        Self::new(Watcher::with_source(source, config))
    }

    /// Watch `root` and every directory below it
    ///
    /// Directories that vanish during the walk are skipped. Any other failure
    /// is returned, leaving the directories registered so far in place.
    ///
    /// The walk itself reads every directory it registers, so masks with
    /// OPEN, ACCESS or CLOSE_NOWRITE see those events for the tree right
    /// after this returns.
    pub fn add_tree(&mut self, root: impl AsRef<Path>, mask: EventMask) -> Result<WatchHandle> {
        let root = canonical_path(root.as_ref())?;
        info!(root = %root.display(), %mask, "adding tree watch");

        let requested = mask.categories();
        let handle = self.watcher.install(&root, mask | EventMask::TREE_SYNC, requested)?;
        let entry = self.roots.entry(root.clone()).or_insert(EventMask::empty());
        if mask.contains(EventMask::MASK_ADD) {
            *entry |= mask;
        } else {
            *entry = mask;
        }

        self.watch_descendants(&root, mask)?;
        Ok(handle)
    }

    /// Watch a single directory or file, without recursion
    ///
    /// Inside a tree root the path keeps the bits the tree needs to follow
    /// new directories, whatever `mask` asks for.
    pub fn add_watch(&mut self, path: impl AsRef<Path>, mask: EventMask) -> Result<WatchHandle> {
        let path = canonical_path(path.as_ref())?;
        let kernel_mask = match self.root_of(&path) {
            Some(_) => mask | EventMask::TREE_SYNC,
            None => mask,
        };
        self.watcher.install(&path, kernel_mask, mask.categories())
    }

    /// Register every directory strictly below `root`
    fn watch_descendants(&mut self, root: &Path, mask: EventMask) -> Result<()> {
        let child_mask =
            (mask - EventMask::SELF_EVENTS - EventMask::MASK_CREATE) | EventMask::TREE_SYNC;
        let child_requested = mask.categories() - EventMask::SELF_EVENTS;

        let walker = WalkDir::new(root).min_depth(1).follow_links(false);
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                    match err.into_io_error() {
                        Some(io_err) if io_err.kind() == io::ErrorKind::NotFound => {
                            debug!(path = %path.display(), "directory vanished during walk");
                            continue;
                        }
                        Some(io_err) if io_err.kind() == io::ErrorKind::PermissionDenied => {
                            return Err(WatchError::PermissionDenied(path));
                        }
                        Some(io_err) => return Err(WatchError::Device(io_err)),
                        None => {
                            debug!(path = %path.display(), "skipping symlink loop");
                            continue;
                        }
                    }
                }
            };

            if !entry.file_type().is_dir() {
                continue;
            }

            match self.watcher.install(entry.path(), child_mask, child_requested) {
                Ok(child) => trace!(path = %entry.path().display(), %child, "watching subdirectory"),
                Err(err) if err.is_benign() => {
                    debug!(path = %entry.path().display(), %err, "subdirectory vanished before it could be watched");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    /// Stop watching `path` and everything below it
    ///
    /// Paths that are not watched are a no-op. Every registration is released
    /// even if one release fails; the first failure is returned.
    pub fn remove_tree(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = canonical_path(path.as_ref())?;
        self.roots.retain(|root, _| !root.starts_with(&path));

        let handles = self.watcher.registry_mut().forget_subtree(&path);
        if handles.is_empty() {
            debug!(path = %path.display(), "path is not watched");
            return Ok(());
        }

        info!(path = %path.display(), watches = handles.len(), "removing tree watch");
        let mut first_error = None;
        for handle in handles {
            if let Err(err) = self.watcher.release(handle) {
                warn!(%handle, %err, "failed to release watch");
                first_error.get_or_insert(err);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Stop watching `path`; like [`TreeWatcher::remove_tree`], descendants go too
    pub fn remove_watch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.remove_tree(path)
    }

    /// Register a directory that appeared inside the tree
    fn follow_new_directory(&mut self, path: &Path, parent_requested: EventMask) -> Result<()> {
        let Some(root_mask) = self.root_of(path) else {
            trace!(path = %path.display(), "not inside a tree root, not following");
            return Ok(());
        };
        let modifiers = root_mask & INHERITED_MODIFIERS;
        let mask = (parent_requested - EventMask::SELF_EVENTS) | modifiers | EventMask::MASK_ADD;

        let installed = match self.watcher.install(path, mask | EventMask::TREE_SYNC, mask.categories()) {
            Ok(handle) => {
                debug!(path = %path.display(), %handle, "following new directory");
                self.watch_descendants(path, mask)
            }
            Err(err) => Err(err),
        };

        match installed {
            Ok(()) => Ok(()),
            Err(err) if err.is_benign() => {
                debug!(path = %path.display(), %err, "new directory vanished before it could be watched");
                Ok(())
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to watch new directory");
                Err(err)
            }
        }
    }

    /// Mask of the innermost root containing `path`
    fn root_of(&self, path: &Path) -> Option<EventMask> {
        self.roots
            .iter()
            .filter(|(root, _)| path.starts_with(root))
            .max_by_key(|(root, _)| root.as_os_str().len())
            .map(|(_, mask)| *mask)
    }

    /// Keep the watch set in step with a directory entry event
    fn synchronize(&mut self, event: &Event, requested: EventMask) -> Result<()> {
        if event.mask.contains(EventMask::IGNORED) {
            if let Some(path) = &event.watch_path {
                self.roots.remove(path);
            }
            return Ok(());
        }

        if !event.is_dir() || event.name.is_none() {
            return Ok(());
        }
        let Some(path) = event.full_path() else {
            return Ok(());
        };

        if event.mask.intersects(EventMask::CREATE | EventMask::MOVED_TO) {
            self.follow_new_directory(&path, requested)
        } else if event.mask.contains(EventMask::MOVED_FROM) {
            debug!(path = %path.display(), cookie = event.cookie, "directory moved away");
            self.remove_tree(&path)
        } else {
            Ok(())
        }
    }

    /// Drain available events, failing on the first terminal one
    pub fn read_events(&mut self) -> Result<Vec<Event>> {
        self.events().collect()
    }

    /// Roots added with [`TreeWatcher::add_tree`] that are still watched
    pub fn roots(&self) -> Vec<PathBuf> {
        self.roots.keys().cloned().collect()
    }

    /// Currently watched paths, roots and descendants alike
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watcher.watched_paths()
    }

    pub fn handle_for(&self, path: impl AsRef<Path>) -> Option<WatchHandle> {
        self.watcher.handle_for(path)
    }

    pub fn path_for(&self, handle: WatchHandle) -> Option<&Path> {
        self.watcher.path_for(handle)
    }

    pub fn watcher(&self) -> &Watcher<S> {
        &self.watcher
    }

    /// Close the device; all roots are torn down at once
    pub fn close(&mut self) -> Result<()> {
        self.roots.clear();
        self.watcher.close()
    }

    pub fn is_closed(&self) -> bool {
        self.watcher.is_closed()
    }
}

impl<S: EventSource> EventStream for TreeWatcher<S> {
    /// Next event the caller asked for
    ///
    /// If following a new directory fails for any reason other than it
    /// vanishing, that error is returned and the record that announced the
    /// directory is not surfaced.
    fn next_event(&mut self) -> Result<Option<Event>> {
        loop {
            let Some(Resolved { event, requested }) = self.watcher.next_resolved()? else {
                return Ok(None);
            };

            self.synchronize(&event, requested)?;

            if event.mask.intersects(self.watcher.terminal_events()) {
                return Err(event.into_terminal());
            }

            if event.mask.intersects(requested | EventMask::Q_OVERFLOW) {
                return Ok(Some(event));
            }

            trace!(handle = %event.handle, mask = %event.mask, "suppressing unrequested event");
        }
    }
}
