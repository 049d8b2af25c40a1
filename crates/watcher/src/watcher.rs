//! Plain (non-recursive) watch manager

use crate::codec::{EventBuffer, RawEvent};
use crate::config::WatchConfig;
use crate::error::{Result, WatchError};
use crate::mask::EventMask;
use crate::platform::{EventSource, ReadOutcome};
use crate::registry::{MaskUpdate, WatchEntry, WatchHandle, WatchRegistry};
use path_absolutize::Absolutize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// An event resolved against the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub handle: WatchHandle,
    pub mask: EventMask,
    pub cookie: u32,
    /// Entry name inside the watched directory
    pub name: Option<OsString>,
    /// Canonical path of the watch; `None` only for queue overflow
    pub watch_path: Option<PathBuf>,
}

impl Event {
    fn resolved(raw: RawEvent, watch_path: Option<PathBuf>) -> Self {
        Self {
            handle: raw.handle,
            mask: raw.mask,
            cookie: raw.cookie,
            name: raw.name,
            watch_path,
        }
    }

    /// Watch path joined with the entry name, if any
    pub fn full_path(&self) -> Option<PathBuf> {
        let base = self.watch_path.as_ref()?;
        Some(match &self.name {
            Some(name) => base.join(name),
            None => base.clone(),
        })
    }

    pub fn is_dir(&self) -> bool {
        self.mask.contains(EventMask::ISDIR)
    }

    pub(crate) fn into_terminal(self) -> WatchError {
        WatchError::Terminal {
            handle: self.handle,
            mask: self.mask,
            path: self.watch_path,
            name: self.name,
        }
    }
}

/// Anything that yields events one pull at a time
pub trait EventStream {
    /// Next buffered event, or `None` once nothing more is available right now
    fn next_event(&mut self) -> Result<Option<Event>>;

    /// Drain currently available events
    fn events(&mut self) -> Events<'_, Self>
    where
        Self: Sized,
    {
        Events {
            stream: self,
            done: false,
        }
    }
}

/// Iterator over the events available at the time of the pull
///
/// Ends without error when the device has nothing queued; call
/// [`EventStream::events`] again after waiting for more.
pub struct Events<'a, W> {
    stream: &'a mut W,
    done: bool,
}

impl<W: EventStream> Iterator for Events<'_, W> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.stream.next_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Absolute, lexically normalized form of `path`
///
/// Symlinks are not resolved, so a path that was deleted still
/// canonicalizes to the key it was registered under.
pub fn canonical_path(path: &Path) -> Result<PathBuf> {
    Ok(path.absolutize()?.into_owned())
}

/// An event plus the caller mask of the watch it resolved to
pub(crate) struct Resolved {
    pub event: Event,
    pub requested: EventMask,
}

/// Watch manager for individual paths
///
/// Owns the device, the registry and the read buffer. Events are surfaced
/// exactly as the kernel reports them.
pub struct Watcher<S> {
    source: S,
    registry: WatchRegistry,
    buffer: EventBuffer,
    terminal: EventMask,
}

#[cfg(target_os = "linux")]
impl Watcher<crate::platform::linux::Inotify> {
    /// Open an inotify backed watcher
    pub fn open(config: &WatchConfig) -> Result<Self> {
        let source = crate::platform::linux::Inotify::open(config.init_flags())?;
        Ok(Self::with_source(source, config))
    }
}

impl<S: EventSource> Watcher<S> {
    /// Build a watcher over an already opened source
    pub fn with_source(source: S, config: &WatchConfig) -> Self {
        Self {
            source,
            registry: WatchRegistry::new(),
            buffer: EventBuffer::new(config.effective_buffer_size()),
            terminal: config.terminal_events,
        }
    }

    /// Watch a single path
    ///
    /// With MASK_ADD in `mask` the requested categories are merged into
    /// those already recorded for the path.
    pub fn add_watch(&mut self, path: impl AsRef<Path>, mask: EventMask) -> Result<WatchHandle> {
        let path = canonical_path(path.as_ref())?;
        self.install(&path, mask, mask.categories())
    }

    /// Register `path` with the device using `kernel_mask`, recording
    /// `requested` as what the caller wants to see
    pub(crate) fn install(
        &mut self,
        path: &Path,
        kernel_mask: EventMask,
        requested: EventMask,
    ) -> Result<WatchHandle> {
        let handle = self.source.add_watch(path, kernel_mask)?;

        let update = if kernel_mask.contains(EventMask::MASK_ADD) {
            MaskUpdate::Merge
        } else {
            MaskUpdate::Replace
        };

        if let Some(displaced) = self.registry.register(path, handle, requested, update) {
            debug!(path = %path.display(), %displaced, %handle, "path re-registered under new handle");
            self.release(displaced)?;
        }

        Ok(handle)
    }

    /// Stop watching `path` only
    ///
    /// Unknown paths are a no-op.
    pub fn remove_watch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = canonical_path(path.as_ref())?;

        match self.registry.lookup(&path) {
            Some(handle) => self.remove_handle(handle),
            None => {
                debug!(path = %path.display(), "path is not watched");
                Ok(())
            }
        }
    }

    /// Stop watching the path registered under `handle`
    pub fn remove_handle(&mut self, handle: WatchHandle) -> Result<()> {
        if self.registry.forget(handle).is_none() {
            debug!(%handle, "handle is not registered");
            return Ok(());
        }
        self.release(handle)
    }

    /// Release a kernel registration, absorbing already-invalidated handles
    pub(crate) fn release(&mut self, handle: WatchHandle) -> Result<()> {
        match self.source.remove_watch(handle) {
            Err(WatchError::InvalidHandle(_)) => {
                debug!(%handle, "handle already invalidated by the kernel");
                Ok(())
            }
            other => other,
        }
    }

    /// Pull the next record and resolve it
    ///
    /// Records for unknown handles are dropped; IGNORED purges its handle.
    pub(crate) fn next_resolved(&mut self) -> Result<Option<Resolved>> {
        loop {
            let raw = match self.buffer.next_record()? {
                Some(raw) => raw,
                None => {
                    match self.source.read_raw(self.buffer.spare_mut())? {
                        ReadOutcome::Data(n) => self.buffer.commit(n),
                        ReadOutcome::WouldBlock => return Ok(None),
                        ReadOutcome::EndOfStream => return Err(WatchError::EndOfStream),
                    }
                    continue;
                }
            };

            if raw.mask.contains(EventMask::Q_OVERFLOW) {
                return Ok(Some(Resolved {
                    event: Event::resolved(raw, None),
                    requested: EventMask::empty(),
                }));
            }

            let Some(entry) = self.registry.entry(raw.handle) else {
                debug!(handle = %raw.handle, mask = %raw.mask, "dropping event for unknown handle");
                continue;
            };
            let path = entry.path.clone();
            let requested = entry.requested;

            if raw.mask.contains(EventMask::IGNORED) {
                self.registry.forget(raw.handle);
                debug!(handle = %raw.handle, path = %path.display(), "watch invalidated");
            }

            return Ok(Some(Resolved {
                event: Event::resolved(raw, Some(path)),
                requested,
            }));
        }
    }

    /// Drain available events, failing on the first terminal one
    pub fn read_events(&mut self) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event()? {
            if event.mask.intersects(self.terminal) {
                return Err(event.into_terminal());
            }
            events.push(event);
        }
        Ok(events)
    }

    /// Currently watched paths
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.registry.paths().map(Path::to_path_buf).collect()
    }

    /// Handle watching `path`
    pub fn handle_for(&self, path: impl AsRef<Path>) -> Option<WatchHandle> {
        let path = canonical_path(path.as_ref()).ok()?;
        self.registry.lookup(&path)
    }

    /// Path watched by `handle`
    pub fn path_for(&self, handle: WatchHandle) -> Option<&Path> {
        self.registry.resolve(handle)
    }

    /// Entry watched by `handle`
    pub fn entry(&self, handle: WatchHandle) -> Option<&WatchEntry> {
        self.registry.entry(handle)
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut WatchRegistry {
        &mut self.registry
    }

    pub fn terminal_events(&self) -> EventMask {
        self.terminal
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    #[cfg(test)]
    pub(crate) fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Close the device; every registration dies with it
    ///
    /// Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        self.registry.clear();
        self.buffer.clear();
        self.source.close()
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_closed()
    }
}

impl<S: EventSource> EventStream for Watcher<S> {
    fn next_event(&mut self) -> Result<Option<Event>> {
        Ok(self.next_resolved()?.map(|resolved| resolved.event))
    }
}
