//! Scripted in-memory event source for unit tests

use crate::codec::{encode, RawEvent};
use crate::error::{Result, WatchError};
use crate::mask::EventMask;
use crate::platform::{EventSource, ReadOutcome};
use crate::registry::WatchHandle;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

enum Chunk {
    Bytes(Vec<u8>),
    Pause,
    End,
}

/// Hands out handles per path like the kernel does per inode, and serves
/// queued record bytes one chunk per read
#[derive(Default)]
pub struct ScriptedSource {
    handles: HashMap<PathBuf, WatchHandle>,
    live: HashSet<WatchHandle>,
    next_handle: i32,
    added: Vec<(PathBuf, EventMask)>,
    removed: Vec<WatchHandle>,
    failures: HashMap<PathBuf, fn(PathBuf) -> WatchError>,
    chunks: VecDeque<Chunk>,
    closed: bool,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            ..Self::default()
        }
    }

    fn record(handle: WatchHandle, mask: EventMask, cookie: u32, name: Option<&str>) -> Vec<u8> {
        let mut bytes = Vec::new();
        encode(
            &RawEvent {
                handle,
                mask,
                cookie,
                name: name.map(OsString::from),
            },
            &mut bytes,
        );
        bytes
    }

    /// Queue one record as its own read
    pub fn push(&mut self, handle: WatchHandle, mask: EventMask, cookie: u32, name: Option<&str>) {
        self.chunks
            .push_back(Chunk::Bytes(Self::record(handle, mask, cookie, name)));
    }

    /// Queue one record split across two reads with an empty read between
    pub fn push_split(
        &mut self,
        handle: WatchHandle,
        mask: EventMask,
        cookie: u32,
        name: Option<&str>,
        at: usize,
    ) {
        let mut bytes = Self::record(handle, mask, cookie, name);
        let rest = bytes.split_off(at);
        self.chunks.push_back(Chunk::Bytes(bytes));
        self.chunks.push_back(Chunk::Pause);
        self.chunks.push_back(Chunk::Bytes(rest));
    }

    /// Queue a zero byte read
    pub fn end_stream(&mut self) {
        self.chunks.push_back(Chunk::End);
    }

    /// Drop a registration the way the kernel does when the inode goes away
    pub fn invalidate(&mut self, handle: WatchHandle) {
        self.live.remove(&handle);
    }

    /// Keep the handles of everything under `from` for the same entries under `to`
    pub fn rename(&mut self, from: &Path, to: &Path) {
        let moved: Vec<(PathBuf, WatchHandle)> = self
            .handles
            .iter()
            .filter(|(path, _)| path.starts_with(from))
            .map(|(path, &handle)| (path.clone(), handle))
            .collect();

        for (path, handle) in moved {
            self.handles.remove(&path);
            let suffix = path.strip_prefix(from).unwrap_or(Path::new(""));
            self.handles.insert(to.join(suffix), handle);
        }
    }

    /// Make `add_watch` on `path` fail
    pub fn fail(&mut self, path: &Path, error: fn(PathBuf) -> WatchError) {
        self.failures.insert(path.to_path_buf(), error);
    }

    pub fn added(&self) -> &[(PathBuf, EventMask)] {
        &self.added
    }

    /// Kernel mask of the most recent registration of `path`
    pub fn mask_for(&self, path: &Path) -> Option<EventMask> {
        self.added
            .iter()
            .rev()
            .find(|(added, _)| added == path)
            .map(|(_, mask)| *mask)
    }

    pub fn removed(&self) -> Vec<WatchHandle> {
        self.removed.clone()
    }

    pub fn is_live(&self, handle: WatchHandle) -> bool {
        self.live.contains(&handle)
    }
}

impl EventSource for ScriptedSource {
    fn add_watch(&mut self, path: &Path, mask: EventMask) -> Result<WatchHandle> {
        if self.closed {
            return Err(WatchError::Closed);
        }
        if let Some(error) = self.failures.get(path) {
            return Err(error(path.to_path_buf()));
        }

        let handle = match self.handles.get(path) {
            Some(&handle) if self.live.contains(&handle) => handle,
            _ => {
                let handle = WatchHandle::new(self.next_handle);
                self.next_handle += 1;
                self.handles.insert(path.to_path_buf(), handle);
                handle
            }
        };

        self.live.insert(handle);
        self.added.push((path.to_path_buf(), mask));
        Ok(handle)
    }

    fn remove_watch(&mut self, handle: WatchHandle) -> Result<()> {
        if self.closed {
            return Err(WatchError::Closed);
        }
        if !self.live.remove(&handle) {
            return Err(WatchError::InvalidHandle(handle));
        }
        self.removed.push(handle);
        Ok(())
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        if self.closed {
            return Err(WatchError::Closed);
        }

        match self.chunks.pop_front() {
            None | Some(Chunk::Pause) => Ok(ReadOutcome::WouldBlock),
            Some(Chunk::End) => Ok(ReadOutcome::EndOfStream),
            Some(Chunk::Bytes(mut bytes)) => {
                if bytes.len() > buf.len() {
                    let rest = bytes.split_off(buf.len());
                    self.chunks.push_front(Chunk::Bytes(rest));
                }
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(ReadOutcome::Data(bytes.len()))
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.live.clear();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
