//! inotify(7) backed event source

use super::{EventSource, ReadOutcome};
use crate::error::{Result, WatchError};
use crate::mask::{EventMask, InitFlags};
use crate::registry::WatchHandle;
use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use tracing::debug;

/// Owner of one inotify instance
///
/// The descriptor is released exactly once: by [`Inotify::close`] or, if that
/// never ran, on drop. Every operation after close fails with
/// [`WatchError::Closed`].
#[derive(Debug)]
pub struct Inotify {
    fd: Option<OwnedFd>,
    flags: InitFlags,
}

impl Inotify {
    /// Open a new instance via `inotify_init1(2)`
    pub fn open(flags: InitFlags) -> Result<Self> {
        // SAFETY: plain syscall without pointer arguments
        let fd = unsafe { libc::inotify_init1(flags.bits()) };
        if fd == -1 {
            return Err(init_error(io::Error::last_os_error()));
        }

        debug!(fd, ?flags, "opened inotify instance");
        // SAFETY: inotify_init1 returned a fresh descriptor nobody else owns
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { fd: Some(fd), flags })
    }

    /// Flags the instance was opened with
    pub fn flags(&self) -> InitFlags {
        self.flags
    }

    /// Borrow the descriptor, e.g. to hand it to a poller
    pub fn as_fd(&self) -> Option<BorrowedFd<'_>> {
        use std::os::fd::AsFd;
        self.fd.as_ref().map(AsFd::as_fd)
    }

    fn raw(&self) -> Result<RawFd> {
        self.fd.as_ref().map(AsRawFd::as_raw_fd).ok_or(WatchError::Closed)
    }
}

impl EventSource for Inotify {
    fn add_watch(&mut self, path: &Path, mask: EventMask) -> Result<WatchHandle> {
        let fd = self.raw()?;
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| WatchError::InvalidPath(path.to_path_buf()))?;

        // SAFETY: `c_path` is a NUL terminated string alive for the call
        let wd = unsafe { libc::inotify_add_watch(fd, c_path.as_ptr(), mask.bits()) };
        if wd == -1 {
            return Err(watch_error(io::Error::last_os_error(), path));
        }

        Ok(WatchHandle::new(wd))
    }

    fn remove_watch(&mut self, handle: WatchHandle) -> Result<()> {
        let fd = self.raw()?;

        // SAFETY: plain syscall without pointer arguments
        if unsafe { libc::inotify_rm_watch(fd, handle.raw()) } == -1 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EINVAL) => WatchError::InvalidHandle(handle),
                _ => WatchError::Device(err),
            });
        }

        Ok(())
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let fd = self.raw()?;

        loop {
            // SAFETY: the kernel writes at most `buf.len()` bytes into the borrowed buffer
            let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
            if n > 0 {
                return Ok(ReadOutcome::Data(n as usize));
            }
            if n == 0 {
                return Ok(ReadOutcome::EndOfStream);
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => return Ok(ReadOutcome::WouldBlock),
                io::ErrorKind::Interrupted => continue,
                _ => return Err(WatchError::Device(err)),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        let Some(fd) = self.fd.take() else {
            return Ok(());
        };

        let raw = fd.into_raw_fd();
        debug!(fd = raw, "closing inotify instance");
        // SAFETY: ownership of `raw` was just taken out of the OwnedFd, so it is closed once
        if unsafe { libc::close(raw) } == -1 {
            return Err(WatchError::Device(io::Error::last_os_error()));
        }

        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.fd.is_none()
    }
}

fn init_error(err: io::Error) -> WatchError {
    match err.raw_os_error() {
        Some(libc::EMFILE | libc::ENFILE | libc::ENOMEM) => WatchError::ResourceExhausted(err),
        Some(libc::ENOSYS) => WatchError::Unsupported(err),
        _ => WatchError::Device(err),
    }
}

fn watch_error(err: io::Error, path: &Path) -> WatchError {
    let path = path.to_path_buf();
    match err.raw_os_error() {
        Some(libc::ENOENT) => WatchError::NotFound(path),
        Some(libc::EACCES | libc::EPERM) => WatchError::PermissionDenied(path),
        Some(libc::EEXIST) => WatchError::AlreadyExists(path),
        Some(libc::ENOTDIR) => WatchError::NotADirectory(path),
        Some(libc::ENOSPC | libc::ENOMEM) => WatchError::ResourceExhausted(err),
        Some(libc::EBADF) => WatchError::Closed,
        _ => WatchError::Device(err),
    }
}
