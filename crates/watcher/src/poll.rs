//! Blocking waits on the notification device
//!
//! [`Poller`] is a small epoll(7) wrapper over the device descriptor and an
//! optional stop descriptor supplied by the caller. [`PollTreeWatcher`]
//! bundles one with a non-blocking [`TreeWatcher`].

use crate::config::WatchConfig;
use crate::error::{Result, WatchError};
use crate::platform::linux::Inotify;
use crate::tree::TreeWatcher;
use std::io;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const SOURCE_TOKEN: u64 = 0;
const STOP_TOKEN: u64 = 1;

/// Why a wait returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The device has data to read
    Ready,
    /// The stop descriptor became readable
    Stopped,
    /// The timeout elapsed with nothing to read
    TimedOut,
}

/// epoll instance watching the device and an optional stop descriptor
///
/// The stop descriptor is borrowed for `'fd`; the caller keeps ownership.
pub struct Poller<'fd> {
    epoll: Option<OwnedFd>,
    has_stop: bool,
    _stop: PhantomData<BorrowedFd<'fd>>,
}

impl<'fd> Poller<'fd> {
    pub fn new(source: BorrowedFd<'_>, stop: Option<BorrowedFd<'fd>>) -> Result<Self> {
        // SAFETY: plain syscall without pointer arguments
        let raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if raw == -1 {
            return Err(poll_error(io::Error::last_os_error()));
        }
        // SAFETY: epoll_create1 returned a fresh descriptor nobody else owns
        let epoll = unsafe { OwnedFd::from_raw_fd(raw) };

        // On failure below, `epoll` drops and is closed
        register(&epoll, source, SOURCE_TOKEN)?;
        if let Some(stop) = stop {
            register(&epoll, stop, STOP_TOKEN)?;
        }

        debug!(epoll = raw, stop = stop.map(|fd| fd.as_raw_fd()), "opened poller");
        Ok(Self {
            epoll: Some(epoll),
            has_stop: stop.is_some(),
            _stop: PhantomData,
        })
    }

    /// Block until the device is readable, the stop descriptor fires, or
    /// `timeout` elapses; `None` waits indefinitely
    ///
    /// A readable stop descriptor wins over pending data. Interrupted waits
    /// resume with whatever time is left.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<WaitOutcome> {
        let epoll = self.epoll.as_ref().ok_or(WatchError::Closed)?.as_raw_fd();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut ready = [libc::epoll_event { events: 0, u64: 0 }; 2];

        loop {
            let millis = match deadline {
                None => -1,
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    // Round up so a sub-millisecond remainder still blocks
                    let millis = left.as_nanos().div_ceil(1_000_000);
                    millis.min(i32::MAX as u128) as i32
                }
            };

            // SAFETY: `ready` is a live array and the kernel writes at most `ready.len()` entries
            let n = unsafe { libc::epoll_wait(epoll, ready.as_mut_ptr(), ready.len() as i32, millis) };
            if n == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    trace!("wait interrupted, retrying");
                    continue;
                }
                return Err(WatchError::Device(err));
            }

            let ready = &ready[..n as usize];
            if n == 0 {
                return Ok(WaitOutcome::TimedOut);
            }
            if self.has_stop && ready.iter().any(|event| { event.u64 } == STOP_TOKEN) {
                return Ok(WaitOutcome::Stopped);
            }
            return Ok(WaitOutcome::Ready);
        }
    }

    /// Release the epoll instance; calling it again is a no-op
    pub fn close(&mut self) -> Result<()> {
        let Some(epoll) = self.epoll.take() else {
            return Ok(());
        };

        let raw = epoll.into_raw_fd();
        debug!(epoll = raw, "closing poller");
        // SAFETY: ownership of `raw` was just taken out of the OwnedFd, so it is closed once
        if unsafe { libc::close(raw) } == -1 {
            return Err(WatchError::Device(io::Error::last_os_error()));
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.epoll.is_none()
    }
}

fn register(epoll: &OwnedFd, fd: BorrowedFd<'_>, token: u64) -> Result<()> {
    let mut event = libc::epoll_event {
        events: libc::EPOLLIN as u32,
        u64: token,
    };
    // SAFETY: both descriptors are open for the duration of the call and `event` outlives it
    let rc = unsafe { libc::epoll_ctl(epoll.as_raw_fd(), libc::EPOLL_CTL_ADD, fd.as_raw_fd(), &mut event) };
    if rc == -1 {
        return Err(poll_error(io::Error::last_os_error()));
    }
    Ok(())
}

fn poll_error(err: io::Error) -> WatchError {
    match err.raw_os_error() {
        Some(libc::EMFILE | libc::ENFILE | libc::ENOMEM | libc::ENOSPC) => WatchError::ResourceExhausted(err),
        _ => WatchError::Device(err),
    }
}

/// Tree watcher with a built-in wait
///
/// Derefs to [`TreeWatcher`] for everything except waiting and closing.
///
/// ```no_run
/// use treewatch::{EventMask, EventStream, PollTreeWatcher, WaitOutcome, WatchConfig};
///
/// let mut watcher = PollTreeWatcher::open(&WatchConfig::default(), None)?;
/// watcher.add_tree("/tmp/project", EventMask::CREATE | EventMask::DELETE)?;
///
/// while watcher.wait(None)? == WaitOutcome::Ready {
///     for event in watcher.events() {
///         let event = event?;
///         println!("{:?}: {}", event.full_path(), event.mask);
///     }
/// }
/// # Ok::<(), treewatch::WatchError>(())
/// ```
pub struct PollTreeWatcher<'fd> {
    tree: TreeWatcher<Inotify>,
    poller: Poller<'fd>,
}

impl<'fd> PollTreeWatcher<'fd> {
    /// Open the device in non-blocking mode and a poller over it
    ///
    /// If the poller cannot be set up the device is closed before returning.
    pub fn open(config: &WatchConfig, stop: Option<BorrowedFd<'fd>>) -> Result<Self> {
        let config = WatchConfig {
            nonblocking: true,
            ..config.clone()
        };
        let mut tree = TreeWatcher::open(&config)?;

        let poller = match tree.watcher().source().as_fd() {
            Some(source) => Poller::new(source, stop),
            None => Err(WatchError::Closed),
        };

        match poller {
            Ok(poller) => Ok(Self { tree, poller }),
            Err(err) => {
                if let Err(close_err) = tree.close() {
                    debug!(%close_err, "failed to close device after poller setup failed");
                }
                Err(err)
            }
        }
    }

    /// Block until events are available, the stop descriptor fires, or the
    /// timeout elapses
    ///
    /// Only meaningful once the previous batch of events has been drained.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<WaitOutcome> {
        if self.tree.is_closed() {
            return Err(WatchError::Closed);
        }
        self.poller.wait(timeout)
    }

    /// Close the poller and the device, each exactly once
    ///
    /// Both are released even if the first fails; the first error is returned.
    pub fn close(&mut self) -> Result<()> {
        let poller = self.poller.close();
        let tree = self.tree.close();
        poller.and(tree)
    }

    pub fn is_closed(&self) -> bool {
        self.tree.is_closed() && self.poller.is_closed()
    }
}

impl Deref for PollTreeWatcher<'_> {
    type Target = TreeWatcher<Inotify>;

    fn deref(&self) -> &Self::Target {
        &self.tree
    }
}

impl DerefMut for PollTreeWatcher<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.tree
    }
}
