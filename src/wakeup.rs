//! # Wakeup set
//!
//! A single level-triggered pollable descriptor aggregating per-interface
//! completion/AM/signal sources plus a self-pipe for cross-thread `signal()`.
//! Mirrors `ucp_worker.c`'s wakeup context: one `epoll`-equivalent object,
//! one non-blocking pipe pair, `arm()`/`wait()`/`signal()` with the same
//! drain-before-arm and EINTR-retry discipline.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::OnceLock;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::error::{CoreError, CoreResult, ErrorKind};

const PIPE_TOKEN: Token = Token(0);
const IFACE_TOKEN_BASE: usize = 1;

/// One interface's contribution to the wakeup set: a descriptor that becomes
/// readable when the interface has pending work, plus a cheap local check
/// for work that's already available (so `arm()` doesn't need a syscall to
/// answer BUSY).
pub trait WakeupSource {
    /// `None` if this interface has no pollable wakeup descriptor (it's
    /// progressed by polling alone).
    fn wakeup_fd(&self) -> Option<RawFd>;

    /// True if the interface already has unconsumed completions, incoming
    /// active messages, or signaled sends.
    fn has_pending(&self) -> bool;
}

/// Drains a non-blocking pipe until it reports `WouldBlock`, coalescing any
/// number of queued signal bytes into nothing.
fn drain_pipe(reader: &mut impl Read) -> io::Result<()> {
    let mut buf = [0u8; 64];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Aggregates interface wakeup sources behind one pollable descriptor.
///
/// The descriptor itself (`get_efd`) is constructed lazily: a worker that
/// never blocks (pure polling mode) never pays for an `epoll_create`.
pub struct WakeupSet {
    poll: OnceLock<Poll>,
    pipe_reader: os_pipe::PipeReader,
    pipe_writer: os_pipe::PipeWriter,
    registered: Vec<bool>,
}

impl WakeupSet {
    pub fn new() -> CoreResult<Self> {
        let (pipe_reader, pipe_writer) = os_pipe::pipe()
            .map_err(|e| CoreError::new(ErrorKind::IoError, format!("pipe: {e}")))?;
        set_nonblocking(pipe_reader.as_raw_fd())
            .map_err(|e| CoreError::new(ErrorKind::IoError, format!("set nonblocking: {e}")))?;
        set_nonblocking(pipe_writer.as_raw_fd())
            .map_err(|e| CoreError::new(ErrorKind::IoError, format!("set nonblocking: {e}")))?;
        Ok(Self {
            poll: OnceLock::new(),
            pipe_reader,
            pipe_writer,
            registered: Vec::new(),
        })
    }

    /// Returns the event descriptor, constructing it on first call.
    /// Idempotent: subsequent calls return the same descriptor.
    pub fn get_efd(&self) -> CoreResult<RawFd> {
        self.ensure_poll()?;
        Ok(self.poll.get().expect("poll initialized by ensure_poll").as_raw_fd())
    }

    fn ensure_poll(&self) -> CoreResult<&Poll> {
        if self.poll.get().is_none() {
            let poll = Poll::new()
                .map_err(|e| CoreError::new(ErrorKind::IoError, format!("epoll_create: {e}")))?;
            poll.registry()
                .register(
                    &mut SourceFd(&self.pipe_reader.as_raw_fd()),
                    PIPE_TOKEN,
                    Interest::READABLE,
                )
                .map_err(|e| CoreError::new(ErrorKind::IoError, format!("register pipe: {e}")))?;
            let _ = self.poll.set(poll);
        }
        Ok(self.poll.get().expect("just initialized"))
    }

    /// Registers one interface's wakeup descriptor, if it has one (`None`
    /// means that interface is progressed by polling alone). Returns the
    /// slot index, kept symmetric with `ucp_worker.c`'s per-interface event
    /// slot array even though nothing outside this module reads it back.
    pub fn add_source(&mut self, wakeup_fd: Option<RawFd>) -> CoreResult<usize> {
        let poll = self.ensure_poll()?;
        let idx = self.registered.len();
        if let Some(fd) = wakeup_fd {
            poll.registry()
                .register(
                    &mut SourceFd(&fd),
                    Token(IFACE_TOKEN_BASE + idx),
                    Interest::READABLE,
                )
                .map_err(|e| {
                    CoreError::new(ErrorKind::IoError, format!("register iface fd: {e}"))
                })?;
            self.registered.push(true);
        } else {
            self.registered.push(false);
        }
        Ok(idx)
    }

    /// Prepares for a subsequent `wait()`. Drains the self-pipe first (so a
    /// signal delivered while armed isn't lost to a stale readable event),
    /// then lets the caller report whether any source already has pending
    /// work. Returns BUSY if so — the caller must not block in that case.
    ///
    /// Takes the already-computed flag rather than a source list: callers
    /// hold a mix of concrete and trait-object sources (interfaces,
    /// endpoints), and collecting them into one `&[&dyn WakeupSource]`
    /// would require upcasting a `dyn Interface` to `dyn WakeupSource`.
    pub fn arm(&mut self, any_source_pending: bool) -> CoreResult<()> {
        drain_pipe(&mut self.pipe_reader)
            .map_err(|e| CoreError::new(ErrorKind::IoError, format!("drain pipe: {e}")))?;
        if any_source_pending {
            return Err(CoreError::new(ErrorKind::Busy, "pending work before arm"));
        }
        Ok(())
    }

    /// Blocks until any aggregated source becomes ready, or `timeout`
    /// elapses (`None` blocks indefinitely). Spurious wakeups from signal
    /// interruption are retried transparently.
    pub fn wait(&mut self, timeout: Option<Duration>) -> CoreResult<()> {
        self.ensure_poll()?;
        let mut events = Events::with_capacity(self.registered.len() + 1);
        loop {
            let poll = self.poll.get_mut().expect("poll initialized by ensure_poll");
            match poll.poll(&mut events, timeout) {
                Ok(()) => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(CoreError::new(ErrorKind::IoError, format!("epoll_wait: {e}")))
                }
            }
        }
    }

    /// Writes one byte to the self-pipe. Safe from any thread, including a
    /// signal handler, on a best-effort basis; a full pipe (already
    /// signaled) is not an error, it coalesces.
    pub fn signal(&self) -> CoreResult<()> {
        let mut writer = &self.pipe_writer;
        match writer.write(&[1u8]) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(CoreError::new(ErrorKind::IoError, format!("signal: {e}"))),
        }
    }

    /// Clones the self-pipe's write end into a standalone [`Signaler`] that
    /// outlives any lock guarding this set: `signal()` only ever needs to
    /// write one byte, so a caller holding a `Signaler` never contends with
    /// a thread blocked in [`wait_on_efd`].
    pub fn signaler(&self) -> CoreResult<Signaler> {
        self.pipe_writer
            .try_clone()
            .map(Signaler)
            .map_err(|e| CoreError::new(ErrorKind::IoError, format!("clone pipe writer: {e}")))
    }
}

/// An independently-owned handle to a [`WakeupSet`]'s self-pipe writer.
pub struct Signaler(os_pipe::PipeWriter);

impl Signaler {
    pub fn signal(&self) -> CoreResult<()> {
        let mut writer = &self.0;
        match writer.write(&[1u8]) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(CoreError::new(ErrorKind::IoError, format!("signal: {e}"))),
        }
    }
}

/// Blocks on an already-armed epoll descriptor without requiring exclusive
/// access to the [`WakeupSet`] that owns it: `epoll_wait` itself supports
/// any number of concurrent waiters on the same descriptor, so once
/// registration has happened under `arm`, this can run with no lock held
/// at all, the same way `ucp_worker.c`'s shared wakeup fd is waited on by
/// every progress thread without a userspace lock serializing the wait.
pub fn wait_on_efd(efd: RawFd, timeout: Option<Duration>) -> CoreResult<()> {
    let timeout_ms = match timeout {
        Some(d) => i32::try_from(d.as_millis()).unwrap_or(i32::MAX),
        None => -1,
    };
    let mut events: [libc::epoll_event; 16] = unsafe { std::mem::zeroed() };
    loop {
        let n = unsafe {
            libc::epoll_wait(efd, events.as_mut_ptr(), events.len() as i32, timeout_ms)
        };
        if n >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return Err(CoreError::new(ErrorKind::IoError, format!("epoll_wait: {err}")));
    }
}
