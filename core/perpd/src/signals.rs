//! Self-pipe translation of asynchronous signals into loop wakeups.
//!
//! The handler only records which condition occurred and writes one byte to
//! a non-blocking pipe. Everything else runs in the main loop after
//! [`SignalPipe::wait`] returns, with all signals blocked again. A full pipe
//! drops the byte: any number of signals between two wakeups coalesce into
//! one pass.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

use libc::c_int;

// A handler can reach nothing but statics; these are drained into
// `PendingSignals` on every wakeup.
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);
static TERMINATE: AtomicBool = AtomicBool::new(false);
static RESCAN: AtomicBool = AtomicBool::new(false);
static CHILD_EXITED: AtomicBool = AtomicBool::new(false);

/// Signals routed through the self-pipe.
pub const CAUGHT_SIGNALS: [c_int; 4] = [libc::SIGINT, libc::SIGTERM, libc::SIGHUP, libc::SIGCHLD];

/// What happened since the previous wakeup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PendingSignals {
    pub terminate: bool,
    pub rescan: bool,
    pub child_exited: bool,
}

impl PendingSignals {
    fn take() -> Self {
        Self {
            terminate: TERMINATE.swap(false, Ordering::SeqCst),
            rescan: RESCAN.swap(false, Ordering::SeqCst),
            child_exited: CHILD_EXITED.swap(false, Ordering::SeqCst),
        }
    }
}

pub struct SignalPipe {
    read: OwnedFd,
    write: OwnedFd,
    all: libc::sigset_t,
}

impl SignalPipe {
    pub fn new() -> io::Result<Self> {
        let mut fds: [RawFd; 2] = [-1; 2];
        // SAFETY: fds has room for the two descriptors pipe() fills in.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: pipe() succeeded, so both descriptors are open and owned here.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        set_nonblock_cloexec(read.as_raw_fd())?;
        set_nonblock_cloexec(write.as_raw_fd())?;

        // SAFETY: sigfillset initialises the zeroed set.
        let all = unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            libc::sigfillset(&mut set);
            set
        };

        Ok(Self { read, write, all })
    }

    /// Block every signal for the calling thread.
    pub fn block(&self) -> io::Result<()> {
        self.mask(libc::SIG_BLOCK)
    }

    fn unblock(&self) -> io::Result<()> {
        self.mask(libc::SIG_UNBLOCK)
    }

    fn mask(&self, how: c_int) -> io::Result<()> {
        // SAFETY: `all` is an initialised sigset; the old mask is not requested.
        if unsafe { libc::sigprocmask(how, &self.all, ptr::null_mut()) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Route [`CAUGHT_SIGNALS`] to this pipe.
    pub fn install(&self) -> io::Result<()> {
        WAKE_FD.store(self.write.as_raw_fd(), Ordering::SeqCst);
        for signal in CAUGHT_SIGNALS {
            // SAFETY: the action is fully initialised before sigaction() reads it,
            // and the handler is async-signal-safe.
            unsafe {
                let mut action: libc::sigaction = std::mem::zeroed();
                action.sa_sigaction = on_signal as extern "C" fn(c_int) as libc::sighandler_t;
                libc::sigfillset(&mut action.sa_mask);
                action.sa_flags = 0;
                if libc::sigaction(signal, &action, ptr::null_mut()) == -1 {
                    return Err(io::Error::last_os_error());
                }
            }
        }
        Ok(())
    }

    /// Park until a signal arrives or `timeout` elapses (`None` waits forever).
    ///
    /// Signals are unblocked only for the duration of the poll. On return the
    /// pipe is drained and the recorded conditions are handed to the caller.
    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<PendingSignals> {
        let timeout_ms = timeout
            .map(|duration| duration.as_millis().min(c_int::MAX as u128) as c_int)
            .unwrap_or(-1);
        let mut pollfd = libc::pollfd {
            fd: self.read.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        self.unblock()?;
        let polled = loop {
            // SAFETY: pollfd is a single valid entry.
            if unsafe { libc::poll(&mut pollfd, 1, timeout_ms) } != -1 {
                break Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                break Err(err);
            }
        };
        self.block()?;
        polled?;

        self.drain();
        Ok(PendingSignals::take())
    }

    fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            // SAFETY: buf is writable for its full length.
            let n = unsafe { libc::read(self.read.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
            if n <= 0 {
                break;
            }
        }
    }
}

impl Drop for SignalPipe {
    fn drop(&mut self) {
        let _ = WAKE_FD.compare_exchange(
            self.write.as_raw_fd(),
            -1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

extern "C" fn on_signal(signal: c_int) {
    match signal {
        libc::SIGINT | libc::SIGTERM => TERMINATE.store(true, Ordering::SeqCst),
        libc::SIGHUP => RESCAN.store(true, Ordering::SeqCst),
        libc::SIGCHLD => CHILD_EXITED.store(true, Ordering::SeqCst),
        _ => {}
    }
    ping();
}

fn ping() {
    let fd = WAKE_FD.load(Ordering::SeqCst);
    if fd < 0 {
        return;
    }
    // SAFETY: errno is thread-local; it is saved and restored around write().
    unsafe {
        let saved = *errno_location();
        loop {
            let written = libc::write(fd, b"!".as_ptr().cast(), 1);
            if written == -1 && *errno_location() == libc::EINTR {
                continue;
            }
            break;
        }
        *errno_location() = saved;
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn errno_location() -> *mut c_int {
    libc::__errno_location()
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
unsafe fn errno_location() -> *mut c_int {
    libc::__error()
}

fn set_nonblock_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor this module owns.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags == -1 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
            return Err(io::Error::last_os_error());
        }
        let fd_flags = libc::fcntl(fd, libc::F_GETFD);
        if fd_flags == -1 || libc::fcntl(fd, libc::F_SETFD, fd_flags | libc::FD_CLOEXEC) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
