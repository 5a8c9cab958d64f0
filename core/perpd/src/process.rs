//! Starting, signalling and collecting supervisor processes.
//!
//! The engine only talks to [`ProcessControl`]; [`ForkExec`] is the real
//! implementation and the engine tests substitute a recording fake.

use std::ffi::{CString, OsStr};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use libc::{c_char, c_int};
use perp_protocol::BASE_ENV;
use tracing::{debug, warn};

use crate::config::EXIT_FATAL;

const FD_CLOSE_LIMIT: c_int = 4096;

pub trait ProcessControl {
    /// Start one supervisor for the service directory `service`
    /// (a name relative to the base directory). Returns its pid.
    fn spawn(&mut self, service: &OsStr) -> io::Result<u32>;

    /// Collect every exited child without blocking.
    fn reap(&mut self) -> Vec<u32>;

    /// Ask a supervisor to stop: TERM, then CONT in case it is stopped.
    fn terminate(&mut self, pid: u32);

    /// Block until `pid` has exited and been collected.
    fn wait_for(&mut self, pid: u32);
}

/// fork/exec of the supervisor program as `<program> <service>`.
pub struct ForkExec {
    program: CString,
    fd_limit: c_int,
}

impl ForkExec {
    /// Exports `PERP_BASE` so every supervisor inherits the base directory.
    pub fn new(program: &Path, base_dir: &Path) -> io::Result<Self> {
        let program = CString::new(program.as_os_str().as_bytes()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "supervisor path contains NUL")
        })?;
        std::env::set_var(BASE_ENV, base_dir);

        // SAFETY: sysconf has no preconditions.
        let open_max = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
        let fd_limit = if open_max <= 0 {
            1024
        } else {
            open_max.min(FD_CLOSE_LIMIT as libc::c_long) as c_int
        };

        Ok(Self { program, fd_limit })
    }
}

impl ProcessControl for ForkExec {
    fn spawn(&mut self, service: &OsStr) -> io::Result<u32> {
        let arg = CString::new(service.as_bytes()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "service name contains NUL")
        })?;
        let argv: [*const c_char; 3] = [self.program.as_ptr(), arg.as_ptr(), ptr::null()];
        // Built before fork(); the child must not allocate.
        let failure = format!(
            "perpd: fatal: (in child for service {}) failure execvp() on {}\n",
            service.to_string_lossy(),
            self.program.to_string_lossy()
        );

        // SAFETY: the child branch only makes async-signal-safe calls before
        // execvp() or _exit().
        match unsafe { libc::fork() } {
            -1 => Err(io::Error::last_os_error()),
            0 => unsafe { exec_child(&argv, self.fd_limit, failure.as_bytes()) },
            pid => Ok(pid as u32),
        }
    }

    fn reap(&mut self) -> Vec<u32> {
        let mut reaped = Vec::new();
        loop {
            let mut status: c_int = 0;
            // SAFETY: status is a valid out-pointer.
            let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
            if pid > 0 {
                debug!(pid, status, "Collected supervisor");
                reaped.push(pid as u32);
                continue;
            }
            if pid == -1 && io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                continue;
            }
            break;
        }
        reaped
    }

    fn terminate(&mut self, pid: u32) {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return;
        };
        // SAFETY: kill with a concrete positive pid.
        unsafe {
            if libc::kill(pid, libc::SIGTERM) == -1 {
                warn!(pid, error = %io::Error::last_os_error(), "Failed to signal supervisor");
            }
            libc::kill(pid, libc::SIGCONT);
        }
    }

    fn wait_for(&mut self, pid: u32) {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return;
        };
        loop {
            // SAFETY: waiting on a specific child; status is not requested.
            let rc = unsafe { libc::waitpid(pid, ptr::null_mut(), 0) };
            if rc == -1 && io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                continue;
            }
            break;
        }
    }
}

/// Child side of `spawn`. Signals stay blocked until the very end so no
/// handler runs against descriptors that are being closed.
unsafe fn exec_child(argv: &[*const c_char; 3], fd_limit: c_int, failure: &[u8]) -> ! {
    for fd in 3..fd_limit {
        libc::close(fd);
    }
    libc::setsid();

    for signal in [
        libc::SIGINT,
        libc::SIGTERM,
        libc::SIGHUP,
        libc::SIGCHLD,
        libc::SIGPIPE,
    ] {
        libc::signal(signal, libc::SIG_DFL);
    }
    let mut empty: libc::sigset_t = std::mem::zeroed();
    libc::sigemptyset(&mut empty);
    libc::sigprocmask(libc::SIG_SETMASK, &empty, ptr::null_mut());

    libc::execvp(argv[0], argv.as_ptr());

    libc::write(libc::STDERR_FILENO, failure.as_ptr().cast(), failure.len());
    libc::_exit(EXIT_FATAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn spawn_then_terminate_and_collect() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut control = ForkExec::new(Path::new("sleep"), dir.path()).unwrap();

        let pid = control.spawn(OsStr::new("30")).unwrap();
        assert!(pid > 0);
        assert_eq!(std::env::var_os(BASE_ENV).as_deref(), Some(dir.path().as_os_str()));

        control.terminate(pid);
        control.wait_for(pid);
        // Already collected: kill(pid, 0) reports it gone.
        let gone = unsafe { libc::kill(pid as libc::pid_t, 0) } == -1;
        assert!(gone);
    }

    #[test]
    fn failed_exec_exits_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut control =
            ForkExec::new(Path::new("/nonexistent/perp-supervisor"), dir.path()).unwrap();
        let pid = control.spawn(OsStr::new("svc")).unwrap();

        let mut status: c_int = 0;
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let rc = unsafe { libc::waitpid(pid as libc::pid_t, &mut status, libc::WNOHANG) };
            if rc == pid as libc::pid_t {
                break;
            }
            assert!(Instant::now() < deadline, "child never exited");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(libc::WIFEXITED(status));
        assert_eq!(libc::WEXITSTATUS(status), EXIT_FATAL);
    }

    #[test]
    fn rejects_nul_in_service_name() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut control = ForkExec::new(Path::new("true"), dir.path()).unwrap();
        let err = control
            .spawn(OsStr::from_bytes(b"bad\0name"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
