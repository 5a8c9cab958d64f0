//! Finding a running perpd through its pid lock and asking it to rescan.

use std::fs::File;
use std::io;
use std::path::Path;

use fs2::FileExt;
use fs_err as fs;
use perp_protocol::daemon_pidlock_path;

/// Pid of the perpd holding the lock under `base`, or `None` when the lock
/// file exists but nobody holds it.
///
/// The check takes a shared lock and drops it at once. A perpd starting in
/// that instant retries its exclusive lock briefly and is not turned away.
pub fn daemon_pid(base: &Path) -> io::Result<Option<u32>> {
    let path = daemon_pidlock_path(base);
    let file = File::open(&path)?;

    match FileExt::try_lock_shared(&file) {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            return Ok(None);
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
        Err(err) => return Err(err),
    }

    let contents = fs::read_to_string(&path)?;
    contents
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|pid| *pid > 0)
        .map(Some)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("no pid found in {}", path.display()),
            )
        })
}

pub fn send_hangup(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill with a concrete positive pid.
    if unsafe { libc::kill(pid, libc::SIGHUP) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn pidlock(base: &Path, contents: &str) -> File {
        let path = daemon_pidlock_path(base);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn held_lock_yields_pid() {
        let base = TempDir::new().unwrap();
        let holder = pidlock(base.path(), "4242\n");
        holder.lock_exclusive().unwrap();

        assert_eq!(daemon_pid(base.path()).unwrap(), Some(4242));
    }

    #[test]
    fn unheld_lock_means_not_running() {
        let base = TempDir::new().unwrap();
        let _file = pidlock(base.path(), "4242\n");

        assert_eq!(daemon_pid(base.path()).unwrap(), None);
    }

    #[test]
    fn missing_lock_file_is_an_error() {
        let base = TempDir::new().unwrap();
        let err = daemon_pid(base.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn garbage_pid_is_invalid_data() {
        let base = TempDir::new().unwrap();
        let holder = pidlock(base.path(), "not-a-pid");
        holder.lock_exclusive().unwrap();

        let err = daemon_pid(base.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
