//! Control directory setup and the single-instance pid lock.

use std::fs::{DirBuilder, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use fs2::FileExt;
use perp_protocol::{daemon_pidlock_path, CONTROL_DIR, DAEMON_CONTROL_DIR};
use tracing::debug;

const LOCK_RETRIES: u32 = 5;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Exclusive lock on `.control/.perpd/pid.lock`, held for the daemon's
/// lifetime. Dropping it releases the lock.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    _file: File,
}

impl PidLock {
    pub fn acquire(path: &Path) -> Result<Self, String> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o644)
            .open(path)
            .map_err(|err| format!("failure opening lock file {}: {}", path.display(), err))?;

        lock_with_retry(&file).map_err(|err| {
            if err.kind() == io::ErrorKind::WouldBlock {
                format!("lock file {} is held by another perpd", path.display())
            } else {
                format!("failure locking {}: {}", path.display(), err)
            }
        })?;

        file.set_len(0)
            .and_then(|()| writeln!(file, "{}", std::process::id()))
            .map_err(|err| format!("failure writing pid to {}: {}", path.display(), err))?;

        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Create `.control` (0700, or the target of a dangling `.control` symlink)
/// and `.control/.perpd`, then take the pid lock.
pub fn setup_control(base_dir: &Path) -> Result<PidLock, String> {
    let control = base_dir.join(CONTROL_DIR);
    if let Err(err) = private_dir().create(&control) {
        match std::fs::read_link(&control) {
            Ok(target) => {
                let target = base_dir.join(target);
                if let Err(err) = private_dir().create(&target) {
                    debug!(target = %target.display(), error = %err, "Control symlink target not created");
                }
            }
            Err(_) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(_) => debug!(path = %control.display(), error = %err, "Control directory not created"),
        }
    }

    let daemon_dir = control.join(DAEMON_CONTROL_DIR);
    if let Err(err) = private_dir().create(&daemon_dir) {
        if err.kind() != io::ErrorKind::AlreadyExists {
            return Err(format!(
                "failure creating control directory {}: {}",
                daemon_dir.display(),
                err
            ));
        }
    }

    PidLock::acquire(&daemon_pidlock_path(base_dir))
}

/// perphup tests the lock by taking it shared for an instant, so a busy lock
/// is retried a few times before another perpd is assumed to hold it.
fn lock_with_retry(file: &File) -> io::Result<()> {
    let mut attempts = 0;
    loop {
        match file.try_lock_exclusive() {
            Err(err) if err.kind() == io::ErrorKind::WouldBlock && attempts < LOCK_RETRIES => {
                attempts += 1;
                thread::sleep(LOCK_RETRY_DELAY);
            }
            result => return result,
        }
    }
}

fn private_dir() -> DirBuilder {
    let mut builder = DirBuilder::new();
    builder.mode(0o700);
    builder
}
