//! From a service argument to its supervisor's control directory.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use perp_protocol::ServiceIdentity;
use tracing::debug;

use crate::channel::{ControlChannel, Liveness};
use crate::error::ServiceError;

const STICKY_BIT: u32 = 0o1000;

/// An activated service directory and where its supervisor lives.
#[derive(Debug, Clone)]
pub struct ActiveService {
    pub name: String,
    pub identity: ServiceIdentity,
    pub control_dir: PathBuf,
}

/// stat → directory → activation bit → control path. Does not probe.
pub fn lookup(root: &Path, name: &str) -> Result<ActiveService, ServiceError> {
    let meta = fs::metadata(root.join(name)).map_err(|source| ServiceError::Missing { source })?;
    if !meta.is_dir() {
        return Err(ServiceError::NotDirectory);
    }
    if meta.permissions().mode() & STICKY_BIT == 0 {
        return Err(ServiceError::NotActivated);
    }

    let identity = ServiceIdentity::from_metadata(&meta);
    let control_dir = root.join(identity.control_path());
    debug!(service = name, control = %control_dir.display(), "Resolved service");
    Ok(ActiveService {
        name: name.to_string(),
        identity,
        control_dir,
    })
}

impl ActiveService {
    pub fn channel(&self) -> ControlChannel {
        ControlChannel::new(&self.control_dir)
    }

    /// `Ok` only when a supervisor is attached to the control FIFO.
    pub fn probe(&self) -> Result<ControlChannel, ServiceError> {
        let channel = self.channel();
        match channel.is_ready() {
            Ok(Liveness::Ready) => Ok(channel),
            Ok(Liveness::NotRunning { errno }) => Err(ServiceError::NotRunning { errno }),
            Err(source) => Err(ServiceError::Probe { source }),
        }
    }
}
