//! Pass/fail health check behind `perpok`.

use std::path::Path;

use perp_protocol::{uptime, StatusRecord, SubjectFlags, Tain};

use crate::error::ServiceError;
use crate::service::lookup;
use crate::status::read_status;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Pass(String),
    Fail(String),
}

impl Health {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Pass(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Pass(message) | Self::Fail(message) => message,
        }
    }
}

/// Check one service. With `min_uptime == 0` only supervisor liveness is
/// tested. `Err` is reserved for arguments that are not service directories
/// at all (missing or not a directory).
pub fn check_service(root: &Path, name: &str, min_uptime: u32, now: &Tain) -> Result<Health, ServiceError> {
    let service = match lookup(root, name) {
        Ok(service) => service,
        Err(ServiceError::NotActivated) => {
            return Ok(Health::Fail("service directory not activated".to_string()))
        }
        Err(err) => return Err(err),
    };

    if service.probe().is_err() {
        return Ok(Health::Fail("supervisor not running".to_string()));
    }
    if min_uptime == 0 {
        return Ok(Health::Pass("supervisor running ok".to_string()));
    }

    let status = match read_status(&service.control_dir) {
        Ok(status) => status,
        Err(ServiceError::Protocol(_)) => {
            return Ok(Health::Fail("bad status format found in status.bin".to_string()))
        }
        Err(err) => return Ok(Health::Fail(format!("error reading status in status.bin: {err}"))),
    };
    Ok(check_status(&status, min_uptime, now))
}

/// Extended test on a decoded status record.
pub fn check_status(status: &StatusRecord, min_uptime: u32, now: &Tain) -> Health {
    let main = &status.main;
    if main.pid == 0 {
        return Health::Fail("service not running (pid is 0)".to_string());
    }
    if main.flags.contains(SubjectFlags::RESET) {
        return Health::Fail("service resetting".to_string());
    }
    if main.flags.contains(SubjectFlags::WANT) {
        return Health::Fail("service wants down".to_string());
    }
    if uptime(now, &main.when) < min_uptime {
        return Health::Fail("service uptime not met".to_string());
    }
    Health::Pass("service uptime ok".to_string())
}
