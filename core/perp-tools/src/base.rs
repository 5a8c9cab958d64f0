//! Base directory resolution for the client tools.

use perp_protocol::BASE_ENV;
use std::env;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

/// Default for tools that operate on services relative to the current directory.
pub const CURRENT_DIR: &str = ".";

/// `flag`, else non-empty `PERP_BASE`, else `default`.
pub fn resolve(flag: Option<PathBuf>, default: &str) -> PathBuf {
    resolve_with(flag, env::var_os(BASE_ENV), default)
}

pub fn resolve_with(flag: Option<PathBuf>, env_value: Option<OsString>, default: &str) -> PathBuf {
    flag.or_else(|| env_value.filter(|value| !value.is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(default))
}

/// Change into `base` and return the resolved working directory.
pub fn enter(base: &Path) -> io::Result<PathBuf> {
    env::set_current_dir(base)?;
    env::current_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_then_env_then_default() {
        let flag = Some(PathBuf::from("/srv/perp"));
        let env_value = Some(OsString::from("/etc/perp"));

        assert_eq!(
            resolve_with(flag, env_value.clone(), CURRENT_DIR),
            PathBuf::from("/srv/perp")
        );
        assert_eq!(
            resolve_with(None, env_value, CURRENT_DIR),
            PathBuf::from("/etc/perp")
        );
        assert_eq!(
            resolve_with(None, Some(OsString::new()), CURRENT_DIR),
            PathBuf::from(".")
        );
        assert_eq!(resolve_with(None, None, "/etc/perp"), PathBuf::from("/etc/perp"));
    }
}
