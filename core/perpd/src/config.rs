//! Command line and environment configuration for perpd.

use clap::Parser;
use perp_protocol::{BASE_DEFAULT, MAX_SERVICES, SUPERVISOR_PROGRAM};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

pub const EXIT_USAGE: i32 = 100;
pub const EXIT_FATAL: i32 = 111;

#[derive(Parser, Debug)]
#[command(name = "perpd")]
#[command(about = "Persistent process scanning daemon")]
#[command(version)]
pub struct Cli {
    /// Rescan the base directory every SECS seconds (0 scans only on demand)
    #[arg(short = 'a', long = "autoscan", value_name = "SECS", default_value_t = 0)]
    pub autoscan: u32,

    /// Supervisor program started for each activated service
    #[arg(long, value_name = "PROGRAM", default_value = SUPERVISOR_PROGRAM)]
    pub supervisor: PathBuf,

    /// Maximum number of services tracked at once
    #[arg(long, value_name = "N", default_value_t = MAX_SERVICES)]
    pub max_services: usize,

    /// Base directory holding the service definitions (absolute path)
    #[arg(value_name = "BASEDIR")]
    pub basedir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub base_dir: PathBuf,
    pub autoscan: Option<Duration>,
    pub supervisor: PathBuf,
    pub max_services: usize,
}

impl DaemonConfig {
    /// Resolve the base directory: argument, then `PERP_BASE`, then the default.
    pub fn resolve(cli: Cli, env_base: Option<OsString>) -> Result<Self, String> {
        let base_dir = cli
            .basedir
            .or_else(|| env_base.filter(|value| !value.is_empty()).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(BASE_DEFAULT));

        if !base_dir.is_absolute() {
            return Err(format!(
                "base directory not defined as absolute path: {}",
                base_dir.display()
            ));
        }
        if cli.max_services == 0 {
            return Err("maximum service count must be at least 1".to_string());
        }

        Ok(Self {
            base_dir,
            autoscan: (cli.autoscan > 0).then(|| Duration::from_secs(u64::from(cli.autoscan))),
            supervisor: cli.supervisor,
            max_services: cli.max_services,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("perpd").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn argument_wins_over_environment() {
        let config =
            DaemonConfig::resolve(cli(&["/srv/perp"]), Some(OsString::from("/etc/other"))).unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/srv/perp"));
    }

    #[test]
    fn environment_then_default() {
        let config = DaemonConfig::resolve(cli(&[]), Some(OsString::from("/var/perp"))).unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/var/perp"));

        let config = DaemonConfig::resolve(cli(&[]), Some(OsString::new())).unwrap();
        assert_eq!(config.base_dir, PathBuf::from(BASE_DEFAULT));

        let config = DaemonConfig::resolve(cli(&[]), None).unwrap();
        assert_eq!(config.base_dir, PathBuf::from(BASE_DEFAULT));
    }

    #[test]
    fn relative_base_is_a_usage_error() {
        let err = DaemonConfig::resolve(cli(&["services"]), None).unwrap_err();
        assert!(err.contains("absolute"));
    }

    #[test]
    fn autoscan_zero_disables_timer() {
        let config = DaemonConfig::resolve(cli(&["/etc/perp"]), None).unwrap();
        assert_eq!(config.autoscan, None);

        let config = DaemonConfig::resolve(cli(&["-a", "30", "/etc/perp"]), None).unwrap();
        assert_eq!(config.autoscan, Some(Duration::from_secs(30)));
    }

    #[test]
    fn defaults_match_protocol_constants() {
        let config = DaemonConfig::resolve(cli(&["/etc/perp"]), None).unwrap();
        assert_eq!(config.supervisor, PathBuf::from(SUPERVISOR_PROGRAM));
        assert_eq!(config.max_services, MAX_SERVICES);
    }

    #[test]
    fn rejects_non_numeric_autoscan() {
        assert!(Cli::try_parse_from(["perpd", "-a", "soon"]).is_err());
    }
}
