//! perpd: start one supervisor per activated service directory and keep
//! the set in step with the base directory.

use std::env;
use std::fs::OpenOptions;
use std::os::fd::AsRawFd;

use clap::Parser;
use perp_protocol::BASE_ENV;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod backoff;
mod config;
mod control;
mod engine;
mod process;
mod signals;

use config::{Cli, DaemonConfig, EXIT_FATAL, EXIT_USAGE};
use engine::Engine;
use process::ForkExec;
use signals::SignalPipe;

fn main() {
    init_logging();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    let config = match DaemonConfig::resolve(cli, env::var_os(BASE_ENV)) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Invalid configuration");
            std::process::exit(EXIT_USAGE);
        }
    };

    info!(
        base = %config.base_dir.display(),
        autoscan = ?config.autoscan,
        "perpd starting"
    );

    if let Err(err) = env::set_current_dir(&config.base_dir) {
        error!(error = %err, base = %config.base_dir.display(), "Failed to enter base directory");
        std::process::exit(EXIT_FATAL);
    }

    let signals = fatal(SignalPipe::new(), "Failed to create signal pipe");
    fatal(signals.block(), "Failed to block signals");
    fatal(redirect_stdin(), "Failed to redirect stdin");
    // SAFETY: umask has no preconditions.
    unsafe {
        libc::umask(0);
    }

    let pidlock = match control::setup_control(&config.base_dir) {
        Ok(lock) => lock,
        Err(err) => {
            error!(error = %err, "Failed to set up control directory");
            std::process::exit(EXIT_FATAL);
        }
    };

    info!(lock = %pidlock.path().display(), "Holding pid lock");

    let process = fatal(
        ForkExec::new(&config.supervisor, &config.base_dir),
        "Failed to prepare supervisor command",
    );
    fatal(signals.install(), "Failed to install signal handlers");

    let mut engine = Engine::new(
        config.base_dir.clone(),
        config.max_services,
        config.autoscan,
        process,
    );
    engine.run(&signals);
    engine.shutdown();
    info!(services = engine.services().len(), "Supervisors stopped");

    drop(pidlock);
    info!("perpd exiting normally");
}

fn init_logging() {
    let debug_enabled = env::var("PERPD_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("PERPD_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fatal<T>(result: std::io::Result<T>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            error!(error = %err, "{}", context);
            std::process::exit(EXIT_FATAL);
        }
    }
}

fn redirect_stdin() -> std::io::Result<()> {
    let null = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    // SAFETY: both descriptors are open for the duration of the call.
    if unsafe { libc::dup2(null.as_raw_fd(), libc::STDIN_FILENO) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
