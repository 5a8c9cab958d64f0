//! perphup: trigger a rescan in a running perpd.

use std::path::PathBuf;

use clap::Parser;
use perp_protocol::BASE_DEFAULT;
use perp_tools::{base, cli, hup, logging};

const PROGRAM: &str = "perphup";

#[derive(Parser)]
#[command(name = "perphup")]
#[command(about = "Ask perpd to rescan its base directory")]
#[command(version)]
struct Cli {
    /// Quiet: no confirmation on success
    #[arg(short = 'q')]
    quiet: bool,

    /// Base directory (default: $PERP_BASE, else /etc/perp)
    #[arg(value_name = "BASEDIR")]
    basedir: Option<PathBuf>,
}

fn main() {
    logging::init();
    let cli: Cli = cli::parse();
    let base_dir = base::resolve(cli.basedir, BASE_DEFAULT);
    let root = cli::enter_base(PROGRAM, &base_dir);

    let pid = match hup::daemon_pid(&root) {
        Ok(Some(pid)) => pid,
        Ok(None) => cli::fatal(
            PROGRAM,
            format_args!("perpd not running on {}: no lock held", base_dir.display()),
        ),
        Err(err) => cli::fatal(
            PROGRAM,
            format_args!("failure checking perpd lock in {}: {}", base_dir.display(), err),
        ),
    };

    if let Err(err) = hup::send_hangup(pid) {
        cli::fatal(PROGRAM, format_args!("failure kill() on SIGHUP to perpd: {err}"));
    }
    if !cli.quiet {
        eprintln!("{PROGRAM}: rescan triggered on {}", base_dir.display());
    }
}
