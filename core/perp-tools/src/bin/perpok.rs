//! perpok: exit 0 if a service is healthy, 1 if not.

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use perp_protocol::Tain;
use perp_tools::health::check_service;
use perp_tools::{base, cli, logging, ServiceError};

const PROGRAM: &str = "perpok";

#[derive(Parser)]
#[command(name = "perpok")]
#[command(about = "Check that a perp service is running")]
#[command(version)]
struct Cli {
    /// Base directory of service definitions (default: $PERP_BASE, else current directory)
    #[arg(short = 'b', value_name = "DIR")]
    base: Option<PathBuf>,

    /// Also require the main service to have been up at least SECS seconds
    #[arg(short = 'u', value_name = "SECS", default_value_t = 0)]
    min_uptime: u32,

    /// Report the verdict on stderr
    #[arg(short = 'v', action = ArgAction::Count)]
    verbose: u8,

    /// Service directory
    #[arg(value_name = "SV")]
    service: String,
}

fn main() {
    logging::init();
    let cli: Cli = cli::parse();
    let root = cli::enter_base(PROGRAM, &base::resolve(cli.base, base::CURRENT_DIR));

    let health = match check_service(&root, &cli.service, cli.min_uptime, &Tain::now()) {
        Ok(health) => health,
        Err(err @ ServiceError::NotDirectory) => cli::usage_error(
            PROGRAM,
            format_args!("argument not a directory: {}: {}", cli.service, err),
        ),
        Err(err) => cli::fatal(
            PROGRAM,
            format_args!("fail stat() on service directory {}: {}", cli.service, err),
        ),
    };

    if cli.verbose > 0 {
        let verdict = if health.passed() { "ok" } else { "fail" };
        eprintln!("{PROGRAM}: {verdict}: {}: {}", cli.service, health.message());
    }
    std::process::exit(if health.passed() { 0 } else { 1 });
}
