//! perpctl: send a control command to one or more service supervisors.

use std::path::PathBuf;

use clap::Parser;
use perp_protocol::{CommandParseError, ControlCommand};
use perp_tools::{base, cli, logging, lookup, ServiceError};
use tracing::debug;

const PROGRAM: &str = "perpctl";
const MAX_EXIT: usize = 99;

#[derive(Parser)]
#[command(name = "perpctl")]
#[command(about = "Control perp services (first letter of CMD selects the command)")]
#[command(version)]
struct Cli {
    /// Base directory of service definitions (default: $PERP_BASE, else current directory)
    #[arg(short = 'b', value_name = "DIR")]
    base: Option<PathBuf>,

    /// Address the log subservice instead of the main one
    #[arg(short = 'L')]
    log: bool,

    /// Control command: d u o p c a h i k q t w 1 2, or meta D U X
    #[arg(value_name = "CMD")]
    command: String,

    /// Service directories
    #[arg(value_name = "SV", required = true)]
    services: Vec<String>,
}

fn main() {
    logging::init();
    let cli: Cli = cli::parse();

    let command = match ControlCommand::from_word(&cli.command) {
        Ok(command) => command,
        Err(err) => cli::usage_error(PROGRAM, err),
    };
    if cli.log && command.is_meta() {
        cli::usage_error(
            PROGRAM,
            CommandParseError::MetaForLog(cli.command.clone()),
        );
    }
    debug!(%command, log = cli.log, "Sending command");

    let root = cli::enter_base(PROGRAM, &base::resolve(cli.base, base::CURRENT_DIR));

    let mut failures = 0usize;
    for name in &cli.services {
        match control(&root, name, command, cli.log) {
            Ok(()) => eprintln!("{name}: ok"),
            Err(err) => {
                eprintln!("{name}: {err}");
                failures += 1;
            }
        }
    }
    std::process::exit(failures.min(MAX_EXIT) as i32);
}

fn control(
    root: &std::path::Path,
    name: &str,
    command: ControlCommand,
    log: bool,
) -> Result<(), ServiceError> {
    let service = lookup(root, name)?;
    service.probe()?.send_command(command, log)
}
