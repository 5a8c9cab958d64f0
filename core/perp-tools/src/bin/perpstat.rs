//! perpstat: detailed status report for perp services.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use perp_protocol::Tain;
use perp_tools::report::ServiceReport;
use perp_tools::{base, cli, logging};
use tracing::warn;

const PROGRAM: &str = "perpstat";

#[derive(Parser)]
#[command(name = "perpstat")]
#[command(about = "Report the status of perp services")]
#[command(version)]
struct Cli {
    /// Base directory of service definitions (default: $PERP_BASE, else current directory)
    #[arg(short = 'b', value_name = "DIR")]
    base: Option<PathBuf>,

    /// One JSON object per service instead of the text report
    #[arg(long)]
    json: bool,

    /// Service directories
    #[arg(value_name = "SV", required = true)]
    services: Vec<String>,
}

fn main() {
    logging::init();
    let cli: Cli = cli::parse();
    let root = cli::enter_base(PROGRAM, &base::resolve(cli.base, base::CURRENT_DIR));

    let now = Tain::now();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for name in &cli.services {
        let report = ServiceReport::collect(&root, name, &now);
        let written = if cli.json {
            match report.to_json() {
                Ok(line) => writeln!(out, "{line}"),
                Err(err) => {
                    warn!(service = %name, error = %err, "Failed to encode report");
                    continue;
                }
            }
        } else {
            write!(out, "{}", report.to_text())
        };
        if written.is_err() {
            return;
        }
    }
    let _ = out.flush();
}
