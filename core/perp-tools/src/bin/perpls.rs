//! perpls: one-line panels for perp services.

use std::env;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::Parser;
use perp_protocol::{Tain, COLORS_ENV};
use perp_tools::panel::{self, ColorChoice, PanelEntry, SortOrder};
use perp_tools::{base, cli, logging};

const PROGRAM: &str = "perpls";

#[derive(Parser)]
#[command(name = "perpls")]
#[command(about = "List perp services and their state")]
#[command(version)]
struct Cli {
    /// Base directory of service definitions (default: $PERP_BASE, else current directory)
    #[arg(short = 'b', value_name = "DIR", conflicts_with = "current")]
    base: Option<PathBuf>,

    /// Use the current directory as base directory
    #[arg(short = 'c')]
    current: bool,

    /// Force colour output
    #[arg(short = 'G', overrides_with = "no_color")]
    color: bool,

    /// Disable colour output
    #[arg(short = 'g', overrides_with = "color")]
    no_color: bool,

    /// Reverse the listing order
    #[arg(short = 'r')]
    reverse: bool,

    /// Sort by main uptime, youngest first
    #[arg(short = 't')]
    by_uptime: bool,

    /// Service directories (default: every directory in the base)
    #[arg(value_name = "SV")]
    services: Vec<String>,
}

fn main() {
    logging::init();
    let cli: Cli = cli::parse();

    let choice = if cli.color {
        ColorChoice::Always
    } else if cli.no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };
    let colors = panel::color_table(
        choice,
        env::var(COLORS_ENV).ok().as_deref(),
        io::stdout().is_terminal(),
    );

    let flag = if cli.current {
        Some(PathBuf::from(base::CURRENT_DIR))
    } else {
        cli.base
    };
    let base_dir = base::resolve(flag, base::CURRENT_DIR);
    let root = cli::enter_base(PROGRAM, &base_dir);

    let mut order = cli.by_uptime.then_some(SortOrder::Uptime);
    let names = if cli.services.is_empty() {
        order.get_or_insert(SortOrder::Name);
        match panel::list_services(&root) {
            Ok(names) => names,
            Err(err) => cli::fatal(
                PROGRAM,
                format_args!("failure reading base directory {}: {}", base_dir.display(), err),
            ),
        }
    } else {
        cli.services
    };

    let now = Tain::now();
    let mut entries: Vec<PanelEntry> = names
        .iter()
        .map(|name| PanelEntry::probe(&root, name, &now))
        .collect();
    let width = panel::name_width(&entries);
    panel::sort_entries(&mut entries, order, cli.reverse);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for entry in &entries {
        if writeln!(out, "{}", entry.render(width, colors.as_ref())).is_err() {
            return;
        }
    }
    let _ = out.flush();
}
