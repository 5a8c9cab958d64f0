//! Exit-code conventions shared by the client binaries.

use clap::Parser;
use std::fmt::Display;
use std::path::{Path, PathBuf};

pub const EXIT_USAGE: i32 = 100;
pub const EXIT_FATAL: i32 = 111;

/// Parse arguments; usage errors exit 100, `--help`/`--version` exit 0.
pub fn parse<T: Parser>() -> T {
    match T::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    }
}

pub fn fatal(program: &str, message: impl Display) -> ! {
    eprintln!("{program}: fatal: {message}");
    std::process::exit(EXIT_FATAL);
}

pub fn usage_error(program: &str, message: impl Display) -> ! {
    eprintln!("{program}: usage error: {message}");
    std::process::exit(EXIT_USAGE);
}

/// Enter the base directory or exit 111.
pub fn enter_base(program: &str, base: &Path) -> PathBuf {
    match crate::base::enter(base) {
        Ok(root) => root,
        Err(err) => fatal(
            program,
            format_args!("unable to chdir() to {}: {}", base.display(), err),
        ),
    }
}
