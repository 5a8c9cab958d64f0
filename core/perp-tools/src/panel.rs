//! One-line service panels for `perpls`.
//!
//! A panel is eleven characters, `[A MMM LLL]`:
//!
//! - `A`: `+` activated, `-` not activated, `E` error
//! - `MMM` / `LLL`: main and log subservice, `+++` up or `...` down, with the
//!   first slot `!` when the wanted state differs, the second `o` for a
//!   once-only service and the third `p` paused or `r` resetting.
//!
//! A subservice up for less than a second and not resetting is displayed as
//! "want up" with no pid. Supervisors publish their status after the child
//! starts, so such a child is usually still coming up, or already gone.

use std::fmt::Write as _;
use std::io;
use std::path::Path;

use fs_err as fs;
use perp_protocol::{uptime, StatusRecord, SubjectFlags, SubjectStatus, SupervisorFlags, Tain};
use tracing::warn;

use crate::error::{errno_name, ServiceError};
use crate::service::lookup;
use crate::status::read_status;

pub const PANEL_BLANK: &str = "[- --- ---]";
pub const PANEL_LEN: usize = 11;
/// Longest name column before names are truncated.
pub const NAME_WIDTH_MAX: usize = 80;

const MAIN_SLOT: usize = 3;
const LOG_SLOT: usize = 7;

/// Colour capability classes, in `PERPLS_COLORS` key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Default,
    NotActive,
    ActiveNormal,
    ActiveResetting,
    ActivePaused,
    ActiveDown,
    WantUp,
    WantDown,
    Error,
}

impl Capability {
    pub const ALL: [Capability; 9] = [
        Self::Default,
        Self::NotActive,
        Self::ActiveNormal,
        Self::ActiveResetting,
        Self::ActivePaused,
        Self::ActiveDown,
        Self::WantUp,
        Self::WantDown,
        Self::Error,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Default => "df",
            Self::NotActive => "na",
            Self::ActiveNormal => "an",
            Self::ActiveResetting => "ar",
            Self::ActivePaused => "ap",
            Self::ActiveDown => "ad",
            Self::WantUp => "wu",
            Self::WantDown => "wd",
            Self::Error => "er",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// SGR attributes per capability, parsed from a `key=attr:key=attr` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorTable {
    attrs: Vec<String>,
}

impl ColorTable {
    /// Undefined capabilities fall back to `df`, and `df` itself to `0`.
    pub fn parse(db: &str) -> Self {
        let default = lookup_capability(db, Capability::Default.key()).unwrap_or("0");
        let attrs = Capability::ALL
            .iter()
            .map(|cap| {
                lookup_capability(db, cap.key())
                    .unwrap_or(default)
                    .to_string()
            })
            .collect();
        Self { attrs }
    }

    pub fn attr(&self, cap: Capability) -> &str {
        &self.attrs[cap.index()]
    }
}

/// First `key=` entry wins; entries without `=` are skipped.
fn lookup_capability<'a>(db: &'a str, key: &str) -> Option<&'a str> {
    db.split(':')
        .filter_map(|entry| entry.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, attr)| attr)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorChoice {
    /// Colour only with `PERPLS_COLORS` set and stdout on a terminal.
    Auto,
    /// Colour from `PERPLS_COLORS`, or the built-in capabilities.
    Always,
    Never,
}

pub fn color_table(choice: ColorChoice, env_value: Option<&str>, is_tty: bool) -> Option<ColorTable> {
    let env_value = env_value.filter(|value| !value.is_empty());
    match choice {
        ColorChoice::Never => None,
        ColorChoice::Always => Some(ColorTable::parse(
            env_value.unwrap_or(perp_protocol::COLORS_DEFAULT),
        )),
        ColorChoice::Auto => env_value.filter(|_| is_tty).map(ColorTable::parse),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SubjectView {
    pid: u32,
    uptime: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PanelError {
    message: &'static str,
    errno: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelEntry {
    name: String,
    panel: [u8; PANEL_LEN],
    main: SubjectView,
    log: SubjectView,
    error: Option<PanelError>,
}

impl PanelEntry {
    fn blank(name: &str) -> Self {
        let mut panel = [0u8; PANEL_LEN];
        panel.copy_from_slice(PANEL_BLANK.as_bytes());
        Self {
            name: name.to_string(),
            panel,
            main: SubjectView::default(),
            log: SubjectView::default(),
            error: None,
        }
    }

    /// Look the service up under `root`, probe it and read its status.
    pub fn probe(root: &Path, name: &str, now: &Tain) -> Self {
        let mut entry = Self::blank(name);
        let service = match lookup(root, name) {
            Ok(service) => service,
            Err(ServiceError::NotActivated) => return entry,
            Err(err @ ServiceError::NotDirectory) => {
                entry.fail("not a directory", &err);
                return entry;
            }
            Err(err) => {
                entry.fail("failure stat() on service directory", &err);
                return entry;
            }
        };

        entry.panel[1] = b'+';
        if let Err(err) = service.probe() {
            let message = match err {
                ServiceError::NotRunning { .. } => "supervisor not running",
                _ => "failure checking supervisor",
            };
            entry.fail(message, &err);
            return entry;
        }
        match read_status(&service.control_dir) {
            Ok(status) => entry.apply_status(&status, now),
            Err(err) => entry.fail("failure reading status", &err),
        }
        entry
    }

    /// Panel for an activated service with a decoded status record.
    pub fn from_status(name: &str, status: &StatusRecord, now: &Tain) -> Self {
        let mut entry = Self::blank(name);
        entry.panel[1] = b'+';
        entry.apply_status(status, now);
        entry
    }

    fn fail(&mut self, message: &'static str, err: &ServiceError) {
        self.panel[1] = b'E';
        self.error = Some(PanelError {
            message,
            errno: err.errno(),
        });
    }

    fn apply_status(&mut self, status: &StatusRecord, now: &Tain) {
        self.main = fill_slots(&mut self.panel, MAIN_SLOT, &status.main, now);
        if status.supervisor.flags.contains(SupervisorFlags::HAS_LOG) {
            if let Some(log) = &status.log {
                self.log = fill_slots(&mut self.panel, LOG_SLOT, log, now);
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn panel(&self) -> &str {
        std::str::from_utf8(&self.panel).unwrap_or(PANEL_BLANK)
    }

    pub fn main_uptime(&self) -> u32 {
        self.main.uptime
    }

    pub fn capability(&self) -> Capability {
        let p = &self.panel;
        match p[1] {
            b'-' => return Capability::NotActive,
            b'+' => {}
            _ => return Capability::Error,
        }
        for slot in [MAIN_SLOT, LOG_SLOT] {
            if p[slot] == b'!' {
                return if p[slot + 1] == b'.' {
                    Capability::WantUp
                } else {
                    Capability::WantDown
                };
            }
        }
        if p[MAIN_SLOT + 1] == b'.' {
            return Capability::ActiveDown;
        }
        match p[MAIN_SLOT + 2] {
            b'p' => Capability::ActivePaused,
            b'r' => Capability::ActiveResetting,
            _ => Capability::ActiveNormal,
        }
    }

    /// The full output line, without the trailing newline.
    pub fn render(&self, width: usize, colors: Option<&ColorTable>) -> String {
        let mut line = String::with_capacity(PANEL_LEN + width + 48);
        line.push_str(self.panel());
        line.push_str("  ");

        let name = pad_name(&self.name, width);
        match colors {
            Some(table) => {
                let attr = table.attr(self.capability());
                let _ = write!(line, "\x1b[00m\x1b[{attr}m{name}\x1b[00m");
            }
            None => line.push_str(&name),
        }

        match self.panel[1] {
            b'E' => {
                if let Some(error) = &self.error {
                    let _ = write!(
                        line,
                        "  error: {} [{}]",
                        error.message,
                        errno_name(error.errno)
                    );
                }
            }
            b'+' => {
                let main_up = is_running(self.panel[MAIN_SLOT + 1]);
                let log_up = is_running(self.panel[LOG_SLOT + 1]);
                let _ = write!(
                    line,
                    "  uptime: {}s/{}s  pids: {}/{}",
                    shown(main_up, self.main.uptime),
                    shown(log_up, self.log.uptime),
                    shown(main_up, self.main.pid),
                    shown(log_up, self.log.pid),
                );
            }
            _ => {}
        }
        line
    }
}

fn fill_slots(
    panel: &mut [u8; PANEL_LEN],
    at: usize,
    subject: &SubjectStatus<SubjectFlags>,
    now: &Tain,
) -> SubjectView {
    let flags = subject.flags;
    let mut view = SubjectView {
        pid: subject.pid,
        uptime: uptime(now, &subject.when),
    };

    let base = if flags.contains(SubjectFlags::UP) { b'+' } else { b'.' };
    panel[at..at + 3].fill(base);
    if flags.contains(SubjectFlags::WANT) {
        panel[at] = b'!';
    }
    if flags.contains(SubjectFlags::UP) {
        if flags.contains(SubjectFlags::ONCE) {
            panel[at + 1] = b'o';
        }
        if flags.contains(SubjectFlags::PAUSE) {
            panel[at + 2] = b'p';
        }
        if flags.contains(SubjectFlags::RESET) {
            panel[at + 2] = b'r';
        }
        if view.uptime < 1 && !flags.contains(SubjectFlags::RESET) {
            view.pid = 0;
            panel[at] = b'!';
            panel[at + 1] = b'.';
            panel[at + 2] = b'.';
        }
    }
    view
}

fn is_running(slot: u8) -> bool {
    slot == b'+' || slot == b'o'
}

fn shown(visible: bool, value: u32) -> String {
    if visible {
        value.to_string()
    } else {
        "-".to_string()
    }
}

fn pad_name(name: &str, width: usize) -> String {
    let truncated: String = name.chars().take(width).collect();
    format!("{truncated:<width$}")
}

/// Width of the name column: the longest name, capped at [`NAME_WIDTH_MAX`].
pub fn name_width(entries: &[PanelEntry]) -> usize {
    entries
        .iter()
        .map(|entry| entry.name.chars().count())
        .max()
        .unwrap_or(0)
        .min(NAME_WIDTH_MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Name,
    /// Youngest main subservice first; ties by name.
    Uptime,
}

pub fn sort_entries(entries: &mut [PanelEntry], order: Option<SortOrder>, reverse: bool) {
    match order {
        Some(SortOrder::Name) => entries.sort_by(|a, b| a.name().cmp(b.name())),
        Some(SortOrder::Uptime) => entries.sort_by(|a, b| {
            a.main_uptime()
                .cmp(&b.main_uptime())
                .then_with(|| a.name().cmp(b.name()))
        }),
        None => {}
    }
    if reverse {
        entries.reverse();
    }
}

/// Every non-dot directory directly under `root`, in directory order.
pub fn list_services(root: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            warn!(name = ?name, "Skipping service directory with a non-UTF-8 name");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if std::fs::metadata(entry.path()).map(|m| m.is_dir()).unwrap_or(false) {
            names.push(name.to_string());
        }
    }
    Ok(names)
}
