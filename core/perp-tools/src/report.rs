//! Multi-line status reports for `perpstat`, as text or JSON lines.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use perp_protocol::{uptime, StatusRecord, SubjectFlags, SubjectStatus, SupervisorFlags, Tain};
use serde::Serialize;

use crate::error::{errno_name, ServiceError};
use crate::service::lookup;
use crate::status::read_status;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectState {
    Down,
    /// Up for under a second and not resetting; shown as "down, want up".
    Starting,
    Up,
    Resetting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectReport {
    pub state: SubjectState,
    pub pid: u32,
    pub uptime_secs: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    pub want: bool,
    pub paused: bool,
    pub once: bool,
}

impl SubjectReport {
    fn new(subject: &SubjectStatus<SubjectFlags>, now: &Tain) -> Self {
        let flags = subject.flags;
        let up = uptime(now, &subject.when);
        let reset = flags.contains(SubjectFlags::RESET);
        let state = if subject.pid == 0 {
            SubjectState::Down
        } else if up < 1 && !reset {
            SubjectState::Starting
        } else if reset {
            SubjectState::Resetting
        } else {
            SubjectState::Up
        };

        Self {
            state,
            pid: subject.pid,
            uptime_secs: up,
            since: wall_clock(&subject.when),
            want: flags.contains(SubjectFlags::WANT),
            paused: flags.contains(SubjectFlags::PAUSE),
            once: flags.contains(SubjectFlags::ONCE),
        }
    }

    fn describe(&self) -> String {
        let mut out = match self.state {
            SubjectState::Down => {
                let mut out = format!(" down {} seconds", self.uptime_secs);
                if self.want {
                    out.push_str(", want up!");
                }
                out
            }
            SubjectState::Starting => " down, want up!".to_string(),
            SubjectState::Up | SubjectState::Resetting => {
                let verb = if self.state == SubjectState::Resetting {
                    "resetting"
                } else {
                    "up"
                };
                let mut out = format!(" {verb} {} seconds [pid {}]", self.uptime_secs, self.pid);
                if self.want {
                    out.push_str(", want down!");
                }
                if self.paused {
                    out.push_str(", paused");
                }
                out
            }
        };
        if self.once {
            out.push_str(", flagged once");
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorReport {
    pub pid: u32,
    pub uptime_secs: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    pub exiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub supervisor: SupervisorReport,
    pub main: SubjectReport,
    /// `None` when the service has no log subservice.
    pub log: Option<SubjectReport>,
}

impl StatusReport {
    pub fn new(status: &StatusRecord, now: &Tain) -> Self {
        let supervisor = SupervisorReport {
            pid: status.supervisor.pid,
            uptime_secs: uptime(now, &status.supervisor.when),
            since: wall_clock(&status.supervisor.when),
            exiting: status.supervisor.flags.contains(SupervisorFlags::EXITING),
        };
        let log = if status.has_log() {
            status.log.as_ref().map(|log| SubjectReport::new(log, now))
        } else {
            None
        };
        Self {
            supervisor,
            main: SubjectReport::new(&status.main, now),
            log,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceReport {
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub status: Option<StatusReport>,
}

impl ServiceReport {
    /// Collect the report for one service argument under `root`.
    pub fn collect(root: &Path, name: &str, now: &Tain) -> Self {
        let outcome = lookup(root, name).and_then(|service| {
            service.probe()?;
            read_status(&service.control_dir)
        });
        match outcome {
            Ok(status) => Self::from_status(name, &status, now),
            Err(err) => Self {
                service: name.to_string(),
                error: Some(describe_error(&err)),
                status: None,
            },
        }
    }

    pub fn from_status(name: &str, status: &StatusRecord, now: &Tain) -> Self {
        Self {
            service: name.to_string(),
            error: None,
            status: Some(StatusReport::new(status, now)),
        }
    }

    pub fn to_text(&self) -> String {
        let mut out = format!("{}:", self.service);
        if let Some(error) = &self.error {
            out.push(' ');
            out.push_str(error);
            out.push('\n');
            return out;
        }
        let Some(status) = &self.status else {
            out.push('\n');
            return out;
        };

        out.push_str(&format!(
            "\n  super: up {} seconds [pid {}]",
            status.supervisor.uptime_secs, status.supervisor.pid
        ));
        out.push_str("\n   main:");
        out.push_str(&status.main.describe());
        out.push_str("\n    log:");
        match &status.log {
            Some(log) => out.push_str(&log.describe()),
            None => out.push_str(" no log"),
        }
        out.push('\n');
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn describe_error(err: &ServiceError) -> String {
    match err {
        ServiceError::Missing { .. } => "directory not found".to_string(),
        ServiceError::NotDirectory => "not a directory".to_string(),
        ServiceError::NotActivated => "service not activated".to_string(),
        ServiceError::NotRunning { .. } => "supervisor not running".to_string(),
        ServiceError::Probe { .. } => format!("supervisor not ready: {}", errno_name(err.errno())),
        ServiceError::Protocol(_) => "oops, bad status format!".to_string(),
        _ => format!("error reading status: {}", errno_name(err.errno())),
    }
}

fn wall_clock(when: &Tain) -> Option<String> {
    let secs = i64::try_from(when.unix_secs()?).ok()?;
    let at: DateTime<Utc> = DateTime::from_timestamp(secs, when.nanos())?;
    Some(at.to_rfc3339_opts(SecondsFormat::Secs, true))
}
