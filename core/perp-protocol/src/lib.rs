//! Wire formats for the perp supervision system.
//!
//! This crate is shared by the scanning daemon and its clients so the binary
//! layouts never drift between them. Everything here is a pure codec over
//! byte slices: no file descriptors, no paths opened, no clocks read except
//! through [`Tain::now`].
//!
//! ## Layouts
//!
//! - [`ControlPacket`]: `[protocol, type, N, payload x N]`, 3..=258 bytes
//! - [`StatusRecord`]: fixed 54-byte status published by each supervisor
//! - [`ServiceIdentity`]: `_` + 22-character encoding of `(dev, ino)`

mod command;
mod devino;
mod packet;
mod status;
mod tain;

pub use command::{CommandParseError, ControlCommand};
pub use devino::{ServiceIdentity, IDENTITY_LEN};
pub use packet::{
    ControlPacket, PACKET_HEADER_LEN, PACKET_MAX_LEN, PACKET_MAX_PAYLOAD, PACKET_PROTOCOL,
    PACKET_TYPE_COMMAND, PACKET_TYPE_ERROR,
};
pub use status::{StatusRecord, SubjectFlags, SubjectStatus, SupervisorFlags, STATUS_LEN};
pub use tain::{uptime, Tain, TAIN_PACK_LEN};

use std::path::{Path, PathBuf};

/// Default base directory when neither an argument nor `PERP_BASE` is given.
pub const BASE_DEFAULT: &str = "/etc/perp";
/// Environment variable naming the base directory.
pub const BASE_ENV: &str = "PERP_BASE";
/// Environment variable carrying the lister's colour capabilities.
pub const COLORS_ENV: &str = "PERPLS_COLORS";
/// Built-in colour capabilities used when colour is forced on.
pub const COLORS_DEFAULT: &str =
    "df=00:na=00:an=01:ar=01;33:ap=01;33:ad=01;34:wu=01;33:wd=01;33:er=01;31";

/// Maximum number of services tracked by one daemon instance.
pub const MAX_SERVICES: usize = 400;
/// Per-service supervisor program executed by the daemon.
pub const SUPERVISOR_PROGRAM: &str = "perpetrate";

/// Root control directory, relative to the base directory.
pub const CONTROL_DIR: &str = ".control";
/// Daemon control directory, relative to [`CONTROL_DIR`].
pub const DAEMON_CONTROL_DIR: &str = ".perpd";
/// Pid lock file name inside the daemon and service control directories.
pub const PIDLOCK: &str = "pid.lock";
/// Inbound command FIFO; also the liveness probe target.
pub const CTL_IN: &str = "ctl.0";
/// Outbound reply FIFO.
pub const CTL_OUT: &str = "ctl.1";
/// Client serialization lock.
pub const CTL_LOCK: &str = "ctl.lock";
/// Published binary status.
pub const STATUS_BIN: &str = "status.bin";
/// Scratch name for atomic replacement of [`STATUS_BIN`].
pub const STATUS_TMP: &str = "status.tmp";

/// Path of the daemon pid lock, relative to the base directory.
pub fn daemon_pidlock_path(base: &Path) -> PathBuf {
    base.join(CONTROL_DIR).join(DAEMON_CONTROL_DIR).join(PIDLOCK)
}

/// Framing and format errors. None of these are ever retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("payload of {0} bytes exceeds the 255 byte packet limit")]
    PayloadTooLarge(usize),

    #[error("short packet: {0} bytes read, header needs 3")]
    ShortPacket(usize),

    #[error("packet size mismatch: header declares {declared} payload bytes but {read} bytes were read")]
    SizeMismatch { declared: usize, read: usize },

    #[error("protocol id {0} not supported")]
    ProtocolMismatch(u8),

    #[error("unexpected reply type {kind:#04x} with {len} byte payload")]
    UnexpectedReply { kind: u8, len: usize },

    #[error("bad status format: {0} bytes, expected 54")]
    StatusLength(usize),

    #[error("invalid identity string {0:?}")]
    InvalidIdentity(String),
}
