//! Per-service failure classification shared by all clients.

use perp_protocol::{CommandParseError, ProtocolError};
use std::io;

/// Everything that can go wrong between a service argument and its supervisor.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failure stat() on service directory: {source}")]
    Missing {
        #[source]
        source: io::Error,
    },

    #[error("not a directory")]
    NotDirectory,

    #[error("service not activated")]
    NotActivated,

    #[error("supervisor not running")]
    NotRunning { errno: i32 },

    #[error("failure checking supervisor: {source}")]
    Probe {
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Command(#[from] CommandParseError),

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("server reply to command packet with error: {}", server_errno(.0))]
    Server(u32),
}

impl ServiceError {
    pub(crate) fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { context, source }
    }

    /// errno-style code for the `[...]` column of listings.
    pub fn errno(&self) -> i32 {
        match self {
            Self::Missing { source } => source.raw_os_error().unwrap_or(libc::ENOENT),
            Self::NotDirectory => libc::ENOTDIR,
            Self::NotActivated => 0,
            Self::NotRunning { errno } => *errno,
            Self::Probe { source } | Self::Io { source, .. } => {
                source.raw_os_error().unwrap_or(libc::EIO)
            }
            Self::Protocol(_) => libc::EPROTO,
            Self::Command(_) => libc::EINVAL,
            Self::Server(code) => *code as i32,
        }
    }
}

fn server_errno(code: &u32) -> String {
    errno_name(*code as i32)
}

/// Symbolic name for an errno value, e.g. `ENXIO`.
pub fn errno_name(code: i32) -> String {
    let name = match code {
        0 => "EOK",
        libc::EPERM => "EPERM",
        libc::ENOENT => "ENOENT",
        libc::ESRCH => "ESRCH",
        libc::EINTR => "EINTR",
        libc::EIO => "EIO",
        libc::ENXIO => "ENXIO",
        libc::EBADF => "EBADF",
        libc::EAGAIN => "EAGAIN",
        libc::ENOMEM => "ENOMEM",
        libc::EACCES => "EACCES",
        libc::EBUSY => "EBUSY",
        libc::EEXIST => "EEXIST",
        libc::ENOTDIR => "ENOTDIR",
        libc::EISDIR => "EISDIR",
        libc::EINVAL => "EINVAL",
        libc::ENFILE => "ENFILE",
        libc::EMFILE => "EMFILE",
        libc::ENOSPC => "ENOSPC",
        libc::EPIPE => "EPIPE",
        libc::ENOSYS => "ENOSYS",
        libc::ELOOP => "ELOOP",
        libc::ENAMETOOLONG => "ENAMETOOLONG",
        libc::EPROTO => "EPROTO",
        libc::ETIMEDOUT => "ETIMEDOUT",
        _ => return format!("errno {code}"),
    };
    name.to_string()
}
