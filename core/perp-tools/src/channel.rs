//! Request/reply exchange with a running supervisor over its FIFO pair.
//!
//! A client serializes against other clients by holding an exclusive lock on
//! `ctl.lock` for the whole exchange, writes one packet to `ctl.0` and reads
//! one reply from `ctl.1`. The supervisor keeps both FIFOs open, so a
//! non-blocking write-open of `ctl.0` doubles as the liveness probe.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use fs2::FileExt;
use perp_protocol::{ControlCommand, ControlPacket, CTL_IN, CTL_LOCK, CTL_OUT, PACKET_MAX_LEN};
use tracing::debug;

use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Ready,
    /// No supervisor holds `ctl.0` open (`ENXIO`), or it was never created (`ENOENT`).
    NotRunning { errno: i32 },
}

#[derive(Debug, Clone)]
pub struct ControlChannel {
    dir: PathBuf,
}

impl ControlChannel {
    pub fn new(control_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: control_dir.into(),
        }
    }

    /// Probe for a supervisor without taking the lock.
    pub fn is_ready(&self) -> io::Result<Liveness> {
        let opened = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(self.dir.join(CTL_IN));
        match opened {
            Ok(_) => Ok(Liveness::Ready),
            Err(err) => match err.raw_os_error() {
                Some(errno @ (libc::ENXIO | libc::ENOENT)) => Ok(Liveness::NotRunning { errno }),
                _ => Err(err),
            },
        }
    }

    /// One locked request/reply round trip.
    pub fn exchange(&self, packet: &ControlPacket) -> Result<ControlPacket, ServiceError> {
        let lock = OpenOptions::new()
            .write(true)
            .open(self.dir.join(CTL_LOCK))
            .map_err(ServiceError::io("failure open() on ctl.lock"))?;
        lock.lock_exclusive()
            .map_err(ServiceError::io("failure locking ctl.lock"))?;

        let result = self.exchange_locked(packet);
        if let Err(err) = FileExt::unlock(&lock) {
            debug!(error = %err, "Failed to unlock ctl.lock");
        }
        result
    }

    fn exchange_locked(&self, packet: &ControlPacket) -> Result<ControlPacket, ServiceError> {
        let mut inbound = OpenOptions::new()
            .write(true)
            .open(self.dir.join(CTL_IN))
            .map_err(ServiceError::io("failure open() on ctl.0"))?;
        let mut outbound = File::open(self.dir.join(CTL_OUT))
            .map_err(ServiceError::io("failure open() on ctl.1"))?;

        inbound
            .write_all(&packet.encode())
            .map_err(ServiceError::io("failure writing command packet"))?;

        let mut buf = [0u8; PACKET_MAX_LEN];
        let n = loop {
            match outbound.read(&mut buf) {
                Ok(n) => break n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(ServiceError::io("failure reading command reply")(err)),
            }
        };

        let reply = ControlPacket::decode(&buf[..n])?;
        debug!(
            dir = %self.dir.display(),
            kind = reply.kind(),
            len = reply.payload().len(),
            "Received reply"
        );
        Ok(reply)
    }

    /// Send a control command and interpret the `'E'` reply.
    pub fn send_command(&self, command: ControlCommand, log: bool) -> Result<(), ServiceError> {
        let code = command.wire_code(log)?;
        let reply = self.exchange(&ControlPacket::command(code))?;
        match reply.reply_code()? {
            0 => Ok(()),
            code => Err(ServiceError::Server(code)),
        }
    }
}
