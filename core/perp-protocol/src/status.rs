//! Fixed 54-byte status record written by each supervisor.
//!
//! ```text
//! offset  len  field
//!      0    4  supervisor pid (u32 LE)
//!      4   12  supervisor timestamp (TAI64N)
//!     16    1  supervisor flags
//!     17    1  reserved
//!     18   18  main subservice block (pid, timestamp, flags, reserved)
//!     36   18  log subservice block (valid only with HAS_LOG)
//! ```

use bitflags::bitflags;

use crate::tain::{Tain, TAIN_PACK_LEN};
use crate::ProtocolError;

pub const STATUS_LEN: usize = 54;

const BLOCK_LEN: usize = 18;
const SUPERVISOR_OFFSET: usize = 0;
const MAIN_OFFSET: usize = 18;
const LOG_OFFSET: usize = 36;

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct SupervisorFlags: u8 {
        const UP = 0x01;
        const HAS_LOG = 0x02;
        const EXITING = 0x80;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct SubjectFlags: u8 {
        const UP = 0x01;
        const RESET = 0x02;
        const WANT = 0x04;
        const PAUSE = 0x08;
        const ONCE = 0x40;
    }
}

/// One block of the status record: a process, when it last changed, flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubjectStatus<F> {
    pub pid: u32,
    pub when: Tain,
    pub flags: F,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusRecord {
    pub supervisor: SubjectStatus<SupervisorFlags>,
    pub main: SubjectStatus<SubjectFlags>,
    /// Present only when the supervisor reports a log subservice.
    pub log: Option<SubjectStatus<SubjectFlags>>,
}

impl StatusRecord {
    pub fn has_log(&self) -> bool {
        self.supervisor.flags.contains(SupervisorFlags::HAS_LOG)
    }

    /// Encode into the fixed layout. A missing log block is written as zeros.
    pub fn encode(&self) -> [u8; STATUS_LEN] {
        let mut out = [0u8; STATUS_LEN];
        write_block(
            &mut out[SUPERVISOR_OFFSET..SUPERVISOR_OFFSET + BLOCK_LEN],
            self.supervisor.pid,
            &self.supervisor.when,
            self.supervisor.flags.bits(),
        );
        write_block(
            &mut out[MAIN_OFFSET..MAIN_OFFSET + BLOCK_LEN],
            self.main.pid,
            &self.main.when,
            self.main.flags.bits(),
        );
        if let Some(log) = &self.log {
            write_block(
                &mut out[LOG_OFFSET..LOG_OFFSET + BLOCK_LEN],
                log.pid,
                &log.when,
                log.flags.bits(),
            );
        }
        out
    }

    /// Decode a complete status buffer; any other length is a format error.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != STATUS_LEN {
            return Err(ProtocolError::StatusLength(bytes.len()));
        }

        let (pid, when, flags) = read_block(&bytes[SUPERVISOR_OFFSET..]);
        let supervisor = SubjectStatus {
            pid,
            when,
            flags: SupervisorFlags::from_bits_retain(flags),
        };
        let main = subject_block(&bytes[MAIN_OFFSET..]);
        let log = supervisor
            .flags
            .contains(SupervisorFlags::HAS_LOG)
            .then(|| subject_block(&bytes[LOG_OFFSET..]));

        Ok(Self {
            supervisor,
            main,
            log,
        })
    }
}

fn write_block(block: &mut [u8], pid: u32, when: &Tain, flags: u8) {
    block[0..4].copy_from_slice(&pid.to_le_bytes());
    block[4..4 + TAIN_PACK_LEN].copy_from_slice(&when.pack());
    block[16] = flags;
}

fn read_block(block: &[u8]) -> (u32, Tain, u8) {
    let mut pid = [0u8; 4];
    pid.copy_from_slice(&block[0..4]);
    let mut when = [0u8; TAIN_PACK_LEN];
    when.copy_from_slice(&block[4..4 + TAIN_PACK_LEN]);
    (u32::from_le_bytes(pid), Tain::unpack(&when), block[16])
}

fn subject_block(block: &[u8]) -> SubjectStatus<SubjectFlags> {
    let (pid, when, flags) = read_block(block);
    SubjectStatus {
        pid,
        when,
        flags: SubjectFlags::from_bits_retain(flags),
    }
}
