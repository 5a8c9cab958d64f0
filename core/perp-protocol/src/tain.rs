//! TAI64N timestamps as published in the status record.

use chrono::{DateTime, Utc};

/// Packed size of a timestamp: 8-byte label + 4-byte nanoseconds.
pub const TAIN_PACK_LEN: usize = 12;

/// TAI64 label of the Unix epoch (2^62 plus the 10 s TAI-UTC offset).
const TAI64_UNIX_EPOCH: u64 = (1 << 62) + 10;

/// High-resolution absolute time: TAI64 seconds label plus nanoseconds.
///
/// Field order matters: the derived ordering compares seconds first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tain {
    secs: u64,
    nanos: u32,
}

impl Tain {
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(when: DateTime<Utc>) -> Self {
        let unix = when.timestamp();
        let secs = if unix >= 0 {
            TAI64_UNIX_EPOCH.saturating_add(unix.unsigned_abs())
        } else {
            TAI64_UNIX_EPOCH.saturating_sub(unix.unsigned_abs())
        };
        Self {
            secs,
            nanos: when.timestamp_subsec_nanos().min(999_999_999),
        }
    }

    /// Build from Unix seconds; handy for fixed test clocks.
    pub fn from_unix(secs: u64, nanos: u32) -> Self {
        Self {
            secs: TAI64_UNIX_EPOCH.saturating_add(secs),
            nanos: nanos.min(999_999_999),
        }
    }

    /// Seconds since the Unix epoch, or `None` before it.
    pub fn unix_secs(&self) -> Option<u64> {
        self.secs.checked_sub(TAI64_UNIX_EPOCH)
    }

    pub fn nanos(&self) -> u32 {
        self.nanos
    }

    pub fn pack(&self) -> [u8; TAIN_PACK_LEN] {
        let mut out = [0u8; TAIN_PACK_LEN];
        out[..8].copy_from_slice(&self.secs.to_be_bytes());
        out[8..].copy_from_slice(&self.nanos.to_be_bytes());
        out
    }

    pub fn unpack(bytes: &[u8; TAIN_PACK_LEN]) -> Self {
        let mut secs = [0u8; 8];
        let mut nanos = [0u8; 4];
        secs.copy_from_slice(&bytes[..8]);
        nanos.copy_from_slice(&bytes[8..]);
        Self {
            secs: u64::from_be_bytes(secs),
            nanos: u32::from_be_bytes(nanos),
        }
    }

    /// Whole seconds from `earlier` to `self`; `self` must not precede it.
    fn whole_secs_since(&self, earlier: &Tain) -> u64 {
        let secs = self.secs - earlier.secs;
        if self.nanos < earlier.nanos {
            secs.saturating_sub(1)
        } else {
            secs
        }
    }
}

/// Whole seconds between `now` and `when`, whichever comes first.
///
/// A `when` slightly ahead of `now` (clock stepped back after the status was
/// published) yields a small positive value instead of an error. Saturates at
/// `u32::MAX`, about 136 years.
pub fn uptime(now: &Tain, when: &Tain) -> u32 {
    let secs = if when <= now {
        now.whole_secs_since(when)
    } else {
        when.whole_secs_since(now)
    };
    u32::try_from(secs).unwrap_or(u32::MAX)
}
