//! Filesystem identity of a service definition directory.
//!
//! A service is keyed by the `(dev, ino)` of its definition directory, so
//! renaming the directory keeps the same identity and the same control
//! directory. The identity renders as `_` followed by 22 characters of a
//! base64 variant over the 16-byte little-endian packing of both numbers.

use std::fmt;
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use base64::alphabet::Alphabet;
use base64::engine::general_purpose::NO_PAD;
use base64::engine::GeneralPurpose;
use base64::Engine;

use crate::{ProtocolError, CONTROL_DIR};

/// Length of the identity string, leading underscore included.
pub const IDENTITY_LEN: usize = 23;

const PACKED_LEN: usize = 16;

// `~` is the padding symbol of this encoding and is never emitted unpadded.
const DEVINO_ALPHABET: Alphabet =
    match Alphabet::new("0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ}{") {
        Ok(alphabet) => alphabet,
        Err(_) => panic!("devino alphabet must hold 64 distinct symbols"),
    };

const DEVINO: GeneralPurpose = GeneralPurpose::new(&DEVINO_ALPHABET, NO_PAD);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceIdentity {
    pub dev: u64,
    pub ino: u64,
}

impl ServiceIdentity {
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    fn packed(&self) -> [u8; PACKED_LEN] {
        let mut out = [0u8; PACKED_LEN];
        out[..8].copy_from_slice(&self.dev.to_le_bytes());
        out[8..].copy_from_slice(&self.ino.to_le_bytes());
        out
    }

    /// The 23-character control directory name.
    pub fn encode(&self) -> String {
        let mut name = String::with_capacity(IDENTITY_LEN);
        name.push('_');
        DEVINO.encode_string(self.packed(), &mut name);
        name
    }

    pub fn parse(name: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidIdentity(name.to_string());
        let encoded = name
            .strip_prefix('_')
            .filter(|rest| rest.len() == IDENTITY_LEN - 1)
            .ok_or_else(invalid)?;
        let bytes = DEVINO.decode(encoded).map_err(|_| invalid())?;
        let packed: [u8; PACKED_LEN] = bytes.try_into().map_err(|_| invalid())?;

        let mut dev = [0u8; 8];
        let mut ino = [0u8; 8];
        dev.copy_from_slice(&packed[..8]);
        ino.copy_from_slice(&packed[8..]);
        Ok(Self {
            dev: u64::from_le_bytes(dev),
            ino: u64::from_le_bytes(ino),
        })
    }

    /// Control directory relative to the base directory: `.control/_<id>`.
    pub fn control_path(&self) -> PathBuf {
        PathBuf::from(CONTROL_DIR).join(self.encode())
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
