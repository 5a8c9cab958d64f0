use std::fs::File;
use std::io::Read;
use std::path::Path;

use perp_protocol::{StatusRecord, STATUS_BIN};

use crate::error::ServiceError;

/// Read and decode `status.bin` from a service control directory.
pub fn read_status(control_dir: &Path) -> Result<StatusRecord, ServiceError> {
    let mut file = File::open(control_dir.join(STATUS_BIN))
        .map_err(ServiceError::io("failure open() on status.bin"))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(ServiceError::io("failure reading status.bin"))?;
    Ok(StatusRecord::decode(&bytes)?)
}
