#![allow(dead_code)]

use perp_protocol::{
    ControlPacket, ServiceIdentity, StatusRecord, CTL_IN, CTL_LOCK, CTL_OUT, PACKET_MAX_LEN,
    STATUS_BIN,
};
use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub fn mkfifo(path: &Path) {
    let c_path = CString::new(path.as_os_str().as_bytes()).unwrap();
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    assert_eq!(rc, 0, "mkfifo {} failed", path.display());
}

/// Create an activated service directory and return its control directory.
pub fn activated_service(base: &Path, name: &str) -> PathBuf {
    let dir = base.join(name);
    fs::create_dir(&dir).unwrap();
    fs::set_permissions(&dir, fs::Permissions::from_mode(0o1755)).unwrap();
    let identity = ServiceIdentity::from_metadata(&fs::metadata(&dir).unwrap());
    base.join(identity.control_path())
}

/// Control directory with FIFOs and lock file but nobody reading `ctl.0`.
pub fn control_dir_without_supervisor(control_dir: &Path) {
    fs::create_dir_all(control_dir).unwrap();
    mkfifo(&control_dir.join(CTL_IN));
    mkfifo(&control_dir.join(CTL_OUT));
    File::create(control_dir.join(CTL_LOCK)).unwrap();
}

pub fn write_status(control_dir: &Path, record: &StatusRecord) {
    fs::create_dir_all(control_dir).unwrap();
    fs::write(control_dir.join(STATUS_BIN), record.encode()).unwrap();
}

/// Reply to a command byte with the packet the supervisor should send back.
pub type Responder = fn(u8) -> ControlPacket;

pub fn always_ok(_: u8) -> ControlPacket {
    ControlPacket::error_reply(0)
}

/// `'E'` reply whose code carries the command byte it answers.
pub fn echo(code: u8) -> ControlPacket {
    ControlPacket::error_reply(u32::from(code))
}

/// In-process stand-in for a supervisor: holds both FIFOs open and answers
/// every well-formed command packet.
pub struct FakeSupervisor {
    pub commands: Arc<Mutex<Vec<u8>>>,
    pub malformed: Arc<AtomicUsize>,
}

impl FakeSupervisor {
    pub fn serve(control_dir: &Path, respond: Responder, delay: Duration) -> Self {
        control_dir_without_supervisor(control_dir);

        // O_RDWR so neither side's open blocks and reads never see EOF.
        let mut inbound = OpenOptions::new()
            .read(true)
            .write(true)
            .open(control_dir.join(CTL_IN))
            .unwrap();
        let mut outbound = OpenOptions::new()
            .read(true)
            .write(true)
            .open(control_dir.join(CTL_OUT))
            .unwrap();

        let commands = Arc::new(Mutex::new(Vec::new()));
        let malformed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&commands);
        let bad = Arc::clone(&malformed);

        thread::spawn(move || loop {
            let mut buf = [0u8; PACKET_MAX_LEN];
            let n = match inbound.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            match ControlPacket::decode(&buf[..n]) {
                Ok(packet) if packet.payload().len() == 1 => {
                    let code = packet.payload()[0];
                    seen.lock().unwrap().push(code);
                    thread::sleep(delay);
                    if outbound.write_all(&respond(code).encode()).is_err() {
                        break;
                    }
                }
                _ => {
                    bad.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        Self {
            commands,
            malformed,
        }
    }

    pub fn commands(&self) -> Vec<u8> {
        self.commands.lock().unwrap().clone()
    }

    pub fn malformed(&self) -> usize {
        self.malformed.load(Ordering::SeqCst)
    }
}
