mod common;

use common::{always_ok, control_dir_without_supervisor, echo, FakeSupervisor};
use fs2::FileExt;
use perp_protocol::{ControlCommand, ControlPacket, ProtocolError, CTL_LOCK};
use perp_tools::{ControlChannel, Liveness, ServiceError};
use std::fs::OpenOptions;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn refuse_kill(code: u8) -> ControlPacket {
    if code == b'k' {
        ControlPacket::error_reply(libc::EPERM as u32)
    } else {
        ControlPacket::error_reply(0)
    }
}

fn wrong_protocol(_: u8) -> ControlPacket {
    ControlPacket::new(2, b'E', &0u32.to_le_bytes()).unwrap()
}

fn wrong_kind(_: u8) -> ControlPacket {
    ControlPacket::new(1, b'C', &[0]).unwrap()
}

#[test]
fn is_ready_reports_missing_control_fifo() {
    let dir = TempDir::new().unwrap();
    let channel = ControlChannel::new(dir.path().join("_never_created"));
    assert_eq!(
        channel.is_ready().unwrap(),
        Liveness::NotRunning {
            errno: libc::ENOENT
        }
    );
}

#[test]
fn is_ready_reports_fifo_without_reader() {
    let dir = TempDir::new().unwrap();
    control_dir_without_supervisor(dir.path());
    let channel = ControlChannel::new(dir.path());
    assert_eq!(
        channel.is_ready().unwrap(),
        Liveness::NotRunning { errno: libc::ENXIO }
    );
}

#[test]
fn command_round_trip() {
    let dir = TempDir::new().unwrap();
    let supervisor = FakeSupervisor::serve(dir.path(), always_ok, Duration::ZERO);
    let channel = ControlChannel::new(dir.path());

    assert_eq!(channel.is_ready().unwrap(), Liveness::Ready);
    channel.send_command(ControlCommand::Up, false).unwrap();
    channel.send_command(ControlCommand::Down, true).unwrap();

    assert_eq!(supervisor.commands(), vec![b'u', b'd' + 0x7f]);
    assert_eq!(supervisor.malformed(), 0);
}

#[test]
fn server_error_code_is_surfaced() {
    let dir = TempDir::new().unwrap();
    let _supervisor = FakeSupervisor::serve(dir.path(), refuse_kill, Duration::ZERO);
    let channel = ControlChannel::new(dir.path());

    match channel.send_command(ControlCommand::Kill, false) {
        Err(ServiceError::Server(code)) => assert_eq!(code, libc::EPERM as u32),
        other => panic!("unexpected result: {other:?}"),
    }
    channel.send_command(ControlCommand::Terminate, false).unwrap();
}

#[test]
fn reply_with_wrong_protocol_is_rejected() {
    let dir = TempDir::new().unwrap();
    let _supervisor = FakeSupervisor::serve(dir.path(), wrong_protocol, Duration::ZERO);
    let channel = ControlChannel::new(dir.path());

    match channel.send_command(ControlCommand::Hangup, false) {
        Err(ServiceError::Protocol(ProtocolError::ProtocolMismatch(2))) => {}
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn reply_of_wrong_type_is_rejected() {
    let dir = TempDir::new().unwrap();
    let _supervisor = FakeSupervisor::serve(dir.path(), wrong_kind, Duration::ZERO);
    let channel = ControlChannel::new(dir.path());

    match channel.send_command(ControlCommand::Alarm, false) {
        Err(ServiceError::Protocol(ProtocolError::UnexpectedReply { kind: b'C', len: 1 })) => {}
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn meta_command_for_log_is_refused_before_sending() {
    let dir = TempDir::new().unwrap();
    let supervisor = FakeSupervisor::serve(dir.path(), always_ok, Duration::ZERO);
    let channel = ControlChannel::new(dir.path());

    assert!(matches!(
        channel.send_command(ControlCommand::MetaExit, true),
        Err(ServiceError::Command(_))
    ));
    assert!(supervisor.commands().is_empty());
}

#[test]
fn exchange_waits_for_the_control_lock() {
    let dir = TempDir::new().unwrap();
    let supervisor = FakeSupervisor::serve(dir.path(), echo, Duration::ZERO);

    let holder = OpenOptions::new()
        .write(true)
        .open(dir.path().join(CTL_LOCK))
        .unwrap();
    holder.lock_exclusive().unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let control_dir = dir.path().to_path_buf();
    let worker = thread::spawn(move || {
        let channel = ControlChannel::new(control_dir);
        let reply = channel.exchange(&ControlPacket::command(b'u'));
        done_tx.send(reply).unwrap();
    });

    assert!(matches!(
        done_rx.recv_timeout(Duration::from_millis(100)),
        Err(RecvTimeoutError::Timeout)
    ));
    assert!(supervisor.commands().is_empty());

    FileExt::unlock(&holder).unwrap();
    let reply = done_rx
        .recv_timeout(Duration::from_secs(5))
        .unwrap()
        .unwrap();
    assert_eq!(reply.reply_code().unwrap(), u32::from(b'u'));
    assert_eq!(supervisor.commands(), vec![b'u']);
    worker.join().unwrap();
}

#[test]
fn concurrent_exchanges_each_get_their_own_reply() {
    let dir = TempDir::new().unwrap();
    let supervisor = FakeSupervisor::serve(dir.path(), echo, Duration::from_millis(5));
    let channel = Arc::new(ControlChannel::new(dir.path()));

    let workers: Vec<_> = [b'u', b'd', b'p', b'c']
        .into_iter()
        .map(|code| {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                for _ in 0..10 {
                    let reply = channel.exchange(&ControlPacket::command(code)).unwrap();
                    assert_eq!(reply.reply_code().unwrap(), u32::from(code));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let commands = supervisor.commands();
    assert_eq!(commands.len(), 40);
    for code in [b'u', b'd', b'p', b'c'] {
        assert_eq!(commands.iter().filter(|c| **c == code).count(), 10);
    }
    assert_eq!(supervisor.malformed(), 0);
}
