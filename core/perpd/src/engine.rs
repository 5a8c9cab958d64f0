//! Service table and the scan/reap/shutdown cycle.
//!
//! A service is any entry of the base directory whose name does not start
//! with `.`, which is a directory, and which has the sticky bit set. It is
//! tracked by filesystem identity (dev/ino), so renaming a service directory
//! never restarts its supervisor.

use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::time::Duration;

use fs_err as fs;
use perp_protocol::ServiceIdentity;
use tracing::{debug, info, warn};

use crate::backoff::SpawnBackoff;
use crate::process::ProcessControl;
use crate::signals::{PendingSignals, SignalPipe};

const STICKY_BIT: u32 = 0o1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedService {
    pub identity: ServiceIdentity,
    /// Supervisor pid; `None` once it has exited and been collected.
    pub pid: Option<u32>,
    cull: bool,
}

/// Counters for a single scan pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub added: usize,
    pub spawned: usize,
    pub spawn_failures: usize,
    pub culled: usize,
    pub rejected: usize,
}

pub struct Engine<P> {
    base_dir: PathBuf,
    max_services: usize,
    autoscan: Option<Duration>,
    services: Vec<TrackedService>,
    control: P,
    backoff: SpawnBackoff,
    pending: PendingSignals,
}

impl<P: ProcessControl> Engine<P> {
    pub fn new(base_dir: PathBuf, max_services: usize, autoscan: Option<Duration>, control: P) -> Self {
        Self {
            base_dir,
            max_services,
            autoscan,
            services: Vec::new(),
            control,
            backoff: SpawnBackoff::default(),
            pending: PendingSignals::default(),
        }
    }

    pub fn services(&self) -> &[TrackedService] {
        &self.services
    }

    #[cfg(test)]
    pub fn control(&self) -> &P {
        &self.control
    }

    /// One pass over the base directory: adopt new services, restart
    /// services whose supervisor is gone, then cull services that were not
    /// seen. A directory read error abandons the pass before culling.
    pub fn scan(&mut self) -> ScanReport {
        let mut report = ScanReport::default();

        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "Failed to open base directory for scan");
                return report;
            }
        };

        for service in &mut self.services {
            service.cull = true;
        }

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "Failed reading base directory; skipping cull");
                    for service in &mut self.services {
                        service.cull = false;
                    }
                    self.backoff.record_pass(report.spawn_failures);
                    return report;
                }
            };
            let name = entry.file_name();
            let Some(identity) = self.activated_identity(&name) else {
                continue;
            };

            let index = match self.services.iter().position(|s| s.identity == identity) {
                Some(index) => index,
                None => {
                    if self.services.len() >= self.max_services {
                        warn!(
                            service = %name.to_string_lossy(),
                            max = self.max_services,
                            "Unable to add new service: too many services"
                        );
                        report.rejected += 1;
                        continue;
                    }
                    debug!(service = %name.to_string_lossy(), identity = %identity, "Adding service");
                    self.services.push(TrackedService {
                        identity,
                        pid: None,
                        cull: false,
                    });
                    report.added += 1;
                    self.services.len() - 1
                }
            };

            self.services[index].cull = false;
            if self.services[index].pid.is_none() {
                self.spawn_at(index, &name, &mut report);
            }
        }

        let Self {
            services, control, ..
        } = self;
        services.retain(|service| {
            if !service.cull {
                return true;
            }
            debug!(identity = %service.identity, pid = ?service.pid, "Culling service");
            if let Some(pid) = service.pid {
                control.terminate(pid);
            }
            report.culled += 1;
            false
        });

        self.backoff.record_pass(report.spawn_failures);
        report
    }

    /// Collect exited supervisors and clear their pids. Unknown pids are ignored.
    pub fn reap(&mut self) -> usize {
        let mut cleared = 0;
        for pid in self.control.reap() {
            if let Some(service) = self.services.iter_mut().find(|s| s.pid == Some(pid)) {
                debug!(pid, identity = %service.identity, "Supervisor exited");
                service.pid = None;
                cleared += 1;
            }
        }
        cleared
    }

    /// Terminate every running supervisor, then wait for each of them.
    pub fn shutdown(&mut self) {
        let running: Vec<u32> = self.services.iter().filter_map(|s| s.pid).collect();
        info!(count = running.len(), "Stopping supervisors");

        for &pid in &running {
            self.control.terminate(pid);
        }
        for pid in running {
            self.control.wait_for(pid);
        }
        for service in &mut self.services {
            service.pid = None;
        }
    }

    /// Scan once, then wait for signals or timeouts until asked to terminate.
    pub fn run(&mut self, signals: &SignalPipe) {
        self.scan_and_log();
        let mut reported = None;

        loop {
            if reported != Some(self.services.len()) {
                info!(
                    count = self.services.len(),
                    max = self.max_services,
                    "Monitoring {} services",
                    self.services.len()
                );
                reported = Some(self.services.len());
            }

            self.pending = match signals.wait(self.next_timeout()) {
                Ok(pending) => pending,
                Err(err) => {
                    warn!(error = %err, "Failed waiting on signal pipe");
                    continue;
                }
            };

            if self.pending.terminate {
                info!("Termination signal received");
                break;
            }
            if self.pending.child_exited {
                debug!("Child exit signalled");
            }
            self.reap();
            if self.pending.rescan {
                debug!("Rescan requested");
            }
            self.scan_and_log();
            self.pending = PendingSignals::default();
        }
    }

    fn scan_and_log(&mut self) {
        let report = self.scan();
        if report != ScanReport::default() {
            debug!(
                added = report.added,
                spawned = report.spawned,
                spawn_failures = report.spawn_failures,
                culled = report.culled,
                rejected = report.rejected,
                "Scan pass complete"
            );
        }
    }

    fn next_timeout(&self) -> Option<Duration> {
        match (self.autoscan, self.backoff.delay()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn activated_identity(&self, name: &OsStr) -> Option<ServiceIdentity> {
        if name.as_bytes().first() == Some(&b'.') {
            return None;
        }
        let meta = match fs::metadata(self.base_dir.join(name)) {
            Ok(meta) => meta,
            Err(err) => {
                warn!(error = %err, "Failed to stat base directory entry");
                return None;
            }
        };
        if !meta.is_dir() || meta.permissions().mode() & STICKY_BIT == 0 {
            return None;
        }
        Some(ServiceIdentity::from_metadata(&meta))
    }

    fn spawn_at(&mut self, index: usize, name: &OsStr, report: &mut ScanReport) {
        match self.control.spawn(name) {
            Ok(pid) => {
                debug!(service = %name.to_string_lossy(), pid, "Started supervisor");
                self.services[index].pid = Some(pid);
                report.spawned += 1;
            }
            Err(err) => {
                warn!(service = %name.to_string_lossy(), error = %err, "Failed to start supervisor");
                report.spawn_failures += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::fs::Permissions;
    use std::io;
    use std::path::Path;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeControl {
        next_pid: u32,
        spawned: Vec<(OsString, u32)>,
        terminated: Vec<u32>,
        waited: Vec<u32>,
        exited: Vec<u32>,
        fail_spawns: bool,
    }

    impl ProcessControl for FakeControl {
        fn spawn(&mut self, service: &OsStr) -> io::Result<u32> {
            if self.fail_spawns {
                return Err(io::Error::new(io::ErrorKind::Other, "fork failed"));
            }
            self.next_pid += 1;
            let pid = 1000 + self.next_pid;
            self.spawned.push((service.to_os_string(), pid));
            Ok(pid)
        }

        fn reap(&mut self) -> Vec<u32> {
            std::mem::take(&mut self.exited)
        }

        fn terminate(&mut self, pid: u32) {
            self.terminated.push(pid);
        }

        fn wait_for(&mut self, pid: u32) {
            self.waited.push(pid);
        }
    }

    fn service_dir(base: &Path, name: &str, sticky: bool) -> PathBuf {
        let path = base.join(name);
        std::fs::create_dir(&path).unwrap();
        let mode = if sticky { 0o1755 } else { 0o755 };
        std::fs::set_permissions(&path, Permissions::from_mode(mode)).unwrap();
        path
    }

    fn engine(base: &TempDir, max: usize) -> Engine<FakeControl> {
        Engine::new(base.path().to_path_buf(), max, None, FakeControl::default())
    }

    fn spawned_names(engine: &Engine<FakeControl>) -> Vec<String> {
        let mut names: Vec<String> = engine
            .control()
            .spawned
            .iter()
            .map(|(name, _)| name.to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn scan_spawns_only_activated_directories() {
        let base = TempDir::new().unwrap();
        service_dir(base.path(), "web", true);
        service_dir(base.path(), "idle", false);
        service_dir(base.path(), ".hidden", true);
        std::fs::write(base.path().join("notes"), b"x").unwrap();

        let mut engine = engine(&base, 10);
        let report = engine.scan();

        assert_eq!(report.added, 1);
        assert_eq!(report.spawned, 1);
        assert_eq!(spawned_names(&engine), vec!["web"]);
        assert_eq!(engine.services().len(), 1);
    }

    #[test]
    fn rescans_do_not_respawn_running_services() {
        let base = TempDir::new().unwrap();
        service_dir(base.path(), "web", true);

        let mut engine = engine(&base, 10);
        engine.scan();
        engine.scan();
        engine.scan();

        assert_eq!(engine.control().spawned.len(), 1);
    }

    #[test]
    fn rename_keeps_the_same_supervisor() {
        let base = TempDir::new().unwrap();
        service_dir(base.path(), "web", true);

        let mut engine = engine(&base, 10);
        engine.scan();
        let pid = engine.services()[0].pid;

        std::fs::rename(base.path().join("web"), base.path().join("www")).unwrap();
        let report = engine.scan();

        assert_eq!(report, ScanReport::default());
        assert_eq!(engine.services()[0].pid, pid);
        assert!(engine.control().terminated.is_empty());
    }

    #[test]
    fn reaped_service_is_restarted_on_next_scan() {
        let base = TempDir::new().unwrap();
        service_dir(base.path(), "web", true);

        let mut engine = engine(&base, 10);
        engine.scan();
        let first = engine.services()[0].pid.unwrap();

        engine.control.exited.push(first);
        engine.control.exited.push(4242);
        assert_eq!(engine.reap(), 1);
        assert_eq!(engine.services()[0].pid, None);

        engine.scan();
        let second = engine.services()[0].pid.unwrap();
        assert_ne!(first, second);
        assert_eq!(engine.control().spawned.len(), 2);
    }

    #[test]
    fn deactivated_service_is_culled_and_terminated() {
        let base = TempDir::new().unwrap();
        let web = service_dir(base.path(), "web", true);
        service_dir(base.path(), "db", true);

        let mut engine = engine(&base, 10);
        engine.scan();
        let web_pid = engine
            .control()
            .spawned
            .iter()
            .find(|(name, _)| name == "web")
            .map(|(_, pid)| *pid)
            .unwrap();

        std::fs::set_permissions(&web, Permissions::from_mode(0o755)).unwrap();
        let report = engine.scan();

        assert_eq!(report.culled, 1);
        assert_eq!(engine.control().terminated, vec![web_pid]);
        assert_eq!(engine.services().len(), 1);
    }

    #[test]
    fn removed_service_without_supervisor_is_culled_silently() {
        let base = TempDir::new().unwrap();
        let web = service_dir(base.path(), "web", true);

        let mut engine = engine(&base, 10);
        engine.scan();
        let pid = engine.services()[0].pid.unwrap();
        engine.control.exited.push(pid);
        engine.reap();

        std::fs::remove_dir(&web).unwrap();
        let report = engine.scan();
        assert_eq!(report.culled, 1);
        assert!(engine.control().terminated.is_empty());
        assert!(engine.services().is_empty());
    }

    #[test]
    fn capacity_rejects_extra_services() {
        let base = TempDir::new().unwrap();
        for name in ["a", "b", "c"] {
            service_dir(base.path(), name, true);
        }

        let mut engine = engine(&base, 2);
        let report = engine.scan();

        assert_eq!(report.added, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(engine.services().len(), 2);

        let culled = engine.services()[0].identity;
        let victim = ["a", "b", "c"]
            .into_iter()
            .map(|name| base.path().join(name))
            .find(|path| {
                ServiceIdentity::from_metadata(&std::fs::metadata(path).unwrap()) == culled
            })
            .unwrap();
        std::fs::remove_dir(victim).unwrap();

        // culling runs after adoption, so the slot opens one pass later
        let report = engine.scan();
        assert_eq!(report.culled, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(engine.services().len(), 1);

        let report = engine.scan();
        assert_eq!(report.added, 1);
        assert_eq!(engine.services().len(), 2);
    }

    #[test]
    fn spawn_failures_leave_service_tracked_and_schedule_retry() {
        let base = TempDir::new().unwrap();
        service_dir(base.path(), "web", true);

        let mut engine = engine(&base, 10);
        engine.control.fail_spawns = true;
        let report = engine.scan();

        assert_eq!(report.spawn_failures, 1);
        assert_eq!(engine.services()[0].pid, None);
        assert_eq!(engine.next_timeout(), Some(Duration::from_secs(1)));

        engine.control.fail_spawns = false;
        let report = engine.scan();
        assert_eq!(report.spawned, 1);
        assert_eq!(engine.next_timeout(), None);
    }

    #[test]
    fn autoscan_and_backoff_take_the_shorter_timeout() {
        let base = TempDir::new().unwrap();
        let mut engine = Engine::new(
            base.path().to_path_buf(),
            10,
            Some(Duration::from_secs(60)),
            FakeControl::default(),
        );
        assert_eq!(engine.next_timeout(), Some(Duration::from_secs(60)));

        service_dir(base.path(), "web", true);
        engine.control.fail_spawns = true;
        engine.scan();
        assert_eq!(engine.next_timeout(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn unreadable_base_leaves_table_untouched() {
        let base = TempDir::new().unwrap();
        service_dir(base.path(), "web", true);

        let mut engine = engine(&base, 10);
        engine.scan();

        engine.base_dir = base.path().join("missing");
        let report = engine.scan();
        assert_eq!(report, ScanReport::default());
        assert_eq!(engine.services().len(), 1);
    }

    #[test]
    fn shutdown_terminates_then_waits_for_running_supervisors() {
        let base = TempDir::new().unwrap();
        service_dir(base.path(), "web", true);
        service_dir(base.path(), "db", true);
        service_dir(base.path(), "cache", true);

        let mut engine = engine(&base, 10);
        engine.scan();
        let stopped = engine.services()[0].pid.unwrap();
        engine.control.exited.push(stopped);
        engine.reap();

        engine.shutdown();

        let mut terminated = engine.control().terminated.clone();
        terminated.sort_unstable();
        let mut waited = engine.control().waited.clone();
        waited.sort_unstable();
        assert_eq!(terminated.len(), 2);
        assert_eq!(terminated, waited);
        assert!(!terminated.contains(&stopped));
        assert!(engine.services().iter().all(|s| s.pid.is_none()));
    }
}
