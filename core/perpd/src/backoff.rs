use std::cmp;
use std::time::Duration;
use tracing::warn;

const BACKOFF_STEP_SECS: u64 = 1;
const BACKOFF_MAX_SECS: u64 = 30;

/// Delay before the next scan pass after supervisor spawns keep failing.
///
/// A scan that leaves any service without a supervisor would otherwise
/// wait for the next SIGHUP or autoscan tick before retrying.
#[derive(Debug, Default)]
pub struct SpawnBackoff {
    failures: u32,
}

impl SpawnBackoff {
    /// Fold one scan pass into the state.
    pub fn record_pass(&mut self, spawn_failures: usize) {
        if spawn_failures == 0 {
            self.failures = 0;
            return;
        }

        self.failures = self.failures.saturating_add(1);
        if let Some(delay) = self.delay() {
            warn!(
                failed = spawn_failures,
                retry_secs = delay.as_secs(),
                "Supervisor spawn failures; retry scheduled"
            );
        }
    }

    pub fn delay(&self) -> Option<Duration> {
        compute_backoff(self.failures).map(Duration::from_secs)
    }
}

fn compute_backoff(failures: u32) -> Option<u64> {
    if failures == 0 {
        return None;
    }
    let backoff = BACKOFF_STEP_SECS.saturating_mul(u64::from(failures));
    Some(cmp::min(backoff, BACKOFF_MAX_SECS))
}
