/*!
 * Periodic-scan scheduler, a direct port of `scheduler_service.py`'s
 * `SchedulerService._check_schedule`, driven by `tokio::time::interval`
 * instead of a thread + `Event`.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{info, warn};

use crate::config::ScheduleConfig;

/// Polled every tick; returns whether a scheduled run is due right now.
/// `now_epoch_secs` and `last_run` are both Unix-epoch seconds, matching
/// the Python original's `time.time()` bookkeeping.
pub fn is_due(schedule: &ScheduleConfig, now_epoch_secs: f64) -> bool {
    if !schedule.enabled {
        return false;
    }
    let elapsed_hours = (now_epoch_secs - schedule.last_run) / 3600.0;
    elapsed_hours >= schedule.interval_hours
}

/// Background loop: checks the schedule on a fixed tick and invokes
/// `on_due` when a run is due. `on_due` is responsible for skipping when
/// the system is already busy and for persisting the new `last_run`.
pub struct Scheduler {
    check_interval: Duration,
    stop: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            check_interval,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Runs until `stop()` is called. `schedule_fn` returns the current
    /// schedule config and the current epoch time on each tick, so callers
    /// can reload a live config rather than capture a stale snapshot.
    pub async fn run<F, Fut>(&self, mut schedule_fn: F, mut on_due: impl FnMut() -> Fut)
    where
        F: FnMut() -> (ScheduleConfig, f64),
        Fut: std::future::Future<Output = ()>,
    {
        let mut ticker = interval(self.check_interval);
        loop {
            ticker.tick().await;
            if self.stop.load(Ordering::SeqCst) {
                info!("scheduler stopping");
                return;
            }

            let (schedule, now) = schedule_fn();
            if is_due(&schedule, now) {
                info!("scheduled scan due, triggering now");
                on_due().await;
            }
        }
    }
}

impl Scheduler {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Guards against overlapping scheduled runs the way `_trigger_scan` does
/// by checking `app_state["scanning"]`/`"deleting"`/`"comparing"`.
pub fn should_skip_busy(scanning: bool, deleting: bool, comparing: bool) -> bool {
    if scanning || deleting || comparing {
        warn!("skipping scheduled scan: system busy");
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(enabled: bool, interval_hours: f64, last_run: f64) -> ScheduleConfig {
        ScheduleConfig { enabled, interval_hours, last_run }
    }

    #[test]
    fn disabled_schedule_is_never_due() {
        assert!(!is_due(&schedule(false, 1.0, 0.0), 100_000.0));
    }

    #[test]
    fn due_when_elapsed_exceeds_interval() {
        let now = 10.0 * 3600.0;
        assert!(is_due(&schedule(true, 6.0, 0.0), now));
    }

    #[test]
    fn not_due_when_elapsed_under_interval() {
        let now = 3.0 * 3600.0;
        assert!(!is_due(&schedule(true, 6.0, 0.0), now));
    }

    #[test]
    fn exactly_on_boundary_is_due() {
        let last_run = 1_000.0;
        let now = last_run + 6.0 * 3600.0;
        assert!(is_due(&schedule(true, 6.0, last_run), now));
    }

    #[test]
    fn busy_system_skips_scheduled_run() {
        assert!(should_skip_busy(true, false, false));
        assert!(should_skip_busy(false, true, false));
        assert!(should_skip_busy(false, false, true));
        assert!(!should_skip_busy(false, false, false));
    }

    #[tokio::test]
    async fn run_loop_stops_when_asked() {
        let scheduler = Scheduler::new(Duration::from_millis(10));
        let stop = scheduler.stop_handle();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();

        let handle = tokio::spawn(async move {
            scheduler
                .run(
                    || (schedule(true, 0.0, 0.0), 1.0),
                    || {
                        let fired = fired_clone.clone();
                        async move {
                            fired.store(true, Ordering::SeqCst);
                        }
                    },
                )
                .await;
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        stop.store(true, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        assert!(fired.load(Ordering::SeqCst));
    }
}
