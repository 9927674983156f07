//! # Watchdog Actor
//!
//! Observes the per-actor heartbeat counters. An actor whose counter stops
//! moving for the stall timeout is assumed deadlocked (or otherwise wedged);
//! the watchdog reports it to the supervisor and ends its own loop, leaving
//! recovery entirely to the supervisor.
//!
//! Stall timing uses wall-clock instants, not counter arithmetic: the
//! counters only say *whether* an actor progressed, the clock says for how
//! long it has not.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::error;

use crate::params::WatchdogParams;
use crate::shared::SharedRegion;
use crate::supervisor::{RunControl, SupervisorHandle};

use super::{Actor, Role, StepOutcome};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct Watchdog {
    shm: Arc<SharedRegion>,
    params: WatchdogParams,
    sup: SupervisorHandle,

    /// Counter values seen on the previous iteration.
    seen: [u32; Role::MONITORED.len()],

    /// When each counter last changed. `None` until the first iteration.
    last_change: Option<[Instant; Role::MONITORED.len()]>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Watchdog {
    pub fn new(shm: Arc<SharedRegion>, params: WatchdogParams, sup: SupervisorHandle) -> Self {
        Self {
            shm,
            params,
            sup,
            seen: [0; Role::MONITORED.len()],
            last_change: None,
        }
    }

    /// Check every counter once. Returns the first stalled role found.
    fn check(&mut self) -> Option<Role> {
        let now = Instant::now();
        let snapshot = self.shm.wdg.snapshot();
        let timeout = Duration::from_millis(self.params.stall_timeout_ms);

        let last_change = self
            .last_change
            .get_or_insert([now; Role::MONITORED.len()]);

        for (i, role) in Role::MONITORED.iter().enumerate() {
            if snapshot[i] != self.seen[i] {
                last_change[i] = now;
            } else if now.duration_since(last_change[i]) >= timeout {
                return Some(*role);
            }
            self.seen[i] = snapshot[i];
        }

        None
    }
}

impl Actor for Watchdog {
    fn role(&self) -> Role {
        Role::Watchdog
    }

    fn step(&mut self, ctl: &RunControl) -> StepOutcome {
        if let Some(stalled) = self.check() {
            error!(
                "{} heartbeat stalled for >= {} ms, requesting recovery",
                stalled, self.params.stall_timeout_ms
            );
            self.sup.request_recovery(stalled);
            return StepOutcome::Exit;
        }

        ctl.sleep(Duration::from_millis(self.params.cycle_interval_ms));
        StepOutcome::Continue
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::supervisor::Event;
    use std::sync::mpsc;
    use std::thread;

    fn setup(stall_timeout_ms: u64) -> (Arc<SharedRegion>, Watchdog, mpsc::Receiver<Event>) {
        let shm = Arc::new(crate::shared::test_region());
        let (tx, rx) = mpsc::channel();
        let wdg = Watchdog::new(
            shm.clone(),
            WatchdogParams {
                cycle_interval_ms: 0,
                stall_timeout_ms,
            },
            SupervisorHandle::new(tx),
        );
        (shm, wdg, rx)
    }

    fn beat_all(shm: &SharedRegion) {
        for role in Role::MONITORED {
            shm.wdg.beat(role);
        }
    }

    #[test]
    fn test_live_counters_not_flagged() {
        let (shm, mut wdg, _rx) = setup(50);

        for _ in 0..5 {
            beat_all(&shm);
            assert_eq!(wdg.check(), None);
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_stalled_counter_detected_after_timeout() {
        let (shm, mut wdg, _rx) = setup(50);

        beat_all(&shm);
        assert_eq!(wdg.check(), None);

        // Everyone but telemetry keeps beating.
        for _ in 0..6 {
            thread::sleep(Duration::from_millis(15));
            for role in Role::MONITORED {
                if role != Role::Telemetry {
                    shm.wdg.beat(role);
                }
            }
            if let Some(stalled) = wdg.check() {
                assert_eq!(stalled, Role::Telemetry);
                return;
            }
        }

        panic!("stall was never detected");
    }

    #[test]
    fn test_step_reports_and_exits() {
        let (_shm, mut wdg, rx) = setup(10);
        let ctl = RunControl::new();

        // Nobody beats: the first role trips once the timeout elapses.
        assert_eq!(wdg.step(&ctl), StepOutcome::Continue);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(wdg.step(&ctl), StepOutcome::Exit);

        assert!(matches!(rx.try_recv(), Ok(Event::RecoveryRequested(_))));
    }
}
