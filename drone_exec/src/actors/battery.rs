//! # Battery Actor
//!
//! Sole writer of the battery charge value. Discharges while the drone is
//! doing anything other than charging, charges while in `Charge`, forces
//! `Abort` when the charge runs low, and requests a system shutdown when it
//! is exhausted.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::Arc;
use std::time::{Duration, Instant};

use comms_if::action::Action;
use log::{error, info, warn};

use crate::params::BatteryParams;
use crate::shared::SharedRegion;
use crate::supervisor::{RunControl, ShutdownCause, SupervisorHandle};

use super::{Actor, Role, StepOutcome};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct Battery {
    shm: Arc<SharedRegion>,
    params: BatteryParams,
    sup: SupervisorHandle,

    /// Time of the last charge or discharge step.
    last_step: Option<Instant>,

    /// Set once the exhaustion shutdown has been requested.
    depleted: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Battery {
    pub fn new(shm: Arc<SharedRegion>, params: BatteryParams, sup: SupervisorHandle) -> Self {
        Self {
            shm,
            params,
            sup,
            last_step: None,
            depleted: false,
        }
    }

    fn charge_tick(&mut self, now: Instant, elapsed: Duration, charge: u8) {
        if elapsed < Duration::from_millis(self.params.charge_interval_ms) {
            return;
        }
        self.last_step = Some(now);

        if charge < 100 {
            self.shm.set_battery_charge(charge + 1);
        }
        info!("Charging: battery at {}%", charge);
    }

    fn discharge_tick(&mut self, now: Instant, elapsed: Duration, charge: u8, action: Action) {
        if elapsed < Duration::from_millis(self.params.discharge_interval_ms) {
            return;
        }
        self.last_step = Some(now);

        if charge == 0 {
            if !self.depleted {
                error!("Battery charge is 0, hard system shutdown");
                self.depleted = true;
                self.sup.request_shutdown(ShutdownCause::BatteryDepleted);
            }
            return;
        }

        self.shm.set_battery_charge(charge - 1);
        info!("Discharging: battery at {}%", charge);

        // The boundary is on the pre-decrement value: a tick starting at 15%
        // does not abort, one starting at 14% does.
        if charge < self.params.low_charge_pct && action != Action::Abort {
            warn!(
                "Battery low ({}%), switching to Abort state",
                charge
            );
            *self.shm.action.write() = Action::Abort;
        }
    }
}

impl Actor for Battery {
    fn role(&self) -> Role {
        Role::Battery
    }

    fn step(&mut self, ctl: &RunControl) -> StepOutcome {
        let now = Instant::now();
        let last = *self.last_step.get_or_insert(now);
        let elapsed = now - last;

        let charge = self.shm.battery_charge();
        let action = *self.shm.action.read();

        if action == Action::Charge {
            self.charge_tick(now, elapsed, charge);
        } else {
            self.discharge_tick(now, elapsed, charge, action);
        }

        self.shm.wdg.beat(Role::Battery);
        ctl.sleep(Duration::from_micros(self.params.cycle_interval_us));
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

    fn fast_params() -> BatteryParams {
        BatteryParams {
            cycle_interval_us: 0,
            charge_interval_ms: 0,
            discharge_interval_ms: 0,
            low_charge_pct: 15,
        }
    }

    fn setup(params: BatteryParams) -> (Arc<SharedRegion>, Battery, mpsc::Receiver<Event>) {
        let shm = Arc::new(crate::shared::test_region());
        let (tx, rx) = mpsc::channel();
        let battery = Battery::new(shm.clone(), params, SupervisorHandle::new(tx));
        (shm, battery, rx)
    }

    fn run_steps(battery: &mut Battery, n: usize) {
        let ctl = RunControl::new();
        for _ in 0..n {
            battery.step(&ctl);
        }
    }

    #[test]
    fn test_discharges_while_flying() {
        let (shm, mut battery, _rx) = setup(fast_params());
        *shm.action.write() = Action::Fly;

        run_steps(&mut battery, 3);

        assert_eq!(shm.battery_charge(), 97);
    }

    #[test]
    fn test_charges_while_charging_saturating_at_100() {
        let (shm, mut battery, _rx) = setup(fast_params());
        *shm.action.write() = Action::Charge;
        shm.set_battery_charge(99);

        run_steps(&mut battery, 5);

        assert_eq!(shm.battery_charge(), 100);
    }

    #[test]
    fn test_abort_at_14_not_15() {
        let (shm, mut battery, _rx) = setup(fast_params());
        *shm.action.write() = Action::Fly;

        shm.set_battery_charge(16);
        run_steps(&mut battery, 2);
        // Tick started at 15%: no abort yet.
        assert_eq!(shm.battery_charge(), 14);
        assert_eq!(*shm.action.read(), Action::Fly);

        // Tick starting at 14%: abort.
        run_steps(&mut battery, 1);
        assert_eq!(*shm.action.read(), Action::Abort);
    }

    #[test]
    fn test_no_abort_when_already_aborting() {
        let (shm, mut battery, _rx) = setup(fast_params());
        *shm.action.write() = Action::Abort;
        shm.set_battery_charge(10);

        run_steps(&mut battery, 3);

        assert_eq!(*shm.action.read(), Action::Abort);
        assert_eq!(shm.battery_charge(), 7);
    }

    #[test]
    fn test_exhaustion_requests_shutdown_once() {
        let (shm, mut battery, rx) = setup(fast_params());
        *shm.action.write() = Action::Fly;
        shm.set_battery_charge(1);

        run_steps(&mut battery, 5);

        assert_eq!(shm.battery_charge(), 0);
        assert!(matches!(
            rx.try_recv(),
            Ok(Event::ShutdownRequested(ShutdownCause::BatteryDepleted))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_heartbeat_increments() {
        let (shm, mut battery, _rx) = setup(fast_params());

        run_steps(&mut battery, 4);

        let idx = Role::MONITORED
            .iter()
            .position(|r| *r == Role::Battery)
            .unwrap();
        assert_eq!(shm.wdg.snapshot()[idx], 4);
    }
}
