//! # Shared Region
//!
//! The single in-memory region visible to every actor. Each mutable field
//! has exactly one writing actor:
//!
//! | Field     | Writer            | Discipline                 |
//! |-----------|-------------------|----------------------------|
//! | `action`  | flight controller | reader/writer lock         |
//! | `accel`   | accelerometer     | single-writer mutex        |
//! | `pwm`     | flight controller | single-writer mutex        |
//! | `gps`     | GPS producer      | bounded buffer             |
//! | `battery` | battery           | atomic, acquire/release    |
//! | `wdg`     | every actor (own counter only) | relaxed atomics |
//!
//! (`action` is additionally written by the battery and telemetry actors
//! for their safety transitions, which is why it carries the RW lock and
//! not a single-writer mutex.)
//!
//! The supervisor owns creation and the authority to reinitialise the
//! synchronisation primitives; [`SharedRegion::reinit_locks`] restores every
//! primitive to its initial state without touching the data fields.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use comms_if::action::Action;
use comms_if::net::NetConfig;

use crate::actors::Role;
use crate::sync::{MutexCell, NmeaRing, RwLock};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Acceleration on all axes.
///
/// Units: m/s^2
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Acceleration {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// PWM ratio of the four motors, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Motors {
    pub pwm: [f32; 4],
}

/// Per-actor heartbeat counters, monotonic, read by the watchdog.
#[derive(Debug, Default)]
pub struct Heartbeats {
    battery: AtomicU32,
    accel: AtomicU32,
    gps_ctrl: AtomicU32,
    flight_ctrl: AtomicU32,
    telemetry: AtomicU32,
}

/// The shared state substrate created by the supervisor.
pub struct SharedRegion {
    /// Network endpoints, written once before the actors spawn.
    pub net: NetConfig,

    /// Heartbeat counters.
    pub wdg: Heartbeats,

    /// The drone's current action.
    pub action: RwLock<Action>,

    /// Latest acceleration sample.
    pub accel: MutexCell<Acceleration>,

    /// Current motor PWM demands.
    pub pwm: MutexCell<Motors>,

    /// NMEA character ring, GPS producer to telemetry consumer.
    pub gps: NmeaRing,

    /// Battery charge in percent, range `0..=100`.
    battery: AtomicU8,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Motors {
    /// Mean PWM over the four motors.
    pub fn mean(&self) -> f32 {
        util::maths::mean(&self.pwm)
    }
}

impl Heartbeats {
    /// Increment the counter of the given role. Only the role's own actor
    /// may call this for its role.
    pub fn beat(&self, role: Role) {
        if let Some(counter) = self.counter(role) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshot of every monitored counter.
    pub fn snapshot(&self) -> [u32; Role::MONITORED.len()] {
        Role::MONITORED.map(|role| match self.counter(role) {
            Some(counter) => counter.load(Ordering::Relaxed),
            None => 0,
        })
    }

    fn counter(&self, role: Role) -> Option<&AtomicU32> {
        match role {
            Role::Battery => Some(&self.battery),
            Role::Accelerometer => Some(&self.accel),
            Role::GpsCtrl => Some(&self.gps_ctrl),
            Role::FlightCtrl => Some(&self.flight_ctrl),
            Role::Telemetry => Some(&self.telemetry),
            // The watchdog observes the counters, it has none of its own.
            Role::Watchdog => None,
        }
    }
}

impl SharedRegion {
    /// Create the region with its default contents: full battery, `Idle`
    /// action, zero acceleration, stopped motors, empty ring.
    pub fn new(net: NetConfig) -> Self {
        Self {
            net,
            wdg: Heartbeats::default(),
            action: RwLock::new(Action::Idle),
            accel: MutexCell::new(Acceleration::default()),
            pwm: MutexCell::new(Motors::default()),
            gps: NmeaRing::new(),
            battery: AtomicU8::new(100),
        }
    }

    /// Current battery charge in percent.
    ///
    /// Acquire ordering pairs with the battery actor's release store.
    pub fn battery_charge(&self) -> u8 {
        self.battery.load(Ordering::Acquire)
    }

    /// Store a new battery charge. Only the battery actor writes this.
    pub fn set_battery_charge(&self, charge: u8) {
        self.battery.store(charge, Ordering::Release);
    }

    /// Force-post every synchronisation primitive so threads parked in
    /// waits return and can observe their stop flag. Counts are raised only
    /// by as much as it takes to release the current waiters; nothing is
    /// restored to a canonical value and no data field is touched.
    ///
    /// This is the unblocking half of recovery; [`SharedRegion::
    /// reinit_locks`] is the restoring half, run once the actor threads
    /// have been joined.
    pub fn unblock_waiters(&self) {
        self.action.force_post_all();
        self.accel.force_post_all();
        self.pwm.force_post_all();
        self.gps.force_post_all();
    }

    /// Reinitialise every synchronisation primitive in place, preserving the
    /// data fields.
    ///
    /// Must only be called by the supervisor once all actor threads have
    /// been told to stop; see the `sync` module notes.
    pub fn reinit_locks(&self) {
        self.action.reinit();
        self.accel.reinit();
        self.pwm.reinit();
        self.gps.reinit_locks();
    }
}

// ---------------------------------------------------------------------------
// TEST SUPPORT
// ---------------------------------------------------------------------------

/// A default region over loopback endpoints, for unit tests.
#[cfg(test)]
pub fn test_region() -> SharedRegion {
    SharedRegion::new(NetConfig {
        operator_ip: "127.0.0.1".parse().unwrap(),
        telemetry_port: 9000,
        drone_ip: "127.0.0.1".parse().unwrap(),
        flight_ctrl_port: 9001,
    })
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_contents() {
        let shm = test_region();

        assert_eq!(shm.battery_charge(), 100);
        assert_eq!(*shm.action.read(), Action::Idle);
        assert_eq!(*shm.accel.lock(), Acceleration::default());
        assert_eq!(*shm.pwm.lock(), Motors::default());
        assert_eq!(shm.gps.pending(), 0);
    }

    #[test]
    fn test_reinit_preserves_data_fields() {
        let shm = test_region();

        *shm.action.write() = Action::Fly;
        shm.set_battery_charge(42);
        shm.pwm.lock().pwm = [0.25; 4];
        shm.accel.lock().z = -9.81;

        // Lose a lock the way a crashed actor would, then recover.
        std::mem::forget(shm.pwm.lock());
        shm.reinit_locks();

        assert_eq!(*shm.action.read(), Action::Fly);
        assert_eq!(shm.battery_charge(), 42);
        assert_eq!(shm.pwm.lock().pwm, [0.25; 4]);
        assert_eq!(shm.accel.lock().z, -9.81);
    }

    #[test]
    fn test_unblock_waiters_releases_without_resetting() {
        use std::sync::Arc;
        use std::time::{Duration, Instant};

        let shm = Arc::new(test_region());

        // Pending GPS characters must survive an unblock (a reinit would
        // abandon them).
        shm.gps.produce(b'a', Duration::from_millis(10)).unwrap();
        shm.gps.produce(b'b', Duration::from_millis(10)).unwrap();

        // A lock lost by a crashed actor, and a thread parked behind it.
        std::mem::forget(shm.pwm.lock());
        let waiter = {
            let shm = shm.clone();
            std::thread::spawn(move || {
                shm.pwm.lock().pwm[0] = 0.5;
            })
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while !waiter.is_finished() {
            assert!(Instant::now() < deadline, "waiter was never released");
            shm.unblock_waiters();
            std::thread::sleep(Duration::from_millis(10));
        }
        waiter.join().unwrap();

        assert_eq!(shm.pwm.lock().pwm[0], 0.5);
        assert_eq!(shm.gps.pending(), 2);
    }

    #[test]
    fn test_heartbeats() {
        let hb = Heartbeats::default();

        hb.beat(Role::Battery);
        hb.beat(Role::Battery);
        hb.beat(Role::Telemetry);
        hb.beat(Role::Watchdog);

        let snap = hb.snapshot();
        let battery_idx = Role::MONITORED
            .iter()
            .position(|r| *r == Role::Battery)
            .unwrap();
        let telemetry_idx = Role::MONITORED
            .iter()
            .position(|r| *r == Role::Telemetry)
            .unwrap();

        assert_eq!(snap[battery_idx], 2);
        assert_eq!(snap[telemetry_idx], 1);
        assert_eq!(snap.iter().sum::<u32>(), 3);
    }
}
