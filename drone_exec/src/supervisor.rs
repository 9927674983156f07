//! # Supervisor
//!
//! Process-level parent of the subsystem. Creates the shared region, spawns
//! one thread per actor, respawns actors that die, and reacts to two
//! escalations:
//!
//! - a watchdog recovery request: every actor is stopped, the region's
//!   synchronisation primitives are reinitialised in place (data fields
//!   preserved), and all actors are respawned;
//! - a shutdown request (operator signal or battery exhaustion): every
//!   actor is stopped and the run ends.
//!
//! The signal-driven supervision of a forking design maps onto a single
//! event channel here: actor threads report their own exit, the watchdog
//! reports stalls, and the Ctrl-C handler reports the termination request.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use util::raise_error;

use crate::actors::{
    accel::Accelerometer, battery::Battery, flight_ctrl::FlightCtrl, gps_ctrl::GpsCtrl,
    telemetry::Telemetry, watchdog::Watchdog, Actor, Role, StepOutcome,
};
use crate::params::DroneExecParams;
use crate::shared::SharedRegion;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Why the system is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// Termination requested from outside (Ctrl-C).
    OperatorSignal,

    /// The battery hit zero; the whole subsystem powers off.
    BatteryDepleted,
}

/// Lifecycle events delivered to the supervisor's main loop.
#[derive(Debug)]
pub enum Event {
    /// An actor's thread ended, by panic or by its own choice.
    ActorExited(Role),

    /// The watchdog found a stalled actor.
    RecoveryRequested(Role),

    /// Stop everything.
    ShutdownRequested(ShutdownCause),
}

// ---------------------------------------------------------------------------
// RUN CONTROL
// ---------------------------------------------------------------------------

/// Stop flag shared by one generation of actors.
///
/// Actors poll it between steps and sleep through it so a stop request cuts
/// a cadenced sleep short.
pub struct RunControl {
    stopped: Mutex<bool>,
    cvar: Condvar,
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    pub fn should_run(&self) -> bool {
        !*self.lock_stopped()
    }

    pub fn request_stop(&self) {
        *self.lock_stopped() = true;
        self.cvar.notify_all();
    }

    /// Sleep for `duration`, returning early (with `false`) if a stop is
    /// requested in the meantime.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;

        let mut stopped = self.lock_stopped();
        loop {
            if *stopped {
                return false;
            }

            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(r) if !r.is_zero() => r,
                _ => return true,
            };

            let (guard, _) = self
                .cvar
                .wait_timeout(stopped, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            stopped = guard;
        }
    }

    fn lock_stopped(&self) -> MutexGuard<bool> {
        self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// SUPERVISOR HANDLE
// ---------------------------------------------------------------------------

/// A cloneable channel into the supervisor, given to the actors that need
/// to escalate (battery, watchdog) and to the termination signal handler.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: Sender<Event>,
}

impl SupervisorHandle {
    pub fn new(tx: Sender<Event>) -> Self {
        Self { tx }
    }

    pub fn request_recovery(&self, stalled: Role) {
        self.tx.send(Event::RecoveryRequested(stalled)).ok();
    }

    pub fn request_shutdown(&self, cause: ShutdownCause) {
        self.tx.send(Event::ShutdownRequested(cause)).ok();
    }

    fn actor_exited(&self, role: Role) {
        self.tx.send(Event::ActorExited(role)).ok();
    }
}

// ---------------------------------------------------------------------------
// SUPERVISOR
// ---------------------------------------------------------------------------

pub struct Supervisor {
    shm: Arc<SharedRegion>,
    params: DroneExecParams,

    tx: Sender<Event>,
    rx: Receiver<Event>,

    /// Stop control of the current actor generation.
    ctl: Arc<RunControl>,

    threads: Vec<(Role, JoinHandle<()>)>,
}

impl Supervisor {
    pub fn new(shm: Arc<SharedRegion>, params: DroneExecParams) -> Self {
        let (tx, rx) = channel();

        Self {
            shm,
            params,
            tx,
            rx,
            ctl: Arc::new(RunControl::new()),
            threads: Vec::new(),
        }
    }

    /// A handle for escalations from outside the actor set (the termination
    /// signal handler in `main`).
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle::new(self.tx.clone())
    }

    /// Spawn all actors and supervise them until a shutdown request.
    pub fn run(&mut self) {
        info!("Spawning actors");
        for role in Role::ALL {
            self.spawn(role);
        }

        let cause = loop {
            // The supervisor keeps its own sender, so the channel cannot
            // close while we are running.
            let event = match self.rx.recv() {
                Ok(e) => e,
                Err(_) => break ShutdownCause::OperatorSignal,
            };

            match event {
                Event::ActorExited(role) => {
                    warn!("{} actor terminated, respawning", role);
                    self.reap(role);
                    self.spawn(role);
                }
                Event::RecoveryRequested(stalled) => {
                    warn!(
                        "Watchdog reported {} stalled, recovering the region",
                        stalled
                    );
                    if let Some(cause) = self.recover() {
                        break cause;
                    }
                }
                Event::ShutdownRequested(cause) => break cause,
            }
        };

        info!("Shutting down: {:?}", cause);
        self.stop_all();
        info!("All actors stopped");
    }

    /// Stop everything, reinitialise the region's locks in place, respawn.
    ///
    /// Two-phase: first every parked waiter is force-posted free so it can
    /// observe the stop flag and drain out, then, with all threads joined,
    /// the primitives are reinitialised to canonical counts. Data fields
    /// survive both phases.
    fn recover(&mut self) -> Option<ShutdownCause> {
        self.ctl.request_stop();
        self.shm.unblock_waiters();
        self.join_all();

        // The stopping actors each reported their exit; those are stale
        // now. A shutdown request racing the recovery must still win.
        let mut shutdown = None;
        while let Ok(event) = self.rx.try_recv() {
            if let Event::ShutdownRequested(cause) = event {
                shutdown = Some(cause);
            }
        }
        if shutdown.is_some() {
            return shutdown;
        }

        self.shm.reinit_locks();
        self.ctl = Arc::new(RunControl::new());

        info!("Region recovered, respawning all actors");
        for role in Role::ALL {
            self.spawn(role);
        }

        None
    }

    fn stop_all(&mut self) {
        self.ctl.request_stop();
        self.shm.unblock_waiters();
        self.join_all();
        while self.rx.try_recv().is_ok() {}
    }

    fn spawn(&mut self, role: Role) {
        let actor = build_actor(
            role,
            self.shm.clone(),
            &self.params,
            SupervisorHandle::new(self.tx.clone()),
        );
        let ctl = self.ctl.clone();
        let handle = SupervisorHandle::new(self.tx.clone());

        let join_handle = match thread::Builder::new()
            .name(role.name().to_lowercase())
            .spawn(move || run_actor(actor, &ctl, &handle))
        {
            Ok(h) => h,
            Err(e) => raise_error!("Could not spawn the {} actor: {}", role, e),
        };

        info!("Spawned {} actor", role);
        self.threads.push((role, join_handle));
    }

    /// Collect the finished thread of an exited actor.
    fn reap(&mut self, role: Role) {
        if let Some(pos) = self.threads.iter().position(|(r, _)| *r == role) {
            let (_, handle) = self.threads.remove(pos);
            handle.join().ok();
        }
    }

    fn join_all(&mut self) {
        for (_, handle) in self.threads.drain(..) {
            handle.join().ok();
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// The per-thread actor loop. A panic inside a step is contained here so
/// one crashing actor never takes the subsystem down; the exit is reported
/// either way and the supervisor decides what happens next.
fn run_actor(mut actor: Box<dyn Actor>, ctl: &RunControl, sup: &SupervisorHandle) {
    let role = actor.role();

    let result = catch_unwind(AssertUnwindSafe(|| {
        while ctl.should_run() {
            if actor.step(ctl) == StepOutcome::Exit {
                break;
            }
        }
    }));

    if result.is_err() {
        error!("{} actor panicked", role);
    }

    sup.actor_exited(role);
}

/// Construct the actor filling the given role.
fn build_actor(
    role: Role,
    shm: Arc<SharedRegion>,
    params: &DroneExecParams,
    sup: SupervisorHandle,
) -> Box<dyn Actor> {
    match role {
        Role::Battery => Box::new(Battery::new(shm, params.battery.clone(), sup)),
        Role::Accelerometer => Box::new(Accelerometer::new(shm, params.accel.clone())),
        Role::GpsCtrl => Box::new(GpsCtrl::new(shm, params.gps.clone())),
        Role::FlightCtrl => Box::new(FlightCtrl::new(shm, params.flight.clone())),
        Role::Telemetry => Box::new(Telemetry::new(shm, params.telemetry.clone())),
        Role::Watchdog => Box::new(Watchdog::new(shm, params.wdg.clone(), sup)),
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
