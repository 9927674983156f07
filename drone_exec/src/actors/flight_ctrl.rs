//! # Flight Controller Actor
//!
//! Central driver of the action state machine and sole writer of the motor
//! PWM. Listens for operator commands on a non-blocking UDP socket, closes
//! the loop between the accelerometer and the motors in `Fly`, ramps the
//! motors down in `Land`, and handles the `Abort` safety chain.
//!
//! The `Abort` branch deliberately falls through into the `Land` behavior
//! within the same iteration: an aborting drone keeps landing until it is at
//! rest, and only then settles into `Charge`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::{Duration, Instant};

use comms_if::action::{Action, ACTION_WIRE_SIZE};
use log::{debug, error, info, warn};
use util::maths::clamp;

use crate::params::FlightCtrlParams;
use crate::shared::{Acceleration, SharedRegion};
use crate::supervisor::RunControl;

use super::{Actor, Role, StepOutcome};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct FlightCtrl {
    shm: Arc<SharedRegion>,
    params: FlightCtrlParams,

    /// Operator command socket, `None` until bound.
    socket: Option<UdpSocket>,

    /// Time of the last bind attempt, gating retries.
    last_bind_attempt: Option<Instant>,

    /// Action observed on the previous iteration, drives the state banner
    /// and the `Abort` revert write.
    last_action: Action,

    /// Acceleration seen on the previous `Fly` iteration.
    last_accel: Acceleration,

    /// Consecutive `Fly` iterations with an unchanged acceleration sample.
    fly_timeout: u8,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl FlightCtrl {
    pub fn new(shm: Arc<SharedRegion>, params: FlightCtrlParams) -> Self {
        Self {
            shm,
            params,
            socket: None,
            last_bind_attempt: None,
            last_action: Action::Reserved,
            last_accel: Acceleration::default(),
            fly_timeout: 0,
        }
    }

    /// Try to bind the command socket, no more often than the retry gate
    /// allows.
    fn ensure_bound(&mut self) {
        if self.socket.is_some() {
            return;
        }

        if let Some(last) = self.last_bind_attempt {
            if last.elapsed() < Duration::from_millis(self.params.bind_retry_ms) {
                return;
            }
        }
        self.last_bind_attempt = Some(Instant::now());

        info!("Connection is not initialised, trying to bind...");
        match try_bind(&self.shm) {
            Ok(socket) => {
                info!("Socket bind complete");
                self.socket = Some(socket);
            }
            Err(e) => warn!("Unable to bind for listening: {}", e),
        }
    }

    /// Read at most one operator command, without blocking.
    ///
    /// Communication errors other than would-block and interrupt force
    /// `Abort` and flag a re-bind.
    fn poll_command(&mut self) -> Option<Action> {
        let socket = self.socket.as_ref()?;

        // Headroom beyond the wire size so an oversized datagram is seen as
        // such rather than truncated to a valid-looking command.
        let mut buf = [0u8; ACTION_WIRE_SIZE * 2];

        let mut fatal = false;
        let mut command = None;

        loop {
            match socket.recv_from(&mut buf) {
                Ok((n, _)) if n == ACTION_WIRE_SIZE => {
                    match Action::from_wire(&buf[..n]) {
                        Ok(cmd) => {
                            info!("Obtained command from operator: {}", cmd);
                            command = Some(cmd);
                        }
                        Err(e) => warn!("Discarding operator datagram: {}", e),
                    }
                    break;
                }
                // Commands are exactly one action tag; anything else is not
                // a command.
                Ok((n, _)) => {
                    warn!("Discarding operator datagram of {} bytes", n);
                    break;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Command socket error, aborting: {}", e);
                    fatal = true;
                    break;
                }
            }
        }

        if fatal {
            *self.shm.action.write() = Action::Abort;
            self.socket = None;
        }

        command
    }

    /// One pass of the state machine, §state behavior per current action.
    fn control_cycle(&mut self, operator_cmd: Option<Action>) {
        let current_action = *self.shm.action.read();

        if current_action != self.last_action {
            info!("Current state: {}", current_action);
            self.last_action = current_action;
        }

        match current_action {
            Action::Fly => self.fly_cycle(operator_cmd),
            Action::SampleGps => {
                self.accept_command(operator_cmd, &[Action::Fly, Action::Abort]);
            }
            Action::Idle => {
                self.accept_command(
                    operator_cmd,
                    &[Action::Fly, Action::Charge, Action::Abort],
                );
            }
            Action::Charge => self.charge_cycle(operator_cmd),
            Action::Abort | Action::Land => {
                self.abort_land_cycle(current_action, operator_cmd)
            }
            other => {
                error!(
                    "Unexpected state value {}, switching to Abort due to undefined behavior",
                    other
                );
                *self.shm.action.write() = Action::Abort;
            }
        }
    }

    /// Write the operator command into the action if it is in the eligible
    /// set. Returns true if a transition was made.
    fn accept_command(&mut self, operator_cmd: Option<Action>, eligible: &[Action]) -> bool {
        match operator_cmd {
            Some(cmd) if cmd.is_one_of(eligible) => {
                *self.shm.action.write() = cmd;
                true
            }
            _ => false,
        }
    }

    /// `Fly`: ramp up below the fly threshold, stabilise against the sensed
    /// acceleration, detect a stalled accelerometer.
    fn fly_cycle(&mut self, operator_cmd: Option<Action>) {
        let mut motors = *self.shm.pwm.lock();
        let avg_pwm = motors.mean();

        // Below the threshold, keep climbing.
        if avg_pwm < self.params.fly_thresh {
            for m in motors.pwm.iter_mut() {
                *m = (*m + self.params.delta_increase).min(1.0);
            }
        }

        let accel = *self.shm.accel.lock();

        // Once in the air, counter the sensed tilt on every motor.
        if avg_pwm >= self.params.stabilisation_thresh {
            for m in motors.pwm.iter_mut() {
                *m = clamp(&(*m - (accel.x + accel.y)), &0.0, &1.0);
            }
        }

        *self.shm.pwm.lock() = motors;

        // A live accelerometer never produces two identical samples thanks
        // to its noise floor; repeats mean the sensor has stopped.
        if accel == self.last_accel {
            self.fly_timeout += 1;
            if self.fly_timeout >= self.params.max_fly_timeout {
                error!(
                    "Too much identical accelerometer data, unable to predict \
                     current drone movement. Aborting..."
                );
                *self.shm.action.write() = Action::Abort;
                self.fly_timeout = 0;
            }
        } else {
            self.fly_timeout = 0;
        }
        self.last_accel = accel;

        self.accept_command(operator_cmd, &[Action::SampleGps, Action::Land, Action::Abort]);
    }

    /// `Charge`: the operator is only heard once the battery has recovered.
    fn charge_cycle(&mut self, operator_cmd: Option<Action>) {
        match operator_cmd {
            Some(cmd) if cmd.is_one_of(&[Action::Idle, Action::Abort]) => {
                if self.shm.battery_charge() >= self.params.low_charge_pct {
                    *self.shm.action.write() = cmd;
                } else {
                    info!(
                        "Charging: battery below {}%, ignoring operator commands",
                        self.params.low_charge_pct
                    );
                }
            }
            _ => (),
        }
    }

    /// `Abort` and `Land`.
    ///
    /// The `Abort` half either diverts to `Charge` (low battery) or writes
    /// back the previously observed action and continues into the `Land`
    /// half within the same iteration, keeping the fall-through
    /// chain.
    fn abort_land_cycle(&mut self, current_action: Action, operator_cmd: Option<Action>) {
        if current_action == Action::Abort {
            if self.shm.battery_charge() < self.params.low_charge_pct {
                // Grounded sooner or later anyway; charge immediately.
                *self.shm.action.write() = Action::Charge;
                return;
            }

            info!("Changing to previous action");
            *self.shm.action.write() = self.last_action;
            // ...and fall through into the landing behavior.
        }

        if self.accept_command(operator_cmd, &[Action::Fly, Action::Abort]) {
            return;
        }

        let mut motors = self.shm.pwm.lock();

        for m in motors.pwm.iter_mut() {
            *m = (*m - self.params.delta_decrease).max(0.0);
        }
        let avg = motors.mean();
        debug!("Landing: average motor PWM: {:.4}", avg);

        if avg == 0.0 {
            let mut action = self.shm.action.write();
            if current_action == Action::Abort {
                info!("Landing while Abort: set to Charge");
                *action = Action::Charge;
            } else {
                info!("Landing: set to Idle");
                *action = Action::Idle;
            }
        }
    }
}

impl Actor for FlightCtrl {
    fn role(&self) -> Role {
        Role::FlightCtrl
    }

    fn step(&mut self, ctl: &RunControl) -> StepOutcome {
        self.ensure_bound();
        let operator_cmd = self.poll_command();

        self.control_cycle(operator_cmd);

        self.shm.wdg.beat(Role::FlightCtrl);
        ctl.sleep(Duration::from_millis(self.params.cycle_interval_ms));
        StepOutcome::Continue
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Bind the non-blocking UDP command socket at the configured endpoint.
fn try_bind(shm: &SharedRegion) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind(shm.net.flight_ctrl_addr())?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
