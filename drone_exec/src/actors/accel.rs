//! # Accelerometer Actor
//!
//! Sole writer of the acceleration triple. The sensor is simulated from the
//! current motor PWM: summed thrust on Z minus gravity, differential thrust
//! as X/Y tilt, plus Gaussian noise on every axis. The noise matters beyond
//! realism: the flight controller's stall detection relies on consecutive
//! samples differing while the sensor is alive.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::Arc;
use std::time::Duration;

use log::trace;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::params::AccelParams;
use crate::shared::{Acceleration, Motors, SharedRegion};
use crate::supervisor::RunControl;

use super::{Actor, Role, StepOutcome};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Gravitational acceleration, pulling down on Z.
///
/// Units: m/s^2
const GRAVITY: f32 = 9.81;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct Accelerometer {
    shm: Arc<SharedRegion>,
    params: AccelParams,
    rng: StdRng,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Accelerometer {
    pub fn new(shm: Arc<SharedRegion>, params: AccelParams) -> Self {
        Self {
            shm,
            params,
            rng: StdRng::from_entropy(),
        }
    }
}

impl Actor for Accelerometer {
    fn role(&self) -> Role {
        Role::Accelerometer
    }

    fn step(&mut self, ctl: &RunControl) -> StepOutcome {
        let motors = *self.shm.pwm.lock();

        let mut sample = simulate(&motors, &self.params);
        sample.x += gauss_noise(&mut self.rng, self.params.noise_xy_std);
        sample.y += gauss_noise(&mut self.rng, self.params.noise_xy_std);
        sample.z += gauss_noise(&mut self.rng, self.params.noise_z_std);

        trace!(
            "Accelerometer sample: [x: {:.6}, y: {:.6}, z: {:.6}]",
            sample.x,
            sample.y,
            sample.z
        );

        *self.shm.accel.lock() = sample;

        self.shm.wdg.beat(Role::Accelerometer);
        ctl.sleep(Duration::from_millis(self.params.cycle_interval_ms));
        StepOutcome::Continue
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Noise-free part of the sensor model.
pub fn simulate(motors: &Motors, params: &AccelParams) -> Acceleration {
    let [m0, m1, m2, m3] = motors.pwm;

    // Upward thrust (Z axis), sum of the four motors.
    let thrust = (m0 + m1 + m2 + m3) * params.max_thrust;

    // Differential thrust turns into tilt acceleration.
    let roll_acc = (m1 + m3 - m0 - m2) * (params.max_thrust * params.diff_factor);
    let pitch_acc = (m2 + m3 - m0 - m1) * (params.max_thrust * params.diff_factor);

    Acceleration {
        x: roll_acc,
        y: pitch_acc,
        z: thrust - GRAVITY,
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Zero-mean Gaussian sample via the Box-Muller transform.
fn gauss_noise(rng: &mut StdRng, stddev: f32) -> f32 {
    // Map into (0, 1] so the logarithm stays finite.
    let u1: f32 = 1.0 - rng.gen::<f32>();
    let u2: f32 = rng.gen();

    let mag = stddev * (-2.0 * u1.ln()).sqrt();
    mag * (2.0 * std::f32::consts::PI * u2).cos()
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
