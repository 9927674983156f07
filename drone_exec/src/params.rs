//! # Drone Executable Parameters
//!
//! Timing and threshold parameters for every actor. Defaults carry the
//! baseline simulation values so the executable runs without a parameter
//! file; a TOML file may override any subset.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the drone executable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DroneExecParams {
    pub battery: BatteryParams,
    pub accel: AccelParams,
    pub flight: FlightCtrlParams,
    pub gps: GpsParams,
    pub telemetry: TelemetryParams,
    pub wdg: WatchdogParams,
}

/// Parameters for the battery actor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatteryParams {
    /// Period of one battery iteration.
    ///
    /// Units: microseconds
    pub cycle_interval_us: u64,

    /// Time between charge increments while in `Charge`.
    ///
    /// Units: milliseconds
    pub charge_interval_ms: u64,

    /// Time between charge decrements in every other state.
    ///
    /// Units: milliseconds
    pub discharge_interval_ms: u64,

    /// Charge below which the battery forces `Abort`.
    ///
    /// Units: percent
    pub low_charge_pct: u8,
}

/// Parameters for the accelerometer actor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccelParams {
    /// Period of one accelerometer iteration.
    ///
    /// Units: milliseconds
    pub cycle_interval_ms: u64,

    /// Upward acceleration with all four motors at full PWM.
    ///
    /// Units: m/s^2
    pub max_thrust: f32,

    /// Motor imbalance contribution to X/Y tilt.
    pub diff_factor: f32,

    /// Standard deviation of the X/Y axis noise.
    ///
    /// Units: m/s^2
    pub noise_xy_std: f32,

    /// Standard deviation of the Z axis noise.
    ///
    /// Units: m/s^2
    pub noise_z_std: f32,
}

/// Parameters for the flight controller actor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlightCtrlParams {
    /// Period of one flight controller iteration.
    ///
    /// Units: milliseconds
    pub cycle_interval_ms: u64,

    /// Minimum time between UDP bind attempts while uninitialised.
    ///
    /// Units: milliseconds
    pub bind_retry_ms: u64,

    /// Per-iteration PWM increase while climbing.
    pub delta_increase: f32,

    /// Per-iteration PWM decrease while landing.
    pub delta_decrease: f32,

    /// Mean PWM below which the motors are driven up in `Fly`.
    pub fly_thresh: f32,

    /// Mean PWM at or above which acceleration feedback stabilises the
    /// motors.
    pub stabilisation_thresh: f32,

    /// Consecutive identical acceleration samples tolerated in `Fly` before
    /// the controller assumes a stalled accelerometer and aborts.
    pub max_fly_timeout: u8,

    /// Charge below which `Abort` turns into `Charge` and `Charge` ignores
    /// the operator.
    ///
    /// Units: percent
    pub low_charge_pct: u8,
}

/// Parameters for the GPS producer actor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GpsParams {
    /// Period of one producer iteration (one sample sentence).
    ///
    /// Units: milliseconds
    pub cycle_interval_ms: u64,

    /// How long to wait for a free ring slot before abandoning the current
    /// sample.
    ///
    /// Units: milliseconds
    pub produce_timeout_ms: u64,
}

/// Parameters for the telemetry actor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryParams {
    /// Period of one telemetry iteration.
    ///
    /// Units: milliseconds
    pub cycle_interval_ms: u64,

    /// How long to wait for GPS characters before reporting no fix.
    ///
    /// Units: milliseconds
    pub gps_wait_timeout_ms: u64,

    /// Upper bound on the size of one telemetry frame.
    ///
    /// Units: bytes
    pub frame_budget: usize,
}

/// Parameters for the watchdog actor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogParams {
    /// Period of one watchdog iteration.
    ///
    /// Units: milliseconds
    pub cycle_interval_ms: u64,

    /// Heartbeat silence after which an actor is declared stalled.
    ///
    /// Units: milliseconds
    pub stall_timeout_ms: u64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for BatteryParams {
    fn default() -> Self {
        Self {
            cycle_interval_us: 100,
            charge_interval_ms: 500,
            discharge_interval_ms: 2000,
            low_charge_pct: 15,
        }
    }
}

impl Default for AccelParams {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 10,
            // 2g max upward acceleration.
            max_thrust: 19.62,
            diff_factor: 0.2,
            noise_xy_std: 0.02,
            noise_z_std: 0.05,
        }
    }
}

impl Default for FlightCtrlParams {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 50,
            bind_retry_ms: 2000,
            delta_increase: 0.005,
            delta_decrease: 0.01,
            fly_thresh: 0.7,
            stabilisation_thresh: 0.5,
            max_fly_timeout: 10,
            low_charge_pct: 15,
        }
    }
}

impl Default for GpsParams {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 1000,
            produce_timeout_ms: 1000,
        }
    }
}

impl Default for TelemetryParams {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 10,
            gps_wait_timeout_ms: 5000,
            frame_budget: 512,
        }
    }
}

impl Default for WatchdogParams {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 100,
            stall_timeout_ms: 2000,
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_file_overrides_defaults() {
        let params: DroneExecParams = toml::from_str(
            r#"
            [battery]
            discharge_interval_ms = 100
            "#,
        )
        .unwrap();

        assert_eq!(params.battery.discharge_interval_ms, 100);
        assert_eq!(params.battery.charge_interval_ms, 500);
        assert_eq!(params.flight.cycle_interval_ms, 50);
    }
}
