//! # Drone Control Subsystem
//!
//! A simulated drone consisting of cooperating actors sharing a single
//! in-memory region:
//!
//! - `battery`: owns the charge value, forces Abort on low charge.
//! - `accel`: owns the acceleration triple, simulated from motor PWM.
//! - `flight_ctrl`: owns the motor PWM, drives the action state machine and
//!   listens for operator commands over UDP.
//! - `gps_ctrl`: produces NMEA sample characters into the shared ring.
//! - `telemetry`: aggregates snapshots and streams them to the operator
//!   over TCP, consuming the NMEA ring.
//! - `watchdog`: detects stalled actors via heartbeat counters.
//!
//! The [`supervisor`] spawns each actor on its own thread, respawns crashed
//! actors, and on a watchdog report reinitialises the region's
//! synchronisation primitives in place.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod actors;
pub mod params;
pub mod shared;
pub mod supervisor;
pub mod sync;
