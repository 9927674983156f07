//! # Network Configuration
//!
//! Endpoint configuration shared by the drone and operator executables. Both
//! binaries take the same four positional arguments:
//!
//! ```text
//! <operator_ip> <telemetry_port> <drone_ip> <flight_ctrl_port>
//! ```
//!
//! Telemetry flows drone -> operator over TCP, commands flow operator ->
//! drone over UDP.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::net::{Ipv4Addr, SocketAddrV4};
use thiserror::Error;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Network endpoints of the system.
///
/// Written once during startup, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetConfig {
    /// Address the operator's telemetry TCP server listens on.
    pub operator_ip: Ipv4Addr,

    /// Port of the operator's telemetry TCP server.
    pub telemetry_port: u16,

    /// Address the drone's flight controller binds its UDP socket to.
    pub drone_ip: Ipv4Addr,

    /// Port of the flight controller's UDP command socket.
    pub flight_ctrl_port: u16,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors raised while parsing the network configuration from the command
/// line.
#[derive(Debug, Error)]
pub enum NetConfigError {
    #[error(
        "Expected 4 arguments \
         (<operator_ip> <telemetry_port> <drone_ip> <flight_ctrl_port>), found {0}"
    )]
    WrongArgCount(usize),

    #[error("Invalid IPv4 address {0:?}")]
    InvalidIp(String),

    #[error("Invalid port {0:?}")]
    InvalidPort(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl NetConfig {
    /// Build the configuration from the executable's arguments, program name
    /// excluded.
    pub fn from_args(args: &[String]) -> Result<Self, NetConfigError> {
        if args.len() != 4 {
            return Err(NetConfigError::WrongArgCount(args.len()));
        }

        Ok(Self {
            operator_ip: parse_ip(&args[0])?,
            telemetry_port: parse_port(&args[1])?,
            drone_ip: parse_ip(&args[2])?,
            flight_ctrl_port: parse_port(&args[3])?,
        })
    }

    /// Endpoint of the operator's telemetry TCP server.
    pub fn telemetry_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.operator_ip, self.telemetry_port)
    }

    /// Endpoint of the flight controller's UDP command socket.
    pub fn flight_ctrl_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.drone_ip, self.flight_ctrl_port)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn parse_ip(s: &str) -> Result<Ipv4Addr, NetConfigError> {
    s.parse().map_err(|_| NetConfigError::InvalidIp(s.into()))
}

fn parse_port(s: &str) -> Result<u16, NetConfigError> {
    s.parse().map_err(|_| NetConfigError::InvalidPort(s.into()))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
