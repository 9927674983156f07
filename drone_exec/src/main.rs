//! Main drone subsystem executable entry point.
//!
//! # Architecture
//!
//! The execution methodology consists of:
//!
//!     - Parse the network endpoints from the command line
//!     - Create the shared region with its default contents
//!     - Hand the region to the supervisor, which spawns one thread per
//!       actor and supervises them until shutdown

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use log::info;
use std::env;
use std::sync::Arc;

// Internal
use comms_if::net::NetConfig;
use drone_exec::params::DroneExecParams;
use drone_exec::shared::SharedRegion;
use drone_exec::supervisor::{ShutdownCause, Supervisor};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Parameter file for the executable, relative to the working directory.
const PARAMS_PATH: &str = "params/drone_exec.toml";

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<()> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("drone_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    info!("Drone Control Subsystem Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- NETWORK CONFIGURATION ----

    let args: Vec<String> = env::args().skip(1).collect();
    let net = NetConfig::from_args(&args).wrap_err("Failed to parse the network endpoints")?;

    info!(
        "Operator at {}, command socket at {}",
        net.telemetry_addr(),
        net.flight_ctrl_addr()
    );

    // ---- LOAD PARAMETERS ----

    let params: DroneExecParams =
        util::params::load_or_default(PARAMS_PATH).wrap_err("Could not load parameters")?;

    info!("Parameters loaded");

    // ---- SHARED REGION ----

    let shm = Arc::new(SharedRegion::new(net));

    info!("Shared region initialised");

    // ---- SUPERVISION ----

    let mut supervisor = Supervisor::new(shm, params);

    // Termination signal maps to a shutdown event for the supervisor.
    let handle = supervisor.handle();
    ctrlc::set_handler(move || {
        handle.request_shutdown(ShutdownCause::OperatorSignal);
    })
    .wrap_err("Failed to install the termination handler")?;

    supervisor.run();

    info!("End of execution");

    Ok(())
}
