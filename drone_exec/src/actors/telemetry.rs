//! # Telemetry Actor
//!
//! TCP client to the operator console. Every tick it composes one ASCII
//! frame of newline-delimited fragments and sends it in a single write.
//! Delivery is best-effort in two senses: the ACCEL and MOTORS fragments
//! are only included when their try-locks succeed, and a failed send just
//! closes the connection and retries on the next tick.
//!
//! Telemetry is the only consumer of the GPS ring. While the drone is in
//! `SampleGPS` each frame carries a `GPS { ... }` block drained from the
//! ring up to one complete sentence; five seconds without a character is
//! reported as `NO FIX.` and escalates to `Abort`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::fmt::Write as _;
use std::io::Write as _;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use comms_if::action::Action;
use log::{debug, error, info, warn};

use crate::params::TelemetryParams;
use crate::shared::SharedRegion;
use crate::supervisor::RunControl;
use crate::sync::ConsumeError;

use super::{Actor, Role, StepOutcome};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct Telemetry {
    shm: Arc<SharedRegion>,
    params: TelemetryParams,

    /// Connection to the operator, `None` until (re)connected.
    stream: Option<TcpStream>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Telemetry {
    pub fn new(shm: Arc<SharedRegion>, params: TelemetryParams) -> Self {
        Self {
            shm,
            params,
            stream: None,
        }
    }

    fn try_connect(&mut self) -> bool {
        let addr = self.shm.net.telemetry_addr();
        debug!("Trying TCP connect to {}...", addr);

        match TcpStream::connect(addr) {
            Ok(stream) => {
                info!("Connected to operator");
                self.stream = Some(stream);
                true
            }
            Err(e) => {
                debug!("Telemetry connect failed: {}", e);
                false
            }
        }
    }

    /// Compose one telemetry frame from the current shared state.
    ///
    /// Draining the GPS block can observe a producer stall, in which case
    /// this appends `NO FIX.` and transitions the action to `Abort`.
    fn compose_frame(&self, ctl: &RunControl) -> String {
        let mut msg = String::with_capacity(self.params.frame_budget);

        let battery = self.shm.battery_charge();
        let _ = writeln!(msg, "BAT = {}%", battery);

        if let Some(accel) = self.shm.accel.try_lock() {
            let _ = writeln!(
                msg,
                "ACCEL = (x: {:.6}, y: {:.6}, z: {:.6})",
                accel.x, accel.y, accel.z
            );
        }

        if let Some(motors) = self.shm.pwm.try_lock() {
            let _ = writeln!(
                msg,
                "MOTORS PWM = [{}%, {}%, {}%, {}%]",
                percent(motors.pwm[0]),
                percent(motors.pwm[1]),
                percent(motors.pwm[2]),
                percent(motors.pwm[3])
            );
        }

        let action = *self.shm.action.read();
        let _ = writeln!(msg, "ACTION = {}", action.tag());

        if action == Action::SampleGps {
            self.compose_gps_block(&mut msg, ctl);
        }

        msg
    }

    /// Drain one NMEA sentence from the ring into the frame.
    ///
    /// The timeout is waited out in short slices so a stop request cuts the
    /// wait short; a stopping actor has not lost the fix and must not
    /// escalate.
    fn compose_gps_block(&self, msg: &mut String, ctl: &RunControl) {
        let timeout = Duration::from_millis(self.params.gps_wait_timeout_ms);
        let slice = Duration::from_millis(self.params.gps_wait_timeout_ms.min(100));
        let mut deadline = Instant::now() + timeout;

        msg.push_str("GPS {\n\n");

        while msg.len() < self.params.frame_budget - 2 {
            match self.shm.gps.consume(slice) {
                Ok(c) => {
                    msg.push(c as char);
                    if c == b'\n' {
                        break;
                    }
                    // The timeout covers the gap between characters, not the
                    // whole sentence.
                    deadline = Instant::now() + timeout;
                }
                Err(ConsumeError::NoData) => {
                    if !ctl.should_run() {
                        break;
                    }
                    if Instant::now() >= deadline {
                        warn!("GPS timeout: no new data");
                        msg.push_str("NO FIX.\n");
                        *self.shm.action.write() = Action::Abort;
                        break;
                    }
                }
                Err(ConsumeError::Contended) => break,
            }
        }

        msg.push_str("\n}\n");
    }
}

impl Actor for Telemetry {
    fn role(&self) -> Role {
        Role::Telemetry
    }

    fn step(&mut self, ctl: &RunControl) -> StepOutcome {
        if self.stream.is_none() && !self.try_connect() {
            self.shm.wdg.beat(Role::Telemetry);
            ctl.sleep(Duration::from_millis(self.params.cycle_interval_ms));
            return StepOutcome::Continue;
        }

        let msg = self.compose_frame(ctl);

        if let Some(stream) = self.stream.as_mut() {
            // Rust masks SIGPIPE process-wide, so a broken pipe surfaces
            // here as an error instead of killing the process.
            if let Err(e) = stream.write_all(msg.as_bytes()) {
                error!("Telemetry send failed, connection lost: {}", e);
                self.stream = None;
                // Skip this tick's heartbeat and sleep; the reconnect is
                // attempted immediately on the next step.
                return StepOutcome::Continue;
            }
        }

        self.shm.wdg.beat(Role::Telemetry);
        ctl.sleep(Duration::from_millis(self.params.cycle_interval_ms));
        StepOutcome::Continue
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// PWM ratio as a rounded percentage.
fn percent(ratio: f32) -> i32 {
    (ratio * 100.0 + 0.5) as i32
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::net::NetConfig;
    use std::io::Read;
    use std::net::TcpListener;

    fn fast_params() -> TelemetryParams {
        TelemetryParams {
            cycle_interval_ms: 0,
            gps_wait_timeout_ms: 30,
            frame_budget: 512,
        }
    }

    fn setup() -> (Arc<SharedRegion>, Telemetry) {
        let shm = Arc::new(crate::shared::test_region());
        let tm = Telemetry::new(shm.clone(), fast_params());
        (shm, tm)
    }

    #[test]
    fn test_frame_labels_exact() {
        let (shm, tm) = setup();
        shm.pwm.lock().pwm = [0.25, 0.5, 0.75, 1.0];

        let frame = tm.compose_frame(&RunControl::new());

        assert_eq!(
            frame,
            "BAT = 100%\n\
             ACCEL = (x: 0.000000, y: 0.000000, z: 0.000000)\n\
             MOTORS PWM = [25%, 50%, 75%, 100%]\n\
             ACTION = 16\n"
        );
    }

    #[test]
    fn test_frame_is_newline_terminated_ascii() {
        let (shm, tm) = setup();
        *shm.action.write() = Action::Fly;

        let frame = tm.compose_frame(&RunControl::new());

        assert!(frame.is_ascii());
        assert!(frame.ends_with('\n'));
        assert!(frame.contains("ACTION = 4\n"));
    }

    #[test]
    fn test_held_locks_drop_fragments() {
        let (shm, tm) = setup();

        let _accel_guard = shm.accel.lock();
        let frame = tm.compose_frame(&RunControl::new());

        assert!(!frame.contains("ACCEL"));
        assert!(frame.contains("MOTORS PWM"));
        assert!(frame.contains("BAT = 100%"));
    }

    #[test]
    fn test_gps_block_drains_one_sentence() {
        let (shm, tm) = setup();
        *shm.action.write() = Action::SampleGps;

        for c in b"$GPGGA,ok*47\nleftover" {
            shm.gps.produce(*c, Duration::from_millis(10)).unwrap();
        }

        let frame = tm.compose_frame(&RunControl::new());

        assert!(frame.contains("GPS {\n\n$GPGGA,ok*47\n\n}\n"));
        // The next sentence stays in the ring for the next frame.
        assert_eq!(shm.gps.pending(), b"leftover".len());
    }

    #[test]
    fn test_gps_timeout_reports_no_fix_and_aborts() {
        let (shm, tm) = setup();
        *shm.action.write() = Action::SampleGps;

        let frame = tm.compose_frame(&RunControl::new());

        assert!(frame.ends_with("NO FIX.\n\n}\n"));
        assert_eq!(*shm.action.read(), Action::Abort);
    }

    #[test]
    fn test_stopping_drain_does_not_escalate() {
        let (shm, tm) = setup();
        *shm.action.write() = Action::SampleGps;

        let ctl = RunControl::new();
        ctl.request_stop();
        let frame = tm.compose_frame(&ctl);

        // A stopping actor has not lost the fix: no NO FIX, no Abort.
        assert!(!frame.contains("NO FIX."));
        assert_eq!(*shm.action.read(), Action::SampleGps);
    }

    #[test]
    fn test_percent_rounding() {
        assert_eq!(percent(0.0), 0);
        assert_eq!(percent(1.0), 100);
        assert_eq!(percent(0.494), 49);
        assert_eq!(percent(0.495), 50);
    }

    #[test]
    fn test_sends_frames_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let shm = Arc::new(SharedRegion::new(NetConfig {
            operator_ip: "127.0.0.1".parse().unwrap(),
            telemetry_port: port,
            drone_ip: "127.0.0.1".parse().unwrap(),
            flight_ctrl_port: 0,
        }));
        let mut tm = Telemetry::new(shm, fast_params());
        let ctl = RunControl::new();

        tm.step(&ctl);

        let (mut conn, _) = listener.accept().unwrap();
        let mut buf = [0u8; 256];
        let n = conn.read(&mut buf).unwrap();

        let received = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(received.starts_with("BAT = 100%\n"));
    }

    #[test]
    fn test_send_failure_flags_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let shm = Arc::new(SharedRegion::new(NetConfig {
            operator_ip: "127.0.0.1".parse().unwrap(),
            telemetry_port: port,
            drone_ip: "127.0.0.1".parse().unwrap(),
            flight_ctrl_port: 0,
        }));
        let mut tm = Telemetry::new(shm, fast_params());
        let ctl = RunControl::new();

        tm.step(&ctl);
        assert!(tm.stream.is_some());

        // Kill the operator side. The local writes keep succeeding until
        // the RST lands, so step until the failure is observed.
        let (conn, _) = listener.accept().unwrap();
        drop(conn);
        drop(listener);

        for _ in 0..100 {
            tm.step(&ctl);
            if tm.stream.is_none() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(tm.stream.is_none());
    }
}
