//! # GPS Producer Actor
//!
//! Sole writer of the NMEA ring buffer. Cycles through a fixed table of
//! sample sentences, emitting one per second character by character. The
//! producer never inspects the action state: flow control is entirely the
//! consumer's appetite. While the drone is not in `SampleGPS` nobody drains
//! the ring, the `empty` wait times out, and the rest of the current sample
//! is abandoned.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::params::GpsParams;
use crate::shared::SharedRegion;
use crate::supervisor::RunControl;
use crate::sync::ProduceError;

use super::{Actor, Role, StepOutcome};

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

/// Simulation samples, sent in a loop.
static NMEA_SAMPLES: [&str; 4] = [
    "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\n",
    "$GPGSA,A,3,04,05,09,12,24,25,29,30,31,,,1.8,1.0,1.5*33\n",
    "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\n",
    "$GPVTG,084.4,T,003.1,M,022.4,N,041.4,K*1F\n",
];

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct GpsCtrl {
    shm: Arc<SharedRegion>,
    params: GpsParams,
    sample_index: usize,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl GpsCtrl {
    pub fn new(shm: Arc<SharedRegion>, params: GpsParams) -> Self {
        Self {
            shm,
            params,
            sample_index: 0,
        }
    }

    /// Emit the current sample into the ring. Returns `false` if the sample
    /// was abandoned on a full ring; the sample index is then left alone so
    /// the same sentence is offered again next time.
    fn produce_sample(&mut self, ctl: &RunControl) -> bool {
        let msg = NMEA_SAMPLES[self.sample_index];
        let timeout = Duration::from_millis(self.params.produce_timeout_ms);

        debug!("Writing sample {}", self.sample_index);

        for c in msg.bytes() {
            if !ctl.should_run() {
                return false;
            }

            match self.shm.gps.produce(c, timeout) {
                Ok(()) => (),
                Err(ProduceError::NoSpace) => return false,
            }
        }

        self.sample_index = (self.sample_index + 1) % NMEA_SAMPLES.len();
        true
    }
}

impl Actor for GpsCtrl {
    fn role(&self) -> Role {
        Role::GpsCtrl
    }

    fn step(&mut self, ctl: &RunControl) -> StepOutcome {
        self.produce_sample(ctl);

        self.shm.wdg.beat(Role::GpsCtrl);
        ctl.sleep(Duration::from_millis(self.params.cycle_interval_ms));
        StepOutcome::Continue
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn fast_params() -> GpsParams {
        GpsParams {
            cycle_interval_ms: 0,
            produce_timeout_ms: 20,
        }
    }

    fn drain(shm: &SharedRegion) -> String {
        let mut out = Vec::new();
        while let Ok(c) = shm.gps.consume(Duration::from_millis(10)) {
            out.push(c);
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_emits_complete_sample() {
        let shm = Arc::new(crate::shared::test_region());
        let mut gps = GpsCtrl::new(shm.clone(), fast_params());
        let ctl = RunControl::new();

        assert!(gps.produce_sample(&ctl));

        assert_eq!(drain(&shm), NMEA_SAMPLES[0]);
        assert_eq!(gps.sample_index, 1);
    }

    #[test]
    fn test_cycles_through_the_table() {
        let shm = Arc::new(crate::shared::test_region());
        let mut gps = GpsCtrl::new(shm.clone(), fast_params());
        let ctl = RunControl::new();

        for _ in 0..NMEA_SAMPLES.len() {
            assert!(gps.produce_sample(&ctl));
        }

        assert_eq!(drain(&shm), NMEA_SAMPLES.concat());
        assert_eq!(gps.sample_index, 0);
    }

    #[test]
    fn test_abandons_sample_when_ring_stays_full() {
        let shm = Arc::new(crate::shared::test_region());
        let mut gps = GpsCtrl::new(shm.clone(), fast_params());
        let ctl = RunControl::new();

        // Leave only a few free slots: the sample cannot fit and nobody is
        // draining.
        let capacity = shm.gps.capacity();
        for _ in 0..capacity - 3 {
            shm.gps.produce(b'x', Duration::from_millis(10)).unwrap();
        }

        assert!(!gps.produce_sample(&ctl));

        // The abandoned sentence is retried from the start next time.
        assert_eq!(gps.sample_index, 0);
    }
}
