//! # NMEA Ring Buffer
//!
//! Bounded circular buffer of characters carrying NMEA sentences from the
//! GPS producer to the telemetry consumer. The classic three-semaphore
//! discipline: `empty` counts free slots, `full` counts pending characters,
//! `mutex` guards the buffer and indices. Producer and consumer each advance
//! only their own index.
//!
//! Both sides wait with timeouts so a stalled peer surfaces as a timeout
//! error rather than an indefinite park the watchdog cannot tell apart from
//! a deadlock.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::cell::UnsafeCell;
use std::time::Duration;

use super::Semaphore;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Default ring capacity in characters, ten 128-byte NMEA lines.
pub const GPS_BUFFER_SIZE: usize = 128 * 10;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Buffer storage and indices, guarded by the `mutex` semaphore.
struct RingState {
    buf: Box<[u8]>,
    read: usize,
    write: usize,
}

/// The shared ring buffer.
pub struct NmeaRing {
    mutex: Semaphore,
    empty: Semaphore,
    full: Semaphore,
    state: UnsafeCell<RingState>,
}

// State is only touched between a successful `mutex` wait and the matching
// post.
unsafe impl Sync for NmeaRing {}
unsafe impl Send for NmeaRing {}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Why a produce attempt failed.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProduceError {
    /// No slot freed up within the timeout: the consumer has no appetite.
    #[error("No ring slot became free within the timeout")]
    NoSpace,
}

/// Why a consume attempt failed.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConsumeError {
    /// No character arrived within the timeout.
    #[error("No character arrived within the timeout")]
    NoData,

    /// A character is pending but the buffer lock could not be taken in
    /// time. The pending character is left in place.
    #[error("The ring lock could not be taken within the timeout")]
    Contended,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl NmeaRing {
    pub fn new() -> Self {
        Self::with_capacity(GPS_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            mutex: Semaphore::new(1),
            empty: Semaphore::new(capacity),
            full: Semaphore::new(0),
            state: UnsafeCell::new(RingState {
                buf: vec![0u8; capacity].into_boxed_slice(),
                read: 0,
                write: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        unsafe { (&(*self.state.get()).buf).len() }
    }

    /// Number of characters written but not yet consumed. Only meaningful at
    /// quiescent moments.
    pub fn pending(&self) -> usize {
        self.full.count()
    }

    /// Write one character, waiting at most `timeout` for a free slot.
    pub fn produce(&self, c: u8, timeout: Duration) -> Result<(), ProduceError> {
        if !self.empty.wait_timeout(timeout) {
            return Err(ProduceError::NoSpace);
        }

        self.mutex.wait();
        {
            let state = unsafe { &mut *self.state.get() };
            let idx = state.write;
            state.buf[idx] = c;
            state.write = (state.write + 1) % state.buf.len();
        }
        self.mutex.post();

        self.full.post();
        Ok(())
    }

    /// Read one character, waiting at most `timeout` for one to arrive.
    pub fn consume(&self, timeout: Duration) -> Result<u8, ConsumeError> {
        if !self.full.wait_timeout(timeout) {
            return Err(ConsumeError::NoData);
        }

        if !self.mutex.wait_timeout(timeout) {
            // Give the character back; it was never read.
            self.full.post();
            return Err(ConsumeError::Contended);
        }

        let c;
        {
            let state = unsafe { &mut *self.state.get() };
            let idx = state.read;
            c = state.buf[idx];
            state.read = (state.read + 1) % state.buf.len();
        }
        self.mutex.post();

        self.empty.post();
        Ok(c)
    }

    /// Release every thread parked on any of the ring's semaphores without
    /// restoring canonical counts. Pending characters and indices are left
    /// exactly as they are.
    pub fn force_post_all(&self) {
        self.mutex.force_post_all();
        self.empty.force_post_all();
        self.full.force_post_all();
    }

    /// Restore the semaphores to their initial counts. Buffer contents and
    /// indices are data and survive; with `full` back at zero any pending
    /// characters are abandoned and the ring reads as empty.
    pub fn reinit_locks(&self) {
        self.mutex.reinit(1);
        self.empty.reinit(self.capacity());
        self.full.reinit(0);
    }
}

impl Default for NmeaRing {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const TICK: Duration = Duration::from_millis(100);

    #[test]
    fn test_fifo_order() {
        let ring = NmeaRing::with_capacity(8);

        for c in b"$GPGGA" {
            ring.produce(*c, TICK).unwrap();
        }

        let mut out = Vec::new();
        while ring.pending() > 0 {
            out.push(ring.consume(TICK).unwrap());
        }

        assert_eq!(out, b"$GPGGA");
    }

    #[test]
    fn test_wrap_around() {
        let ring = NmeaRing::with_capacity(4);

        // Fill, drain half, fill again so the write index wraps 3 -> 0.
        for c in b"abcd" {
            ring.produce(*c, TICK).unwrap();
        }
        assert_eq!(ring.consume(TICK), Ok(b'a'));
        assert_eq!(ring.consume(TICK), Ok(b'b'));
        ring.produce(b'e', TICK).unwrap();
        ring.produce(b'f', TICK).unwrap();

        assert_eq!(ring.consume(TICK), Ok(b'c'));
        assert_eq!(ring.consume(TICK), Ok(b'd'));
        assert_eq!(ring.consume(TICK), Ok(b'e'));
        assert_eq!(ring.consume(TICK), Ok(b'f'));
    }

    #[test]
    fn test_produce_times_out_when_full() {
        let ring = NmeaRing::with_capacity(2);

        ring.produce(b'x', TICK).unwrap();
        ring.produce(b'y', TICK).unwrap();

        assert_eq!(
            ring.produce(b'z', Duration::from_millis(30)),
            Err(ProduceError::NoSpace)
        );
    }

    #[test]
    fn test_consume_times_out_when_empty() {
        let ring = NmeaRing::with_capacity(2);

        assert_eq!(
            ring.consume(Duration::from_millis(30)),
            Err(ConsumeError::NoData)
        );
    }

    #[test]
    fn test_threaded_transfer_no_loss_no_duplication() {
        let ring = Arc::new(NmeaRing::with_capacity(16));
        let sent: Vec<u8> = (0..=255u8).cycle().take(2000).collect();

        let producer = {
            let ring = ring.clone();
            let sent = sent.clone();
            thread::spawn(move || {
                for c in sent {
                    ring.produce(c, Duration::from_secs(5)).unwrap();
                }
            })
        };

        let mut received = Vec::with_capacity(sent.len());
        while received.len() < sent.len() {
            received.push(ring.consume(Duration::from_secs(5)).unwrap());
        }

        producer.join().unwrap();
        assert_eq!(received, sent);
    }

    #[test]
    fn test_reinit_abandons_pending() {
        let ring = NmeaRing::with_capacity(4);

        ring.produce(b'a', TICK).unwrap();
        ring.produce(b'b', TICK).unwrap();

        ring.reinit_locks();

        assert_eq!(ring.pending(), 0);
        assert_eq!(
            ring.consume(Duration::from_millis(30)),
            Err(ConsumeError::NoData)
        );

        // The ring keeps working after a reset. Indices are data and
        // survive, so the oldest unread character is surfaced first.
        ring.produce(b'c', TICK).unwrap();
        assert_eq!(ring.consume(TICK), Ok(b'a'));
    }
}
