//! # Synchronisation Primitives
//!
//! The shared region's locking is built from counting semaphores so that the
//! supervisor can reinitialise every primitive in place after a deadlock,
//! preserving the data the primitives protect. Standard library locks cannot
//! be restored to a known state once poisoned or deadlocked, which is why
//! they are only used as the building block of [`Semaphore`] itself.
//!
//! Recovery is two-phase. Force-posting (`force_post_all`) releases every
//! parked waiter without restoring canonical counts, so stopping threads
//! can drain out; reinitialisation (`reinit`) then restores the canonical
//! counts once no thread is left inside a primitive. Reinitialisation is
//! only sound once every actor thread has been stopped; the supervisor
//! enforces that ordering.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod ring;

pub use ring::{ConsumeError, NmeaRing, ProduceError, GPS_BUFFER_SIZE};

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// SEMAPHORE
// ---------------------------------------------------------------------------

/// A counting semaphore.
///
/// Unlike the standard library locks a semaphore carries no poison state: a
/// panicking holder leaves the count as-is and the watchdog/supervisor pair
/// is responsible for recovering the system via [`Semaphore::reinit`].
pub struct Semaphore {
    count: Mutex<usize>,
    cvar: Condvar,

    /// Number of threads currently parked on the condvar. Only mutated by
    /// threads holding (or parked inside a wait on) the count lock, so it
    /// is stable whenever [`Semaphore::force_post_all`] holds that lock.
    waiters: AtomicUsize,
}

impl Semaphore {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            cvar: Condvar::new(),
            waiters: AtomicUsize::new(0),
        }
    }

    /// Decrement the count, blocking while it is zero.
    pub fn wait(&self) {
        let mut count = self.lock_count();
        while *count == 0 {
            self.waiters.fetch_add(1, Ordering::Relaxed);
            count = self
                .cvar
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
            self.waiters.fetch_sub(1, Ordering::Relaxed);
        }
        *count -= 1;
    }

    /// Decrement the count, blocking at most `timeout`. Returns `true` if
    /// the semaphore was acquired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        let mut count = self.lock_count();
        while *count == 0 {
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(d) => d,
                None => return false,
            };

            self.waiters.fetch_add(1, Ordering::Relaxed);
            let (guard, result) = self
                .cvar
                .wait_timeout(count, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            self.waiters.fetch_sub(1, Ordering::Relaxed);
            count = guard;

            if result.timed_out() && *count == 0 {
                return false;
            }
        }

        *count -= 1;
        true
    }

    /// Decrement the count if it is non-zero, without blocking. Returns
    /// `true` if the semaphore was acquired.
    pub fn try_wait(&self) -> bool {
        let mut count = self.lock_count();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Increment the count, waking one waiter.
    pub fn post(&self) {
        let mut count = self.lock_count();
        *count += 1;
        self.cvar.notify_one();
    }

    /// Release every thread currently parked in a wait, leaving the count
    /// otherwise alone.
    ///
    /// The count is raised by exactly the number of parked waiters, so each
    /// of them can acquire and return; once they have drained, the count is
    /// back where it was. This is the unblocking half of recovery, distinct
    /// from [`Semaphore::reinit`] which restores a canonical count.
    pub fn force_post_all(&self) {
        let mut count = self.lock_count();
        *count += self.waiters.load(Ordering::Relaxed);
        self.cvar.notify_all();
    }

    /// Restore the count to `count` and wake every waiter.
    ///
    /// Reinitialisation authority rests with the supervisor, which only
    /// exercises it once the actor threads have been told to stop.
    pub fn reinit(&self, count: usize) {
        let mut guard = self.lock_count();
        *guard = count;
        self.cvar.notify_all();
    }

    /// Current count. Only meaningful at quiescent moments.
    pub fn count(&self) -> usize {
        *self.lock_count()
    }

    // A panic while holding the inner mutex poisons it; the count itself is
    // still valid, so recover the guard rather than propagating.
    fn lock_count(&self) -> MutexGuard<usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// MUTEX CELL
// ---------------------------------------------------------------------------

/// A value guarded by a binary semaphore.
///
/// Used for the single-writer fields of the shared region (acceleration and
/// motor PWM): one actor writes through [`MutexCell::lock`], readers use
/// either `lock` or the non-blocking [`MutexCell::try_lock`].
pub struct MutexCell<T> {
    sem: Semaphore,
    cell: UnsafeCell<T>,
}

// The semaphore discipline guarantees at most one guard exists at a time.
unsafe impl<T: Send> Sync for MutexCell<T> {}
unsafe impl<T: Send> Send for MutexCell<T> {}

impl<T> MutexCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            sem: Semaphore::new(1),
            cell: UnsafeCell::new(value),
        }
    }

    /// Acquire the cell, blocking until it is free.
    pub fn lock(&self) -> MutexCellGuard<T> {
        self.sem.wait();
        MutexCellGuard { owner: self }
    }

    /// Acquire the cell without blocking.
    pub fn try_lock(&self) -> Option<MutexCellGuard<T>> {
        if self.sem.try_wait() {
            Some(MutexCellGuard { owner: self })
        } else {
            None
        }
    }

    /// Release every thread currently parked in [`MutexCell::lock`] without
    /// restoring the canonical count.
    pub fn force_post_all(&self) {
        self.sem.force_post_all();
    }

    /// Restore the mutex to its unlocked state. Any outstanding guard must
    /// be gone; see the module notes on reinitialisation ordering.
    pub fn reinit(&self) {
        self.sem.reinit(1);
    }
}

pub struct MutexCellGuard<'a, T> {
    owner: &'a MutexCell<T>,
}

impl<T> Deref for MutexCellGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.owner.cell.get() }
    }
}

impl<T> DerefMut for MutexCellGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.owner.cell.get() }
    }
}

impl<T> Drop for MutexCellGuard<'_, T> {
    fn drop(&mut self) {
        self.owner.sem.post();
    }
}

// ---------------------------------------------------------------------------
// READER/WRITER LOCK
// ---------------------------------------------------------------------------

/// Reader/writer lock with the classic semaphore construction.
///
/// A `write` semaphore provides writer exclusion; the first reader in takes
/// it and the last reader out returns it, with the reader count kept under
/// its own short-lived lock. Writers are mutually exclusive with all readers
/// and writers; readers may be concurrent. No starvation guarantee is made
/// for writers, which is acceptable at this workload's rates.
pub struct RwLock<T> {
    readers: Mutex<usize>,
    write: Semaphore,
    cell: UnsafeCell<T>,
}

// Read guards hand out shared references, write guards exclusive ones; the
// write semaphore keeps the two from coexisting.
unsafe impl<T: Send + Sync> Sync for RwLock<T> {}
unsafe impl<T: Send> Send for RwLock<T> {}

impl<T> RwLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            readers: Mutex::new(0),
            write: Semaphore::new(1),
            cell: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock for reading. Readers are admitted concurrently.
    pub fn read(&self) -> RwReadGuard<T> {
        let mut readers = self.lock_readers();
        *readers += 1;
        if *readers == 1 {
            // First reader in holds writers out. Holding the reader count
            // lock here also queues later readers behind a waiting writer's
            // turn, exactly as the two-semaphore construction does.
            self.write.wait();
        }
        drop(readers);

        RwReadGuard { owner: self }
    }

    /// Acquire the lock for writing. Excludes all readers and writers.
    pub fn write(&self) -> RwWriteGuard<T> {
        self.write.wait();
        RwWriteGuard { owner: self }
    }

    /// Release every thread currently parked on the write semaphore (a
    /// writer, or the first reader in) without restoring canonical state.
    /// Readers queued behind the parked first reader drain transitively
    /// once it proceeds and drops the reader-count lock.
    pub fn force_post_all(&self) {
        self.write.force_post_all();
    }

    /// Restore the lock to its released state. Any outstanding guard must
    /// be gone; see the module notes on reinitialisation ordering.
    ///
    /// The write semaphore is restored first: a reader parked inside
    /// [`RwLock::read`] holds the reader-count lock while it waits, so the
    /// count can only be touched once that reader has been released.
    pub fn reinit(&self) {
        self.write.reinit(1);
        *self.lock_readers() = 0;
    }

    fn lock_readers(&self) -> MutexGuard<usize> {
        self.readers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct RwReadGuard<'a, T> {
    owner: &'a RwLock<T>,
}

impl<T> Deref for RwReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.owner.cell.get() }
    }
}

impl<T> Drop for RwReadGuard<'_, T> {
    fn drop(&mut self) {
        let mut readers = self.owner.lock_readers();
        *readers = readers.saturating_sub(1);
        if *readers == 0 {
            // Last reader out lets writers back in.
            self.owner.write.post();
        }
    }
}

pub struct RwWriteGuard<'a, T> {
    owner: &'a RwLock<T>,
}

impl<T> Deref for RwWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.owner.cell.get() }
    }
}

impl<T> DerefMut for RwWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.owner.cell.get() }
    }
}

impl<T> Drop for RwWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.owner.write.post();
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_semaphore_counting() {
        let sem = Semaphore::new(2);

        assert!(sem.try_wait());
        assert!(sem.try_wait());
        assert!(!sem.try_wait());

        sem.post();
        assert_eq!(sem.count(), 1);
        assert!(sem.try_wait());
    }

    #[test]
    fn test_semaphore_wait_timeout() {
        let sem = Semaphore::new(0);

        let start = Instant::now();
        assert!(!sem.wait_timeout(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));

        sem.post();
        assert!(sem.wait_timeout(Duration::from_millis(50)));
    }

    #[test]
    fn test_semaphore_post_wakes_waiter() {
        let sem = Arc::new(Semaphore::new(0));

        let waiter = {
            let sem = sem.clone();
            thread::spawn(move || sem.wait_timeout(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        sem.post();

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_semaphore_reinit_restores_count() {
        let sem = Semaphore::new(1);
        assert!(sem.try_wait());
        sem.reinit(3);
        assert_eq!(sem.count(), 3);
    }

    #[test]
    fn test_semaphore_force_post_releases_waiters_without_reset() {
        let sem = Arc::new(Semaphore::new(0));

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let sem = sem.clone();
                thread::spawn(move || sem.wait())
            })
            .collect();

        // Keep force-posting until both waiters have been released; a
        // waiter not yet parked at the time of a call is simply not
        // counted by it.
        let deadline = Instant::now() + Duration::from_secs(5);
        while waiters.iter().any(|w| !w.is_finished()) {
            assert!(Instant::now() < deadline, "waiters were never released");
            sem.force_post_all();
            thread::sleep(Duration::from_millis(10));
        }
        for w in waiters {
            w.join().unwrap();
        }

        // Each released waiter consumed exactly the unit that freed it: the
        // count is back at zero, not at some canonical value the way
        // reinit would leave it.
        assert_eq!(sem.count(), 0);
        assert!(!sem.try_wait());
    }

    #[test]
    fn test_semaphore_force_post_without_waiters_changes_nothing() {
        let sem = Semaphore::new(3);
        sem.force_post_all();
        assert_eq!(sem.count(), 3);
    }

    #[test]
    fn test_rwlock_force_post_frees_parked_writer() {
        let lock = Arc::new(RwLock::new(1u32));

        // A lost release: the write semaphore is held by nobody who will
        // ever give it back.
        lock.write.wait();

        let writer = {
            let lock = lock.clone();
            thread::spawn(move || {
                *lock.write() = 9;
            })
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while !writer.is_finished() {
            assert!(Instant::now() < deadline, "writer was never released");
            lock.force_post_all();
            thread::sleep(Duration::from_millis(10));
        }
        writer.join().unwrap();

        assert_eq!(*lock.read(), 9);
    }

    #[test]
    fn test_mutex_cell_exclusion() {
        let cell = MutexCell::new(0u32);

        let guard = cell.lock();
        assert!(cell.try_lock().is_none());
        drop(guard);

        *cell.lock() = 7;
        assert_eq!(*cell.try_lock().unwrap(), 7);
    }

    #[test]
    fn test_rwlock_concurrent_readers() {
        let lock = Arc::new(RwLock::new(42u32));
        let peak = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = lock.clone();
            let peak = peak.clone();
            let active = active.clone();
            handles.push(thread::spawn(move || {
                let guard = lock.read();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(30));
                active.fetch_sub(1, Ordering::SeqCst);
                *guard
            }));
        }

        for h in handles {
            assert_eq!(h.join().unwrap(), 42);
        }

        // At least two readers must have overlapped.
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_rwlock_writer_excludes_readers() {
        let lock = Arc::new(RwLock::new(0u32));

        let guard = lock.read();

        let writer = {
            let lock = lock.clone();
            thread::spawn(move || {
                *lock.write() = 99;
            })
        };

        // Writer cannot proceed while the reader holds the lock.
        thread::sleep(Duration::from_millis(30));
        assert_eq!(*guard, 0);
        drop(guard);

        writer.join().unwrap();
        assert_eq!(*lock.read(), 99);
    }

    #[test]
    fn test_rwlock_reinit_preserves_value() {
        let lock = RwLock::new(5u32);

        // Simulate a lost writer release.
        lock.write.wait();
        lock.reinit();

        assert_eq!(*lock.read(), 5);
    }
}
