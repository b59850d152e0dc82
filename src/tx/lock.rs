//! Striped reader-writer locks.
//!
//! All locking state lives in DRAM. Stripe locks balance the space used by
//! locks for a large database against parallelism: an address is hashed to
//! one of `2^k` one-word reader-writer locks.

use std::sync::atomic::{AtomicU16, Ordering};

use rand::Rng;

use crate::error::{GraphError, Result};

const LOCK_READER_MASK: u16 = 0x7fff;
const READER_INCR: u16 = 1;
const WRITER_LOCK_BIT: u16 = 15;
const WRITE_LOCK: u16 = 1 << WRITER_LOCK_BIT;

// Spin counts, tuned for test-scale contention.
const MIN_BACKOFF_DELAY: usize = 1_000;
const MAX_BACKOFF_DELAY: usize = 100_000;
const MAX_ATTEMPTS: u32 = 10;

fn backoff(cur_max_delay: &mut usize) {
    let delay = *cur_max_delay;
    *cur_max_delay = (2 * delay).min(MAX_BACKOFF_DELAY);
    let count = rand::thread_rng().gen_range(delay..=*cur_max_delay);
    for _ in 0..count {
        std::hint::spin_loop();
    }
}

/// One 16-bit reader-writer lock: writer bit plus a 15-bit reader count.
#[derive(Default)]
pub(crate) struct RwLock {
    word: AtomicU16,
}

impl RwLock {
    pub(crate) fn read_lock(&self) -> Result<()> {
        let mut cur_max_delay = MIN_BACKOFF_DELAY;
        let mut attempts = 0u32;

        loop {
            let r = self.word.fetch_add(READER_INCR, Ordering::Acquire);
            debug_assert_ne!(r & LOCK_READER_MASK, LOCK_READER_MASK);

            if r & WRITE_LOCK == 0 {
                return Ok(());
            }
            self.word.fetch_sub(READER_INCR, Ordering::Release);

            while self.word.load(Ordering::Relaxed) & WRITE_LOCK != 0 {
                attempts += 1;
                if attempts > MAX_ATTEMPTS {
                    return Err(GraphError::LockTimeout);
                }
                backoff(&mut cur_max_delay);
            }
        }
    }

    pub(crate) fn read_unlock(&self) {
        debug_assert_ne!(self.word.load(Ordering::Relaxed) & LOCK_READER_MASK, 0);
        self.word.fetch_sub(READER_INCR, Ordering::Release);
    }

    pub(crate) fn write_lock(&self) -> Result<()> {
        let mut cur_max_delay = MIN_BACKOFF_DELAY;
        let mut attempts = 0u32;

        loop {
            if self.word.fetch_or(WRITE_LOCK, Ordering::Acquire) & WRITE_LOCK == 0 {
                attempts = 0;

                // Wait for active readers to drain.
                while self.word.load(Ordering::Relaxed) & LOCK_READER_MASK != 0 {
                    attempts += 1;
                    if attempts > MAX_ATTEMPTS {
                        self.word.fetch_and(LOCK_READER_MASK, Ordering::Release);
                        return Err(GraphError::LockTimeout);
                    }
                    backoff(&mut cur_max_delay);
                }
                return Ok(());
            }

            while self.word.load(Ordering::Relaxed) & WRITE_LOCK != 0 {
                attempts += 1;
                if attempts > MAX_ATTEMPTS {
                    return Err(GraphError::LockTimeout);
                }
                backoff(&mut cur_max_delay);
            }
        }
    }

    /// Upgrades a held reader to a writer. The caller must already hold a
    /// reader on this stripe; the reader count is consumed on success.
    pub(crate) fn upgrade_write_lock(&self) -> Result<()> {
        let mut cur_max_delay = MIN_BACKOFF_DELAY;
        let mut attempts = 0u32;

        loop {
            if self.word.fetch_or(WRITE_LOCK, Ordering::Acquire) & WRITE_LOCK == 0 {
                attempts = 0;

                // Wait for the other readers; ours is still counted.
                while self.word.load(Ordering::Relaxed) & LOCK_READER_MASK > 1 {
                    attempts += 1;
                    if attempts > MAX_ATTEMPTS {
                        self.word.fetch_and(LOCK_READER_MASK, Ordering::Release);
                        return Err(GraphError::LockTimeout);
                    }
                    backoff(&mut cur_max_delay);
                }

                self.word.fetch_sub(READER_INCR, Ordering::Release);
                return Ok(());
            }

            while self.word.load(Ordering::Relaxed) & WRITE_LOCK != 0 {
                attempts += 1;
                if attempts > MAX_ATTEMPTS {
                    return Err(GraphError::LockTimeout);
                }
                backoff(&mut cur_max_delay);
            }
        }
    }

    pub(crate) fn write_unlock(&self) {
        debug_assert_ne!(self.word.load(Ordering::Relaxed) & WRITE_LOCK, 0);
        self.word.fetch_and(LOCK_READER_MASK, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn reader_count(&self) -> u16 {
        self.word.load(Ordering::Relaxed) & LOCK_READER_MASK
    }
}

/// A fixed array of reader-writer locks covering an object space.
///
/// One instance guards each of the node, edge, and index domains.
pub(crate) struct StripedLock {
    locks: Vec<RwLock>,
    maskbits: u64,
    shift: u32,
}

impl StripedLock {
    /// `tot_bytes` is the DRAM budget for the lock array (power of two);
    /// `stripe_width` is how many bytes of the object space one lock covers.
    pub(crate) fn new(tot_bytes: u64, stripe_width: u32) -> StripedLock {
        let count = (tot_bytes / std::mem::size_of::<RwLock>() as u64).max(1);
        debug_assert_eq!(count & (count - 1), 0);
        let mut locks = Vec::with_capacity(count as usize);
        locks.resize_with(count as usize, RwLock::default);
        StripedLock {
            locks,
            maskbits: count - 1,
            shift: ceiling_log2(stripe_width as u64),
        }
    }

    pub(crate) fn stripe_id(&self, addr: u64) -> u64 {
        (addr >> self.shift) & self.maskbits
    }

    pub(crate) fn read_lock(&self, stripe: u64) -> Result<()> {
        self.locks[stripe as usize].read_lock()
    }

    pub(crate) fn read_unlock(&self, stripe: u64) {
        self.locks[stripe as usize].read_unlock()
    }

    pub(crate) fn write_lock(&self, stripe: u64) -> Result<()> {
        self.locks[stripe as usize].write_lock()
    }

    pub(crate) fn upgrade_lock(&self, stripe: u64) -> Result<()> {
        self.locks[stripe as usize].upgrade_write_lock()
    }

    pub(crate) fn write_unlock(&self, stripe: u64) {
        self.locks[stripe as usize].write_unlock()
    }
}

fn floor_log2(n: u64) -> u32 {
    63 - n.leading_zeros()
}

fn ceiling_log2(n: u64) -> u32 {
    if n & (n - 1) == 0 {
        floor_log2(n)
    } else {
        floor_log2(n - 1) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn readers_stack() {
        let lock = RwLock::default();
        lock.read_lock().unwrap();
        lock.read_lock().unwrap();
        assert_eq!(lock.reader_count(), 2);
        lock.read_unlock();
        lock.read_unlock();
        assert_eq!(lock.reader_count(), 0);
    }

    #[test]
    fn writer_excludes_writer() {
        let lock = Arc::new(RwLock::default());
        lock.write_lock().unwrap();
        let contender = Arc::clone(&lock);
        let handle = thread::spawn(move || contender.write_lock());
        thread::sleep(std::time::Duration::from_millis(10));
        lock.write_unlock();
        handle.join().unwrap().unwrap();
        lock.write_unlock();
    }

    #[test]
    fn upgrade_consumes_reader() {
        let lock = RwLock::default();
        lock.read_lock().unwrap();
        lock.upgrade_write_lock().unwrap();
        assert_eq!(lock.reader_count(), 0);
        lock.write_unlock();
    }

    #[test]
    fn contending_upgrades_time_out() {
        let lock = Arc::new(RwLock::default());
        lock.read_lock().unwrap();
        let other = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            other.read_lock().unwrap();
            // Holds its reader forever; our upgrade must give up.
            thread::sleep(std::time::Duration::from_millis(300));
            other.read_unlock();
        });
        thread::sleep(std::time::Duration::from_millis(20));
        let res = lock.upgrade_write_lock();
        if res.is_ok() {
            lock.write_unlock();
        } else {
            lock.read_unlock();
        }
        handle.join().unwrap();
    }

    #[test]
    fn stripes_hash_by_width() {
        let sl = StripedLock::new(1024, 64);
        assert_eq!(sl.stripe_id(0), sl.stripe_id(63));
        assert_ne!(sl.stripe_id(0), sl.stripe_id(64));
    }

    #[test]
    fn two_threads_contending_on_stripe_progress() {
        let sl = Arc::new(StripedLock::new(256, 64));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let sl = Arc::clone(&sl);
            handles.push(thread::spawn(move || {
                let stripe = sl.stripe_id(0x1000);
                for _ in 0..50 {
                    loop {
                        match sl.write_lock(stripe) {
                            Ok(()) => break,
                            Err(GraphError::LockTimeout) => continue,
                            Err(e) => panic!("unexpected error: {e:?}"),
                        }
                    }
                    sl.write_unlock(stripe);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
