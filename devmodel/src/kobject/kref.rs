use core::sync::atomic::{AtomicUsize, Ordering};

/// Outcome of dropping one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KrefPut {
    /// Other references remain.
    Alive,
    /// This was the last reference; the caller owns teardown.
    Released,
    /// The count was already zero. Nothing was changed.
    Underflow,
}

/// Atomic reference count with get-unless-zero semantics.
///
/// Zero means either "never initialized" or "being torn down"; in both cases no new reference
/// may be handed out.
#[derive(Debug, Default)]
pub struct Kref {
    count: AtomicUsize,
}

impl Kref {
    pub const fn new() -> Kref {
        Kref {
            count: AtomicUsize::new(0),
        }
    }

    pub fn init(&self) {
        self.count.store(1, Ordering::Release);
    }

    pub fn read(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Take a reference unless the count already dropped to zero.
    pub fn get_unless_zero(&self) -> bool {
        let mut current = self.count.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return false;
            }
            match self.count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(seen) => current = seen,
            }
        }
    }

    pub fn put(&self) -> KrefPut {
        let mut current = self.count.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return KrefPut::Underflow;
            }
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(1) => return KrefPut::Released,
                Ok(_) => return KrefPut::Alive,
                Err(seen) => current = seen,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn zero_crossing_happens_once() {
        let kref = Kref::new();
        assert!(!kref.get_unless_zero());
        kref.init();
        assert!(kref.get_unless_zero());
        assert_eq!(kref.put(), KrefPut::Alive);
        assert_eq!(kref.put(), KrefPut::Released);
        assert_eq!(kref.put(), KrefPut::Underflow);
        assert!(!kref.get_unless_zero());
    }

    #[test]
    fn concurrent_get_put_balances() {
        let kref = Arc::new(Kref::new());
        kref.init();
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let kref = kref.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        assert!(kref.get_unless_zero());
                        assert_eq!(kref.put(), KrefPut::Alive);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(kref.read(), 1);
    }
}
