use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Counting semaphore bounding the shard builds in flight. Doubles as a
/// wait group: `wait_idle` returns once every permit has been dropped.
#[derive(Clone)]
pub(crate) struct Throttle {
    inner: Arc<Inner>,
}

struct Inner {
    limit: usize,
    in_flight: Mutex<usize>,
    changed: Condvar,
}

/// Released on drop.
pub(crate) struct Permit {
    inner: Arc<Inner>,
}

impl Throttle {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                limit: limit.max(1),
                in_flight: Mutex::new(0),
                changed: Condvar::new(),
            }),
        }
    }

    /// Blocks while `limit` permits are out.
    pub(crate) fn acquire(&self) -> Permit {
        let mut n = self.inner.in_flight.lock();
        while *n >= self.inner.limit {
            self.inner.changed.wait(&mut n);
        }
        *n += 1;
        Permit {
            inner: self.inner.clone(),
        }
    }

    pub(crate) fn wait_idle(&self) {
        let mut n = self.inner.in_flight.lock();
        while *n > 0 {
            self.inner.changed.wait(&mut n);
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        *self.inner.in_flight.lock()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut n = self.inner.in_flight.lock();
        *n -= 1;
        self.inner.changed.notify_all();
    }
}
