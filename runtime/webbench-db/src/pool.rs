//! Bounded blocking pool for driver connections and recycled records.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, StoreError};

struct PoolState<T> {
    idle: Vec<T>,
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// A bounded pool for reusable objects.
///
/// Objects are either created on demand by a factory (up to `max`) or
/// handed in up front with [`Pool::from_items`], in which case the pool
/// never creates new ones.
pub struct Pool<T> {
    max: usize,
    factory: Option<Factory<T>>,
    state: Mutex<PoolState<T>>,
    available: Condvar,
    in_flight: AtomicUsize,
}

/// A pooled value that returns to the pool on drop.
pub struct Pooled<T> {
    pool: Arc<Pool<T>>,
    value: Option<T>,
}

impl<T> Pool<T> {
    pub fn new<F>(max: usize, factory: F) -> Arc<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Arc::new(Self {
            max: max.max(1),
            factory: Some(Box::new(factory)),
            state: Mutex::new(PoolState { idle: Vec::new() }),
            available: Condvar::new(),
            in_flight: AtomicUsize::new(0),
        })
    }

    /// Pool over a fixed set of pre-built objects.
    pub fn from_items(items: Vec<T>) -> Arc<Self> {
        let count = items.len();
        Arc::new(Self {
            max: count,
            factory: None,
            state: Mutex::new(PoolState { idle: items }),
            available: Condvar::new(),
            in_flight: AtomicUsize::new(count),
        })
    }

    /// Checks an object out, blocking while none is free.
    ///
    /// Returns `None` once `timeout` elapses, or immediately when the pool
    /// holds no objects and cannot create one.
    pub fn acquire(self: &Arc<Self>, timeout: Option<Duration>) -> Option<Pooled<T>> {
        let deadline = timeout.map(|limit| Instant::now() + limit);
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.idle.pop() {
                return Some(self.wrap(item));
            }

            if let Some(factory) = self.factory.as_ref() {
                if self.in_flight.load(Ordering::SeqCst) < self.max {
                    self.in_flight.fetch_add(1, Ordering::SeqCst);
                    drop(state);
                    return Some(self.wrap(factory()));
                }
            }

            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return None;
            }

            match deadline {
                None => self.available.wait(&mut state),
                Some(limit) => {
                    if Instant::now() >= limit {
                        return None;
                    }
                    if self.available.wait_until(&mut state, limit).timed_out() {
                        return None;
                    }
                }
            }
        }
    }

    /// Removes every idle object from the pool. Objects still checked out
    /// come back as usual and can be drained later.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.state.lock();
        let items = std::mem::take(&mut state.idle);
        self.in_flight.fetch_sub(items.len(), Ordering::SeqCst);
        items
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Teardown check after [`Pool::drain`]: every object must be back.
    pub fn ensure_returned(&self) -> Result<()> {
        match self.in_flight() {
            0 => Ok(()),
            held => Err(StoreError::Close(format!(
                "{held} pooled objects still checked out"
            ))),
        }
    }

    fn wrap(self: &Arc<Self>, item: T) -> Pooled<T> {
        Pooled {
            pool: Arc::clone(self),
            value: Some(item),
        }
    }

    fn release(&self, item: T) {
        let mut state = self.state.lock();
        state.idle.push(item);
        self.available.notify_one();
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
            .as_ref()
            .expect("Pooled value missing (already released)")
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value
            .as_mut()
            .expect("Pooled value missing (already released)")
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.value.take() {
            self.pool.release(item);
        }
    }
}
