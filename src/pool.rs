//! Reuse pool for per-request state
//!
//! Transformers and body buffers are expensive enough to keep around
//! between requests. A [`Pooled`] guard gives exclusive ownership of one
//! instance and puts it back, reset, when dropped, including on error
//! paths.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

/// Default number of idle instances kept per pool
pub const DEFAULT_MAX_IDLE: usize = 64;

/// State that can be returned to its freshly created form
pub trait Reset {
    fn reset(&mut self);
}

impl Reset for Vec<u8> {
    fn reset(&mut self) {
        self.clear();
    }
}

/// Object pool with an instance factory
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    max_idle: usize,
}

impl<T: Reset> Pool<T> {
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::with_max_idle(factory, DEFAULT_MAX_IDLE)
    }

    pub fn with_max_idle(factory: impl Fn() -> T + Send + Sync + 'static, max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            factory: Box::new(factory),
            max_idle,
        }
    }

    /// Take an idle instance or create a new one
    pub fn acquire(self: &Arc<Self>) -> Pooled<T> {
        let item = self.idle.lock().pop().unwrap_or_else(|| (self.factory)());
        Pooled {
            item: Some(item),
            pool: Arc::clone(self),
        }
    }

    /// Reset `item` and keep it for the next [`acquire`](Self::acquire)
    pub fn release(&self, mut item: T) {
        item.reset();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(item);
        }
    }

    /// Number of idle instances
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("idle", &self.idle.lock().len())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

/// Exclusive handle on a pooled instance
pub struct Pooled<T: Reset> {
    item: Option<T>,
    pool: Arc<Pool<T>>,
}

impl<T: Reset> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // only `drop` takes the item out
        self.item.as_ref().unwrap_or_else(|| unreachable!("pooled item taken before drop"))
    }
}

impl<T: Reset> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!("pooled item taken before drop"))
    }
}

impl<T: Reset> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

impl<T: Reset + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.item).finish()
    }
}
