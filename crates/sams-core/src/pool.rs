//! Blocking checkout/return pool for non-`Sync` resources (database connections).
//!
//! Uses `Mutex + Condvar` from std. A checked-out item goes back to the pool
//! when its guard drops, including on early return and unwinding.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, PoisonError};

pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    cond: Condvar,
    size: usize,
}

/// RAII guard; returns the item to the pool on drop.
pub struct PoolGuard<'a, T> {
    pool: &'a Pool<T>,
    item: Option<T>,
}

impl<T> Pool<T> {
    pub fn new(items: Vec<T>) -> Self {
        let size = items.len();
        Self {
            idle: Mutex::new(items),
            cond: Condvar::new(),
            size,
        }
    }

    /// Block until an item is free, then take it.
    pub fn checkout(&self) -> PoolGuard<'_, T> {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(item) = idle.pop() {
                return PoolGuard {
                    pool: self,
                    item: Some(item),
                };
            }
            idle = self
                .cond
                .wait(idle)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Items in the pool when it was built
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn idle(&self) -> usize {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T> Deref for PoolGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only taken in drop
        self.item.as_ref().expect("pool item present until drop")
    }
}

impl<T> DerefMut for PoolGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("pool item present until drop")
    }
}

impl<T> Drop for PoolGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            let mut idle = self
                .pool
                .idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            idle.push(item);
            self.pool.cond.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn checkout_and_return() {
        let pool = Pool::new(vec![1, 2]);
        let g1 = pool.checkout();
        let _g2 = pool.checkout();
        assert_eq!(pool.idle(), 0);
        drop(g1);
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn returned_on_panic() {
        let pool = Pool::new(vec![String::from("conn")]);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _g = pool.checkout();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn blocking_checkout() {
        let pool = Arc::new(Pool::new(vec![0u32]));
        let guard = pool.checkout();

        let pool2 = pool.clone();
        let handle = std::thread::spawn(move || {
            let mut g = pool2.checkout();
            *g += 42;
            *g
        });

        // Give thread time to block
        std::thread::sleep(std::time::Duration::from_millis(50));
        drop(guard);

        assert_eq!(handle.join().unwrap(), 42);
        assert_eq!(*pool.checkout(), 42);
    }
}
