//! Values owned behind a lock.

use parking_lot::{Mutex, RwLock};

/// A value owned behind a mutex, accessed through closures.
///
/// The lock is never exposed, so it cannot be held across an await point;
/// every access is a short synchronous critical section.
pub struct Mutexed<T> {
    value: Mutex<T>,
}

impl<T> Mutexed<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    /// Run `f` with exclusive access to the inner value.
    pub fn locked<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut *self.value.lock())
    }

    /// Overwrite the inner value.
    pub fn set(&self, value: T) {
        *self.value.lock() = value;
    }

    /// Overwrite the inner value, returning the previous one.
    pub fn swap(&self, value: T) -> T {
        std::mem::replace(&mut *self.value.lock(), value)
    }
}

impl<T: Clone> Mutexed<T> {
    /// Return a copy of the inner value.
    pub fn get(&self) -> T {
        self.value.lock().clone()
    }
}

impl<T: Default> Mutexed<T> {
    /// Take the inner value, leaving the default in its place.
    pub fn take(&self) -> T {
        self.swap(T::default())
    }
}

impl<T: Default> Default for Mutexed<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Like [`Mutexed`], but backed by a reader-writer lock so snapshot reads
/// do not contend with each other.
pub struct RwMutexed<T> {
    value: RwLock<T>,
}

impl<T> RwMutexed<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: RwLock::new(value),
        }
    }

    /// Run `f` with exclusive access to the inner value.
    pub fn locked<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut *self.value.write())
    }

    /// Run `f` with shared access to the inner value.
    pub fn read_locked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.value.read())
    }

    /// Overwrite the inner value.
    pub fn set(&self, value: T) {
        *self.value.write() = value;
    }

    /// Overwrite the inner value, returning the previous one.
    ///
    /// Close paths use `swap(Default::default())` to take ownership of the
    /// contents and release the lock before iterating over them.
    pub fn swap(&self, value: T) -> T {
        std::mem::replace(&mut *self.value.write(), value)
    }
}

impl<T: Clone> RwMutexed<T> {
    /// Return a copy of the inner value.
    pub fn get(&self) -> T {
        self.value.read().clone()
    }
}

impl<T: Default> RwMutexed<T> {
    /// Take the inner value, leaving the default in its place.
    pub fn take(&self) -> T {
        self.swap(T::default())
    }
}

impl<T: Default> Default for RwMutexed<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
