// SPDX-License-Identifier: MIT OR Apache-2.0
//! Synchronization compatibility for loom testing.
//!
//! Re-exports `parking_lot::Mutex` and the std atomics in normal builds and
//! swaps in `loom::sync` equivalents when the `loom` feature is active. The
//! mutex wrapper strips the `Result` from loom's `lock()` so call sites stay
//! identical.

#[cfg(not(feature = "loom"))]
pub use parking_lot::Mutex;
#[cfg(not(feature = "loom"))]
pub use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

#[cfg(feature = "loom")]
pub use self::loom_compat::Mutex;
#[cfg(feature = "loom")]
pub use loom::sync::atomic::{AtomicU16, AtomicU64, Ordering};

#[cfg(feature = "loom")]
mod loom_compat {
    use std::fmt;

    /// Thin wrapper matching `parking_lot::Mutex` API (no `Result` from lock).
    pub struct Mutex<T>(loom::sync::Mutex<T>);

    impl<T> Mutex<T> {
        pub fn new(t: T) -> Self {
            Self(loom::sync::Mutex::new(t))
        }

        pub fn lock(&self) -> loom::sync::MutexGuard<'_, T> {
            self.0.lock().unwrap()
        }
    }

    impl<T: Default> Default for Mutex<T> {
        fn default() -> Self {
            Self::new(T::default())
        }
    }

    impl<T: fmt::Debug> fmt::Debug for Mutex<T> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self.0.try_lock() {
                Ok(guard) => f.debug_tuple("Mutex").field(&*guard).finish(),
                Err(_) => f.debug_tuple("Mutex").field(&"<locked>").finish(),
            }
        }
    }
}
