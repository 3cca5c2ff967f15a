//! Shim module to abstract over std and loom primitives.
//!
//! Everything the coalescer shares between threads goes through here, so the
//! `loom` feature can swap in model-checked versions without touching the
//! call sites.
//!
//! 在 std 与 loom 原语之间切换的垫片模块。

#[cfg(not(feature = "loom"))]
pub(crate) mod atomic {
    pub(crate) use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
}

#[cfg(feature = "loom")]
pub(crate) mod atomic {
    pub(crate) use loom::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
}

#[cfg(not(feature = "loom"))]
pub(crate) mod cell {
    /// `UnsafeCell` with loom's closure-based access API.
    #[derive(Debug)]
    #[repr(transparent)]
    pub(crate) struct UnsafeCell<T: ?Sized>(std::cell::UnsafeCell<T>);

    impl<T> UnsafeCell<T> {
        #[inline]
        pub(crate) const fn new(data: T) -> UnsafeCell<T> {
            UnsafeCell(std::cell::UnsafeCell::new(data))
        }
    }

    impl<T: ?Sized> UnsafeCell<T> {
        #[inline]
        pub(crate) fn with<F, R>(&self, f: F) -> R
        where
            F: FnOnce(*const T) -> R,
        {
            f(self.0.get())
        }

        #[inline]
        pub(crate) fn with_mut<F, R>(&self, f: F) -> R
        where
            F: FnOnce(*mut T) -> R,
        {
            f(self.0.get())
        }
    }
}

#[cfg(feature = "loom")]
pub(crate) mod cell {
    pub(crate) use loom::cell::UnsafeCell;
}

#[cfg(not(feature = "loom"))]
pub(crate) mod sync {
    pub(crate) use std::sync::{Arc, Mutex, MutexGuard};
}

#[cfg(feature = "loom")]
pub(crate) mod sync {
    pub(crate) use loom::sync::{Arc, Mutex, MutexGuard};
}

#[cfg(not(feature = "loom"))]
pub(crate) mod thread {
    pub(crate) use std::thread::{current, park, Thread};
}

#[cfg(feature = "loom")]
pub(crate) mod thread {
    pub(crate) use loom::thread::{current, park, Thread};
}
