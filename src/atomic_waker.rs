//! Atomic waker slot shared between a result deliverer and the task awaiting it
//!
//! A waiter parks its `Waker` here; the deliverer takes it back out and wakes
//! it once the outcome is in place. Access to the stored waker is serialized
//! by a tiny state machine instead of a lock, so delivery never blocks on a
//! waiter that is in the middle of re-registering.
//!
//! 在结果投递方与等待任务之间共享的原子 waker 槽
//!
//! 等待者在此存放 `Waker`；投递方在结果就绪后取出并唤醒它。
//! 对 waker 的访问由一个小型状态机而非锁来串行化。

use std::task::Waker;

use crate::shim::atomic::{AtomicUsize, Ordering};
use crate::shim::cell::UnsafeCell;

// Registration states
const IDLE: usize = 0;
const REGISTERING: usize = 0b01;
const WAKING: usize = 0b10;

/// Lock-free storage for a single `Waker`
///
/// 单个 `Waker` 的无锁存储
pub(crate) struct AtomicWaker {
    state: AtomicUsize,
    waker: UnsafeCell<Option<Waker>>,
}

// SAFETY: the waker cell is only touched by the thread that moved the state
// machine out of IDLE (REGISTERING or WAKING), so there is never a concurrent
// reader and writer.
unsafe impl Send for AtomicWaker {}
unsafe impl Sync for AtomicWaker {}

impl AtomicWaker {
    #[cfg(not(feature = "loom"))]
    #[inline]
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicUsize::new(IDLE),
            waker: UnsafeCell::new(None),
        }
    }

    #[cfg(feature = "loom")]
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicUsize::new(IDLE),
            waker: UnsafeCell::new(None),
        }
    }

    /// Register `waker` to be woken by the next [`wake`](Self::wake)
    ///
    /// If a wake races with the registration, the freshly stored waker is
    /// woken immediately so the notification is never lost.
    ///
    /// 注册 `waker`，由下一次 [`wake`](Self::wake) 唤醒。
    /// 若唤醒与注册竞争，新注册的 waker 会被立即唤醒，通知不会丢失。
    pub(crate) fn register(&self, waker: &Waker) {
        match self
            .state
            .compare_exchange(IDLE, REGISTERING, Ordering::Acquire, Ordering::Acquire)
        {
            Ok(_) => {
                // SAFETY: REGISTERING grants exclusive access to the cell
                let previous = self.waker.with_mut(|slot| unsafe {
                    match &*slot {
                        Some(current) if current.will_wake(waker) => None,
                        _ => (*slot).replace(waker.clone()),
                    }
                });

                match self.state.compare_exchange(
                    REGISTERING,
                    IDLE,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => drop(previous),
                    Err(_) => {
                        // A wake arrived while we held the cell: state is
                        // REGISTERING | WAKING and the waker is ours to fire.
                        // SAFETY: the waking side backed off and left the cell to us
                        let pending = self.waker.with_mut(|slot| unsafe { (*slot).take() });
                        self.state.store(IDLE, Ordering::Release);
                        drop(previous);
                        if let Some(pending) = pending {
                            pending.wake();
                        }
                    }
                }
            }
            Err(WAKING) => {
                // Delivery is in progress, poll again right away
                waker.wake_by_ref();
            }
            Err(_) => {
                // Another registration holds the cell. A slot has exactly one
                // waiter, so this only happens if the waiter is polled from two
                // threads at once; make it re-poll rather than drop the waker.
                waker.wake_by_ref();
            }
        }
    }

    /// Remove the registered waker, if any
    ///
    /// 取出已注册的 waker（如果有）
    pub(crate) fn take(&self) -> Option<Waker> {
        match self.state.fetch_or(WAKING, Ordering::AcqRel) {
            IDLE => {
                // SAFETY: WAKING grants exclusive access to the cell
                let waker = self.waker.with_mut(|slot| unsafe { (*slot).take() });
                self.state.fetch_and(!WAKING, Ordering::Release);
                waker
            }
            _ => {
                // A registration is in flight; it will observe WAKING and fire
                // its own waker.
                None
            }
        }
    }

    /// Wake the registered waker, if any
    ///
    /// 唤醒已注册的 waker（如果有）
    #[inline]
    pub(crate) fn wake(&self) {
        if let Some(waker) = self.take() {
            waker.wake();
        }
    }
}

impl std::fmt::Debug for AtomicWaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicWaker").finish_non_exhaustive()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::sync::Arc;
    use std::task::Wake;

    struct CountingWaker(StdAtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    fn counting_waker() -> (Arc<CountingWaker>, Waker) {
        let counter = Arc::new(CountingWaker(StdAtomicUsize::new(0)));
        let waker = Waker::from(counter.clone());
        (counter, waker)
    }

    #[test]
    fn test_register_then_take() {
        let atomic_waker = AtomicWaker::new();
        let waker = futures::task::noop_waker();

        atomic_waker.register(&waker);
        assert!(atomic_waker.take().is_some());

        // Taken once, the slot is empty again
        assert!(atomic_waker.take().is_none());
    }

    #[test]
    fn test_wake_without_registration() {
        let atomic_waker = AtomicWaker::new();
        atomic_waker.wake();
        assert!(atomic_waker.take().is_none());
    }

    #[test]
    fn test_wake_fires_registered_waker_once() {
        let atomic_waker = AtomicWaker::new();
        let (counter, waker) = counting_waker();

        atomic_waker.register(&waker);
        atomic_waker.wake();
        atomic_waker.wake();

        assert_eq!(counter.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reregister_replaces_waker() {
        let atomic_waker = AtomicWaker::new();
        let (first, first_waker) = counting_waker();
        let (second, second_waker) = counting_waker();

        atomic_waker.register(&first_waker);
        atomic_waker.register(&second_waker);
        atomic_waker.wake();

        assert_eq!(first.0.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(second.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_register_and_wake() {
        use std::thread;

        let atomic_waker = Arc::new(AtomicWaker::new());
        let waker = futures::task::noop_waker();

        let registrar = {
            let atomic_waker = atomic_waker.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    atomic_waker.register(&waker);
                }
            })
        };

        let waker_side = {
            let atomic_waker = atomic_waker.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    atomic_waker.wake();
                }
            })
        };

        registrar.join().unwrap();
        waker_side.join().unwrap();
    }
}
