//! One-shot result slot.
//!
//! Each caller attached to a coalesced round owns the [`Waiter`] half of a
//! slot; the round keeps the matching [`Deliver`] half and fills it exactly
//! once when the underlying operation reports its outcome. The value lives
//! inline in the shared allocation (`UnsafeCell<MaybeUninit<T>>` guarded by an
//! `AtomicU8`), so delivery is a single store plus a wake.
//!
//! 一次性结果槽。
//!
//! 每个挂接到合并轮次的调用者持有槽的 [`Waiter`] 端；轮次保留对应的
//! [`Deliver`] 端，并在底层操作报告结果时恰好填充一次。
//!
//! # Example
//!
//! ```
//! use lite_coalesce::slot;
//!
//! # tokio_test::block_on(async {
//! let (deliver, waiter) = slot::channel::<String>();
//!
//! tokio::spawn(async move {
//!     deliver.send("done".to_string());
//! });
//!
//! assert_eq!(waiter.await, Ok("done".to_string()));
//! # });
//! ```

use std::fmt;
use std::future::Future;
use std::mem::MaybeUninit;
use std::pin::Pin;
use std::task::{Context, Poll, Wake, Waker};

use crate::atomic_waker::AtomicWaker;
use crate::shim::atomic::{AtomicU8, Ordering};
use crate::shim::cell::UnsafeCell;
use crate::shim::sync::Arc;
use crate::shim::thread;

// Slot states
const EMPTY: u8 = 0; // Nothing delivered yet
const READY: u8 = 1; // Value written, not yet taken
const CLOSED: u8 = 2; // Deliverer dropped without sending
const TAKEN: u8 = 3; // Value moved out by the waiter

// ============================================================================
// Errors
// ============================================================================

/// Error returned when the [`Deliver`] half is dropped without sending
///
/// 当 [`Deliver`] 端在发送前被丢弃时返回的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvError;

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot closed without a value")
    }
}

impl std::error::Error for RecvError {}

/// Error returned from [`Waiter::try_recv`]
///
/// [`Waiter::try_recv`] 返回的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// Nothing has been delivered yet
    ///
    /// 尚未投递任何值
    Empty,
    /// The deliverer was dropped without sending, or the value was already taken
    ///
    /// 投递方未发送即被丢弃，或值已被取走
    Closed,
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryRecvError::Empty => write!(f, "slot empty"),
            TryRecvError::Closed => write!(f, "slot closed"),
        }
    }
}

impl std::error::Error for TryRecvError {}

// ============================================================================
// Shared storage
// ============================================================================

struct Shared<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
    waker: AtomicWaker,
}

// SAFETY: the value cell is written once by the deliverer before the Release
// store of READY and read once by the waiter after winning the READY -> TAKEN
// exchange, so the two sides never touch it concurrently.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

enum Take<T> {
    Ready(T),
    Pending,
    Closed,
}

impl<T> Shared<T> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
            waker: AtomicWaker::new(),
        }
    }

    fn take(&self) -> Take<T> {
        match self
            .state
            .compare_exchange(READY, TAKEN, Ordering::Acquire, Ordering::Acquire)
        {
            // SAFETY: READY means the value is initialized, and winning the
            // exchange makes this the only read.
            Ok(_) => Take::Ready(self.value.with(|v| unsafe { (*v).assume_init_read() })),
            Err(EMPTY) => Take::Pending,
            Err(_) => Take::Closed,
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // Delivered but never received
        if self.state.load(Ordering::Acquire) == READY {
            // SAFETY: READY means initialized; we are the last owner
            self.value.with_mut(|v| unsafe { (*v).assume_init_drop() });
        }
    }
}

// ============================================================================
// Deliver
// ============================================================================

/// Sending half of a slot
///
/// 槽的发送端
pub struct Deliver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> fmt::Debug for Deliver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deliver").finish_non_exhaustive()
    }
}

impl<T> Deliver<T> {
    /// Store `value` and wake the waiter
    ///
    /// Consumes the handle, so a slot can be filled at most once. If the
    /// waiter is already gone the value is simply dropped with the slot.
    ///
    /// 存入 `value` 并唤醒等待者。消耗句柄，因此槽最多只能被填充一次。
    pub fn send(self, value: T) {
        // SAFETY: we hold the only Deliver and the state is still EMPTY
        self.shared.value.with_mut(|v| unsafe {
            (*v).write(value);
        });
        self.shared.state.store(READY, Ordering::Release);
        self.shared.waker.wake();
        // Drop runs next and finds READY, so it will not close the slot
    }

    /// Check whether the waiter has been dropped
    ///
    /// 检查等待者是否已被丢弃
    #[inline]
    pub fn is_closed(&self) -> bool {
        Arc::strong_count(&self.shared) == 1
    }
}

impl<T> Drop for Deliver<T> {
    fn drop(&mut self) {
        if self
            .shared
            .state
            .compare_exchange(EMPTY, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.shared.waker.wake();
        }
    }
}

// ============================================================================
// Waiter
// ============================================================================

/// Receiving half of a slot
///
/// Implements `Future` directly, so it can be `.await`ed; synchronous code
/// uses [`wait_blocking`](Self::wait_blocking) instead.
///
/// 槽的接收端。直接实现了 `Future`；同步代码使用
/// [`wait_blocking`](Self::wait_blocking)。
pub struct Waiter<T> {
    shared: Arc<Shared<T>>,
}

impl<T> fmt::Debug for Waiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter").finish_non_exhaustive()
    }
}

impl<T> Unpin for Waiter<T> {}

impl<T> Waiter<T> {
    /// Take the value if it has been delivered
    ///
    /// 如果值已投递则取出
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        match self.shared.take() {
            Take::Ready(value) => Ok(value),
            Take::Pending => Err(TryRecvError::Empty),
            Take::Closed => Err(TryRecvError::Closed),
        }
    }

    /// Block the current thread until the value is delivered
    ///
    /// # Blocking
    ///
    /// Blocking inside an async runtime worker stalls that worker; call this
    /// only from synchronous code.
    ///
    /// 阻塞当前线程直到值被投递。仅应在同步代码中调用。
    pub fn wait_blocking(self) -> Result<T, RecvError> {
        match self.shared.take() {
            Take::Ready(value) => return Ok(value),
            Take::Closed => return Err(RecvError),
            Take::Pending => {}
        }

        let parker = std::sync::Arc::new(ThreadParker {
            thread: thread::current(),
        });
        let waker = Waker::from(parker);
        self.shared.waker.register(&waker);

        loop {
            match self.shared.take() {
                Take::Ready(value) => return Ok(value),
                Take::Closed => return Err(RecvError),
                Take::Pending => thread::park(),
            }
        }
    }
}

struct ThreadParker {
    thread: thread::Thread,
}

impl Wake for ThreadParker {
    fn wake(self: std::sync::Arc<Self>) {
        self.thread.unpark();
    }

    fn wake_by_ref(self: &std::sync::Arc<Self>) {
        self.thread.unpark();
    }
}

impl<T> Future for Waiter<T> {
    type Output = Result<T, RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        // Fast path: already delivered
        match this.shared.take() {
            Take::Ready(value) => return Poll::Ready(Ok(value)),
            Take::Closed => return Poll::Ready(Err(RecvError)),
            Take::Pending => {}
        }

        this.shared.waker.register(cx.waker());

        // Re-check after registering so a delivery that raced the
        // registration is not missed
        match this.shared.take() {
            Take::Ready(value) => Poll::Ready(Ok(value)),
            Take::Closed => Poll::Ready(Err(RecvError)),
            Take::Pending => Poll::Pending,
        }
    }
}

/// Create a new one-shot slot
///
/// 创建一个新的一次性槽
pub fn channel<T>() -> (Deliver<T>, Waiter<T>) {
    let shared = Arc::new(Shared::new());
    (
        Deliver {
            shared: shared.clone(),
        },
        Waiter { shared },
    )
}
