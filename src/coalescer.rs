//! Single-flight operation coalescer
//!
//! A [`Coalescer`] holds at most one in-flight operation. The first caller of
//! [`run`](Coalescer::run) while idle becomes the primary: its operation is
//! invoked with a [`Completion`] handle. Every caller that arrives while that
//! operation is outstanding drops its own operation unexecuted and attaches
//! to the running round instead. When the completion fires, the outcome is
//! cloned out to every attached caller and the coalescer returns to idle.
//!
//! 单飞操作合并器
//!
//! [`Coalescer`] 同一时刻最多持有一个进行中的操作。空闲时第一个调用
//! [`run`](Coalescer::run) 的调用者成为主调用者：其操作以 [`Completion`] 句柄被调用。
//! 该操作未完成期间到达的每个调用者都不会执行自己的操作，而是挂接到当前轮次。
//! 完成回调触发时，结果被分发给每个挂接的调用者，合并器回到空闲状态。
//!
//! # State machine | 状态机
//!
//! ```text
//!            run (idle): invoke operation
//!   Idle ───────────────────────────────────▶ InFlight ──┐
//!    ▲                                          │        │ run: attach only
//!    └──────────── complete: reset, deliver ────┘ ◀──────┘
//! ```
//!
//! The check-and-register step of `run` and the reset step of `complete`
//! share one lock, and neither the operation nor any waiter is ever called
//! while it is held.
//!
//! `run` 的检查并注册步骤与 `complete` 的重置步骤共享同一把锁，
//! 持锁期间不会调用操作或任何等待者。

mod completion;
mod stats;

pub use completion::Completion;
pub use stats::CoalescerStats;

use std::fmt;
use std::sync::PoisonError;

use tracing::{debug, trace, warn};

use crate::shim::sync::{Arc, Mutex, MutexGuard};
use crate::slot::{self, Deliver, RecvError, Waiter};
use stats::Counters;

/// Round bookkeeping guarded by the coalescer lock
struct State<T, E> {
    in_progress: bool,
    /// Id of the current (or last) round
    round: u64,
    /// Callers of the current round, primary first
    waiters: Vec<Deliver<Result<T, E>>>,
}

pub(crate) struct Inner<T, E> {
    state: Mutex<State<T, E>>,
    counters: Counters,
}

/// What `attach` decided for a caller
enum Attached {
    Primary(u64),
    Joined(u64),
}

impl<T, E> Inner<T, E> {
    fn new() -> Self {
        Self {
            state: Mutex::new(State {
                in_progress: false,
                round: 0,
                waiters: Vec::new(),
            }),
            counters: Counters::new(),
        }
    }

    // No user code runs under this lock, so a poisoned guard still holds
    // consistent state.
    #[inline]
    fn lock(&self) -> MutexGuard<'_, State<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset to idle and hand back the round's waiters for delivery
    ///
    /// A round that was already torn down (its operation panicked) yields no
    /// waiters, so a late completion cannot reach callers of a newer round.
    pub(crate) fn finish_round(&self, round: u64) -> Vec<Deliver<Result<T, E>>> {
        let mut state = self.lock();
        if !state.in_progress || state.round != round {
            debug!(round, current = state.round, "ignoring completion of a finished round");
            return Vec::new();
        }
        state.in_progress = false;
        std::mem::take(&mut state.waiters)
    }
}

/// Tears the round down if the primary's operation unwinds
///
/// Dropping the round's deliverers wakes every attached caller with
/// `RecvError`, which `run` turns back into a panic.
///
/// 主调用者的操作发生 panic 时拆除当前轮次
struct UnwindGuard<'a, T, E> {
    inner: &'a Inner<T, E>,
    round: u64,
}

impl<T, E> UnwindGuard<'_, T, E> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl<T, E> Drop for UnwindGuard<'_, T, E> {
    fn drop(&mut self) {
        let waiters = self.inner.finish_round(self.round);
        warn!(
            round = self.round,
            waiters = waiters.len(),
            "coalesced operation panicked; round reset"
        );
    }
}

/// Single-flight coalescer for a callback-style operation
///
/// Cloning yields another handle to the same coalescer.
///
/// 用于回调式操作的单飞合并器。克隆得到指向同一合并器的另一个句柄。
///
/// # Example
///
/// ```
/// use lite_coalesce::Coalescer;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let coalescer = Coalescer::<String, String>::new();
///
/// let fetch = |done: lite_coalesce::Completion<String, String>| {
///     tokio::spawn(async move {
///         tokio::time::sleep(Duration::from_millis(10)).await;
///         done.succeed("token".to_string());
///     });
/// };
///
/// // Both calls share a single invocation of `fetch`
/// let (a, b) = tokio::join!(coalescer.run(fetch), coalescer.run(fetch));
/// assert_eq!(a, Ok("token".to_string()));
/// assert_eq!(b, Ok("token".to_string()));
/// assert_eq!(coalescer.stats().rounds, 1);
/// # });
/// ```
pub struct Coalescer<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Coalescer<T, E> {
    /// Create an idle coalescer
    ///
    /// 创建一个空闲的合并器
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::new()),
        }
    }

    /// Whether an operation is currently outstanding
    ///
    /// 当前是否有未完成的操作
    pub fn is_in_flight(&self) -> bool {
        self.inner.lock().in_progress
    }

    /// Number of callers attached to the current round, primary included
    ///
    /// 挂接到当前轮次的调用者数量（包括主调用者）
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Lifetime counters
    ///
    /// 生命周期计数
    pub fn stats(&self) -> CoalescerStats {
        self.inner.counters.snapshot()
    }

    /// Register the caller and, if it is the primary, start the operation
    ///
    /// 注册调用者；若其为主调用者，则启动操作
    fn attach<F>(&self, operation: F) -> Waiter<Result<T, E>>
    where
        F: FnOnce(Completion<T, E>),
    {
        let (deliver, waiter) = slot::channel();

        let attached = {
            let mut state = self.inner.lock();
            state.waiters.push(deliver);
            if state.in_progress {
                Attached::Joined(state.round)
            } else {
                state.in_progress = true;
                state.round += 1;
                Attached::Primary(state.round)
            }
        };

        match attached {
            Attached::Primary(round) => {
                self.inner.counters.record_started();
                trace!(round, "starting coalesced operation");
                let guard = UnwindGuard {
                    inner: &*self.inner,
                    round,
                };
                operation(Completion::new(self.inner.clone(), round));
                guard.disarm();
            }
            Attached::Joined(round) => {
                self.inner.counters.record_joined();
                trace!(round, "joined in-flight operation");
            }
        }

        waiter
    }
}

impl<T: Clone, E: Clone> Coalescer<T, E> {
    /// Run `operation`, or join the one already in flight
    ///
    /// If the coalescer is idle, `operation` is invoked right away with a
    /// [`Completion`] for a new round; otherwise it is dropped without being
    /// called. Either way the call resolves with the outcome of the round it
    /// belongs to, shared verbatim with every other caller of that round.
    ///
    /// If the round's `Completion` is dropped without completing, this call
    /// never resolves.
    ///
    /// # Panics
    ///
    /// If the primary's operation panics, the round is reset so the next call
    /// starts fresh, the panic continues in the primary, and every caller
    /// that joined the round panics as well.
    ///
    /// 执行 `operation`，或挂接到已在进行中的操作
    ///
    /// 若合并器空闲，`operation` 会立即以新轮次的 [`Completion`] 被调用；
    /// 否则它会被直接丢弃而不执行。无论哪种情况，调用都以所属轮次的结果返回，
    /// 该结果与同轮次的所有其他调用者完全相同。
    ///
    /// 若主调用者的操作 panic，轮次会被重置，主调用者继续 panic，
    /// 挂接到该轮次的调用者也会 panic。
    pub async fn run<F>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce(Completion<T, E>),
    {
        let waiter = self.attach(operation);
        match waiter.await {
            Ok(outcome) => outcome,
            // Deliverers are only dropped unsent when the operation unwound
            Err(RecvError) => panic!("coalesced operation panicked"),
        }
    }

    /// Blocking variant of [`run`](Self::run) for synchronous callers
    ///
    /// Parks the current thread until the round completes. Do not call this
    /// from an async runtime worker.
    ///
    /// Panics under the same conditions as [`run`](Self::run).
    ///
    /// [`run`](Self::run) 的阻塞版本，供同步调用者使用。
    /// 会挂起当前线程直到轮次完成，不要在异步运行时的工作线程中调用。
    pub fn blocking_run<F>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce(Completion<T, E>),
    {
        let waiter = self.attach(operation);
        match waiter.wait_blocking() {
            Ok(outcome) => outcome,
            Err(RecvError) => panic!("coalesced operation panicked"),
        }
    }
}

impl<T, E> Clone for Coalescer<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Default for Coalescer<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for Coalescer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Coalescer")
            .field("in_progress", &state.in_progress)
            .field("round", &state.round)
            .field("waiters", &state.waiters.len())
            .field("stats", &self.inner.counters.snapshot())
            .finish()
    }
}
