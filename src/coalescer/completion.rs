//! The completion handle handed to the underlying operation.

use std::fmt;

use tracing::{debug, warn};

use super::Inner;
use crate::shim::sync::Arc;
use crate::slot::Deliver;

/// Completion callback for one coalesced round
///
/// The primary caller's operation receives exactly one `Completion` and must
/// eventually call [`complete`](Self::complete) (or one of its shorthands)
/// from any thread or task. Completing consumes the handle, so a round can
/// never be completed twice.
///
/// Dropping a `Completion` without completing leaves the round in flight:
/// every caller attached to it stays suspended. This is a violation of the
/// operation's contract and is only reported through a `warn!` event.
///
/// 单个合并轮次的完成回调
///
/// 主调用者的操作恰好收到一个 `Completion`，并且必须最终从任意线程或任务调用
/// [`complete`](Self::complete)。完成会消耗句柄，因此一个轮次不可能被完成两次。
///
/// 未完成就丢弃 `Completion` 会使该轮次一直处于进行中，所有挂接的调用者都将持续挂起。
pub struct Completion<T, E> {
    inner: Option<Arc<Inner<T, E>>>,
    round: u64,
}

impl<T, E> Completion<T, E> {
    pub(super) fn new(inner: Arc<Inner<T, E>>, round: u64) -> Self {
        Self {
            inner: Some(inner),
            round,
        }
    }

    /// Identifier of the round this handle completes
    ///
    /// 此句柄所完成轮次的标识
    #[inline]
    pub fn round(&self) -> u64 {
        self.round
    }
}

impl<T: Clone, E: Clone> Completion<T, E> {
    /// Report the operation's outcome to every caller of this round
    ///
    /// The coalescer is reset to idle before any caller is resumed, so a
    /// caller that immediately calls `run` again starts a fresh round.
    ///
    /// 将操作结果报告给本轮次的每个调用者。
    /// 在任何调用者恢复之前合并器已重置为空闲，因此立即再次调用 `run` 会开始新的轮次。
    pub fn complete(mut self, outcome: Result<T, E>) {
        let Some(inner) = self.inner.take() else {
            return;
        };

        let waiters = inner.finish_round(self.round);
        debug!(
            round = self.round,
            waiters = waiters.len(),
            ok = outcome.is_ok(),
            "delivering coalesced outcome"
        );
        deliver_all(waiters, outcome);
    }

    /// Shorthand for `complete(Ok(value))`
    ///
    /// `complete(Ok(value))` 的简写
    #[inline]
    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    /// Shorthand for `complete(Err(error))`
    ///
    /// `complete(Err(error))` 的简写
    #[inline]
    pub fn fail(self, error: E) {
        self.complete(Err(error));
    }
}

/// Hand `outcome` to each waiter in arrival order; the last one gets the
/// original, everyone before it a clone.
fn deliver_all<V: Clone>(waiters: Vec<Deliver<V>>, outcome: V) {
    let mut waiters = waiters.into_iter();
    let last = waiters.next_back();

    for deliver in waiters {
        deliver.send(outcome.clone());
    }
    if let Some(last) = last {
        last.send(outcome);
    }
}

impl<T, E> Drop for Completion<T, E> {
    fn drop(&mut self) {
        // An unwinding operation is reported by the coalescer's own guard
        if self.inner.is_some() && !std::thread::panicking() {
            warn!(
                round = self.round,
                "completion dropped without an outcome; callers of this round stay suspended"
            );
        }
    }
}

impl<T, E> fmt::Debug for Completion<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("round", &self.round)
            .field("completed", &self.inner.is_none())
            .finish()
    }
}
