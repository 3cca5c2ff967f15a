//! Coalescing counters.

use crate::shim::atomic::{AtomicU64, Ordering};

/// Snapshot of a coalescer's lifetime counters
///
/// 合并器生命周期计数的快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoalescerStats {
    /// Total `run` / `blocking_run` calls
    ///
    /// `run` / `blocking_run` 调用总数
    pub calls: u64,
    /// Calls that attached to an already in-flight round
    ///
    /// 挂接到已在进行中轮次的调用数
    pub coalesced: u64,
    /// Rounds started, i.e. underlying operation invocations
    ///
    /// 已开始的轮次数，即底层操作的调用次数
    pub rounds: u64,
}

impl CoalescerStats {
    /// Fraction of calls that did not trigger their own operation
    ///
    /// 未触发自身操作的调用所占比例
    pub fn coalescing_ratio(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.coalesced as f64 / self.calls as f64
        }
    }
}

#[derive(Debug)]
pub(crate) struct Counters {
    calls: AtomicU64,
    coalesced: AtomicU64,
    rounds: AtomicU64,
}

impl Counters {
    pub(crate) fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            rounds: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_started(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.rounds.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_joined(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CoalescerStats {
        CoalescerStats {
            calls: self.calls.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            rounds: self.rounds.load(Ordering::Relaxed),
        }
    }
}
