//! # lite-coalesce
//!
//! Lightweight single-flight coalescing for callback-style async operations.
//!
//! 面向回调式异步操作的轻量级单飞合并库。
//!
//! ## Overview / 概述
//!
//! A [`Coalescer`] turns an operation that reports its outcome through a
//! completion callback into an awaitable (or blocking) call, and guarantees
//! that callers arriving while the operation is in flight share its outcome
//! instead of starting redundant work. Think token refreshes, config reloads,
//! or any "expensive fetch everyone wants at once".
//!
//! [`Coalescer`] 将通过完成回调报告结果的操作转换为可 await（或阻塞）的调用，
//! 并保证在操作进行中到达的调用者共享其结果，而不是启动冗余工作。
//!
//! ## Key Features / 主要特性
//!
//! - **One operation per round**: only the primary caller's operation runs
//! - **Identical fan-out**: every caller of a round receives the same success or error
//! - **No lock across suspension**: state is guarded by one short critical section;
//!   the operation and the waiters always run outside it
//! - **Inline result slots**: each waiter is a lock-free one-shot slot, no channel per round
//!
//! - **每轮一个操作**：只有主调用者的操作会执行
//! - **相同分发**：同一轮次的每个调用者收到相同的成功值或错误
//! - **挂起期间不持锁**：状态由一个短临界区保护，操作和等待者总在其外执行
//! - **内联结果槽**：每个等待者是一个无锁一次性槽
//!
//! ## Modules / 模块
//!
//! ### [`coalescer`]
//!
//! The [`Coalescer`] itself, its [`Completion`] handle and [`CoalescerStats`].
//!
//! 合并器本体、其 [`Completion`] 句柄与 [`CoalescerStats`]。
//!
//! ### [`slot`]
//!
//! One-shot result slot used to suspend each caller until its round delivers.
//! Usable on its own as a minimal oneshot channel.
//!
//! 用于挂起每个调用者直到其轮次投递结果的一次性结果槽，也可单独用作最小的 oneshot 通道。
//!
//! ## Example / 示例
//!
//! ```
//! use lite_coalesce::{Coalescer, Completion};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let coalescer = Coalescer::<u64, String>::new();
//! let fetches = Arc::new(AtomicUsize::new(0));
//!
//! let mut callers = Vec::new();
//! for _ in 0..4 {
//!     let coalescer = coalescer.clone();
//!     let fetches = fetches.clone();
//!     callers.push(tokio::spawn(async move {
//!         coalescer
//!             .run(move |done: Completion<u64, String>| {
//!                 fetches.fetch_add(1, Ordering::SeqCst);
//!                 tokio::spawn(async move {
//!                     tokio::time::sleep(Duration::from_millis(20)).await;
//!                     done.succeed(42);
//!                 });
//!             })
//!             .await
//!     }));
//! }
//!
//! for caller in callers {
//!     assert_eq!(caller.await.unwrap(), Ok(42));
//! }
//! // Callers that joined a running round never invoked their own closure
//! assert_eq!(fetches.load(Ordering::SeqCst) as u64, coalescer.stats().rounds);
//! # });
//! ```
//!
//! ## Contract / 约定
//!
//! The operation must eventually complete its [`Completion`] exactly once.
//! Completing twice is impossible (it consumes the handle); never completing
//! leaves every caller of that round suspended, with a `tracing` warning.
//!
//! 操作必须最终恰好完成一次其 [`Completion`]。重复完成不可能发生（会消耗句柄）；
//! 从不完成会使该轮次的所有调用者持续挂起，并产生一条 `tracing` 警告。

mod atomic_waker;
mod shim;

pub mod coalescer;
pub mod slot;

pub use coalescer::{Coalescer, CoalescerStats, Completion};
