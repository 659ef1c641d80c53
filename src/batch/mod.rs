//! 并发控制模块：以固定数量的并发槽位调度后端调用。
//!
//! # Concurrency Controller
//!
//! Every adapter call goes through a [`ConcurrencyController`], which admits
//! at most `K` calls at once (default 3), applies per-backend rate limits and
//! deadlines, retries transient failures, and returns batch results in the
//! order the requests were given.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ConcurrencyController`] | Slot pool, deadlines, retry, positional batches |
//! | [`SlotSnapshot`] | Max/available/in-use slot counts |
//!
//! Cancellation is cooperative: [`ConcurrencyController::submit_batch_with_cancel`]
//! returns [`crate::Error::Cancelled`] once its token fires, without waiting
//! for calls that are already in flight.

mod controller;

pub use controller::{ConcurrencyController, SlotSnapshot};
