//! Deferred task pool.
//!
//! Runs blocking tasks and futures handed out by stages on a bounded set of
//! workers, and hands their results back to the scheduler thread.

mod futures_pool;
mod metrics;

pub use futures_pool::{FuturesPool, PoolPoll, Resolved};
pub use metrics::PoolMetrics;
