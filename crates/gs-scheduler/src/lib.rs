//! GateSync Request Scheduler
//!
//! Every control-plane call goes through a [`Scheduler`]:
//! - Single FIFO queue per scheduler instance
//! - Concurrency ceiling on in-flight calls (default 1)
//! - Minimum delay between consecutive dispatch starts (default 200ms)
//! - [`RetryPolicy`]: exponential backoff on rate-limit failures only

pub mod retry;
pub mod scheduler;

pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStats};
