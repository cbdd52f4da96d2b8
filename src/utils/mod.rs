//! # Utility Modules
//!
//! Supporting utilities shared by the client and server engines.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup driven by [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: Thread-safe observability counters
//! - **Time**: Monotonic millisecond clock for PING/PONG

pub mod logging;
pub mod metrics;
pub mod time;

pub use metrics::{global_metrics, Metrics, MetricsSnapshot};
