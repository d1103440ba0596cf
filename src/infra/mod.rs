//! Infrastructure - configuration, clock, and metrics
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `clock` - Wall-clock abstraction with a manual clock for tests
//! - `metrics` - Lock-free metrics collection

pub mod clock;
pub mod config;
pub mod metrics;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, Facing, NotifyMode};
pub use metrics::Metrics;
