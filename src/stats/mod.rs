//! Statistics and diagnostics

pub mod metrics;
pub mod rate;
pub mod system;

pub use metrics::{ClientStats, ServerStats};
pub use rate::RateTracker;
pub use system::{CpuUsage, MemoryInfo, SystemStats};
