pub mod endpoint;
pub mod memory;
pub mod perf;

pub use perf::{
    monitor_requests, MonitorError, PerformanceMonitor, PerformanceReport, CORRELATION_HEADER,
};
