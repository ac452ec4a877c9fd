//! Core engine: one-shot scans and the continuous monitor loop.

pub mod monitor;
pub mod scanner;

pub use monitor::{MonitorHandle, MonitorOptions, SeenSet};
pub use scanner::{ScanOrchestrator, ScanReport, ScanRequest, SourceFailure};
