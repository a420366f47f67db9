//! Data models for traces, logs, metrics, and alerts

pub mod alert;
pub mod anomaly;
pub mod log;
pub mod metric;
pub mod span;
pub mod trace;

pub use alert::*;
pub use anomaly::*;
pub use log::*;
pub use metric::*;
pub use span::*;
pub use trace::*;
