// crates/monitor/src/lib.rs
//! Live monitoring of a worker's log file.
//!
//! One [`LogMonitor`] owns one polling loop; a [`MonitorRegistry`] keeps an
//! arena of them keyed by run id. Consumers read the latest [`MonitorView`]
//! through a watch channel or follow [`MonitorEvent`]s through a broadcast
//! channel.

pub mod events;
pub mod manager;
pub mod metrics;
pub mod notice;
pub mod registry;
pub mod window;

pub use events::{MonitorEvent, MonitorPhase, MonitorView, StopReason};
pub use manager::LogMonitor;
pub use notice::ResetNotice;
pub use registry::MonitorRegistry;
pub use window::LineWindow;
