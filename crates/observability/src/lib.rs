//! Process-wide tracing and metrics setup for applications embedding the
//! monitor. Library crates only emit; installing subscribers and recorders
//! happens here, once, from the host binary.

pub mod logging;
pub mod metrics;

pub use logging::{init_tracing, LogFormat, LoggingConfig};
pub use self::metrics::{init_metrics, render_metrics};
