// crates/core/src/lib.rs
pub mod classifier;
pub mod config;
pub mod error;
pub mod markers;
pub mod state;
pub mod tail;
pub mod timeline;
pub mod types;

pub use classifier::*;
pub use config::*;
pub use error::*;
pub use markers::*;
pub use state::*;
pub use timeline::*;
pub use types::*;
