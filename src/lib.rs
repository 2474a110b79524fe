//! Host metrics agent: cached CPU, memory and process snapshots refreshed on
//! independent schedules, threshold alerts, and time-boxed recording
//! sessions persisted to SQLite.

pub mod alerts;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod recording;
pub mod store;
pub mod system;

pub use alerts::AlertThresholds;
pub use engine::{Dimension, Engine};
pub use error::{EngineError, ProbeError};
pub use store::Store;
