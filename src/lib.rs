//! Crossline - streaming multi-timescale moving-average crossover signals

pub mod config;
pub mod error;
pub mod services;
pub mod types;

// Re-export commonly used types
pub use config::{AlgoConfig, Config, GateThresholds, SourceMode};
pub use error::{AppError, Result};
pub use types::*;
