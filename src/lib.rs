pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{JsonFileSource, LocalStorage};
pub use config::EngineConfig;
pub use core::engine::{CycleSnapshot, RiskEngine};
pub use core::fusion::{FusionEngine, FusionMode, ScoringMode};
pub use core::model_manager::ModelManager;
pub use utils::error::{Result, RiskError};
