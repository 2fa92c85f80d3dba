pub mod congestion;
pub mod engine;
pub mod ensemble;
pub mod features;
pub mod forecast;
pub mod fusion;
pub mod graph;
pub mod model_manager;
pub mod report;
pub mod sentiment;
pub mod synthetic;

pub use crate::domain::ports::{ObservationSource, SentimentModel, Storage};
pub use crate::utils::error::Result;
