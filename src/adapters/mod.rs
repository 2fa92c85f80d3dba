// Adapters layer: concrete implementations of the domain ports (storage, observation sources).

pub mod json_source;
pub mod storage;

pub use json_source::JsonFileSource;
pub use storage::LocalStorage;
