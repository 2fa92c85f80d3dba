pub mod error;
pub mod hash;
pub mod logger;
pub mod validation;
