use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Invalid observation: {field} ({reason})")]
    InvalidObservation { field: String, reason: String },

    #[error("Insufficient training data: need at least {required} samples, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("No trained model available at {location}")]
    ModelNotFound { location: String },

    #[error("Model retraining exceeded timeout of {timeout_secs}s")]
    RetrainTimeout { timeout_secs: u64 },

    #[error("Model training failed: {message}")]
    TrainingFailed { message: String },

    #[error("Invalid model artifact at {location}: {reason}")]
    InvalidArtifact { location: String, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid configuration value for {field}: {value} ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },
}

pub type Result<T> = std::result::Result<T, RiskError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Model,
    Configuration,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskError {
    pub fn invalid_observation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        RiskError::InvalidObservation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            RiskError::InvalidObservation { .. } => ErrorCategory::Input,
            RiskError::InsufficientData { .. }
            | RiskError::ModelNotFound { .. }
            | RiskError::RetrainTimeout { .. }
            | RiskError::TrainingFailed { .. }
            | RiskError::InvalidArtifact { .. } => ErrorCategory::Model,
            RiskError::ConfigError { .. }
            | RiskError::InvalidConfigValueError { .. }
            | RiskError::MissingConfigError { .. } => ErrorCategory::Configuration,
            RiskError::IoError(_) | RiskError::SerializationError(_) | RiskError::CsvError(_) => {
                ErrorCategory::Storage
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // 沒有模型時會退回啟發式評分，不影響整體流程
            RiskError::ModelNotFound { .. } => ErrorSeverity::Low,
            RiskError::InvalidObservation { .. }
            | RiskError::InsufficientData { .. }
            | RiskError::RetrainTimeout { .. } => ErrorSeverity::Medium,
            RiskError::TrainingFailed { .. }
            | RiskError::InvalidArtifact { .. }
            | RiskError::ConfigError { .. }
            | RiskError::InvalidConfigValueError { .. }
            | RiskError::MissingConfigError { .. }
            | RiskError::SerializationError(_)
            | RiskError::CsvError(_) => ErrorSeverity::High,
            RiskError::IoError(_) => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            RiskError::InvalidObservation { .. } => {
                "Check the ingestion cache for malformed records (e.g. zero port capacity)"
            }
            RiskError::InsufficientData { .. } => {
                "Collect more labelled samples or lower model.min_samples (minimum 50)"
            }
            RiskError::ModelNotFound { .. } => {
                "Run `train_model` to produce an artifact; heuristic scoring is used meanwhile"
            }
            RiskError::RetrainTimeout { .. } => {
                "Increase model.retrain_timeout_secs or reduce the number of trees"
            }
            RiskError::TrainingFailed { .. } => "Inspect the training dataset and retry",
            RiskError::InvalidArtifact { .. } => {
                "Delete the artifact and run `train_model` again"
            }
            RiskError::ConfigError { .. }
            | RiskError::InvalidConfigValueError { .. }
            | RiskError::MissingConfigError { .. } => {
                "Fix the configuration file and re-run the command"
            }
            RiskError::IoError(_) => "Verify that the file exists and the path is writable",
            RiskError::SerializationError(_) => "Verify the JSON document structure",
            RiskError::CsvError(_) => "Verify the report output directory",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Input => format!("Observation rejected: {}", self),
            ErrorCategory::Model => format!("Model problem: {}", self),
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Storage => format!("Storage problem: {}", self),
        }
    }
}

/// 評分週期中的非致命狀況，隨快照一同發布
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineWarning {
    CyclicDependency { routes: Vec<String> },
    StaleData {
        route_id: String,
        modality: String,
        age_hours: f64,
        bound_hours: f64,
    },
    DegradedMode { reason: String },
}

impl std::fmt::Display for EngineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineWarning::CyclicDependency { routes } => {
                write!(f, "cyclic route dependency resolved in one pass: {}", routes.join(" -> "))
            }
            EngineWarning::StaleData {
                route_id,
                modality,
                age_hours,
                bound_hours,
            } => write!(
                f,
                "stale {} observation for {} ({:.1}h old, bound {:.1}h)",
                modality, route_id, age_hours, bound_hours
            ),
            EngineWarning::DegradedMode { reason } => write!(f, "degraded mode: {}", reason),
        }
    }
}
