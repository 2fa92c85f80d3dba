pub mod toml_config;

pub use toml_config::EngineConfig;

#[cfg(feature = "cli")]
pub use cli::CliConfig;

#[cfg(feature = "cli")]
mod cli {
    use crate::core::fusion::ScoringMode;
    use crate::utils::error::{Result, RiskError};
    use crate::utils::validation::{validate_path, validate_positive_number, validate_range, Validate};
    use clap::Parser;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, Parser)]
    #[command(name = "route-risk")]
    #[command(about = "Score shipping-route risk and forecast cascading delays")]
    pub struct CliConfig {
        #[arg(long, help = "Path to the TOML engine configuration")]
        pub config: Option<String>,

        #[arg(long, default_value = "data/observations.json")]
        pub observations: String,

        #[arg(long, help = "Report output directory (overrides [output].path)")]
        pub output: Option<String>,

        #[arg(long, help = "Scoring mode: heuristic or ensemble")]
        pub mode: Option<ScoringMode>,

        #[arg(long, help = "Model artifact path (overrides [model].artifact_path)")]
        pub model_path: Option<String>,

        #[arg(long, default_value = "10")]
        pub top: usize,

        #[arg(long, help = "Alert threshold (overrides [thresholds].alert)")]
        pub alert_threshold: Option<f64>,

        #[arg(long, help = "Enable verbose output")]
        pub verbose: bool,

        #[arg(long, help = "Score and print without writing reports")]
        pub dry_run: bool,

        #[arg(long, help = "Emit JSON logs")]
        pub json_logs: bool,
    }

    impl Validate for CliConfig {
        fn validate(&self) -> Result<()> {
            validate_path("observations", &self.observations)?;
            if let Some(output) = &self.output {
                validate_path("output", output)?;
            }
            if let Some(path) = &self.model_path {
                validate_path("model_path", path)?;
            }
            validate_positive_number("top", self.top, 1)?;
            if let Some(threshold) = self.alert_threshold {
                validate_range("alert_threshold", threshold, 0.0, 1.0)?;
            }
            if let Some(config) = &self.config {
                if !std::path::Path::new(config).exists() {
                    return Err(RiskError::MissingConfigError {
                        field: format!("config file {}", config),
                    });
                }
            }
            Ok(())
        }
    }

}
