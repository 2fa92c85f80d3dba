use crate::core::engine::{RiskEngine, DEFAULT_ALERT_THRESHOLD};
use crate::core::ensemble::{BoostingParams, ForestParams, TrainingConfig, TreeParams};
use crate::core::forecast::{DelayForecaster, ForecastSettings};
use crate::core::fusion::{
    FreshnessBounds, FusionEngine, FusionWeights, NeutralDefaults, RiskThresholds, ScoringMode,
};
use crate::core::model_manager::{ModelManager, DEFAULT_ARTIFACT_PATH};
use crate::core::report::ReportFormat;
use crate::utils::error::{Result, RiskError};
use crate::utils::validation::{validate_formats, validate_path, validate_positive_number, validate_range, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_RETRAIN_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_OUTPUT_PATH: &str = "./output";

/// 引擎設定。每個區段都可省略，省略時使用預設值。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub fusion: FusionSection,
    #[serde(default)]
    pub thresholds: ThresholdSection,
    #[serde(default)]
    pub defaults: DefaultsSection,
    #[serde(default)]
    pub freshness: FreshnessSection,
    #[serde(default)]
    pub forecast: ForecastSection,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FusionSection {
    pub mode: Option<ScoringMode>,
    pub weights: Option<WeightsSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsSection {
    pub weather: f64,
    pub sentiment: f64,
    pub congestion: f64,
    pub historical: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdSection {
    pub medium: Option<f64>,
    pub high: Option<f64>,
    pub alert: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsSection {
    pub weather: Option<f64>,
    pub sentiment: Option<f64>,
    pub congestion: Option<f64>,
    pub historical: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FreshnessSection {
    pub weather_hours: Option<f64>,
    pub sentiment_hours: Option<f64>,
    pub congestion_hours: Option<f64>,
    pub historical_hours: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForecastSection {
    pub alpha: Option<f64>,
    pub trend_window: Option<usize>,
    pub horizon_hours: Option<f64>,
    pub propagation_factor: Option<f64>,
    pub history_blend: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSection {
    pub artifact_path: Option<String>,
    pub seed: Option<u64>,
    pub validation_fraction: Option<f64>,
    pub min_samples: Option<usize>,
    pub n_trees: Option<usize>,
    pub forest_max_depth: Option<usize>,
    pub forest_min_samples_split: Option<usize>,
    pub n_stages: Option<usize>,
    pub boosting_max_depth: Option<usize>,
    pub learning_rate: Option<f64>,
    pub retrain_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputSection {
    pub path: Option<String>,
    pub formats: Option<Vec<String>>,
}

/// 新鮮度上限：十年。再大就超出 chrono 可表示的範圍
pub const MAX_FRESHNESS_HOURS: f64 = 87_600.0;

/// 未經驗證的值也不會 panic：先夾限再轉換
fn hours(value: f64) -> chrono::Duration {
    let value = if value.is_finite() {
        value.clamp(0.0, MAX_FRESHNESS_HOURS)
    } else {
        MAX_FRESHNESS_HOURS
    };
    chrono::Duration::seconds((value * 3600.0).round() as i64)
}

impl EngineConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(RiskError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| RiskError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${MODEL_DIR})；未設定的變數保留原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| RiskError::ConfigError {
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn scoring_mode(&self) -> ScoringMode {
        self.fusion.mode.unwrap_or_default()
    }

    pub fn fusion_weights(&self) -> Result<FusionWeights> {
        match &self.fusion.weights {
            Some(w) => FusionWeights::new(w.weather, w.sentiment, w.congestion, w.historical),
            None => Ok(FusionWeights::default()),
        }
    }

    pub fn risk_thresholds(&self) -> Result<RiskThresholds> {
        let defaults = RiskThresholds::default();
        RiskThresholds::new(
            self.thresholds.medium.unwrap_or(defaults.medium()),
            self.thresholds.high.unwrap_or(defaults.high()),
        )
    }

    pub fn alert_threshold(&self) -> f64 {
        self.thresholds.alert.unwrap_or(DEFAULT_ALERT_THRESHOLD)
    }

    pub fn neutral_defaults(&self) -> NeutralDefaults {
        let base = NeutralDefaults::default();
        NeutralDefaults {
            weather: self.defaults.weather.unwrap_or(base.weather),
            sentiment: self.defaults.sentiment.unwrap_or(base.sentiment),
            congestion: self.defaults.congestion.unwrap_or(base.congestion),
            historical: self.defaults.historical.unwrap_or(base.historical),
        }
    }

    pub fn freshness_bounds(&self) -> FreshnessBounds {
        let base = FreshnessBounds::default();
        let f = &self.freshness;
        FreshnessBounds {
            weather: f.weather_hours.map(hours).unwrap_or(base.weather),
            sentiment: f.sentiment_hours.map(hours).unwrap_or(base.sentiment),
            congestion: f.congestion_hours.map(hours).unwrap_or(base.congestion),
            historical: f.historical_hours.map(hours).unwrap_or(base.historical),
        }
    }

    pub fn forecast_settings(&self) -> ForecastSettings {
        let base = ForecastSettings::default();
        let f = &self.forecast;
        ForecastSettings {
            alpha: f.alpha.unwrap_or(base.alpha),
            trend_window: f.trend_window.unwrap_or(base.trend_window),
            horizon_hours: f.horizon_hours.unwrap_or(base.horizon_hours),
            propagation_factor: f.propagation_factor.unwrap_or(base.propagation_factor),
            history_blend: f.history_blend.unwrap_or(base.history_blend),
        }
    }

    pub fn training_config(&self) -> TrainingConfig {
        let base = TrainingConfig::default();
        let m = &self.model;
        TrainingConfig {
            seed: m.seed.unwrap_or(base.seed),
            validation_fraction: m.validation_fraction.unwrap_or(base.validation_fraction),
            min_samples: m.min_samples.unwrap_or(base.min_samples),
            forest: ForestParams {
                n_trees: m.n_trees.unwrap_or(base.forest.n_trees),
                tree: TreeParams {
                    max_depth: m.forest_max_depth.unwrap_or(base.forest.tree.max_depth),
                    min_samples_split: m
                        .forest_min_samples_split
                        .unwrap_or(base.forest.tree.min_samples_split),
                },
            },
            boosting: BoostingParams {
                n_stages: m.n_stages.unwrap_or(base.boosting.n_stages),
                learning_rate: m.learning_rate.unwrap_or(base.boosting.learning_rate),
                tree: TreeParams {
                    max_depth: m.boosting_max_depth.unwrap_or(base.boosting.tree.max_depth),
                    ..base.boosting.tree
                },
            },
        }
    }

    pub fn artifact_path(&self) -> &str {
        self.model
            .artifact_path
            .as_deref()
            .unwrap_or(DEFAULT_ARTIFACT_PATH)
    }

    pub fn retrain_timeout(&self) -> Duration {
        Duration::from_secs(
            self.model
                .retrain_timeout_secs
                .unwrap_or(DEFAULT_RETRAIN_TIMEOUT_SECS),
        )
    }

    pub fn output_path(&self) -> &str {
        self.output.path.as_deref().unwrap_or(DEFAULT_OUTPUT_PATH)
    }

    pub fn report_formats(&self) -> Result<Vec<ReportFormat>> {
        match &self.output.formats {
            Some(formats) => formats.iter().map(|f| f.parse()).collect(),
            None => Ok(vec![ReportFormat::Json, ReportFormat::Csv]),
        }
    }

    pub fn build_fusion_engine(&self) -> Result<FusionEngine> {
        Ok(
            FusionEngine::new(self.fusion_weights()?, self.risk_thresholds()?)
                .with_defaults(self.neutral_defaults())
                .with_freshness(self.freshness_bounds()),
        )
    }

    pub fn build_forecaster(&self) -> Result<DelayForecaster> {
        Ok(DelayForecaster::new(
            self.forecast_settings(),
            self.risk_thresholds()?,
        ))
    }

    pub fn build_model_manager(&self) -> ModelManager {
        ModelManager::new(self.training_config())
    }

    pub fn build_engine(&self, models: Arc<ModelManager>) -> Result<RiskEngine> {
        self.validate_config()?;
        Ok(RiskEngine::new(
            self.build_fusion_engine()?,
            self.build_forecaster()?,
            models,
            self.scoring_mode(),
        ))
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        self.fusion_weights()?;
        self.risk_thresholds()?;
        validate_range("thresholds.alert", self.alert_threshold(), 0.0, 1.0)?;

        let defaults = self.neutral_defaults();
        validate_range("defaults.weather", defaults.weather, 0.0, 1.0)?;
        validate_range("defaults.sentiment", defaults.sentiment, 0.0, 1.0)?;
        validate_range("defaults.congestion", defaults.congestion, 0.0, 1.0)?;
        validate_range("defaults.historical", defaults.historical, 0.0, 1.0)?;

        let f = &self.freshness;
        for (field, value) in [
            ("freshness.weather_hours", f.weather_hours),
            ("freshness.sentiment_hours", f.sentiment_hours),
            ("freshness.congestion_hours", f.congestion_hours),
            ("freshness.historical_hours", f.historical_hours),
        ] {
            if let Some(value) = value {
                validate_range(field, value, 0.0, MAX_FRESHNESS_HOURS)?;
            }
        }

        let forecast = self.forecast_settings();
        if !(forecast.alpha > 0.0 && forecast.alpha <= 1.0) {
            return Err(RiskError::InvalidConfigValueError {
                field: "forecast.alpha".to_string(),
                value: forecast.alpha.to_string(),
                reason: "Smoothing factor must be in (0, 1]".to_string(),
            });
        }
        validate_positive_number("forecast.trend_window", forecast.trend_window, 2)?;
        validate_range("forecast.horizon_hours", forecast.horizon_hours, 0.0, f64::MAX)?;
        validate_range("forecast.propagation_factor", forecast.propagation_factor, 0.0, 1.0)?;
        validate_range("forecast.history_blend", forecast.history_blend, 0.0, 1.0)?;

        self.training_config().validate()?;
        validate_path("model.artifact_path", self.artifact_path())?;
        validate_path("output.path", self.output_path())?;
        if let Some(formats) = &self.output.formats {
            validate_formats("output.formats", formats, &["json", "csv"])?;
        }

        Ok(())
    }
}

impl Validate for EngineConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();

        assert_eq!(config.scoring_mode(), ScoringMode::Heuristic);
        assert_eq!(config.fusion_weights().unwrap(), FusionWeights::default());
        assert_eq!(config.alert_threshold(), 0.7);
        assert_eq!(config.artifact_path(), DEFAULT_ARTIFACT_PATH);
        assert_eq!(config.training_config(), TrainingConfig::default());
        assert_eq!(
            config.report_formats().unwrap(),
            vec![ReportFormat::Json, ReportFormat::Csv]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[fusion]
mode = "ensemble"

[fusion.weights]
weather = 0.4
sentiment = 0.2
congestion = 0.3
historical = 0.1

[thresholds]
medium = 0.35
high = 0.65
alert = 0.8

[defaults]
historical = 0.05

[freshness]
congestion_hours = 4

[forecast]
alpha = 0.5
propagation_factor = 0.25

[model]
artifact_path = "artifacts/model.json"
seed = 7
n_trees = 20
retrain_timeout_secs = 60

[output]
path = "./reports"
formats = ["csv"]
"#;

        let config = EngineConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.scoring_mode(), ScoringMode::Ensemble);
        assert_eq!(config.risk_thresholds().unwrap().high(), 0.65);
        assert_eq!(config.alert_threshold(), 0.8);
        assert_eq!(config.neutral_defaults().historical, 0.05);
        assert_eq!(config.freshness_bounds().congestion, chrono::Duration::hours(4));
        assert_eq!(config.forecast_settings().alpha, 0.5);
        assert_eq!(config.forecast_settings().trend_window, 24);
        assert_eq!(config.training_config().seed, 7);
        assert_eq!(config.training_config().forest.n_trees, 20);
        assert_eq!(config.retrain_timeout(), Duration::from_secs(60));
        assert_eq!(config.output_path(), "./reports");
        assert_eq!(config.report_formats().unwrap(), vec![ReportFormat::Csv]);
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("ROUTE_RISK_TEST_MODEL_DIR", "/var/models");

        let config = EngineConfig::from_toml_str(
            r#"
[model]
artifact_path = "${ROUTE_RISK_TEST_MODEL_DIR}/risk_model.json"
"#,
        )
        .unwrap();
        assert_eq!(config.artifact_path(), "/var/models/risk_model.json");

        std::env::remove_var("ROUTE_RISK_TEST_MODEL_DIR");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_weights = EngineConfig::from_toml_str(
            r#"
[fusion.weights]
weather = 0.5
sentiment = 0.5
congestion = 0.5
historical = 0.0
"#,
        )
        .unwrap();
        assert!(bad_weights.validate().is_err());

        let bad_thresholds = EngineConfig::from_toml_str("[thresholds]\nmedium = 0.8\nhigh = 0.6\n").unwrap();
        assert!(bad_thresholds.validate().is_err());

        let bad_format = EngineConfig::from_toml_str("[output]\nformats = [\"zip\"]\n").unwrap();
        assert!(bad_format.validate().is_err());

        let bad_samples = EngineConfig::from_toml_str("[model]\nmin_samples = 10\n").unwrap();
        assert!(bad_samples.validate().is_err());
    }

    #[test]
    fn test_huge_freshness_rejected_without_panic() {
        let config = EngineConfig::from_toml_str("[freshness]\nweather_hours = 1e13\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(RiskError::InvalidConfigValueError { .. })
        ));
        assert!(config.build_engine(Arc::new(ModelManager::default())).is_err());
        // 略過驗證直接取值也只會得到上限
        assert_eq!(
            config.freshness_bounds().weather,
            chrono::Duration::hours(MAX_FRESHNESS_HOURS as i64)
        );

        let ten_years = EngineConfig::from_toml_str("[freshness]\nhistorical_hours = 87600\n").unwrap();
        assert!(ten_years.validate().is_ok());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let result = EngineConfig::from_toml_str("[fusion\nmode = ");
        assert!(matches!(result, Err(RiskError::ConfigError { .. })));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[fusion]\nmode = \"heuristic\"\n\n[output]\npath = \"./out\"\n")
            .unwrap();

        let config = EngineConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.output_path(), "./out");
    }
}
