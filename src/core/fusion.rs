//! 風險融合：把四個模態分量合成總風險，並分級。
//!
//! 兩種模式：
//! - 啟發式：固定權重加權和
//! - Ensemble：19 維特徵向量交給訓練好的模型；沒有模型時退回啟發式並標記

use crate::core::congestion::CongestionAnalyzer;
use crate::core::ensemble::EnsembleModel;
use crate::core::features::{
    extract_congestion, extract_historical, extract_sentiment, extract_weather,
    ExtractedFeatures,
};
use crate::core::sentiment::{aggregate_articles, KeywordSentimentAnalyzer};
use crate::domain::model::{
    FeatureVector, Modality, ModelProvenance, RiskAssessment, RiskComponents, RiskLevel,
    RouteObservations,
};
use crate::domain::ports::SentimentModel;
use crate::utils::error::{EngineWarning, Result, RiskError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const WEIGHT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    weather: f64,
    sentiment: f64,
    congestion: f64,
    historical: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            weather: 0.35,
            sentiment: 0.30,
            congestion: 0.25,
            historical: 0.10,
        }
    }
}

impl FusionWeights {
    /// 權重必須非負且總和為 1（容許誤差 1e-9），否則拒絕
    pub fn new(weather: f64, sentiment: f64, congestion: f64, historical: f64) -> Result<Self> {
        let weights = Self {
            weather,
            sentiment,
            congestion,
            historical,
        };
        for modality in Modality::ALL {
            let value = weights.weight(modality);
            if !(value.is_finite() && value >= 0.0) {
                return Err(RiskError::InvalidConfigValueError {
                    field: format!("fusion.weights.{}", modality.as_str()),
                    value: value.to_string(),
                    reason: "Weight must be a non-negative finite number".to_string(),
                });
            }
        }
        let sum = weights.sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(RiskError::InvalidConfigValueError {
                field: "fusion.weights".to_string(),
                value: sum.to_string(),
                reason: "Weights must sum to 1.0".to_string(),
            });
        }
        Ok(weights)
    }

    pub fn weight(&self, modality: Modality) -> f64 {
        match modality {
            Modality::Weather => self.weather,
            Modality::Sentiment => self.sentiment,
            Modality::Congestion => self.congestion,
            Modality::Historical => self.historical,
        }
    }

    pub fn sum(&self) -> f64 {
        self.weather + self.sentiment + self.congestion + self.historical
    }

    pub fn combine(&self, components: &RiskComponents) -> f64 {
        let total: f64 = Modality::ALL
            .iter()
            .map(|m| self.weight(*m) * components.get(*m).clamp(0.0, 1.0))
            .sum();
        total.clamp(0.0, 1.0)
    }
}

/// 分級門檻，下界包含：score ≥ high → High，medium ≤ score < high → Medium
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    medium: f64,
    high: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            medium: 0.4,
            high: 0.7,
        }
    }
}

impl RiskThresholds {
    pub fn new(medium: f64, high: f64) -> Result<Self> {
        if !(medium > 0.0 && medium < high && high <= 1.0) {
            return Err(RiskError::InvalidConfigValueError {
                field: "thresholds".to_string(),
                value: format!("medium={}, high={}", medium, high),
                reason: "Expected 0 < medium < high <= 1".to_string(),
            });
        }
        Ok(Self { medium, high })
    }

    pub fn medium(&self) -> f64 {
        self.medium
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn classify(&self, total_risk: f64) -> RiskLevel {
        if total_risk >= self.high {
            RiskLevel::High
        } else if total_risk >= self.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// 缺漏模態的中性預設值。歷史預設 0.1：沒有紀錄的航線仍帶少量基準風險
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NeutralDefaults {
    pub weather: f64,
    pub sentiment: f64,
    pub congestion: f64,
    pub historical: f64,
}

impl Default for NeutralDefaults {
    fn default() -> Self {
        Self {
            weather: 0.0,
            sentiment: 0.0,
            congestion: 0.0,
            historical: 0.1,
        }
    }
}

impl NeutralDefaults {
    pub fn value(&self, modality: Modality) -> f64 {
        match modality {
            Modality::Weather => self.weather,
            Modality::Sentiment => self.sentiment,
            Modality::Congestion => self.congestion,
            Modality::Historical => self.historical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreshnessBounds {
    pub weather: Duration,
    pub sentiment: Duration,
    pub congestion: Duration,
    pub historical: Duration,
}

impl Default for FreshnessBounds {
    fn default() -> Self {
        Self {
            weather: Duration::hours(6),
            sentiment: Duration::hours(24),
            congestion: Duration::hours(2),
            historical: Duration::days(30),
        }
    }
}

impl FreshnessBounds {
    pub fn bound(&self, modality: Modality) -> Duration {
        match modality {
            Modality::Weather => self.weather,
            Modality::Sentiment => self.sentiment,
            Modality::Congestion => self.congestion,
            Modality::Historical => self.historical,
        }
    }
}

/// 設定檔選擇的評分模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMode {
    #[default]
    Heuristic,
    Ensemble,
}

impl fmt::Display for ScoringMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoringMode::Heuristic => write!(f, "heuristic"),
            ScoringMode::Ensemble => write!(f, "ensemble"),
        }
    }
}

impl FromStr for ScoringMode {
    type Err = RiskError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "heuristic" => Ok(ScoringMode::Heuristic),
            "ensemble" => Ok(ScoringMode::Ensemble),
            other => Err(RiskError::InvalidConfigValueError {
                field: "fusion.mode".to_string(),
                value: other.to_string(),
                reason: "Valid modes: heuristic, ensemble".to_string(),
            }),
        }
    }
}

/// 每次呼叫（或每個週期）決定一次的融合模式。
/// `Ensemble(None)` 表示要求 ensemble 但目前沒有訓練好的模型。
#[derive(Debug, Clone)]
pub enum FusionMode {
    Heuristic,
    Ensemble(Option<Arc<EnsembleModel>>),
}

impl FusionMode {
    pub fn provenance(&self) -> ModelProvenance {
        match self {
            FusionMode::Ensemble(Some(_)) => ModelProvenance::Ensemble,
            _ => ModelProvenance::Heuristic,
        }
    }

    pub fn model(&self) -> Option<&Arc<EnsembleModel>> {
        match self {
            FusionMode::Ensemble(model) => model.as_ref(),
            FusionMode::Heuristic => None,
        }
    }
}

/// 融合前的準備結果：補齊後的分量、特徵向量與標記
#[derive(Debug, Clone, PartialEq)]
pub struct FusionInput {
    pub route_id: String,
    pub components: RiskComponents,
    pub features: FeatureVector,
    pub defaulted: Vec<Modality>,
    pub stale: Vec<Modality>,
}

impl FusionInput {
    /// 只有分量時使用；特徵向量除航線識別外皆為 0
    pub fn from_components(route_id: &str, components: RiskComponents) -> Self {
        Self {
            route_id: route_id.to_string(),
            components,
            features: ExtractedFeatures::default().feature_vector(route_id),
            defaulted: Vec::new(),
            stale: Vec::new(),
        }
    }
}

pub struct FusionEngine {
    weights: FusionWeights,
    thresholds: RiskThresholds,
    defaults: NeutralDefaults,
    freshness: FreshnessBounds,
    sentiment_model: Arc<dyn SentimentModel>,
    congestion_analyzer: CongestionAnalyzer,
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::new(FusionWeights::default(), RiskThresholds::default())
    }
}

impl FusionEngine {
    pub fn new(weights: FusionWeights, thresholds: RiskThresholds) -> Self {
        Self {
            weights,
            thresholds,
            defaults: NeutralDefaults::default(),
            freshness: FreshnessBounds::default(),
            sentiment_model: Arc::new(KeywordSentimentAnalyzer),
            congestion_analyzer: CongestionAnalyzer::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: NeutralDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_freshness(mut self, freshness: FreshnessBounds) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_sentiment_model(mut self, model: Arc<dyn SentimentModel>) -> Self {
        self.sentiment_model = model;
        self
    }

    pub fn with_congestion_analyzer(mut self, analyzer: CongestionAnalyzer) -> Self {
        self.congestion_analyzer = analyzer;
        self
    }

    pub fn weights(&self) -> &FusionWeights {
        &self.weights
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    pub fn classify(&self, total_risk: f64) -> RiskLevel {
        self.thresholds.classify(total_risk)
    }

    /// 啟發式加權和
    pub fn fuse(&self, components: &RiskComponents) -> f64 {
        self.weights.combine(components)
    }

    /// 萃取各模態、補上中性預設值並檢查新鮮度
    pub fn prepare(
        &self,
        observations: &RouteObservations,
        now: DateTime<Utc>,
    ) -> Result<(FusionInput, Vec<EngineWarning>)> {
        let route_id = observations.route_id.as_str();
        let mut extracted = ExtractedFeatures::default();
        let mut stale = Vec::new();
        let mut warnings = Vec::new();

        let mut check = |modality: Modality, observed_at: DateTime<Utc>| {
            let age = now - observed_at;
            let bound = self.freshness.bound(modality);
            if age > bound {
                stale.push(modality);
                warnings.push(EngineWarning::StaleData {
                    route_id: route_id.to_string(),
                    modality: modality.as_str().to_string(),
                    age_hours: age.num_seconds() as f64 / 3600.0,
                    bound_hours: bound.num_seconds() as f64 / 3600.0,
                });
            }
        };

        if let Some(weather) = &observations.weather {
            extracted.weather = Some(extract_weather(weather)?);
            check(Modality::Weather, weather.observed_at);
        }

        let sentiment = observations.sentiment.clone().or_else(|| {
            aggregate_articles(self.sentiment_model.as_ref(), &observations.articles, now)
        });
        if let Some(sample) = &sentiment {
            extracted.sentiment = Some(extract_sentiment(sample)?);
            check(Modality::Sentiment, sample.observed_at);
        }

        let congestion = observations.congestion.clone().or_else(|| {
            self.congestion_analyzer
                .rolling_snapshot(&observations.port_traffic, now)
        });
        if let Some(snapshot) = &congestion {
            extracted.congestion = Some(extract_congestion(snapshot)?);
            check(Modality::Congestion, snapshot.observed_at);
        }

        if let Some(profile) = &observations.historical {
            extracted.historical = Some(extract_historical(profile)?);
            check(Modality::Historical, profile.observed_at);
        }

        let mut defaulted = Vec::new();
        let mut components = RiskComponents::new(0.0, 0.0, 0.0, 0.0);
        for modality in Modality::ALL {
            let value = match extracted.score(modality) {
                Some(score) => score,
                None => {
                    defaulted.push(modality);
                    self.defaults.value(modality)
                }
            };
            components = components.with(modality, value);
        }

        let input = FusionInput {
            route_id: route_id.to_string(),
            components,
            features: extracted.feature_vector(route_id),
            defaulted,
            stale,
        };
        Ok((input, warnings))
    }

    pub fn score(
        &self,
        input: &FusionInput,
        mode: &FusionMode,
        computed_at: DateTime<Utc>,
    ) -> RiskAssessment {
        let (total_risk, model_id, ensemble_fallback) = match mode {
            FusionMode::Heuristic => (self.fuse(&input.components), None, false),
            FusionMode::Ensemble(Some(model)) => (
                model.predict(&input.features),
                Some(model.model_id.clone()),
                false,
            ),
            FusionMode::Ensemble(None) => (self.fuse(&input.components), None, true),
        };

        RiskAssessment {
            route_id: input.route_id.clone(),
            total_risk,
            risk_level: self.classify(total_risk),
            components: input.components,
            computed_at,
            provenance: mode.provenance(),
            model_id,
            ensemble_fallback,
            defaulted_modalities: input.defaulted.clone(),
            stale_modalities: input.stale.clone(),
        }
    }

    pub fn assess(
        &self,
        observations: &RouteObservations,
        mode: &FusionMode,
        now: DateTime<Utc>,
    ) -> Result<(RiskAssessment, Vec<EngineWarning>)> {
        let (input, warnings) = self.prepare(observations, now)?;
        let assessment = self.score(&input, mode, now);
        tracing::debug!(
            "Scored {}: total={:.3} level={} provenance={:?}",
            assessment.route_id,
            assessment.total_risk,
            assessment.risk_level.as_str(),
            assessment.provenance
        );
        Ok((assessment, warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::{base_risk, type_multiplier};
    use crate::domain::model::{
        CongestionSnapshot, CongestionTrend, GeoPoint, SentimentSample, WeatherKind,
        WeatherObservation, WeatherSeverity,
    };

    fn heuristic(components: RiskComponents) -> RiskAssessment {
        let engine = FusionEngine::default();
        let input = FusionInput::from_components("R1", components);
        engine.score(&input, &FusionMode::Heuristic, Utc::now())
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        assert!((FusionWeights::default().sum() - 1.0).abs() <= WEIGHT_TOLERANCE);
    }

    #[test]
    fn test_weights_not_summing_to_one_rejected() {
        assert!(FusionWeights::new(0.4, 0.3, 0.25, 0.1).is_err());
        assert!(FusionWeights::new(0.5, 0.5, 0.1, -0.1).is_err());
        assert!(FusionWeights::new(0.25, 0.25, 0.25, 0.25).is_ok());
    }

    #[test]
    fn test_level_boundaries_are_lower_inclusive() {
        let thresholds = RiskThresholds::default();
        assert_eq!(thresholds.classify(0.69999), RiskLevel::Medium);
        assert_eq!(thresholds.classify(0.7), RiskLevel::High);
        assert_eq!(thresholds.classify(0.39999), RiskLevel::Low);
        assert_eq!(thresholds.classify(0.4), RiskLevel::Medium);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        assert!(RiskThresholds::new(0.7, 0.4).is_err());
        assert!(RiskThresholds::new(0.0, 0.4).is_err());
        assert!(RiskThresholds::new(0.3, 1.2).is_err());
    }

    #[test]
    fn test_total_is_bounded_and_monotone() {
        let grid = [0.0, 0.25, 0.5, 0.75, 1.0];
        let weights = FusionWeights::default();
        for w in grid {
            for s in grid {
                for c in grid {
                    for h in grid {
                        let base = RiskComponents::new(w, s, c, h);
                        let total = weights.combine(&base);
                        assert!((0.0..=1.0).contains(&total));
                        for modality in Modality::ALL {
                            let raised = base.with(modality, (base.get(modality) + 0.2).min(1.0));
                            assert!(weights.combine(&raised) >= total);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_end_to_end_scenario_arithmetic() {
        let weather = WeatherObservation {
            severity: WeatherSeverity::Severe,
            kind: WeatherKind::Hurricane,
            duration_hours: 48.0,
            location: GeoPoint { lat: 25.0, lon: -80.0 },
            observed_at: Utc::now(),
        };
        assert_eq!(type_multiplier(WeatherKind::Hurricane), 1.5);
        let weather_score = extract_weather(&weather).unwrap().score;
        assert_eq!(weather_score, (base_risk(WeatherSeverity::Severe) * 1.5).min(1.0));

        let assessment = heuristic(RiskComponents::new(weather_score, 0.2, 0.6, 0.1));
        let expected = 0.35 * 1.0 + 0.30 * 0.2 + 0.25 * 0.6 + 0.10 * 0.1;
        assert!((assessment.total_risk - expected).abs() < 1e-12);
        assert!((assessment.total_risk - 0.57).abs() < 1e-9);
        assert_eq!(assessment.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_missing_sentiment_defaults_to_neutral() {
        let now = Utc::now();
        let mut observations = RouteObservations::new("SHA-LAX");
        observations.congestion = Some(CongestionSnapshot {
            vessel_count: 40,
            port_capacity: 80,
            wait_time_hours: 36.0,
            historical_avg_wait_hours: 12.0,
            trend: CongestionTrend::Increasing,
            observed_at: now,
        });

        let engine = FusionEngine::default();
        let (assessment, warnings) = engine
            .assess(&observations, &FusionMode::Heuristic, now)
            .unwrap();

        assert!(warnings.is_empty());
        assert_eq!(assessment.components.sentiment, 0.0);
        assert_eq!(assessment.components.historical, 0.1);
        assert!(assessment.defaulted_modalities.contains(&Modality::Sentiment));
        assert!(!assessment.defaulted_modalities.contains(&Modality::Congestion));
        assert!((0.0..=1.0).contains(&assessment.total_risk));
        assert!((assessment.total_risk - (0.25 * 0.6 + 0.10 * 0.1)).abs() < 1e-12);
    }

    #[test]
    fn test_ensemble_without_model_falls_back_to_heuristic() {
        let engine = FusionEngine::default();
        let input = FusionInput::from_components("R1", RiskComponents::new(0.8, 0.5, 0.4, 0.2));
        let assessment = engine.score(&input, &FusionMode::Ensemble(None), Utc::now());

        assert_eq!(assessment.provenance, ModelProvenance::Heuristic);
        assert!(assessment.ensemble_fallback);
        assert!(assessment.model_id.is_none());
        assert!((assessment.total_risk - engine.fuse(&input.components)).abs() < 1e-12);
    }

    #[test]
    fn test_stale_observation_is_flagged_but_used() {
        let now = Utc::now();
        let mut observations = RouteObservations::new("R1");
        observations.sentiment = Some(SentimentSample {
            score: -0.8,
            article_count: 4,
            urgency_keyword_count: 2,
            window_hours: 24.0,
            observed_at: now - Duration::hours(48),
        });

        let (assessment, warnings) = FusionEngine::default()
            .assess(&observations, &FusionMode::Heuristic, now)
            .unwrap();

        assert_eq!(assessment.stale_modalities, vec![Modality::Sentiment]);
        assert!(assessment.components.sentiment > 0.5);
        assert!(matches!(warnings[0], EngineWarning::StaleData { .. }));
    }

    #[test]
    fn test_articles_feed_sentiment_when_sample_missing() {
        let now = Utc::now();
        let mut observations = RouteObservations::new("R1");
        observations.articles = vec![crate::domain::model::NewsArticle {
            title: "Strike causes delays at terminal".to_string(),
            content: "Labor crisis deepens".to_string(),
            published_at: now - Duration::hours(1),
        }];

        let (assessment, _) = FusionEngine::default()
            .assess(&observations, &FusionMode::Heuristic, now)
            .unwrap();
        assert!(!assessment.defaulted_modalities.contains(&Modality::Sentiment));
        assert!(assessment.components.sentiment > 0.5);
    }

    #[test]
    fn test_scoring_mode_parsing() {
        assert_eq!("Ensemble".parse::<ScoringMode>().unwrap(), ScoringMode::Ensemble);
        assert!("learned".parse::<ScoringMode>().is_err());
    }
}
