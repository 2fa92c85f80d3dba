//! 各模態的特徵萃取。
//!
//! 每個萃取函式都是純函式：觀測值 → (風險分量 ∈ [0,1], 固定長度特徵片段)。
//! 超出範圍的輸入會先夾限再計算；只有型別上不合法的輸入（非有限數、港口容量為 0）
//! 才會回傳 `InvalidObservation`。

use crate::domain::model::{
    CongestionSnapshot, CongestionTrend, FeatureVector, HistoricalProfile, Modality,
    SentimentSample, WeatherKind, WeatherObservation, WeatherSeverity, FEATURE_DIM,
};
use crate::utils::error::{Result, RiskError};
use crate::utils::hash::stable_hash;
use crate::utils::validation::require_finite;

pub const WEATHER_FEATURES: usize = 5;
pub const SENTIMENT_FEATURES: usize = 4;
pub const CONGESTION_FEATURES: usize = 5;
pub const HISTORICAL_FEATURES: usize = 3;
pub const ROUTE_FEATURES: usize = 2;

/// 天氣持續時間達到此值時 duration_factor = 1
pub const WEATHER_REFERENCE_HOURS: f64 = 48.0;
pub const SENTIMENT_REFERENCE_ARTICLES: f64 = 10.0;
pub const SENTIMENT_REFERENCE_KEYWORDS: f64 = 5.0;
pub const CONGESTION_REFERENCE_WAIT_HOURS: f64 = 72.0;
/// 歷史平均等待時間的下限，避免除以零
pub const HISTORICAL_WAIT_EPSILON_HOURS: f64 = 1.0;
pub const HISTORICAL_REFERENCE_DISRUPTIONS: f64 = 3.0;

const FEATURE_REFERENCE_HOURS: f64 = 72.0;
const FEATURE_REFERENCE_VESSELS: f64 = 50.0;
const FEATURE_REFERENCE_WINDOW_HOURS: f64 = 168.0;

pub const FEATURE_NAMES: [&str; FEATURE_DIM] = [
    "weather_severity",
    "weather_type",
    "weather_duration",
    "weather_lat",
    "weather_lon",
    "sentiment_score",
    "article_volume",
    "urgency_keywords",
    "sentiment_window",
    "capacity_utilization",
    "wait_time",
    "vessel_count",
    "wait_vs_historical",
    "congestion_trend",
    "disruption_rate",
    "recent_disruptions",
    "avg_delay",
    "route_hash_coarse",
    "route_hash_fine",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extracted<const N: usize> {
    pub score: f64,
    pub features: [f64; N],
}

fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

fn non_negative(value: f64) -> f64 {
    value.max(0.0)
}

pub fn base_risk(severity: WeatherSeverity) -> f64 {
    match severity {
        WeatherSeverity::None => 0.0,
        WeatherSeverity::Minor => 0.2,
        WeatherSeverity::Moderate => 0.5,
        WeatherSeverity::Severe => 0.8,
        WeatherSeverity::Extreme => 1.0,
    }
}

pub fn type_multiplier(kind: WeatherKind) -> f64 {
    match kind {
        WeatherKind::Hurricane | WeatherKind::Typhoon => 1.5,
        WeatherKind::Flood => 1.3,
        WeatherKind::Storm => 1.2,
        WeatherKind::Ice => 1.1,
        WeatherKind::Wind | WeatherKind::Fog | WeatherKind::Other => 1.0,
    }
}

fn kind_ordinal(kind: WeatherKind) -> f64 {
    match kind {
        WeatherKind::Hurricane | WeatherKind::Typhoon => 4.0,
        WeatherKind::Storm | WeatherKind::Flood => 3.0,
        WeatherKind::Wind | WeatherKind::Ice => 2.0,
        WeatherKind::Fog => 1.0,
        WeatherKind::Other => 0.0,
    }
}

fn trend_value(trend: CongestionTrend) -> f64 {
    match trend {
        CongestionTrend::Increasing => 1.0,
        CongestionTrend::Stable => 0.5,
        CongestionTrend::Decreasing => 0.0,
    }
}

/// risk = base_risk × type_multiplier × (0.7 + 0.3 × duration_factor)，乘完後夾限
pub fn extract_weather(observation: &WeatherObservation) -> Result<Extracted<WEATHER_FEATURES>> {
    let duration = non_negative(require_finite(
        "weather.duration_hours",
        observation.duration_hours,
    )?);
    let lat = require_finite("weather.location.lat", observation.location.lat)?.clamp(-90.0, 90.0);
    let lon =
        require_finite("weather.location.lon", observation.location.lon)?.clamp(-180.0, 180.0);

    let duration_factor = (duration / WEATHER_REFERENCE_HOURS).min(1.0);
    let risk = base_risk(observation.severity)
        * type_multiplier(observation.kind)
        * (0.7 + 0.3 * duration_factor);

    Ok(Extracted {
        score: clamp01(risk),
        features: [
            f64::from(observation.severity.ordinal()) / 4.0,
            kind_ordinal(observation.kind) / 4.0,
            (duration / FEATURE_REFERENCE_HOURS).min(1.0),
            lat / 90.0,
            lon / 180.0,
        ],
    })
}

/// 負面情緒代表風險：score -1 → 1.0，0 → 0.5，1 → 0.0，再依文章量與緊急關鍵字放大
pub fn extract_sentiment(sample: &SentimentSample) -> Result<Extracted<SENTIMENT_FEATURES>> {
    let score = require_finite("sentiment.score", sample.score)?.clamp(-1.0, 1.0);
    let window = non_negative(require_finite("sentiment.window_hours", sample.window_hours)?);

    let volume_factor = (f64::from(sample.article_count) / SENTIMENT_REFERENCE_ARTICLES).min(1.0);
    let urgency_factor =
        (f64::from(sample.urgency_keyword_count) / SENTIMENT_REFERENCE_KEYWORDS).min(1.0);
    let risk = ((1.0 - score) / 2.0) * (0.6 + 0.2 * volume_factor + 0.2 * urgency_factor);

    Ok(Extracted {
        score: clamp01(risk),
        features: [
            score,
            volume_factor,
            urgency_factor,
            (window / FEATURE_REFERENCE_WINDOW_HOURS).min(1.0),
        ],
    })
}

pub fn extract_congestion(
    snapshot: &CongestionSnapshot,
) -> Result<Extracted<CONGESTION_FEATURES>> {
    if snapshot.port_capacity == 0 {
        return Err(RiskError::invalid_observation(
            "congestion.port_capacity",
            "port capacity must be greater than zero",
        ));
    }
    let wait = non_negative(require_finite(
        "congestion.wait_time_hours",
        snapshot.wait_time_hours,
    )?);
    let historical_avg = non_negative(require_finite(
        "congestion.historical_avg_wait_hours",
        snapshot.historical_avg_wait_hours,
    )?);

    let capacity_util =
        (f64::from(snapshot.vessel_count) / f64::from(snapshot.port_capacity)).min(1.0);
    let wait_factor = (wait / CONGESTION_REFERENCE_WAIT_HOURS).min(1.0);
    let historical_factor = (wait / historical_avg.max(HISTORICAL_WAIT_EPSILON_HOURS)).min(1.0);
    let risk = 0.4 * capacity_util + 0.4 * wait_factor + 0.2 * historical_factor;

    Ok(Extracted {
        score: clamp01(risk),
        features: [
            capacity_util,
            wait_factor,
            (f64::from(snapshot.vessel_count) / FEATURE_REFERENCE_VESSELS).min(1.0),
            historical_factor,
            trend_value(snapshot.trend),
        ],
    })
}

pub fn extract_historical(
    profile: &HistoricalProfile,
) -> Result<Extracted<HISTORICAL_FEATURES>> {
    let rate = clamp01(require_finite(
        "historical.disruption_rate",
        profile.disruption_rate,
    )?);
    let avg_delay = non_negative(require_finite(
        "historical.avg_delay_hours",
        profile.avg_delay_hours,
    )?);

    let recent_factor =
        (f64::from(profile.recent_disruption_count) / HISTORICAL_REFERENCE_DISRUPTIONS).min(1.0);
    let risk = 0.7 * rate + 0.3 * recent_factor;

    Ok(Extracted {
        score: clamp01(risk),
        features: [
            rate,
            recent_factor,
            (avg_delay / FEATURE_REFERENCE_HOURS).min(1.0),
        ],
    })
}

pub fn route_identity_features(route_id: &str) -> [f64; ROUTE_FEATURES] {
    let hash = stable_hash(route_id.as_bytes());
    [(hash % 100) as f64 / 100.0, (hash % 10) as f64 / 10.0]
}

/// 單一航線各模態的萃取結果；缺漏的模態為 None
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFeatures {
    pub weather: Option<Extracted<WEATHER_FEATURES>>,
    pub sentiment: Option<Extracted<SENTIMENT_FEATURES>>,
    pub congestion: Option<Extracted<CONGESTION_FEATURES>>,
    pub historical: Option<Extracted<HISTORICAL_FEATURES>>,
}

impl ExtractedFeatures {
    pub fn score(&self, modality: Modality) -> Option<f64> {
        match modality {
            Modality::Weather => self.weather.map(|e| e.score),
            Modality::Sentiment => self.sentiment.map(|e| e.score),
            Modality::Congestion => self.congestion.map(|e| e.score),
            Modality::Historical => self.historical.map(|e| e.score),
        }
    }

    /// 缺漏模態的片段以 0 填補
    pub fn feature_vector(&self, route_id: &str) -> FeatureVector {
        let mut vector = [0.0; FEATURE_DIM];
        let mut offset = 0;

        let mut put = |fragment: Option<&[f64]>, len: usize| {
            if let Some(values) = fragment {
                vector[offset..offset + len].copy_from_slice(values);
            }
            offset += len;
        };

        put(self.weather.as_ref().map(|e| &e.features[..]), WEATHER_FEATURES);
        put(self.sentiment.as_ref().map(|e| &e.features[..]), SENTIMENT_FEATURES);
        put(self.congestion.as_ref().map(|e| &e.features[..]), CONGESTION_FEATURES);
        put(self.historical.as_ref().map(|e| &e.features[..]), HISTORICAL_FEATURES);
        put(Some(&route_identity_features(route_id)[..]), ROUTE_FEATURES);

        vector
    }
}
