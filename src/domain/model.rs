use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type RouteId = String;

/// 特徵向量維度：天氣 5 + 情緒 4 + 壅塞 5 + 歷史 3 + 航線識別 2
pub const FEATURE_DIM: usize = 19;

pub type FeatureVector = [f64; FEATURE_DIM];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherSeverity {
    None,
    #[serde(alias = "light")]
    Minor,
    Moderate,
    Severe,
    Extreme,
}

impl WeatherSeverity {
    pub fn ordinal(self) -> u8 {
        match self {
            WeatherSeverity::None => 0,
            WeatherSeverity::Minor => 1,
            WeatherSeverity::Moderate => 2,
            WeatherSeverity::Severe => 3,
            WeatherSeverity::Extreme => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherKind {
    Storm,
    Flood,
    Hurricane,
    Typhoon,
    Fog,
    Ice,
    Wind,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub severity: WeatherSeverity,
    #[serde(rename = "type")]
    pub kind: WeatherKind,
    pub duration_hours: f64,
    pub location: GeoPoint,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentSample {
    /// -1（極度負面）到 1（極度正面）
    pub score: f64,
    pub article_count: u32,
    pub urgency_keyword_count: u32,
    pub window_hours: f64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionTrend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CongestionSnapshot {
    pub vessel_count: u32,
    pub port_capacity: u32,
    pub wait_time_hours: f64,
    pub historical_avg_wait_hours: f64,
    pub trend: CongestionTrend,
    pub observed_at: DateTime<Utc>,
}

/// 航線或港口的滾動摘要，不是原始事件紀錄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalProfile {
    pub disruption_rate: f64,
    pub recent_disruption_count: u32,
    pub avg_delay_hours: f64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortTrafficSample {
    pub observed_at: DateTime<Utc>,
    pub vessel_count: u32,
    pub port_capacity: u32,
    pub wait_time_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayObservation {
    pub observed_at: DateTime<Utc>,
    pub delay_hours: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Weather,
    Sentiment,
    Congestion,
    Historical,
}

impl Modality {
    pub const ALL: [Modality; 4] = [
        Modality::Weather,
        Modality::Sentiment,
        Modality::Congestion,
        Modality::Historical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Weather => "weather",
            Modality::Sentiment => "sentiment",
            Modality::Congestion => "congestion",
            Modality::Historical => "historical",
        }
    }
}

/// 四個模態各自的 [0,1] 風險分量，永遠全部有值
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskComponents {
    pub weather: f64,
    pub sentiment: f64,
    pub congestion: f64,
    pub historical: f64,
}

impl RiskComponents {
    pub fn new(weather: f64, sentiment: f64, congestion: f64, historical: f64) -> Self {
        Self {
            weather,
            sentiment,
            congestion,
            historical,
        }
    }

    pub fn get(&self, modality: Modality) -> f64 {
        match modality {
            Modality::Weather => self.weather,
            Modality::Sentiment => self.sentiment,
            Modality::Congestion => self.congestion,
            Modality::Historical => self.historical,
        }
    }

    pub fn with(mut self, modality: Modality, value: f64) -> Self {
        match modality {
            Modality::Weather => self.weather = value,
            Modality::Sentiment => self.sentiment = value,
            Modality::Congestion => self.congestion = value,
            Modality::Historical => self.historical = value,
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvenance {
    Heuristic,
    Ensemble,
}

impl ModelProvenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelProvenance::Heuristic => "heuristic",
            ModelProvenance::Ensemble => "ensemble",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub route_id: RouteId,
    pub total_risk: f64,
    pub risk_level: RiskLevel,
    pub components: RiskComponents,
    pub computed_at: DateTime<Utc>,
    pub provenance: ModelProvenance,
    /// 產生此評估的模型版本，僅 ensemble 模式有值
    pub model_id: Option<String>,
    /// 要求 ensemble 但沒有可用模型而退回啟發式
    pub ensemble_fallback: bool,
    pub defaulted_modalities: Vec<Modality>,
    pub stale_modalities: Vec<Modality>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteFailure {
    pub route_id: RouteId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RouteOutcome {
    Assessed(RiskAssessment),
    Failed(RouteFailure),
}

impl RouteOutcome {
    pub fn route_id(&self) -> &str {
        match self {
            RouteOutcome::Assessed(assessment) => &assessment.route_id,
            RouteOutcome::Failed(failure) => &failure.route_id,
        }
    }

    pub fn assessment(&self) -> Option<&RiskAssessment> {
        match self {
            RouteOutcome::Assessed(assessment) => Some(assessment),
            RouteOutcome::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayPrediction {
    pub route_id: RouteId,
    pub predicted_delay_hours: f64,
    /// 傳遞前的自身延誤
    pub base_delay_hours: f64,
    pub cascading_delay_hours: f64,
    pub confidence: f64,
    pub contributing_upstream_routes: BTreeSet<RouteId>,
}

/// 單一週期內的航線狀態，只會前進不會倒退
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteStage {
    Observed,
    Scored,
    Forecasted,
}

/// 擷取端送來的單一航線觀測，任何模態都可能缺漏
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteObservations {
    pub route_id: RouteId,
    #[serde(default)]
    pub origin_port: Option<String>,
    #[serde(default)]
    pub destination_port: Option<String>,
    #[serde(default)]
    pub weather: Option<WeatherObservation>,
    #[serde(default)]
    pub sentiment: Option<SentimentSample>,
    #[serde(default)]
    pub congestion: Option<CongestionSnapshot>,
    #[serde(default)]
    pub historical: Option<HistoricalProfile>,
    #[serde(default)]
    pub articles: Vec<NewsArticle>,
    #[serde(default)]
    pub port_traffic: Vec<PortTrafficSample>,
    #[serde(default)]
    pub delay_history: Vec<DelayObservation>,
}

impl RouteObservations {
    pub fn new(route_id: impl Into<RouteId>) -> Self {
        Self {
            route_id: route_id.into(),
            origin_port: None,
            destination_port: None,
            weather: None,
            sentiment: None,
            congestion: None,
            historical: None,
            articles: Vec::new(),
            port_traffic: Vec::new(),
            delay_history: Vec::new(),
        }
    }

    pub fn between(mut self, origin: impl Into<String>, destination: impl Into<String>) -> Self {
        self.origin_port = Some(origin.into());
        self.destination_port = Some(destination.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: RouteId,
    pub to: RouteId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationBatch {
    pub generated_at: DateTime<Utc>,
    pub routes: Vec<RouteObservations>,
    #[serde(default)]
    pub dependencies: Vec<DependencyEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub features: FeatureVector,
    pub target: f64,
}
