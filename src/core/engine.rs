//! 評分週期：擷取 → 評分 → 預測 → 發布。
//!
//! 整個快照先在本地建好，最後以一次指標替換發布；
//! 週期中途被取消時，讀取端看到的仍是上一個快照。

use crate::core::ensemble::FeatureImportance;
use crate::core::forecast::DelayForecaster;
use crate::core::fusion::{FusionEngine, FusionMode, ScoringMode};
use crate::core::graph::RouteDependencyGraph;
use crate::core::model_manager::ModelManager;
use crate::domain::model::{
    DelayObservation, DelayPrediction, ModelProvenance, ObservationBatch, RiskAssessment,
    RouteFailure, RouteId, RouteOutcome, RouteStage,
};
use crate::domain::ports::ObservationSource;
use crate::utils::error::{EngineWarning, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const DEFAULT_ALERT_THRESHOLD: f64 = 0.7;

/// 航線狀態只前進不倒退
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTracker {
    stages: BTreeMap<RouteId, RouteStage>,
}

impl StageTracker {
    /// 回傳是否真的前進
    pub fn advance(&mut self, route_id: &str, stage: RouteStage) -> bool {
        match self.stages.get_mut(route_id) {
            Some(current) if *current >= stage => false,
            Some(current) => {
                *current = stage;
                true
            }
            None => {
                self.stages.insert(route_id.to_string(), stage);
                true
            }
        }
    }

    pub fn stage(&self, route_id: &str) -> Option<RouteStage> {
        self.stages.get(route_id).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSnapshot {
    pub cycle_id: u64,
    pub computed_at: DateTime<Utc>,
    pub outcomes: Vec<RouteOutcome>,
    pub predictions: Vec<DelayPrediction>,
    pub stages: StageTracker,
    pub model_provenance: ModelProvenance,
    pub model_id: Option<String>,
    pub feature_importance: Option<Vec<FeatureImportance>>,
    pub warnings: Vec<EngineWarning>,
}

impl CycleSnapshot {
    pub fn assessments(&self) -> impl Iterator<Item = &RiskAssessment> {
        self.outcomes.iter().filter_map(RouteOutcome::assessment)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RouteFailure> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            RouteOutcome::Failed(failure) => Some(failure),
            RouteOutcome::Assessed(_) => None,
        })
    }

    pub fn assessment(&self, route_id: &str) -> Option<&RiskAssessment> {
        self.assessments().find(|a| a.route_id == route_id)
    }

    pub fn prediction(&self, route_id: &str) -> Option<&DelayPrediction> {
        self.predictions.iter().find(|p| p.route_id == route_id)
    }

    pub fn stage(&self, route_id: &str) -> Option<RouteStage> {
        self.stages.stage(route_id)
    }

    /// 依總風險由高到低；同分依 route_id 排序
    pub fn top_n(&self, n: usize) -> Vec<&RiskAssessment> {
        let mut ranked: Vec<&RiskAssessment> = self.assessments().collect();
        ranked.sort_by(|a, b| {
            b.total_risk
                .total_cmp(&a.total_risk)
                .then_with(|| a.route_id.cmp(&b.route_id))
        });
        ranked.truncate(n);
        ranked
    }

    pub fn alerts(&self, threshold: f64) -> Vec<&RiskAssessment> {
        self.top_n(self.outcomes.len())
            .into_iter()
            .filter(|a| a.total_risk >= threshold)
            .collect()
    }
}

pub struct RiskEngine {
    fusion: FusionEngine,
    forecaster: DelayForecaster,
    models: Arc<ModelManager>,
    mode: ScoringMode,
    published: RwLock<Option<Arc<CycleSnapshot>>>,
    next_cycle: AtomicU64,
}

impl RiskEngine {
    pub fn new(
        fusion: FusionEngine,
        forecaster: DelayForecaster,
        models: Arc<ModelManager>,
        mode: ScoringMode,
    ) -> Self {
        Self {
            fusion,
            forecaster,
            models,
            mode,
            published: RwLock::new(None),
            next_cycle: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> ScoringMode {
        self.mode
    }

    pub fn models(&self) -> &Arc<ModelManager> {
        &self.models
    }

    pub fn fusion(&self) -> &FusionEngine {
        &self.fusion
    }

    pub fn latest(&self) -> Option<Arc<CycleSnapshot>> {
        self.published.read().clone()
    }

    /// 相依圖由批次內的共用港口與明確相依邊推導
    pub fn evaluate(&self, cycle_id: u64, batch: &ObservationBatch, now: DateTime<Utc>) -> CycleSnapshot {
        let graph = RouteDependencyGraph::from_batch(batch);
        self.evaluate_with_graph(cycle_id, batch, &graph, now)
    }

    pub fn evaluate_with_graph(
        &self,
        cycle_id: u64,
        batch: &ObservationBatch,
        graph: &RouteDependencyGraph,
        now: DateTime<Utc>,
    ) -> CycleSnapshot {
        // 整個週期固定使用同一個模型
        let mode = self.models.fusion_mode(self.mode);
        let mut warnings = Vec::new();
        if let FusionMode::Ensemble(None) = mode {
            tracing::warn!("⚠️ Ensemble scoring requested but no model is loaded; using heuristic weights");
            warnings.push(EngineWarning::DegradedMode {
                reason: "no trained ensemble model available, heuristic fallback".to_string(),
            });
        }

        let mut stages = StageTracker::default();
        let mut outcomes = Vec::with_capacity(batch.routes.len());
        let mut seen = HashSet::new();
        let mut history: HashMap<RouteId, Vec<DelayObservation>> = HashMap::new();

        for observations in &batch.routes {
            let route_id = observations.route_id.as_str();
            if !seen.insert(route_id) {
                tracing::warn!("Duplicate route {} in batch, keeping the first entry", route_id);
                outcomes.push(RouteOutcome::Failed(RouteFailure {
                    route_id: route_id.to_string(),
                    reason: "duplicate route id in batch".to_string(),
                }));
                continue;
            }
            stages.advance(route_id, RouteStage::Observed);

            match self.fusion.assess(observations, &mode, now) {
                Ok((assessment, route_warnings)) => {
                    for warning in &route_warnings {
                        tracing::warn!("{}", warning);
                    }
                    warnings.extend(route_warnings);
                    stages.advance(route_id, RouteStage::Scored);
                    history.insert(route_id.to_string(), observations.delay_history.clone());
                    outcomes.push(RouteOutcome::Assessed(assessment));
                }
                Err(e) => {
                    tracing::warn!("❌ Route {} failed: {}", route_id, e);
                    outcomes.push(RouteOutcome::Failed(RouteFailure {
                        route_id: route_id.to_string(),
                        reason: e.to_string(),
                    }));
                }
            }
        }

        let assessments: Vec<RiskAssessment> = outcomes
            .iter()
            .filter_map(RouteOutcome::assessment)
            .cloned()
            .collect();
        let forecast = self.forecaster.forecast(&assessments, &history, graph);
        for prediction in &forecast.predictions {
            stages.advance(&prediction.route_id, RouteStage::Forecasted);
        }
        warnings.extend(forecast.warnings);

        let model = mode.model();
        tracing::info!(
            "📊 Cycle {}: {} assessed, {} failed, {} predictions",
            cycle_id,
            assessments.len(),
            outcomes.len() - assessments.len(),
            forecast.predictions.len()
        );

        CycleSnapshot {
            cycle_id,
            computed_at: now,
            outcomes,
            predictions: forecast.predictions,
            stages,
            model_provenance: mode.provenance(),
            model_id: model.map(|m| m.model_id.clone()),
            feature_importance: model.map(|m| m.feature_importance()),
            warnings,
        }
    }

    /// 只有比目前快照新的週期才會發布
    pub fn publish(&self, snapshot: CycleSnapshot) -> Arc<CycleSnapshot> {
        let snapshot = Arc::new(snapshot);
        let mut published = self.published.write();
        match published.as_ref() {
            Some(current) if current.cycle_id >= snapshot.cycle_id => {
                tracing::debug!(
                    "Cycle {} is older than published cycle {}, not publishing",
                    snapshot.cycle_id,
                    current.cycle_id
                );
            }
            _ => *published = Some(Arc::clone(&snapshot)),
        }
        snapshot
    }

    pub async fn run_cycle(&self, source: &dyn ObservationSource) -> Result<Arc<CycleSnapshot>> {
        let cycle_id = self.next_cycle.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!("🚀 Starting cycle {} from {}", cycle_id, source.describe());

        let batch = source.fetch_batch().await?;
        tracing::info!("📥 Fetched {} routes", batch.routes.len());

        let snapshot = self.evaluate(cycle_id, &batch, Utc::now());
        Ok(self.publish(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{CongestionSnapshot, CongestionTrend, RouteObservations};
    use async_trait::async_trait;

    fn congestion(capacity: u32, now: DateTime<Utc>) -> CongestionSnapshot {
        CongestionSnapshot {
            vessel_count: 30,
            port_capacity: capacity,
            wait_time_hours: 20.0,
            historical_avg_wait_hours: 10.0,
            trend: CongestionTrend::Stable,
            observed_at: now,
        }
    }

    fn batch(now: DateTime<Utc>) -> ObservationBatch {
        let mut good = RouteObservations::new("SHA-SIN").between("SHA", "SIN");
        good.congestion = Some(congestion(40, now));
        let mut broken = RouteObservations::new("SIN-RTM").between("SIN", "RTM");
        broken.congestion = Some(congestion(0, now));
        let quiet = RouteObservations::new("LAX-NYC").between("LAX", "NYC");

        ObservationBatch {
            generated_at: now,
            routes: vec![good, broken, quiet],
            dependencies: Vec::new(),
        }
    }

    fn engine(mode: ScoringMode) -> RiskEngine {
        RiskEngine::new(
            FusionEngine::default(),
            DelayForecaster::default(),
            Arc::new(ModelManager::default()),
            mode,
        )
    }

    struct FixedSource(ObservationBatch);

    #[async_trait]
    impl ObservationSource for FixedSource {
        async fn fetch_batch(&self) -> Result<ObservationBatch> {
            Ok(self.0.clone())
        }

        fn describe(&self) -> String {
            "fixed batch".to_string()
        }
    }

    #[test]
    fn test_failed_route_is_isolated() {
        let now = Utc::now();
        let snapshot = engine(ScoringMode::Heuristic).evaluate(1, &batch(now), now);

        assert_eq!(snapshot.assessments().count(), 2);
        let failures: Vec<&RouteFailure> = snapshot.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].route_id, "SIN-RTM");
        assert!(failures[0].reason.contains("port_capacity"));

        assert_eq!(snapshot.stage("SIN-RTM"), Some(RouteStage::Observed));
        assert_eq!(snapshot.stage("SHA-SIN"), Some(RouteStage::Forecasted));
        assert!(snapshot.prediction("SIN-RTM").is_none());
        assert_eq!(snapshot.predictions.len(), 2);
    }

    #[test]
    fn test_ensemble_without_model_reports_degraded_mode() {
        let now = Utc::now();
        let snapshot = engine(ScoringMode::Ensemble).evaluate(1, &batch(now), now);

        assert_eq!(snapshot.model_provenance, ModelProvenance::Heuristic);
        assert!(snapshot.model_id.is_none());
        assert!(snapshot.assessments().all(|a| a.ensemble_fallback));
        let degraded = snapshot
            .warnings
            .iter()
            .filter(|w| matches!(w, EngineWarning::DegradedMode { .. }))
            .count();
        assert_eq!(degraded, 1);
    }

    #[test]
    fn test_top_n_and_alerts() {
        let now = Utc::now();
        let snapshot = engine(ScoringMode::Heuristic).evaluate(1, &batch(now), now);

        let top = snapshot.top_n(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].route_id, "SHA-SIN");
        assert!(snapshot.alerts(DEFAULT_ALERT_THRESHOLD).is_empty());
        assert_eq!(snapshot.alerts(0.0).len(), 2);
    }

    #[test]
    fn test_duplicate_route_fails_second_entry() {
        let now = Utc::now();
        let mut batch = batch(now);
        batch.routes.push(RouteObservations::new("LAX-NYC"));
        let snapshot = engine(ScoringMode::Heuristic).evaluate(1, &batch, now);
        assert_eq!(snapshot.failures().count(), 2);
        assert_eq!(snapshot.assessments().filter(|a| a.route_id == "LAX-NYC").count(), 1);
    }

    #[test]
    fn test_stage_never_regresses() {
        let mut tracker = StageTracker::default();
        assert!(tracker.advance("R1", RouteStage::Scored));
        assert!(!tracker.advance("R1", RouteStage::Observed));
        assert_eq!(tracker.stage("R1"), Some(RouteStage::Scored));
    }

    #[test]
    fn test_older_cycle_does_not_replace_newer() {
        let now = Utc::now();
        let engine = engine(ScoringMode::Heuristic);
        engine.publish(engine.evaluate(5, &batch(now), now));
        engine.publish(engine.evaluate(3, &batch(now), now));
        assert_eq!(engine.latest().unwrap().cycle_id, 5);
    }

    #[tokio::test]
    async fn test_run_cycle_publishes_snapshot() {
        let engine = engine(ScoringMode::Heuristic);
        assert!(engine.latest().is_none());

        let source = FixedSource(batch(Utc::now()));
        let first = engine.run_cycle(&source).await.unwrap();
        let second = engine.run_cycle(&source).await.unwrap();

        assert_eq!(first.cycle_id, 1);
        assert_eq!(second.cycle_id, 2);
        assert_eq!(engine.latest().unwrap().cycle_id, 2);
    }
}
