//! 延誤預測與沿相依圖的連鎖傳遞。
//!
//! 自身延誤 = 風險分級對應的基準延誤，有歷史時再與 EMA 混合並加上趨勢。
//! 傳遞依強連通分量的拓撲順序進行；環內只做一次 Jacobi 迭代。

use crate::core::fusion::RiskThresholds;
use crate::core::graph::RouteDependencyGraph;
use crate::domain::model::{DelayObservation, DelayPrediction, RiskAssessment, RouteId};
use crate::utils::error::EngineWarning;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// 沒有歷史資料時的信心值
pub const MIN_CONFIDENCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastSettings {
    pub alpha: f64,
    pub trend_window: usize,
    pub horizon_hours: f64,
    pub propagation_factor: f64,
    /// 有歷史時 EMA 的權重 β
    pub history_blend: f64,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            trend_window: 24,
            horizon_hours: 24.0,
            propagation_factor: 0.3,
            history_blend: 0.5,
        }
    }
}

/// 傳遞前後的延誤
#[derive(Debug, Clone, PartialEq)]
pub struct PropagatedDelay {
    pub route_id: RouteId,
    pub own_delay_hours: f64,
    pub total_delay_hours: f64,
    pub contributors: BTreeSet<RouteId>,
}

impl PropagatedDelay {
    pub fn cascading_delay_hours(&self) -> f64 {
        self.total_delay_hours - self.own_delay_hours
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Forecast {
    pub predictions: Vec<DelayPrediction>,
    pub warnings: Vec<EngineWarning>,
}

pub fn exponential_moving_average(values: &[f64], alpha: f64) -> Option<f64> {
    let (first, rest) = values.split_first()?;
    Some(
        rest.iter()
            .fold(*first, |ema, x| alpha * x + (1.0 - alpha) * ema),
    )
}

/// 最小平方法斜率；點數不足或 x 全部相同時為 0
pub fn linear_trend(points: &[(f64, f64)]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let (cov, var) = points.iter().fold((0.0, 0.0), |(cov, var), (x, y)| {
        (
            cov + (x - mean_x) * (y - mean_y),
            var + (x - mean_x) * (x - mean_x),
        )
    });
    if var <= f64::EPSILON {
        0.0
    } else {
        cov / var
    }
}

/// 0.1 + 0.9 × 完整度 × 穩定度
pub fn history_confidence(values: &[f64], window: usize) -> f64 {
    if values.is_empty() || window == 0 {
        return MIN_CONFIDENCE;
    }
    let n = values.len() as f64;
    let completeness = (n / window as f64).min(1.0);
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() < 2 {
        0.0
    } else {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    };
    let stability = 1.0 / (1.0 + std / (mean.abs() + 1.0));
    (MIN_CONFIDENCE + (1.0 - MIN_CONFIDENCE) * completeness * stability).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Default)]
pub struct DelayForecaster {
    settings: ForecastSettings,
    thresholds: RiskThresholds,
}

impl DelayForecaster {
    pub fn new(settings: ForecastSettings, thresholds: RiskThresholds) -> Self {
        Self {
            settings,
            thresholds,
        }
    }

    pub fn settings(&self) -> &ForecastSettings {
        &self.settings
    }

    /// 分級對應的基準延誤（小時），各級內隨風險遞增
    pub fn risk_delay(&self, total_risk: f64) -> f64 {
        let r = total_risk.clamp(0.0, 1.0);
        let medium = self.thresholds.medium();
        let high = self.thresholds.high();
        if r >= high {
            let span = 1.0 - high;
            if span <= 0.0 {
                24.0
            } else {
                24.0 + (r - high) / span * 100.0
            }
        } else if r >= medium {
            6.0 + (r - medium) / (high - medium) * 40.0
        } else {
            r / medium * 2.0
        }
    }

    /// 回傳 (自身延誤, 信心值)
    pub fn own_delay(&self, total_risk: f64, history: &[DelayObservation]) -> (f64, f64) {
        let risk_delay = self.risk_delay(total_risk);

        let mut ordered: Vec<&DelayObservation> = history
            .iter()
            .filter(|o| o.delay_hours.is_finite())
            .collect();
        if ordered.is_empty() {
            return (risk_delay, MIN_CONFIDENCE);
        }
        ordered.sort_by_key(|o| o.observed_at);

        let values: Vec<f64> = ordered.iter().map(|o| o.delay_hours.max(0.0)).collect();
        let ema = exponential_moving_average(&values, self.settings.alpha).unwrap_or(0.0);

        let recent_start = ordered.len().saturating_sub(self.settings.trend_window);
        let recent = &ordered[recent_start..];
        let origin = recent[0].observed_at;
        let points: Vec<(f64, f64)> = recent
            .iter()
            .map(|o| {
                (
                    (o.observed_at - origin).num_seconds() as f64 / 3600.0,
                    o.delay_hours.max(0.0),
                )
            })
            .collect();
        let slope = linear_trend(&points);

        let beta = self.settings.history_blend;
        let own = ((1.0 - beta) * risk_delay + beta * ema + slope * self.settings.horizon_hours)
            .max(0.0);
        let confidence = history_confidence(&values[recent_start..], self.settings.trend_window);
        (own, confidence)
    }

    /// 沿相依圖傳遞。結果依拓撲順序排列；不在圖中的航線排在最後（依 id 排序）。
    pub fn propagate(
        &self,
        own: &BTreeMap<RouteId, f64>,
        graph: &RouteDependencyGraph,
    ) -> (Vec<PropagatedDelay>, Vec<EngineWarning>) {
        let factor = self.settings.propagation_factor;
        let mut finals: HashMap<&str, f64> = HashMap::new();
        let mut results = Vec::with_capacity(own.len());
        let mut warnings = Vec::new();

        for unit in graph.propagation_order() {
            let members: Vec<&RouteId> = unit
                .routes
                .iter()
                .filter_map(|r| own.get_key_value(r.as_str()).map(|(key, _)| key))
                .collect();
            let in_unit: HashSet<&str> = unit.routes.iter().map(String::as_str).collect();

            if unit.cyclic {
                tracing::warn!("🔁 Cyclic dependency between {}", unit.routes.join(", "));
                warnings.push(EngineWarning::CyclicDependency {
                    routes: unit.routes.clone(),
                });
            }

            // 先算每個成員的入口值：自身 + 環外上游
            let mut entries: Vec<(f64, BTreeSet<RouteId>)> = Vec::with_capacity(members.len());
            for route in &members {
                let mut value = own[route.as_str()];
                let mut contributors = BTreeSet::new();
                for upstream in graph.predecessors(route) {
                    if in_unit.contains(upstream) {
                        continue;
                    }
                    if let Some(upstream_final) = finals.get(upstream) {
                        let contribution = factor * upstream_final;
                        if contribution > 0.0 {
                            value += contribution;
                            contributors.insert(upstream.to_string());
                        }
                    }
                }
                entries.push((value, contributors));
            }

            let entry_of: HashMap<&str, f64> = members
                .iter()
                .copied()
                .zip(&entries)
                .map(|(route, (value, _))| (route.as_str(), *value))
                .collect();

            for (route, (entry, mut contributors)) in members.into_iter().zip(entries) {
                let mut total = entry;
                if unit.cyclic {
                    for upstream in graph.predecessors(route) {
                        if upstream == route.as_str() || !in_unit.contains(upstream) {
                            continue;
                        }
                        if let Some(upstream_entry) = entry_of.get(upstream) {
                            let contribution = factor * upstream_entry;
                            if contribution > 0.0 {
                                total += contribution;
                                contributors.insert(upstream.to_string());
                            }
                        }
                    }
                }
                finals.insert(route.as_str(), total);
                results.push(PropagatedDelay {
                    route_id: route.clone(),
                    own_delay_hours: own[route.as_str()],
                    total_delay_hours: total,
                    contributors,
                });
            }
        }

        for (route, delay) in own {
            if !graph.contains_route(route) {
                results.push(PropagatedDelay {
                    route_id: route.clone(),
                    own_delay_hours: *delay,
                    total_delay_hours: *delay,
                    contributors: BTreeSet::new(),
                });
            }
        }

        (results, warnings)
    }

    pub fn forecast(
        &self,
        assessments: &[RiskAssessment],
        history: &HashMap<RouteId, Vec<DelayObservation>>,
        graph: &RouteDependencyGraph,
    ) -> Forecast {
        let mut own = BTreeMap::new();
        let mut confidence = HashMap::new();
        for assessment in assessments {
            let route_history = history
                .get(&assessment.route_id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let (delay, conf) = self.own_delay(assessment.total_risk, route_history);
            own.insert(assessment.route_id.clone(), delay);
            confidence.insert(assessment.route_id.as_str(), conf);
        }

        let (propagated, warnings) = self.propagate(&own, graph);
        let predictions = propagated
            .into_iter()
            .map(|delay| DelayPrediction {
                confidence: confidence
                    .get(delay.route_id.as_str())
                    .copied()
                    .unwrap_or(MIN_CONFIDENCE),
                predicted_delay_hours: delay.total_delay_hours,
                base_delay_hours: delay.own_delay_hours,
                cascading_delay_hours: delay.cascading_delay_hours(),
                contributing_upstream_routes: delay.contributors,
                route_id: delay.route_id,
            })
            .collect();

        Forecast {
            predictions,
            warnings,
        }
    }
}
