use crate::core::features::extract_congestion;
use crate::core::forecast::{exponential_moving_average, linear_trend};
use crate::domain::model::{CongestionSnapshot, CongestionTrend, PortTrafficSample};
use crate::utils::error::{Result, RiskError};
use crate::utils::validation::require_finite;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 等待時間在視窗內變化超過此值（小時）才算趨勢
const TREND_DEADBAND_HOURS: f64 = 2.0;

/// 壅塞指數每小時變化超過此值才算趨勢
const INDEX_TREND_DEADBAND: f64 = 0.001;
const FORECAST_SMOOTHING: f64 = 0.3;
const MIN_FORECAST_POINTS: usize = 3;
const VARIANCE_WINDOW: usize = 10;
const SPARSE_CONFIDENCE: f64 = 0.3;
const MAX_FORECAST_CONFIDENCE: f64 = 0.9;
pub const DEFAULT_PROJECTION_HOURS: f64 = 24.0;

/// 港口壅塞的短期預測
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CongestionForecast {
    pub congestion_index: f64,
    pub wait_time_hours: f64,
    pub trend: CongestionTrend,
    pub confidence: f64,
    pub horizon_hours: f64,
}

/// 依預計到港船數與處理速率推算的壅塞
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CongestionProjection {
    pub congestion_index: f64,
    pub vessel_count: u32,
    pub wait_time_hours: f64,
    pub horizon_hours: f64,
}

/// 從港口流量序列算出滾動壅塞快照
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CongestionAnalyzer {
    window_hours: i64,
}

impl Default for CongestionAnalyzer {
    fn default() -> Self {
        Self { window_hours: 24 }
    }
}

impl CongestionAnalyzer {
    pub fn new(window_hours: i64) -> Self {
        Self {
            window_hours: window_hours.max(1),
        }
    }

    /// 視窗內取平均；視窗外較舊的資料當作歷史平均。
    /// 沒有較舊資料時，歷史平均等於目前平均（視為沒有偏離）。
    pub fn rolling_snapshot(
        &self,
        samples: &[PortTrafficSample],
        now: DateTime<Utc>,
    ) -> Option<CongestionSnapshot> {
        let mut ordered: Vec<&PortTrafficSample> = samples.iter().collect();
        ordered.sort_by_key(|s| s.observed_at);
        let latest = *ordered.last()?;

        let window_start = now - Duration::hours(self.window_hours);
        let (older, mut recent): (Vec<&PortTrafficSample>, Vec<&PortTrafficSample>) =
            ordered.iter().partition(|s| s.observed_at < window_start);
        if recent.is_empty() {
            recent.push(latest);
        }

        let avg_vessels = mean(recent.iter().map(|s| f64::from(s.vessel_count)));
        let avg_wait = mean(recent.iter().map(|s| s.wait_time_hours.max(0.0)));
        let historical_avg = if older.is_empty() {
            avg_wait
        } else {
            mean(older.iter().map(|s| s.wait_time_hours.max(0.0)))
        };

        let trend = match (recent.first(), recent.last()) {
            (Some(first), Some(last)) if recent.len() >= 2 => {
                let change = last.wait_time_hours - first.wait_time_hours;
                if change > TREND_DEADBAND_HOURS {
                    CongestionTrend::Increasing
                } else if change < -TREND_DEADBAND_HOURS {
                    CongestionTrend::Decreasing
                } else {
                    CongestionTrend::Stable
                }
            }
            _ => CongestionTrend::Stable,
        };

        Some(CongestionSnapshot {
            vessel_count: avg_vessels.round() as u32,
            port_capacity: latest.port_capacity,
            wait_time_hours: avg_wait,
            historical_avg_wait_hours: historical_avg,
            trend,
            observed_at: latest.observed_at,
        })
    }
}

impl CongestionAnalyzer {
    /// 平滑水準加上趨勢外推 `horizon_hours` 小時。
    ///
    /// 每個樣本的壅塞指數以整段序列的平均等待時間為歷史基準計算。
    /// 少於三個樣本時沿用最新值，信心固定 0.3；沒有樣本回傳 None。
    pub fn forecast(
        &self,
        samples: &[PortTrafficSample],
        horizon_hours: f64,
    ) -> Result<Option<CongestionForecast>> {
        let horizon_hours = require_finite("congestion.horizon_hours", horizon_hours)?.max(0.0);
        let mut ordered: Vec<&PortTrafficSample> = samples.iter().collect();
        ordered.sort_by_key(|s| s.observed_at);
        let (Some(first), Some(latest)) = (ordered.first(), ordered.last()) else {
            return Ok(None);
        };

        let waits = ordered
            .iter()
            .map(|s| {
                require_finite("port_traffic.wait_time_hours", s.wait_time_hours).map(|w| w.max(0.0))
            })
            .collect::<Result<Vec<f64>>>()?;
        let baseline = mean(waits.iter().copied());
        let indices = ordered
            .iter()
            .zip(&waits)
            .map(|(sample, wait)| congestion_index(sample, *wait, baseline))
            .collect::<Result<Vec<f64>>>()?;

        let latest_index = indices.last().copied().unwrap_or_default();
        let latest_wait = waits.last().copied().unwrap_or_default();
        if ordered.len() < MIN_FORECAST_POINTS {
            tracing::debug!(
                "Only {} port traffic samples at {}, holding latest values",
                ordered.len(),
                latest.observed_at
            );
            return Ok(Some(CongestionForecast {
                congestion_index: latest_index,
                wait_time_hours: latest_wait,
                trend: CongestionTrend::Stable,
                confidence: SPARSE_CONFIDENCE,
                horizon_hours,
            }));
        }

        let hours_since_start = |s: &PortTrafficSample| {
            (s.observed_at - first.observed_at).num_seconds() as f64 / 3600.0
        };
        let index_points: Vec<(f64, f64)> = ordered
            .iter()
            .zip(&indices)
            .map(|(s, v)| (hours_since_start(*s), *v))
            .collect();
        let wait_points: Vec<(f64, f64)> = ordered
            .iter()
            .zip(&waits)
            .map(|(s, v)| (hours_since_start(*s), *v))
            .collect();
        let index_slope = linear_trend(&index_points);
        let wait_slope = linear_trend(&wait_points);

        let index_level = exponential_moving_average(&indices, FORECAST_SMOOTHING).unwrap_or(latest_index);
        let wait_level = exponential_moving_average(&waits, FORECAST_SMOOTHING).unwrap_or(latest_wait);

        let trend = if index_slope > INDEX_TREND_DEADBAND {
            CongestionTrend::Increasing
        } else if index_slope < -INDEX_TREND_DEADBAND {
            CongestionTrend::Decreasing
        } else {
            CongestionTrend::Stable
        };

        let recent = &indices[indices.len().saturating_sub(VARIANCE_WINDOW)..];
        let recent_mean = mean(recent.iter().copied());
        let variance = mean(recent.iter().map(|v| (v - recent_mean).powi(2)));
        let confidence = (1.0 - 2.0 * variance).clamp(SPARSE_CONFIDENCE, MAX_FORECAST_CONFIDENCE);

        Ok(Some(CongestionForecast {
            congestion_index: (index_level + index_slope * horizon_hours).clamp(0.0, 1.0),
            wait_time_hours: (wait_level + wait_slope * horizon_hours).max(0.0),
            trend,
            confidence,
            horizon_hours,
        }))
    }

    /// 現有船數加上預計到港船數，扣掉 `horizon_hours` 內能處理的量。
    /// 處理速率為 0 時，等待時間就是目前等待再加上整段時間。
    pub fn project(
        &self,
        current: &CongestionSnapshot,
        incoming_vessels: u32,
        processing_rate_per_hour: f64,
        horizon_hours: f64,
    ) -> Result<CongestionProjection> {
        let rate = require_finite("congestion.processing_rate", processing_rate_per_hour)?;
        if rate < 0.0 {
            return Err(RiskError::invalid_observation(
                "congestion.processing_rate",
                "processing rate cannot be negative",
            ));
        }
        let horizon_hours = require_finite("congestion.horizon_hours", horizon_hours)?.max(0.0);
        let current_wait = require_finite("congestion.wait_time_hours", current.wait_time_hours)?.max(0.0);

        let arriving = f64::from(current.vessel_count) + f64::from(incoming_vessels);
        let vessels = (arriving - rate * horizon_hours).max(0.0);
        let wait_time_hours = if rate > 0.0 {
            vessels / rate
        } else {
            current_wait + horizon_hours
        };
        let vessel_count = vessels.round().min(f64::from(u32::MAX)) as u32;

        let projected = CongestionSnapshot {
            vessel_count,
            wait_time_hours,
            historical_avg_wait_hours: current_wait,
            ..*current
        };
        Ok(CongestionProjection {
            congestion_index: extract_congestion(&projected)?.score,
            vessel_count,
            wait_time_hours,
            horizon_hours,
        })
    }
}

fn congestion_index(sample: &PortTrafficSample, wait: f64, baseline_wait: f64) -> Result<f64> {
    let snapshot = CongestionSnapshot {
        vessel_count: sample.vessel_count,
        port_capacity: sample.port_capacity,
        wait_time_hours: wait,
        historical_avg_wait_hours: baseline_wait,
        trend: CongestionTrend::Stable,
        observed_at: sample.observed_at,
    };
    Ok(extract_congestion(&snapshot)?.score)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
