use crate::core::engine::CycleSnapshot;
use crate::domain::model::RouteOutcome;
use crate::domain::ports::Storage;
use crate::utils::error::{Result, RiskError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const JSON_REPORT_FILE: &str = "risk_report.json";
pub const CSV_REPORT_FILE: &str = "risk_report.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Csv,
}

impl ReportFormat {
    pub fn file_name(&self) -> &'static str {
        match self {
            ReportFormat::Json => JSON_REPORT_FILE,
            ReportFormat::Csv => CSV_REPORT_FILE,
        }
    }
}

impl FromStr for ReportFormat {
    type Err = RiskError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            other => Err(RiskError::InvalidConfigValueError {
                field: "output.formats".to_string(),
                value: other.to_string(),
                reason: "Supported formats: json, csv".to_string(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    route_id: &'a str,
    status: &'static str,
    total_risk: Option<f64>,
    risk_level: Option<&'static str>,
    weather: Option<f64>,
    sentiment: Option<f64>,
    congestion: Option<f64>,
    historical: Option<f64>,
    provenance: Option<&'static str>,
    model_id: Option<&'a str>,
    predicted_delay_hours: Option<f64>,
    base_delay_hours: Option<f64>,
    cascading_delay_hours: Option<f64>,
    confidence: Option<f64>,
    upstream_routes: String,
    failure_reason: Option<&'a str>,
}

pub fn render_json(snapshot: &CycleSnapshot) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(snapshot)?)
}

/// 每條航線一列，依總風險由高到低，失敗的航線排在最後
pub fn render_csv(snapshot: &CycleSnapshot) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    for assessment in snapshot.top_n(snapshot.outcomes.len()) {
        let prediction = snapshot.prediction(&assessment.route_id);
        writer.serialize(ReportRow {
            route_id: &assessment.route_id,
            status: "assessed",
            total_risk: Some(assessment.total_risk),
            risk_level: Some(assessment.risk_level.as_str()),
            weather: Some(assessment.components.weather),
            sentiment: Some(assessment.components.sentiment),
            congestion: Some(assessment.components.congestion),
            historical: Some(assessment.components.historical),
            provenance: Some(assessment.provenance.as_str()),
            model_id: assessment.model_id.as_deref(),
            predicted_delay_hours: prediction.map(|p| p.predicted_delay_hours),
            base_delay_hours: prediction.map(|p| p.base_delay_hours),
            cascading_delay_hours: prediction.map(|p| p.cascading_delay_hours),
            confidence: prediction.map(|p| p.confidence),
            upstream_routes: prediction
                .map(|p| {
                    p.contributing_upstream_routes
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(";")
                })
                .unwrap_or_default(),
            failure_reason: None,
        })?;
    }

    for outcome in &snapshot.outcomes {
        if let RouteOutcome::Failed(failure) = outcome {
            writer.serialize(ReportRow {
                route_id: &failure.route_id,
                status: "failed",
                total_risk: None,
                risk_level: None,
                weather: None,
                sentiment: None,
                congestion: None,
                historical: None,
                provenance: None,
                model_id: None,
                predicted_delay_hours: None,
                base_delay_hours: None,
                cascading_delay_hours: None,
                confidence: None,
                upstream_routes: String::new(),
                failure_reason: Some(&failure.reason),
            })?;
        }
    }

    writer
        .into_inner()
        .map_err(|e| RiskError::IoError(e.into_error()))
}

/// 回傳寫入的檔案路徑
pub async fn export_report<S: Storage>(
    storage: &S,
    snapshot: &CycleSnapshot,
    formats: &[ReportFormat],
) -> Result<Vec<String>> {
    let mut written = Vec::with_capacity(formats.len());
    for format in formats {
        let data = match format {
            ReportFormat::Json => render_json(snapshot)?,
            ReportFormat::Csv => render_csv(snapshot)?,
        };
        let path = format.file_name();
        tracing::debug!("Writing {} report ({} bytes)", path, data.len());
        storage.write_file(path, &data).await?;
        written.push(path.to_string());
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::StageTracker;
    use crate::domain::model::{
        DelayPrediction, ModelProvenance, RiskAssessment, RiskComponents, RiskLevel, RouteFailure,
    };
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn snapshot() -> CycleSnapshot {
        let assessment = RiskAssessment {
            route_id: "SHA-SIN".to_string(),
            total_risk: 0.57,
            risk_level: RiskLevel::Medium,
            components: RiskComponents::new(1.0, 0.2, 0.6, 0.1),
            computed_at: Utc::now(),
            provenance: ModelProvenance::Heuristic,
            model_id: None,
            ensemble_fallback: false,
            defaulted_modalities: Vec::new(),
            stale_modalities: Vec::new(),
        };
        CycleSnapshot {
            cycle_id: 1,
            computed_at: Utc::now(),
            outcomes: vec![
                RouteOutcome::Failed(RouteFailure {
                    route_id: "SIN-RTM".to_string(),
                    reason: "bad, capacity".to_string(),
                }),
                RouteOutcome::Assessed(assessment),
            ],
            predictions: vec![DelayPrediction {
                route_id: "SHA-SIN".to_string(),
                predicted_delay_hours: 36.0,
                base_delay_hours: 30.0,
                cascading_delay_hours: 6.0,
                confidence: 0.1,
                contributing_upstream_routes: BTreeSet::from(["A".to_string(), "B".to_string()]),
            }],
            stages: StageTracker::default(),
            model_provenance: ModelProvenance::Heuristic,
            model_id: None,
            feature_importance: None,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_csv_lists_assessed_then_failed() {
        let csv = String::from_utf8(render_csv(&snapshot()).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("route_id,status,total_risk"));
        assert!(lines[1].starts_with("SHA-SIN,assessed,0.57,medium"));
        assert!(lines[1].contains("A;B"));
        assert!(lines[2].starts_with("SIN-RTM,failed"));
        assert!(lines[2].ends_with("\"bad, capacity\""));
    }

    #[test]
    fn test_json_report_round_trips() {
        let expected = snapshot();
        let parsed: CycleSnapshot = serde_json::from_slice(&render_json(&expected).unwrap()).unwrap();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<ReportFormat>().unwrap(), ReportFormat::Csv);
        assert!("zip".parse::<ReportFormat>().is_err());
    }
}
