use crate::domain::model::ObservationBatch;
use crate::domain::ports::{ObservationSource, Storage};
use crate::utils::error::Result;
use async_trait::async_trait;

/// 讀取擷取端寫出的 JSON 快取檔（一個 `ObservationBatch`）
pub struct JsonFileSource<S: Storage> {
    storage: S,
    path: String,
}

impl<S: Storage> JsonFileSource<S> {
    pub fn new(storage: S, path: impl Into<String>) -> Self {
        Self {
            storage,
            path: path.into(),
        }
    }
}

#[async_trait]
impl<S: Storage> ObservationSource for JsonFileSource<S> {
    async fn fetch_batch(&self) -> Result<ObservationBatch> {
        let data = self.storage.read_file(&self.path).await?;
        let batch: ObservationBatch = serde_json::from_slice(&data)?;
        tracing::debug!(
            "Loaded {} routes and {} explicit dependencies from {}",
            batch.routes.len(),
            batch.dependencies.len(),
            self.path
        );
        Ok(batch)
    }

    fn describe(&self) -> String {
        format!("json file {}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::LocalStorage;
    use crate::domain::model::{WeatherKind, WeatherSeverity};
    use crate::utils::error::RiskError;

    const BATCH: &str = r#"{
        "generated_at": "2026-03-01T12:00:00Z",
        "routes": [
            {
                "route_id": "SHA-SIN",
                "origin_port": "SHA",
                "destination_port": "SIN",
                "weather": {
                    "severity": "light",
                    "type": "monsoon",
                    "duration_hours": 12.0,
                    "location": {"lat": 22.3, "lon": 114.2},
                    "observed_at": "2026-03-01T11:00:00Z"
                },
                "sentiment": null
            },
            {"route_id": "SIN-RTM"}
        ],
        "dependencies": [{"from": "SIN-RTM", "to": "SHA-SIN"}]
    }"#;

    #[tokio::test]
    async fn test_fetch_batch_parses_cache_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.write_file("cache.json", BATCH.as_bytes()).await.unwrap();

        let source = JsonFileSource::new(storage, "cache.json");
        let batch = source.fetch_batch().await.unwrap();

        assert_eq!(batch.routes.len(), 2);
        let weather = batch.routes[0].weather.as_ref().unwrap();
        assert_eq!(weather.severity, WeatherSeverity::Minor);
        assert_eq!(weather.kind, WeatherKind::Other);
        assert!(batch.routes[0].sentiment.is_none());
        assert!(batch.routes[1].articles.is_empty());
        assert_eq!(batch.dependencies.len(), 1);
        assert!(source.describe().contains("cache.json"));
    }

    #[tokio::test]
    async fn test_malformed_cache_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.write_file("cache.json", b"{\"routes\": 5}").await.unwrap();

        let result = JsonFileSource::new(storage, "cache.json").fetch_batch().await;
        assert!(matches!(result, Err(RiskError::SerializationError(_))));
    }
}
