//! 模型生命週期：訓練、保存、載入、熱替換。
//!
//! 讀取端拿到的是 `Arc<EnsembleModel>` 快照；重新訓練在背景執行緒完成後
//! 一次換上新模型，讀取端不會看到訓練到一半的狀態。
//! 重新訓練的鎖由訓練執行緒持有，逾時的訓練收到取消訊號並真正結束後，
//! 下一次訓練才能開始。

use crate::core::ensemble::{EnsembleModel, FeatureImportance, TrainingConfig, TrainingReport};
use crate::core::fusion::{FusionMode, ScoringMode};
use crate::domain::model::{FeatureVector, TrainingSample};
use crate::domain::ports::Storage;
use crate::utils::error::{Result, RiskError};
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ARTIFACT_PATH: &str = "models/risk_model.json";

pub struct ModelManager {
    current: RwLock<Option<Arc<EnsembleModel>>>,
    retrain_lock: Arc<tokio::sync::Mutex<()>>,
    config: TrainingConfig,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new(TrainingConfig::default())
    }
}

impl ModelManager {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            current: RwLock::new(None),
            retrain_lock: Arc::new(tokio::sync::Mutex::new(())),
            config,
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Option<Arc<EnsembleModel>> {
        self.current.read().clone()
    }

    pub fn is_trained(&self) -> bool {
        self.current.read().is_some()
    }

    /// 一個評分週期只呼叫一次，整個週期都用同一個模型
    pub fn fusion_mode(&self, mode: ScoringMode) -> FusionMode {
        match mode {
            ScoringMode::Heuristic => FusionMode::Heuristic,
            ScoringMode::Ensemble => FusionMode::Ensemble(self.snapshot()),
        }
    }

    pub fn install(&self, model: EnsembleModel) -> Arc<EnsembleModel> {
        let model = Arc::new(model);
        let previous = self.current.write().replace(Arc::clone(&model));
        match previous {
            Some(old) => tracing::info!("🔄 Model {} replaced by {}", old.model_id, model.model_id),
            None => tracing::info!("📦 Model {} installed", model.model_id),
        }
        model
    }

    /// 背景訓練新模型。逾時則放棄，目前的模型保持不變。
    /// 同一時間只允許一個重新訓練。
    pub async fn retrain(
        &self,
        samples: Vec<TrainingSample>,
        timeout: Duration,
    ) -> Result<TrainingReport> {
        if samples.len() < self.config.min_samples {
            return Err(RiskError::InsufficientData {
                required: self.config.min_samples,
                actual: samples.len(),
            });
        }

        let guard = Arc::clone(&self.retrain_lock).lock_owned().await;
        let config = self.config;
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);
        let task = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            EnsembleModel::fit_cancellable(&samples, &config, Utc::now(), &worker_cancel)
        });

        let model = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_error)) => {
                return Err(RiskError::TrainingFailed {
                    message: join_error.to_string(),
                })
            }
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                tracing::warn!("⏱️ Retraining exceeded {:?}, keeping current model", timeout);
                return Err(RiskError::RetrainTimeout {
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        let report = model.report();
        self.install(model);
        Ok(report)
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<f64> {
        let model = self.snapshot().ok_or_else(|| RiskError::ModelNotFound {
            location: "memory".to_string(),
        })?;
        Ok(model.predict(features))
    }

    pub fn feature_importance(&self) -> Result<Vec<FeatureImportance>> {
        let model = self.snapshot().ok_or_else(|| RiskError::ModelNotFound {
            location: "memory".to_string(),
        })?;
        Ok(model.feature_importance())
    }

    pub async fn save<S: Storage>(&self, storage: &S, path: &str) -> Result<()> {
        let model = self.snapshot().ok_or_else(|| RiskError::ModelNotFound {
            location: "memory".to_string(),
        })?;
        let data = serde_json::to_vec_pretty(model.as_ref())?;
        storage.write_file(path, &data).await?;
        tracing::info!("💾 Saved model {} to {}", model.model_id, path);
        Ok(())
    }

    /// 檔案不存在時回傳 `ModelNotFound`，呼叫端可以退回啟發式評分
    pub async fn load<S: Storage>(&self, storage: &S, path: &str) -> Result<Arc<EnsembleModel>> {
        let data = match storage.read_file(path).await {
            Ok(data) => data,
            Err(RiskError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RiskError::ModelNotFound {
                    location: path.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        let model: EnsembleModel =
            serde_json::from_slice(&data).map_err(|e| RiskError::InvalidArtifact {
                location: path.to_string(),
                reason: e.to_string(),
            })?;
        model.validate().map_err(|reason| RiskError::InvalidArtifact {
            location: path.to_string(),
            reason,
        })?;

        Ok(self.install(model))
    }

    /// 啟動時用：找不到或損壞的模型檔只記錄警告並回傳 None，
    /// 評分週期會以降級模式（啟發式）繼續。其他錯誤（例如權限）照常回傳。
    pub async fn load_or_degrade<S: Storage>(
        &self,
        storage: &S,
        path: &str,
    ) -> Result<Option<Arc<EnsembleModel>>> {
        match self.load(storage, path).await {
            Ok(model) => Ok(Some(model)),
            Err(e @ (RiskError::ModelNotFound { .. } | RiskError::InvalidArtifact { .. })) => {
                tracing::warn!("⚠️ {}, falling back to heuristic scoring", e);
                tracing::warn!("💡 {}", e.recovery_suggestion());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ensemble::{BoostingParams, ForestParams, TreeParams};
    use crate::core::synthetic::generate_training_set;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryStorage {
        files: parking_lot::Mutex<HashMap<String, Vec<u8>>>,
    }

    impl Storage for MemoryStorage {
        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            self.files.lock().get(path).cloned().ok_or_else(|| {
                RiskError::IoError(std::io::Error::new(std::io::ErrorKind::NotFound, path))
            })
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            self.files.lock().insert(path.to_string(), data.to_vec());
            Ok(())
        }
    }

    fn fast_manager() -> ModelManager {
        ModelManager::new(TrainingConfig {
            forest: ForestParams {
                n_trees: 8,
                tree: TreeParams {
                    max_depth: 5,
                    min_samples_split: 5,
                },
            },
            boosting: BoostingParams {
                n_stages: 20,
                ..BoostingParams::default()
            },
            ..TrainingConfig::default()
        })
    }

    /// 單棵樹就要跑很久，短逾時一定會在訓練中觸發
    fn heavy_manager() -> ModelManager {
        ModelManager::new(TrainingConfig {
            forest: ForestParams {
                n_trees: 500,
                tree: TreeParams {
                    max_depth: 25,
                    min_samples_split: 2,
                },
            },
            ..TrainingConfig::default()
        })
    }

    #[tokio::test]
    async fn test_predict_without_model_is_not_found() {
        let manager = ModelManager::default();
        assert!(!manager.is_trained());
        assert!(matches!(
            manager.predict(&[0.0; 19]),
            Err(RiskError::ModelNotFound { .. })
        ));
        assert!(matches!(
            manager.fusion_mode(ScoringMode::Ensemble),
            FusionMode::Ensemble(None)
        ));
    }

    #[tokio::test]
    async fn test_retrain_rejects_small_dataset() {
        let manager = fast_manager();
        let result = manager
            .retrain(generate_training_set(10, 1), Duration::from_secs(30))
            .await;
        assert!(matches!(result, Err(RiskError::InsufficientData { .. })));
        assert!(!manager.is_trained());
    }

    #[tokio::test]
    async fn test_retrain_installs_model() {
        let manager = fast_manager();
        let report = manager
            .retrain(generate_training_set(120, 2), Duration::from_secs(60))
            .await
            .unwrap();
        let model = manager.snapshot().unwrap();
        assert_eq!(report.model_id, model.model_id);
        assert_eq!(report.training_samples + report.validation_samples, 120);
        assert!(manager.feature_importance().is_ok());
    }

    #[tokio::test]
    async fn test_retrain_timeout_keeps_previous_model() {
        let manager = heavy_manager();
        let previous = fast_manager();
        previous
            .retrain(generate_training_set(100, 3), Duration::from_secs(60))
            .await
            .unwrap();
        let installed = manager.install(EnsembleModel::clone(&previous.snapshot().unwrap()));

        let result = manager
            .retrain(generate_training_set(6000, 4), Duration::from_millis(2))
            .await;
        assert!(matches!(result, Err(RiskError::RetrainTimeout { .. })));
        assert_eq!(manager.snapshot().unwrap().model_id, installed.model_id);
    }

    #[tokio::test]
    async fn test_timed_out_training_holds_lock_until_it_stops() {
        let manager = heavy_manager();
        let result = manager
            .retrain(generate_training_set(6000, 8), Duration::from_millis(2))
            .await;
        assert!(matches!(result, Err(RiskError::RetrainTimeout { .. })));

        // 逾時的執行緒還在跑完目前這棵樹，鎖仍在它手上
        assert!(manager.retrain_lock.try_lock().is_err());

        // 收到取消後會在下一棵樹前結束並釋放鎖，而且不會裝上模型
        let released =
            tokio::time::timeout(Duration::from_secs(120), manager.retrain_lock.lock()).await;
        assert!(released.is_ok());
        assert!(!manager.is_trained());
    }

    #[tokio::test]
    async fn test_readers_keep_their_model_across_swap() {
        let manager = fast_manager();
        manager
            .retrain(generate_training_set(100, 21), Duration::from_secs(60))
            .await
            .unwrap();
        let held = manager.snapshot().unwrap();
        let inputs = generate_training_set(30, 22);
        let before: Vec<f64> = inputs.iter().map(|s| held.predict(&s.features)).collect();
        let held_id = held.model_id.clone();

        let report = manager
            .retrain(generate_training_set(150, 23), Duration::from_secs(60))
            .await
            .unwrap();

        assert_ne!(report.model_id, held_id);
        assert_eq!(manager.snapshot().unwrap().model_id, report.model_id);
        assert_eq!(held.model_id, held_id);
        let after: Vec<f64> = inputs.iter().map(|s| held.predict(&s.features)).collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_save_and_load_restore_predictions() {
        let storage = MemoryStorage::default();
        let manager = fast_manager();
        manager
            .retrain(generate_training_set(90, 5), Duration::from_secs(60))
            .await
            .unwrap();
        manager.save(&storage, DEFAULT_ARTIFACT_PATH).await.unwrap();

        let restored = ModelManager::default();
        let model = restored.load(&storage, DEFAULT_ARTIFACT_PATH).await.unwrap();
        let trained = manager.snapshot().unwrap();

        assert_eq!(*model, *trained);
        for sample in generate_training_set(200, 6) {
            assert_eq!(model.predict(&sample.features), trained.predict(&sample.features));
        }
    }

    #[tokio::test]
    async fn test_load_missing_and_corrupt_artifacts() {
        let storage = MemoryStorage::default();
        let manager = ModelManager::default();
        assert!(matches!(
            manager.load(&storage, "missing.json").await,
            Err(RiskError::ModelNotFound { .. })
        ));

        storage.write_file("bad.json", b"{\"model_id\": 1}").await.unwrap();
        assert!(matches!(
            manager.load(&storage, "bad.json").await,
            Err(RiskError::InvalidArtifact { .. })
        ));
        assert!(!manager.is_trained());
    }

    #[tokio::test]
    async fn test_unusable_artifact_degrades_instead_of_failing() {
        let storage = MemoryStorage::default();
        let manager = ModelManager::default();
        assert!(manager
            .load_or_degrade(&storage, "missing.json")
            .await
            .unwrap()
            .is_none());

        storage.write_file("corrupt.json", b"not json").await.unwrap();
        assert!(manager
            .load_or_degrade(&storage, "corrupt.json")
            .await
            .unwrap()
            .is_none());
        assert!(!manager.is_trained());
        assert!(matches!(
            manager.fusion_mode(ScoringMode::Ensemble),
            FusionMode::Ensemble(None)
        ));

        let trainer = fast_manager();
        trainer
            .retrain(generate_training_set(80, 9), Duration::from_secs(60))
            .await
            .unwrap();
        trainer.save(&storage, "good.json").await.unwrap();
        let loaded = manager.load_or_degrade(&storage, "good.json").await.unwrap();
        assert_eq!(loaded.map(|m| m.model_id.clone()), trainer.snapshot().map(|m| m.model_id.clone()));
    }
}
