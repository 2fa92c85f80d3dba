//! 學習式融合模型：隨機森林 + 梯度提升，兩者預測取平均。
//!
//! 兩個模型都建立在同一個 CART 回歸樹上（最小化平方誤差）。
//! 所有隨機性都來自 `TrainingConfig::seed`，同樣的資料與種子會得到同樣的模型。

use crate::core::features::FEATURE_NAMES;
use crate::domain::model::{FeatureVector, TrainingSample, FEATURE_DIM};
use crate::utils::error::{Result, RiskError};
use crate::utils::hash::stable_hash;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

pub const MIN_TRAINING_SAMPLES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub tree: TreeParams,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            tree: TreeParams {
                max_depth: 10,
                min_samples_split: 5,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_stages: usize,
    pub learning_rate: f64,
    pub tree: TreeParams,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_stages: 100,
            learning_rate: 0.1,
            tree: TreeParams {
                max_depth: 5,
                min_samples_split: 2,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub seed: u64,
    pub validation_fraction: f64,
    pub min_samples: usize,
    pub forest: ForestParams,
    pub boosting: BoostingParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            validation_fraction: 0.2,
            min_samples: MIN_TRAINING_SAMPLES,
            forest: ForestParams::default(),
            boosting: BoostingParams::default(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, value: String, reason: &str| RiskError::InvalidConfigValueError {
            field: field.to_string(),
            value,
            reason: reason.to_string(),
        };

        if self.min_samples < MIN_TRAINING_SAMPLES {
            return Err(invalid(
                "model.min_samples",
                self.min_samples.to_string(),
                "Must be at least 50",
            ));
        }
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(invalid(
                "model.validation_fraction",
                self.validation_fraction.to_string(),
                "Must be between 0 and 1 (exclusive)",
            ));
        }
        if self.forest.n_trees == 0 || self.boosting.n_stages == 0 {
            return Err(invalid(
                "model.n_trees",
                format!("{}/{}", self.forest.n_trees, self.boosting.n_stages),
                "Forest and boosting need at least one tree",
            ));
        }
        if self.forest.tree.max_depth == 0 || self.boosting.tree.max_depth == 0 {
            return Err(invalid("model.max_depth", "0".to_string(), "Must be positive"));
        }
        if !(self.boosting.learning_rate > 0.0 && self.boosting.learning_rate <= 1.0) {
            return Err(invalid(
                "model.learning_rate",
                self.boosting.learning_rate.to_string(),
                "Must be in (0, 1]",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "lowercase")]
enum TreeNode {
    Leaf {
        value: f64,
    },
    /// x[feature] <= threshold 走左邊
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// 扁平陣列儲存的回歸樹，根節點在索引 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    sse: f64,
}

type Importance = [f64; FEATURE_DIM];

impl RegressionTree {
    /// 以 `indices` 選出的樣本（可重複，用於 bootstrap）建樹。
    /// 同時回傳各特徵的平方誤差下降量，作為特徵重要度。
    pub fn fit(
        rows: &[FeatureVector],
        targets: &[f64],
        indices: &[usize],
        params: &TreeParams,
    ) -> (Self, Importance) {
        let mut tree = Self { nodes: Vec::new() };
        let mut importance = [0.0; FEATURE_DIM];
        tree.grow(rows, targets, indices.to_vec(), 0, params, &mut importance);
        (tree, importance)
    }

    fn grow(
        &mut self,
        rows: &[FeatureVector],
        targets: &[f64],
        indices: Vec<usize>,
        depth: usize,
        params: &TreeParams,
        importance: &mut Importance,
    ) -> usize {
        let node = self.nodes.len();
        let (mean, sse) = mean_and_sse(indices.iter().map(|&i| targets[i]));
        self.nodes.push(TreeNode::Leaf { value: mean });

        if depth >= params.max_depth
            || indices.len() < params.min_samples_split.max(2)
            || sse <= 1e-12
        {
            return node;
        }
        let Some(best) = best_split(rows, targets, &indices) else {
            return node;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| rows[i][best.feature] <= best.threshold);
        if left.is_empty() || right.is_empty() {
            return node;
        }

        importance[best.feature] += sse - best.sse;
        let left = self.grow(rows, targets, left, depth + 1, params, importance);
        let right = self.grow(rows, targets, right, depth + 1, params, importance);
        self.nodes[node] = TreeNode::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        node
    }

    pub fn predict(&self, features: &FeatureVector) -> f64 {
        let mut index = 0;
        loop {
            match self.nodes.get(index) {
                Some(TreeNode::Leaf { value }) => return *value,
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    index = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                None => return 0.0,
            }
        }
    }

    /// 載入外部檔案後的結構檢查：子節點必須在後面，避免環狀參照
    fn check(&self) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (index, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Leaf { value } if !value.is_finite() => {
                    return Err(format!("leaf {} is not finite", index));
                }
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= FEATURE_DIM || !threshold.is_finite() {
                        return Err(format!("split {} is malformed", index));
                    }
                    if *left <= index
                        || *right <= index
                        || *left >= self.nodes.len()
                        || *right >= self.nodes.len()
                    {
                        return Err(format!("split {} points outside the tree", index));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn mean_and_sse(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (count, sum, sum_sq) = values.fold((0usize, 0.0, 0.0), |(n, s, sq), v| {
        (n + 1, s + v, sq + v * v)
    });
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / count as f64;
    (mean, (sum_sq - sum * sum / count as f64).max(0.0))
}

/// 窮舉所有特徵的所有切點，用前綴和在 O(n) 內算出每個切點的 SSE
fn best_split(rows: &[FeatureVector], targets: &[f64], indices: &[usize]) -> Option<SplitCandidate> {
    let n = indices.len();
    let total_sum: f64 = indices.iter().map(|&i| targets[i]).sum();
    let total_sq: f64 = indices.iter().map(|&i| targets[i] * targets[i]).sum();
    let mut best: Option<SplitCandidate> = None;
    let mut order = indices.to_vec();

    for feature in 0..FEATURE_DIM {
        order.sort_by(|&a, &b| rows[a][feature].total_cmp(&rows[b][feature]));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for k in 1..n {
            let y = targets[order[k - 1]];
            left_sum += y;
            left_sq += y * y;

            let lower = rows[order[k - 1]][feature];
            let upper = rows[order[k]][feature];
            if lower >= upper {
                continue;
            }

            let left_n = k as f64;
            let right_n = (n - k) as f64;
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / left_n).max(0.0)
                + (right_sq - right_sum * right_sum / right_n).max(0.0);

            if best.as_ref().map_or(true, |b| sse < b.sse - 1e-12) {
                let midpoint = lower + (upper - lower) / 2.0;
                let threshold = if midpoint < upper { midpoint } else { lower };
                best = Some(SplitCandidate {
                    feature,
                    threshold,
                    sse,
                });
            }
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn fit(
        rows: &[FeatureVector],
        targets: &[f64],
        params: &ForestParams,
        rng: &mut StdRng,
        cancel: &AtomicBool,
    ) -> Result<(Self, Importance)> {
        let n = rows.len();
        let mut importance = [0.0; FEATURE_DIM];
        let mut trees = Vec::with_capacity(params.n_trees);
        for _ in 0..params.n_trees {
            check_cancelled(cancel)?;
            let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let (tree, tree_importance) = RegressionTree::fit(rows, targets, &bootstrap, &params.tree);
            accumulate(&mut importance, &tree_importance);
            trees.push(tree);
        }
        Ok((Self { trees }, importance))
    }

    pub fn predict(&self, features: &FeatureVector) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict(features)).sum::<f64>() / self.trees.len() as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    init: f64,
    learning_rate: f64,
    stages: Vec<RegressionTree>,
}

impl GradientBoosting {
    /// 平方損失：每一階段擬合目前的殘差
    pub fn fit(
        rows: &[FeatureVector],
        targets: &[f64],
        params: &BoostingParams,
        cancel: &AtomicBool,
    ) -> Result<(Self, Importance)> {
        let n = rows.len();
        let init = if n == 0 {
            0.0
        } else {
            targets.iter().sum::<f64>() / n as f64
        };
        let all: Vec<usize> = (0..n).collect();
        let mut predictions = vec![init; n];
        let mut importance = [0.0; FEATURE_DIM];
        let mut stages = Vec::with_capacity(params.n_stages);

        for _ in 0..params.n_stages {
            check_cancelled(cancel)?;
            let residuals: Vec<f64> = targets
                .iter()
                .zip(&predictions)
                .map(|(y, p)| y - p)
                .collect();
            let (tree, tree_importance) = RegressionTree::fit(rows, &residuals, &all, &params.tree);
            for (prediction, row) in predictions.iter_mut().zip(rows) {
                *prediction += params.learning_rate * tree.predict(row);
            }
            accumulate(&mut importance, &tree_importance);
            stages.push(tree);
        }

        Ok((
            Self {
                init,
                learning_rate: params.learning_rate,
                stages,
            },
            importance,
        ))
    }

    pub fn predict(&self, features: &FeatureVector) -> f64 {
        self.init
            + self.learning_rate
                * self
                    .stages
                    .iter()
                    .map(|t| t.predict(features))
                    .sum::<f64>()
    }
}

/// 每棵樹開始前檢查一次，逾時的訓練不會跑到結束
fn check_cancelled(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        return Err(RiskError::TrainingFailed {
            message: "training cancelled".to_string(),
        });
    }
    Ok(())
}

fn accumulate(total: &mut Importance, part: &Importance) {
    for (t, p) in total.iter_mut().zip(part) {
        *t += p;
    }
}

fn normalize(importance: &Importance) -> Importance {
    let sum: f64 = importance.iter().sum();
    if sum <= 0.0 {
        return [0.0; FEATURE_DIM];
    }
    let mut normalized = *importance;
    for value in normalized.iter_mut() {
        *value /= sum;
    }
    normalized
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model_id: String,
    pub trained_at: DateTime<Utc>,
    pub training_samples: usize,
    pub validation_samples: usize,
    pub train_r2: f64,
    pub validation_r2: f64,
    pub feature_importance: Vec<FeatureImportance>,
}

/// 訓練完成後不可變；新模型以整體替換的方式發布
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleModel {
    pub model_id: String,
    pub trained_at: DateTime<Utc>,
    pub config: TrainingConfig,
    pub training_samples: usize,
    pub validation_samples: usize,
    pub train_r2: f64,
    pub validation_r2: f64,
    importance: Importance,
    forest: RandomForest,
    boosting: GradientBoosting,
}

impl EnsembleModel {
    pub fn fit(
        samples: &[TrainingSample],
        config: &TrainingConfig,
        trained_at: DateTime<Utc>,
    ) -> Result<Self> {
        Self::fit_cancellable(samples, config, trained_at, &AtomicBool::new(false))
    }

    /// `cancel` 被設為 true 後，在下一棵樹開始前以 `TrainingFailed` 結束
    pub fn fit_cancellable(
        samples: &[TrainingSample],
        config: &TrainingConfig,
        trained_at: DateTime<Utc>,
        cancel: &AtomicBool,
    ) -> Result<Self> {
        config.validate()?;
        if samples.len() < config.min_samples {
            return Err(RiskError::InsufficientData {
                required: config.min_samples,
                actual: samples.len(),
            });
        }
        if let Some(position) = samples
            .iter()
            .position(|s| !s.target.is_finite() || s.features.iter().any(|v| !v.is_finite()))
        {
            return Err(RiskError::invalid_observation(
                format!("training_samples[{}]", position),
                "features and target must be finite",
            ));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut order: Vec<usize> = (0..samples.len()).collect();
        order.shuffle(&mut rng);

        let validation_count = ((samples.len() as f64 * config.validation_fraction).round()
            as usize)
            .clamp(1, samples.len() - 1);
        let (validation_idx, train_idx) = order.split_at(validation_count);

        let train_rows: Vec<FeatureVector> = train_idx.iter().map(|&i| samples[i].features).collect();
        let train_targets: Vec<f64> = train_idx.iter().map(|&i| samples[i].target).collect();

        tracing::info!(
            "🌲 Training ensemble on {} samples ({} held out)",
            train_rows.len(),
            validation_count
        );

        let (forest, forest_importance) =
            RandomForest::fit(&train_rows, &train_targets, &config.forest, &mut rng, cancel)?;
        let (boosting, boosting_importance) =
            GradientBoosting::fit(&train_rows, &train_targets, &config.boosting, cancel)?;

        let mut importance = normalize(&forest_importance);
        accumulate(&mut importance, &normalize(&boosting_importance));
        let importance = normalize(&importance);

        let mut model = Self {
            model_id: model_fingerprint(samples, config),
            trained_at,
            config: *config,
            training_samples: train_rows.len(),
            validation_samples: validation_count,
            train_r2: 0.0,
            validation_r2: 0.0,
            importance,
            forest,
            boosting,
        };

        model.train_r2 = model.r2(train_idx.iter().map(|&i| &samples[i]));
        model.validation_r2 = model.r2(validation_idx.iter().map(|&i| &samples[i]));

        tracing::info!(
            "✅ Ensemble {} trained: train R² {:.3}, validation R² {:.3}",
            model.model_id,
            model.train_r2,
            model.validation_r2
        );
        Ok(model)
    }

    /// 兩個子模型的平均，夾限到 [0, 1]
    pub fn predict(&self, features: &FeatureVector) -> f64 {
        let raw = (self.forest.predict(features) + self.boosting.predict(features)) / 2.0;
        if raw.is_finite() {
            raw.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// 依重要度由高到低排序
    pub fn feature_importance(&self) -> Vec<FeatureImportance> {
        let mut ranked: Vec<FeatureImportance> = FEATURE_NAMES
            .iter()
            .zip(self.importance.iter())
            .map(|(name, importance)| FeatureImportance {
                feature: name.to_string(),
                importance: *importance,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.importance
                .total_cmp(&a.importance)
                .then_with(|| a.feature.cmp(&b.feature))
        });
        ranked
    }

    pub fn report(&self) -> TrainingReport {
        TrainingReport {
            model_id: self.model_id.clone(),
            trained_at: self.trained_at,
            training_samples: self.training_samples,
            validation_samples: self.validation_samples,
            train_r2: self.train_r2,
            validation_r2: self.validation_r2,
            feature_importance: self.feature_importance(),
        }
    }

    /// 從檔案載入的模型必須通過結構檢查才能使用
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.model_id.is_empty() {
            return Err("model_id is empty".to_string());
        }
        if self.forest.trees.is_empty() || self.boosting.stages.is_empty() {
            return Err("model contains no trees".to_string());
        }
        if !self.boosting.init.is_finite() || !self.boosting.learning_rate.is_finite() {
            return Err("boosting parameters are not finite".to_string());
        }
        for tree in self.forest.trees.iter().chain(&self.boosting.stages) {
            tree.check()?;
        }
        Ok(())
    }

    fn r2<'a>(&self, samples: impl Iterator<Item = &'a TrainingSample>) -> f64 {
        let pairs: Vec<(f64, f64)> = samples
            .map(|s| (s.target, self.predict(&s.features)))
            .collect();
        if pairs.is_empty() {
            return 0.0;
        }
        let mean = pairs.iter().map(|(y, _)| y).sum::<f64>() / pairs.len() as f64;
        let total: f64 = pairs.iter().map(|(y, _)| (y - mean).powi(2)).sum();
        let residual: f64 = pairs.iter().map(|(y, p)| (y - p).powi(2)).sum();
        // 目標值全部相同時 R² 沒有定義
        if total <= f64::EPSILON {
            return 0.0;
        }
        1.0 - residual / total
    }
}

/// 相同資料與設定得到相同的 model_id；任何一個訓練參數不同，id 就不同
fn model_fingerprint(samples: &[TrainingSample], config: &TrainingConfig) -> String {
    // 解構確保新增欄位時一定要決定是否納入
    let TrainingConfig {
        seed,
        validation_fraction,
        min_samples,
        forest,
        boosting,
    } = *config;

    let mut bytes = Vec::with_capacity(samples.len() * (FEATURE_DIM + 1) * 8 + 128);
    bytes.extend_from_slice(&seed.to_le_bytes());
    bytes.extend_from_slice(&validation_fraction.to_le_bytes());
    bytes.extend_from_slice(&(min_samples as u64).to_le_bytes());
    bytes.extend_from_slice(&(forest.n_trees as u64).to_le_bytes());
    push_tree_params(&mut bytes, &forest.tree);
    bytes.extend_from_slice(&(boosting.n_stages as u64).to_le_bytes());
    bytes.extend_from_slice(&boosting.learning_rate.to_le_bytes());
    push_tree_params(&mut bytes, &boosting.tree);
    for sample in samples {
        for value in sample.features.iter() {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.extend_from_slice(&sample.target.to_le_bytes());
    }
    format!("ens-{:016x}", stable_hash(&bytes))
}

fn push_tree_params(bytes: &mut Vec<u8>, params: &TreeParams) {
    bytes.extend_from_slice(&(params.max_depth as u64).to_le_bytes());
    bytes.extend_from_slice(&(params.min_samples_split as u64).to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::synthetic::generate_training_set;

    fn small_config() -> TrainingConfig {
        TrainingConfig {
            forest: ForestParams {
                n_trees: 10,
                tree: TreeParams {
                    max_depth: 6,
                    min_samples_split: 5,
                },
            },
            boosting: BoostingParams {
                n_stages: 30,
                ..BoostingParams::default()
            },
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_tree_learns_step_function() {
        let mut rows = Vec::new();
        let mut targets = Vec::new();
        for i in 0..40 {
            let mut row = [0.0; FEATURE_DIM];
            row[3] = i as f64 / 40.0;
            rows.push(row);
            targets.push(if i < 20 { 0.1 } else { 0.9 });
        }
        let indices: Vec<usize> = (0..rows.len()).collect();
        let params = TreeParams {
            max_depth: 3,
            min_samples_split: 2,
        };
        let (tree, importance) = RegressionTree::fit(&rows, &targets, &indices, &params);

        assert!((tree.predict(&rows[0]) - 0.1).abs() < 1e-12);
        assert!((tree.predict(&rows[39]) - 0.9).abs() < 1e-12);
        assert!(importance[3] > 0.0);
        assert_eq!(importance.iter().filter(|v| **v > 0.0).count(), 1);
    }

    #[test]
    fn test_identical_feature_values_do_not_split() {
        let rows = vec![[0.5; FEATURE_DIM]; 10];
        let targets: Vec<f64> = (0..10).map(|i| i as f64 / 10.0).collect();
        let indices: Vec<usize> = (0..10).collect();
        let params = TreeParams {
            max_depth: 5,
            min_samples_split: 2,
        };
        let (tree, _) = RegressionTree::fit(&rows, &targets, &indices, &params);
        assert_eq!(tree.nodes.len(), 1);
        assert!((tree.predict(&rows[0]) - 0.45).abs() < 1e-12);
    }

    #[test]
    fn test_insufficient_samples_rejected() {
        let samples = generate_training_set(49, 7);
        let result = EnsembleModel::fit(&samples, &TrainingConfig::default(), Utc::now());
        assert!(matches!(
            result,
            Err(RiskError::InsufficientData {
                required: 50,
                actual: 49
            })
        ));
    }

    #[test]
    fn test_config_below_minimum_rejected() {
        let config = TrainingConfig {
            min_samples: 10,
            ..TrainingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_training_is_deterministic_and_bounded() {
        let samples = generate_training_set(200, 11);
        let trained_at = Utc::now();
        let first = EnsembleModel::fit(&samples, &small_config(), trained_at).unwrap();
        let second = EnsembleModel::fit(&samples, &small_config(), trained_at).unwrap();

        assert_eq!(first.model_id, second.model_id);
        assert!(first.model_id.starts_with("ens-"));
        for sample in &samples {
            let prediction = first.predict(&sample.features);
            assert_eq!(prediction, second.predict(&sample.features));
            assert!((0.0..=1.0).contains(&prediction));
        }
        assert!(first.train_r2 > 0.5);
        assert!(first.validate().is_ok());
    }

    #[test]
    fn test_feature_importance_sorted_and_normalized() {
        let samples = generate_training_set(150, 3);
        let model = EnsembleModel::fit(&samples, &small_config(), Utc::now()).unwrap();
        let ranked = model.feature_importance();

        assert_eq!(ranked.len(), FEATURE_DIM);
        assert!(ranked.windows(2).all(|w| w[0].importance >= w[1].importance));
        let total: f64 = ranked.iter().map(|f| f.importance).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_sample_rejected() {
        let mut samples = generate_training_set(60, 5);
        samples[10].target = f64::NAN;
        let result = EnsembleModel::fit(&samples, &small_config(), Utc::now());
        assert!(matches!(result, Err(RiskError::InvalidObservation { .. })));
    }

    #[test]
    fn test_model_id_covers_tree_shape() {
        let samples = generate_training_set(120, 13);
        let deep = small_config();
        let shallow = TrainingConfig {
            forest: ForestParams {
                tree: TreeParams {
                    max_depth: 2,
                    min_samples_split: 5,
                },
                ..deep.forest
            },
            boosting: BoostingParams {
                tree: TreeParams {
                    max_depth: 1,
                    min_samples_split: 2,
                },
                ..deep.boosting
            },
            ..deep
        };
        let split_only = TrainingConfig {
            forest: ForestParams {
                tree: TreeParams {
                    min_samples_split: 9,
                    ..deep.forest.tree
                },
                ..deep.forest
            },
            ..deep
        };

        let trained_at = Utc::now();
        let a = EnsembleModel::fit(&samples, &deep, trained_at).unwrap();
        let b = EnsembleModel::fit(&samples, &shallow, trained_at).unwrap();
        let c = EnsembleModel::fit(&samples, &split_only, trained_at).unwrap();

        assert_ne!(a.model_id, b.model_id);
        assert_ne!(a.model_id, c.model_id);
        assert_ne!(b.model_id, c.model_id);
    }

    #[test]
    fn test_cancelled_training_stops() {
        let samples = generate_training_set(80, 4);
        let cancel = AtomicBool::new(true);
        let result = EnsembleModel::fit_cancellable(&samples, &small_config(), Utc::now(), &cancel);
        assert!(matches!(result, Err(RiskError::TrainingFailed { .. })));
    }

    #[test]
    fn test_artifact_survives_json_round_trip() {
        let samples = generate_training_set(300, 17);
        let model = EnsembleModel::fit(&samples, &small_config(), Utc::now()).unwrap();

        let json = serde_json::to_vec_pretty(&model).unwrap();
        let reloaded: EnsembleModel = serde_json::from_slice(&json).unwrap();

        assert_eq!(reloaded, model);
        for sample in generate_training_set(500, 18) {
            assert_eq!(reloaded.predict(&sample.features), model.predict(&sample.features));
        }
    }

    #[test]
    fn test_malformed_tree_fails_validation() {
        let samples = generate_training_set(80, 9);
        let mut model = EnsembleModel::fit(&samples, &small_config(), Utc::now()).unwrap();
        model.forest.trees[0].nodes[0] = TreeNode::Split {
            feature: 0,
            threshold: 0.5,
            left: 0,
            right: 0,
        };
        assert!(model.validate().is_err());
    }
}
