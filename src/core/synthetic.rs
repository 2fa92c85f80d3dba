//! 合成訓練資料：在還沒有標記資料時給 ensemble 一個起點。
//! 特徵分佈與目標函式固定，只由 seed 決定結果。

use crate::domain::model::{FeatureVector, TrainingSample, FEATURE_DIM};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SEVERITY_WEIGHTS: [f64; 5] = [0.2, 0.3, 0.3, 0.15, 0.05];
const KIND_WEIGHTS: [f64; 5] = [0.1, 0.2, 0.3, 0.3, 0.1];
const NOISE_STD: f64 = 0.05;

fn weighted_choice(rng: &mut StdRng, weights: &[f64]) -> usize {
    let total: f64 = weights.iter().sum();
    let mut pick = rng.gen::<f64>() * total;
    for (index, weight) in weights.iter().enumerate() {
        if pick < *weight {
            return index;
        }
        pick -= weight;
    }
    weights.len() - 1
}

/// Box-Muller
fn gaussian(rng: &mut StdRng, std_dev: f64) -> f64 {
    let u1 = 1.0 - rng.gen::<f64>();
    let u2 = rng.gen::<f64>();
    std_dev * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

pub fn synthetic_sample(rng: &mut StdRng) -> TrainingSample {
    let mut features: FeatureVector = [0.0; FEATURE_DIM];

    features[0] = weighted_choice(rng, &SEVERITY_WEIGHTS) as f64 / 4.0;
    features[1] = weighted_choice(rng, &KIND_WEIGHTS) as f64 / 4.0;
    features[2] = rng.gen();
    features[3] = rng.gen_range(-1.0..1.0);
    features[4] = rng.gen_range(-1.0..1.0);

    features[5] = rng.gen_range(-1.0..1.0);
    features[6] = rng.gen();
    features[7] = rng.gen();
    features[8] = rng.gen();

    features[9] = rng.gen();
    features[10] = rng.gen();
    features[11] = rng.gen();
    features[12] = rng.gen();
    features[13] = [0.0, 0.5, 1.0][weighted_choice(rng, &[1.0, 1.0, 1.0])];

    features[14] = rng.gen();
    features[15] = rng.gen();
    features[16] = rng.gen();

    features[17] = rng.gen();
    features[18] = rng.gen();

    let target = 0.30 * features[0]
        + 0.25 * (1.0 - features[5]) / 2.0
        + 0.20 * features[9]
        + 0.15 * features[10]
        + 0.10 * features[14]
        + 0.10 * features[7]
        + gaussian(rng, NOISE_STD);

    TrainingSample {
        features,
        target: target.clamp(0.0, 1.0),
    }
}

pub fn generate_training_set(count: usize, seed: u64) -> Vec<TrainingSample> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count).map(|_| synthetic_sample(&mut rng)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_samples() {
        assert_eq!(generate_training_set(20, 42), generate_training_set(20, 42));
        assert_ne!(generate_training_set(20, 42), generate_training_set(20, 43));
    }

    #[test]
    fn test_targets_and_features_in_range() {
        for sample in generate_training_set(500, 1) {
            assert!((0.0..=1.0).contains(&sample.target));
            assert!(sample.features.iter().all(|v| (-1.0..=1.0).contains(v)));
        }
    }
}
