// projeto: streamtrend
// file: src/neural/utils.rs
// Error type, Adam optimizer, learning-rate schedules and activation helpers

use ndarray::{Array1, ArrayD, ArrayViewD, ArrayViewMutD, ShapeError, Zip};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Data processing error: {0}")]
    DataProcessing(String),

    #[error("Model configuration error: {0}")]
    ModelConfiguration(String),

    #[error("Model has not been built yet")]
    NotBuilt,

    #[error("Empty {0} split: training needs at least one sample on each side")]
    EmptySplit(&'static str),

    #[error("A training run is already in progress")]
    TrainingInProgress,

    #[error("Model lock poisoned by a panicked training run")]
    LockPoisoned,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Shape error: {0}")]
    Shape(String),
}

impl From<ShapeError> for TrainingError {
    fn from(err: ShapeError) -> Self {
        TrainingError::Shape(err.to_string())
    }
}

/// Adam with one moment pair per named parameter tensor.
#[derive(Debug, Clone)]
pub struct AdamOptimizer {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub t: usize,
    m: HashMap<String, ArrayD<f64>>,
    v: HashMap<String, ArrayD<f64>>,
}

impl AdamOptimizer {
    pub fn new(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        AdamOptimizer {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: HashMap::new(),
            v: HashMap::new(),
        }
    }

    pub fn set_learning_rate(&mut self, new_lr: f64) {
        self.learning_rate = new_lr;
    }

    /// Advances the bias-correction step. Call once per batch, before the
    /// per-tensor `update` calls of that batch.
    pub fn begin_step(&mut self) {
        self.t += 1;
    }

    pub fn update(&mut self, param_name: &str, mut param: ArrayViewMutD<f64>, gradient: ArrayViewD<f64>) {
        let t = self.t.max(1) as i32;
        let (beta1, beta2) = (self.beta1, self.beta2);

        let m = self.m.entry(param_name.to_string())
            .or_insert_with(|| ArrayD::zeros(gradient.raw_dim()));
        let v = self.v.entry(param_name.to_string())
            .or_insert_with(|| ArrayD::zeros(gradient.raw_dim()));

        m.zip_mut_with(&gradient, |m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
        v.zip_mut_with(&gradient, |v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);

        let bias1 = 1.0 - beta1.powi(t);
        let bias2 = 1.0 - beta2.powi(t);
        let lr = self.learning_rate;
        let eps = self.epsilon;

        Zip::from(&mut param).and(&*m).and(&*v).for_each(|p, &m, &v| {
            *p -= lr * (m / bias1) / ((v / bias2).sqrt() + eps);
        });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningRateScheduler {
    Constant,
    StepDecay {
        decay_rate: f64,
        step_size: usize,
    },
    ExponentialDecay {
        decay_rate: f64,
    },
    CosineAnnealing {
        min_rate: f64,
        cycle_length: usize,
    },
}

impl Default for LearningRateScheduler {
    fn default() -> Self {
        LearningRateScheduler::Constant
    }
}

impl LearningRateScheduler {
    /// Rate for a zero-based epoch, derived from `initial_rate`.
    pub fn get_rate(&self, initial_rate: f64, epoch: usize) -> f64 {
        match self {
            LearningRateScheduler::Constant => initial_rate,
            LearningRateScheduler::StepDecay { decay_rate, step_size } => {
                initial_rate * decay_rate.powi((epoch / (*step_size).max(1)) as i32)
            }
            LearningRateScheduler::ExponentialDecay { decay_rate } => {
                initial_rate * decay_rate.powi(epoch as i32)
            }
            LearningRateScheduler::CosineAnnealing { min_rate, cycle_length } => {
                let cycle = (*cycle_length).max(1);
                let progress = (epoch % cycle) as f64 / cycle as f64;
                min_rate + (initial_rate - min_rate) * (1.0 + (std::f64::consts::PI * progress).cos()) / 2.0
            }
        }
    }
}

pub fn sigmoid_scalar(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

pub fn sigmoid(x: &Array1<f64>) -> Array1<f64> {
    x.mapv(sigmoid_scalar)
}

pub fn tanh(x: &Array1<f64>) -> Array1<f64> {
    x.mapv(|val| val.tanh())
}

pub fn relu(x: &Array1<f64>) -> Array1<f64> {
    x.mapv(|val| val.max(0.0))
}

/// Outer product `a ⊗ b`, shaped (a.len(), b.len()).
pub fn outer(a: &Array1<f64>, b: &Array1<f64>) -> ndarray::Array2<f64> {
    let col = a.view().insert_axis(ndarray::Axis(1));
    let row = b.view().insert_axis(ndarray::Axis(0));
    col.dot(&row)
}

const BCE_EPSILON: f64 = 1e-7;

/// Binary cross-entropy averaged over the output units.
pub fn binary_cross_entropy(probs: &Array1<f64>, targets: &Array1<f64>) -> f64 {
    if probs.is_empty() {
        return 0.0;
    }
    let total: f64 = probs.iter().zip(targets.iter())
        .map(|(&p, &y)| {
            let p = p.clamp(BCE_EPSILON, 1.0 - BCE_EPSILON);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    total / probs.len() as f64
}

/// Count of units where `p > 0.5` agrees with the binary target.
pub fn count_threshold_matches(probs: &Array1<f64>, targets: &Array1<f64>) -> usize {
    probs.iter().zip(targets.iter())
        .filter(|&(&p, &y)| (p > 0.5) == (y > 0.5))
        .count()
}

pub fn validate_sequences(samples: &[ndarray::Array2<f64>], name: &str) -> Result<(), TrainingError> {
    for (i, sample) in samples.iter().enumerate() {
        if let Some(pos) = sample.iter().position(|v| !v.is_finite()) {
            return Err(TrainingError::DataProcessing(
                format!("{} sample {} contains a non-finite value at flat index {}", name, i, pos)
            ));
        }
    }
    Ok(())
}
