// projeto: streamtrend
// file: src/neural/config.rs
// TOML configuration for the pipeline, the model and the training run

use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::neural::model::DropoutRates;
use crate::neural::utils::{LearningRateScheduler, TrainingError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub evaluation: EvaluationConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub top_n: usize,
    pub window_size: usize,
    pub train_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub gru_units: Vec<usize>,
    pub dense_units: usize,
    pub input_dropout: f64,
    pub recurrent_dropout: f64,
    pub dense_dropout: f64,
    pub l2_weight: f64,
    pub learning_rate: f64,
    pub clip_norm: f64,
    pub lr_schedule: LearningRateScheduler,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub patience: usize,
    pub uncertainty_passes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub importance_seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub model_path: String,
    pub report_path: String,
    pub history_path: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig { top_n: 10, window_size: 7, train_ratio: 0.8 }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            gru_units: vec![64, 32],
            dense_units: 32,
            input_dropout: 0.2,
            recurrent_dropout: 0.2,
            dense_dropout: 0.3,
            l2_weight: 0.001,
            learning_rate: 0.001,
            clip_norm: 1.0,
            lr_schedule: LearningRateScheduler::Constant,
            seed: 42,
        }
    }
}

impl ModelConfig {
    pub fn dropout(&self) -> DropoutRates {
        DropoutRates {
            input: self.input_dropout,
            recurrent: self.recurrent_dropout,
            dense: self.dense_dropout,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig { epochs: 100, batch_size: 32, patience: 15, uncertainty_passes: 10 }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        EvaluationConfig { importance_seed: 42 }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            model_path: "output/streamtrend_model.json".to_string(),
            report_path: "output/evaluation_report.json".to_string(),
            history_path: "output/training_history.csv".to_string(),
        }
    }
}

impl AppConfig {
    /// Reads `path` if it exists, otherwise falls back to the defaults.
    /// Missing keys inside a present file take their default values.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TrainingError> {
        let path = path.as_ref();
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config = Self::from_toml(&content)?;
            info!("⚙️ Configuration loaded from: {}", path.display());
            Ok(config)
        } else {
            info!("📄 No configuration file at {}, using defaults", path.display());
            Ok(AppConfig::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, TrainingError> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| TrainingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, TrainingError> {
        toml::to_string_pretty(self).map_err(|e| TrainingError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        let p = &self.pipeline;
        if p.top_n == 0 || p.window_size == 0 {
            return Err(TrainingError::Config("top_n and window_size must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&p.train_ratio) {
            return Err(TrainingError::Config(format!("train_ratio {} outside [0, 1]", p.train_ratio)));
        }
        let m = &self.model;
        for (name, rate) in [("input", m.input_dropout), ("recurrent", m.recurrent_dropout), ("dense", m.dense_dropout)] {
            if !(0.0..1.0).contains(&rate) {
                return Err(TrainingError::Config(format!("{} dropout {} outside [0, 1)", name, rate)));
            }
        }
        if self.training.batch_size == 0 || self.training.uncertainty_passes == 0 {
            return Err(TrainingError::Config("batch_size and uncertainty_passes must be positive".to_string()));
        }
        Ok(())
    }
}
