// projeto: streamtrend
// file: src/neural/storage.rs
// Trained-model persistence behind the ModelStore trait (JSON or bincode files)

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::neural::classifier::{ClassifierConfig, ModelState, SequenceClassifier};
use crate::neural::features::TrackSet;
use crate::neural::metrics::TrainingHistory;
use crate::neural::model::{Architecture, ModelWeights};
use crate::neural::utils::TrainingError;

/// Everything needed to rebuild a trained classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedModel {
    pub architecture: Architecture,
    pub weights: ModelWeights,
    pub track_ids: Vec<String>,
    pub window_size: usize,
    pub best_epoch: usize,
    pub best_val_loss: Option<f64>,
    pub history: TrainingHistory,
    pub fingerprint: String,
    pub saved_at: DateTime<Utc>,
}

impl SavedModel {
    pub fn from_classifier(classifier: &SequenceClassifier, tracks: &TrackSet) -> Result<Self, TrainingError> {
        let network = classifier.network().ok_or(TrainingError::NotBuilt)?;
        let state = classifier.model_state();
        Ok(SavedModel {
            architecture: network.arch.clone(),
            weights: network.weights.clone(),
            track_ids: tracks.ids().to_vec(),
            window_size: network.arch.window_size,
            best_epoch: state.best_epoch,
            best_val_loss: Some(state.best_val_loss).filter(|v| v.is_finite()),
            history: state.history.clone(),
            fingerprint: network.weights.fingerprint(),
            saved_at: Utc::now(),
        })
    }

    pub fn tracks(&self) -> TrackSet {
        TrackSet::new(self.track_ids.clone())
    }

    /// Rebuilds the classifier, refusing weights whose fingerprint changed.
    pub fn into_classifier(self, config: ClassifierConfig) -> Result<SequenceClassifier, TrainingError> {
        let actual = self.weights.fingerprint();
        if actual != self.fingerprint {
            return Err(TrainingError::Serialization(format!(
                "weight fingerprint mismatch: stored {} but weights hash to {}", self.fingerprint, actual
            )));
        }
        let model_state = ModelState {
            best_val_loss: self.best_val_loss.unwrap_or(f64::INFINITY),
            best_epoch: self.best_epoch,
            best_fingerprint: Some(self.fingerprint),
            stopped_early: false,
            history: self.history,
        };
        SequenceClassifier::from_trained(config, self.architecture, self.weights, model_state)
    }
}

pub trait ModelStore {
    fn save(&self, model: &SavedModel) -> Result<(), TrainingError>;
    fn load(&self) -> Result<SavedModel, TrainingError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    Json,
    Bincode,
}

/// Single-file store; `.bin` selects bincode, anything else JSON.
#[derive(Debug, Clone)]
pub struct FileModelStore {
    path: PathBuf,
    format: ModelFormat,
}

impl FileModelStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("bin") => ModelFormat::Bincode,
            _ => ModelFormat::Json,
        };
        FileModelStore { path, format }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn format(&self) -> ModelFormat {
        self.format
    }
}

impl ModelStore for FileModelStore {
    fn save(&self, model: &SavedModel) -> Result<(), TrainingError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let bytes = match self.format {
            ModelFormat::Json => serde_json::to_vec_pretty(model)?,
            ModelFormat::Bincode => bincode::serde::encode_to_vec(model, bincode::config::standard())
                .map_err(|e| TrainingError::Serialization(format!("Failed to encode model: {}", e)))?,
        };
        fs::write(&self.path, &bytes)?;
        info!("💾 Model saved to {} ({:?}, {} bytes, sha256 {})",
              self.path.display(), self.format, bytes.len(), &model.fingerprint[..12.min(model.fingerprint.len())]);
        Ok(())
    }

    fn load(&self) -> Result<SavedModel, TrainingError> {
        let bytes = fs::read(&self.path)?;
        let model: SavedModel = match self.format {
            ModelFormat::Json => serde_json::from_slice(&bytes)?,
            ModelFormat::Bincode => {
                let (model, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                    .map_err(|e| TrainingError::Serialization(format!("Failed to decode model: {}", e)))?;
                model
            }
        };
        info!("📂 Model loaded from {} (saved at {})", self.path.display(), model.saved_at.to_rfc3339());
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::model::DropoutRates;
    use crate::neural::utils::LearningRateScheduler;
    use ndarray::Array2;

    fn config() -> ClassifierConfig {
        ClassifierConfig {
            gru_units: vec![4, 3],
            dense_units: 3,
            dropout: DropoutRates { input: 0.0, recurrent: 0.0, dense: 0.0 },
            l2_weight: 0.0,
            learning_rate: 1e-3,
            lr_schedule: LearningRateScheduler::Constant,
            clip_norm: 1.0,
            patience: 2,
            seed: 3,
        }
    }

    fn saved() -> (SequenceClassifier, SavedModel) {
        let mut classifier = SequenceClassifier::new(config());
        classifier.build(3, 6, 6).unwrap();
        let tracks = TrackSet::new(vec!["a".to_string(), "b".to_string()]);
        let model = SavedModel::from_classifier(&classifier, &tracks).unwrap();
        (classifier, model)
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("streamtrend-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_unbuilt_classifier_cannot_be_saved() {
        let classifier = SequenceClassifier::new(config());
        let tracks = TrackSet::new(vec![]);
        assert!(matches!(SavedModel::from_classifier(&classifier, &tracks), Err(TrainingError::NotBuilt)));
    }

    #[test]
    fn test_format_follows_extension() {
        assert_eq!(FileModelStore::new("m.bin").format(), ModelFormat::Bincode);
        assert_eq!(FileModelStore::new("m.json").format(), ModelFormat::Json);
        assert_eq!(FileModelStore::new("model").format(), ModelFormat::Json);
    }

    #[test]
    fn test_saved_models_reload_with_identical_predictions() {
        let (classifier, model) = saved();
        let sample = Array2::from_shape_fn((3, 6), |(r, c)| (r + c) as f64 / 10.0);
        let expected = classifier.predict(std::slice::from_ref(&sample)).unwrap();

        for name in ["model.json", "model.bin"] {
            let store = FileModelStore::new(temp_path(name));
            store.save(&model).unwrap();
            let loaded = store.load().unwrap();
            assert_eq!(loaded.fingerprint, model.fingerprint);
            assert_eq!(loaded.tracks().ids(), &["a".to_string(), "b".to_string()]);

            let restored = loaded.into_classifier(config()).unwrap();
            assert_eq!(restored.predict(std::slice::from_ref(&sample)).unwrap(), expected);
            let _ = fs::remove_file(store.path());
        }
    }

    #[test]
    fn test_reloaded_model_keeps_window_length() {
        let (_, model) = saved();
        let store = FileModelStore::new(temp_path("window.json"));
        store.save(&model).unwrap();
        let restored = store.load().unwrap().into_classifier(config()).unwrap();
        let _ = fs::remove_file(store.path());

        assert_eq!(restored.predict(&[Array2::zeros((3, 6))]).unwrap().len(), 1);
        assert!(matches!(restored.predict(&[Array2::zeros((7, 6))]), Err(TrainingError::Shape(_))));
    }

    #[test]
    fn test_tampered_weights_rejected() {
        let (_, mut model) = saved();
        model.weights.output.b[0] += 1.0;
        assert!(matches!(model.into_classifier(config()), Err(TrainingError::Serialization(_))));
    }
}
