// projeto: streamtrend
// file: src/neural/classifier.rs
// Classifier lifecycle, early-stopping training loop and guarded shared access

use log::{debug, info, warn};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::neural::config::AppConfig;
use crate::neural::dataset::SplitData;
use crate::neural::metrics::{EarlyStopping, ProgressEvent, ProgressObserver, StopDecision, TrainingHistory};
use crate::neural::model::{Architecture, DropoutMasks, DropoutRates, GruNetwork, ModelWeights, SampleGradients};
use crate::neural::utils::{
    binary_cross_entropy, count_threshold_matches, validate_sequences, AdamOptimizer, LearningRateScheduler,
    TrainingError,
};

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassifierState {
    Unbuilt,
    Built,
    Training,
    Trained,
}

/// Hyperparameters fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    pub gru_units: Vec<usize>,
    pub dense_units: usize,
    pub dropout: DropoutRates,
    pub l2_weight: f64,
    pub learning_rate: f64,
    pub lr_schedule: LearningRateScheduler,
    pub clip_norm: f64,
    pub patience: usize,
    pub seed: u64,
}

impl ClassifierConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        let m = &config.model;
        ClassifierConfig {
            gru_units: m.gru_units.clone(),
            dense_units: m.dense_units,
            dropout: m.dropout(),
            l2_weight: m.l2_weight,
            learning_rate: m.learning_rate,
            lr_schedule: m.lr_schedule.clone(),
            clip_norm: m.clip_norm,
            patience: config.training.patience,
            seed: m.seed,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

/// What a training run leaves behind besides the weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
    pub best_val_loss: f64,
    /// 1-based; 0 when no epoch improved on +inf.
    pub best_epoch: usize,
    /// Fingerprint recorded when the best snapshot was taken.
    pub best_fingerprint: Option<String>,
    pub stopped_early: bool,
    pub history: TrainingHistory,
}

impl Default for ModelState {
    fn default() -> Self {
        ModelState {
            best_val_loss: f64::INFINITY,
            best_epoch: 0,
            best_fingerprint: None,
            stopped_early: false,
            history: TrainingHistory::default(),
        }
    }
}

pub struct SequenceClassifier {
    config: ClassifierConfig,
    state: ClassifierState,
    network: Option<GruNetwork>,
    model_state: ModelState,
    rng: StdRng,
}

impl SequenceClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        SequenceClassifier {
            config,
            state: ClassifierState::Unbuilt,
            network: None,
            model_state: ModelState::default(),
            rng,
        }
    }

    /// Wraps previously trained weights, e.g. loaded from a model store.
    pub fn from_trained(
        config: ClassifierConfig,
        arch: Architecture,
        weights: ModelWeights,
        model_state: ModelState,
    ) -> Result<Self, TrainingError> {
        let mut classifier = Self::new(config);
        classifier.network = Some(GruNetwork::from_weights(arch, weights)?);
        classifier.model_state = model_state;
        classifier.state = ClassifierState::Trained;
        Ok(classifier)
    }

    #[cfg(test)]
    pub fn state(&self) -> ClassifierState {
        self.state
    }

    pub fn model_state(&self) -> &ModelState {
        &self.model_state
    }

    pub fn network(&self) -> Option<&GruNetwork> {
        self.network.as_ref()
    }

    #[cfg(test)]
    pub fn network_mut(&mut self) -> Option<&mut GruNetwork> {
        self.network.as_mut()
    }

    /// Creates fresh weights for `(window_size, input_dim)` inputs and
    /// `output_dim` sigmoid outputs. Rebuilding discards any trained state.
    pub fn build(&mut self, window_size: usize, input_dim: usize, output_dim: usize) -> Result<(), TrainingError> {
        if self.state == ClassifierState::Training {
            return Err(TrainingError::TrainingInProgress);
        }
        let arch = Architecture {
            window_size,
            input_dim,
            gru_units: self.config.gru_units.clone(),
            dense_units: self.config.dense_units,
            output_dim,
        };
        let network = GruNetwork::new(arch, &mut self.rng)?;

        info!("🏗️ Model built: GRU {:?} -> dense {} -> sigmoid {} ({} parameters)",
              network.arch.gru_units, network.arch.dense_units, output_dim, network.weights.num_parameters());
        debug!("   ├── Input: ({}, {})", window_size, input_dim);
        debug!("   └── Dropout: {:?}, L2: {}", self.config.dropout, self.config.l2_weight);

        self.network = Some(network);
        self.model_state = ModelState::default();
        self.state = ClassifierState::Built;
        Ok(())
    }

    pub fn fit(
        &mut self,
        train: &SplitData,
        val: &SplitData,
        max_epochs: usize,
        batch_size: usize,
        observer: &dyn ProgressObserver,
    ) -> Result<&ModelState, TrainingError> {
        if self.state == ClassifierState::Training {
            return Err(TrainingError::TrainingInProgress);
        }
        let network = self.network.as_mut().ok_or(TrainingError::NotBuilt)?;
        if train.is_empty() {
            return Err(TrainingError::EmptySplit("training"));
        }
        if val.is_empty() {
            return Err(TrainingError::EmptySplit("validation"));
        }
        check_split(network, train, "training")?;
        check_split(network, val, "validation")?;

        info!("🎯 Training on {} samples, validating on {} ({} epochs max, batch {})",
              train.len(), val.len(), max_epochs, batch_size);

        let previous = self.state;
        self.state = ClassifierState::Training;
        let result = run_training(network, &mut self.rng, &self.config, train, val, max_epochs, batch_size, observer);

        match result {
            Ok(model_state) => {
                self.model_state = model_state;
                self.state = ClassifierState::Trained;
                Ok(&self.model_state)
            }
            Err(e) => {
                self.state = previous;
                Err(e)
            }
        }
    }

    fn ready(&self) -> Result<&GruNetwork, TrainingError> {
        if self.state == ClassifierState::Training {
            return Err(TrainingError::TrainingInProgress);
        }
        self.network.as_ref().ok_or(TrainingError::NotBuilt)
    }

    /// Deterministic forward pass, dropout off.
    pub fn predict(&self, samples: &[Array2<f64>]) -> Result<Vec<Array1<f64>>, TrainingError> {
        let network = self.ready()?;
        for sample in samples {
            network.check_input(sample)?;
        }
        Ok(samples.par_iter().map(|x| network.forward(x, None)).collect())
    }

    /// Mean of `passes` forward passes with fresh dropout masks each time.
    pub fn predict_with_uncertainty(
        &mut self,
        samples: &[Array2<f64>],
        passes: usize,
    ) -> Result<Vec<Array1<f64>>, TrainingError> {
        if passes == 0 {
            return Err(TrainingError::ModelConfiguration("uncertainty passes must be positive".to_string()));
        }
        if self.state == ClassifierState::Training {
            return Err(TrainingError::TrainingInProgress);
        }
        let network = self.network.as_ref().ok_or(TrainingError::NotBuilt)?;
        for sample in samples {
            network.check_input(sample)?;
        }

        let rates = self.config.dropout;
        let rng = &mut self.rng;
        let masks = samples.iter()
            .map(|_| {
                (0..passes)
                    .map(|_| DropoutMasks::sample(&network.arch, rates, rng))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output_dim = network.arch.output_dim;
        Ok(samples.par_iter().zip(masks.par_iter())
            .map(|(x, sample_masks)| {
                let mut total = Array1::<f64>::zeros(output_dim);
                for m in sample_masks {
                    total += &network.forward(x, Some(m));
                }
                total / passes as f64
            })
            .collect())
    }

    /// (mean BCE loss, pooled thresholded accuracy as a fraction).
    pub fn evaluate(&self, samples: &[Array2<f64>], labels: &[Array1<f64>]) -> Result<(f64, f64), TrainingError> {
        let network = self.ready()?;
        if samples.is_empty() {
            return Err(TrainingError::EmptySplit("evaluation"));
        }
        if samples.len() != labels.len() {
            return Err(TrainingError::Shape(format!(
                "{} samples but {} labels", samples.len(), labels.len()
            )));
        }
        for (sample, label) in samples.iter().zip(labels) {
            network.check_input(sample)?;
            check_label(network, label)?;
        }
        Ok(score(network, samples, labels))
    }

    /// Drops weights and history; the classifier must be built again.
    pub fn dispose(&mut self) {
        self.network = None;
        self.model_state = ModelState::default();
        self.state = ClassifierState::Unbuilt;
        debug!("🧹 Model weights released");
    }

    pub fn fingerprint(&self) -> Option<String> {
        self.network.as_ref().map(|n| n.weights.fingerprint())
    }
}

fn check_label(network: &GruNetwork, label: &Array1<f64>) -> Result<(), TrainingError> {
    if label.len() != network.arch.output_dim {
        return Err(TrainingError::Shape(format!(
            "expected label of length {}, got {}", network.arch.output_dim, label.len()
        )));
    }
    Ok(())
}

fn check_split(network: &GruNetwork, split: &SplitData, name: &str) -> Result<(), TrainingError> {
    if split.samples.len() != split.labels.len() {
        return Err(TrainingError::Shape(format!(
            "{} split has {} samples but {} labels", name, split.samples.len(), split.labels.len()
        )));
    }
    validate_sequences(&split.samples, name)?;
    for (sample, label) in split.samples.iter().zip(&split.labels) {
        network.check_input(sample)?;
        check_label(network, label)?;
    }
    Ok(())
}

/// Mean BCE and pooled accuracy without dropout. Per-sample results are
/// reduced in input order.
fn score(network: &GruNetwork, samples: &[Array2<f64>], labels: &[Array1<f64>]) -> (f64, f64) {
    let per_sample: Vec<(f64, usize)> = samples.par_iter().zip(labels.par_iter())
        .map(|(x, y)| {
            let probs = network.forward(x, None);
            (binary_cross_entropy(&probs, y), count_threshold_matches(&probs, y))
        })
        .collect();

    let n = per_sample.len().max(1) as f64;
    let loss = per_sample.iter().map(|(l, _)| l).sum::<f64>() / n;
    let correct: usize = per_sample.iter().map(|(_, c)| c).sum();
    let units = labels.iter().map(|l| l.len()).sum::<usize>().max(1);
    (loss, correct as f64 / units as f64)
}

#[allow(clippy::too_many_arguments)]
fn run_training(
    network: &mut GruNetwork,
    rng: &mut StdRng,
    config: &ClassifierConfig,
    train: &SplitData,
    val: &SplitData,
    max_epochs: usize,
    batch_size: usize,
    observer: &dyn ProgressObserver,
) -> Result<ModelState, TrainingError> {
    let mut optimizer = AdamOptimizer::new(config.learning_rate, ADAM_BETA1, ADAM_BETA2, ADAM_EPSILON);
    let mut stopper: EarlyStopping<(ModelWeights, String)> = EarlyStopping::new(config.patience);
    let mut history = TrainingHistory::default();
    let mut order: Vec<usize> = (0..train.len()).collect();
    let batch_size = batch_size.max(1);
    let label_units = train.labels.iter().map(|l| l.len()).sum::<usize>().max(1);
    let mut stopped_early = false;

    for epoch in 0..max_epochs {
        let lr = config.lr_schedule.get_rate(config.learning_rate, epoch);
        optimizer.set_learning_rate(lr);
        order.shuffle(rng);

        let mut loss_sum = 0.0;
        let mut correct = 0usize;

        for batch in order.chunks(batch_size) {
            let masks = batch.iter()
                .map(|_| DropoutMasks::sample(&network.arch, config.dropout, rng))
                .collect::<Result<Vec<_>, _>>()?;

            let net: &GruNetwork = network;
            let results: Vec<SampleGradients> = batch.par_iter().zip(masks.par_iter())
                .map(|(&i, m)| net.sample_gradients(&train.samples[i], &train.labels[i], Some(m)))
                .collect();

            let mut grads = network.weights.zeros_like();
            for r in &results {
                grads.add_scaled(&r.grads, 1.0);
                loss_sum += r.loss;
                correct += r.correct;
            }
            grads.scale(1.0 / batch.len() as f64);
            grads.add_l2_gradient(&network.weights, config.l2_weight);

            let norm = grads.global_norm();
            if config.clip_norm > 0.0 && norm > config.clip_norm {
                grads.scale(config.clip_norm / norm);
            }

            optimizer.begin_step();
            for ((name, param), (_, grad)) in network.weights.named_tensors_mut().into_iter().zip(grads.named_tensors()) {
                optimizer.update(&name, param, grad);
            }
        }

        let loss = loss_sum / train.len() as f64;
        let accuracy = correct as f64 / label_units as f64;
        let (val_loss, val_accuracy) = score(network, &val.samples, &val.labels);

        let epoch_number = epoch + 1;
        let decision = stopper.observe(epoch_number, val_loss, || {
            let snapshot = network.weights.clone();
            let marker = snapshot.fingerprint();
            (snapshot, marker)
        });
        if decision == StopDecision::Improved {
            debug!("💾 New best val_loss {:.6} at epoch {} (lr {:.2e})", val_loss, epoch_number, lr);
        }

        let event = ProgressEvent {
            epoch: epoch_number,
            loss,
            accuracy,
            val_loss,
            val_accuracy,
            early_stopping_counter: stopper.counter,
        };
        observer.on_epoch(&event);
        history.push(event);

        if decision == StopDecision::Stop {
            info!("⏹️ Early stopping at epoch {} (no improvement for {} epochs)", epoch_number, config.patience);
            stopped_early = true;
            break;
        }
    }

    let best_epoch = stopper.best_epoch;
    let best_val_loss = stopper.best_loss;
    let best_fingerprint = match stopper.into_best() {
        Some((weights, marker)) => {
            network.weights = weights;
            info!("♻️ Restored best weights from epoch {} (val_loss {:.6})", best_epoch, best_val_loss);
            Some(marker)
        }
        None => {
            warn!("⚠️ Validation loss never improved; keeping final weights");
            None
        }
    };

    Ok(ModelState { best_val_loss, best_epoch, best_fingerprint, stopped_early, history })
}

/// Thread-safe handle that allows one training run at a time.
#[derive(Clone)]
pub struct SharedClassifier {
    inner: Arc<Mutex<SequenceClassifier>>,
    training: Arc<AtomicBool>,
}

struct TrainingFlag<'a>(&'a AtomicBool);

impl Drop for TrainingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SharedClassifier {
    pub fn new(classifier: SequenceClassifier) -> Self {
        SharedClassifier {
            inner: Arc::new(Mutex::new(classifier)),
            training: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::Acquire)
    }

    fn lock(&self) -> Result<MutexGuard<'_, SequenceClassifier>, TrainingError> {
        self.inner.lock().map_err(|_| TrainingError::LockPoisoned)
    }

    fn lock_idle(&self) -> Result<MutexGuard<'_, SequenceClassifier>, TrainingError> {
        if self.is_training() {
            return Err(TrainingError::TrainingInProgress);
        }
        self.lock()
    }

    /// Rejects, rather than queues, a request made while another run is active.
    pub fn train(
        &self,
        train: &SplitData,
        val: &SplitData,
        max_epochs: usize,
        batch_size: usize,
        observer: &dyn ProgressObserver,
    ) -> Result<ModelState, TrainingError> {
        if self.training.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            warn!("⚠️ Training request rejected: a run is already in progress");
            return Err(TrainingError::TrainingInProgress);
        }
        let _flag = TrainingFlag(&self.training);
        let mut classifier = self.lock()?;
        classifier.fit(train, val, max_epochs, batch_size, observer).cloned()
    }

    pub fn build(&self, window_size: usize, input_dim: usize, output_dim: usize) -> Result<(), TrainingError> {
        self.lock_idle()?.build(window_size, input_dim, output_dim)
    }

    pub fn predict(&self, samples: &[Array2<f64>]) -> Result<Vec<Array1<f64>>, TrainingError> {
        self.lock_idle()?.predict(samples)
    }

    pub fn predict_with_uncertainty(&self, samples: &[Array2<f64>], passes: usize) -> Result<Vec<Array1<f64>>, TrainingError> {
        self.lock_idle()?.predict_with_uncertainty(samples, passes)
    }

    pub fn evaluate(&self, samples: &[Array2<f64>], labels: &[Array1<f64>]) -> Result<(f64, f64), TrainingError> {
        self.lock_idle()?.evaluate(samples, labels)
    }

    /// Runs `f` against the idle classifier.
    pub fn with<T>(&self, f: impl FnOnce(&SequenceClassifier) -> T) -> Result<T, TrainingError> {
        let guard = self.lock_idle()?;
        Ok(f(&guard))
    }

    /// Releases the weights once the model has been saved.
    pub fn dispose(&self) -> Result<(), TrainingError> {
        self.lock_idle()?.dispose();
        Ok(())
    }
}
