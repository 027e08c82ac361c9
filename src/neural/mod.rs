// projeto: streamtrend
// file: src/neural/mod.rs
// Module declarations for the stream-trend classifier

pub mod utils;       // Error type, optimizer, schedules and activation helpers
pub mod config;      // TOML application configuration
pub mod data;        // CSV ingestion into the record store
pub mod features;    // Track selection and feature normalization
pub mod dataset;     // Sliding windows, labels and the ordered split
pub mod model;       // GRU network, forward pass and backpropagation
pub mod metrics;     // Training history, progress events and early stopping
pub mod classifier;  // Classifier lifecycle and training loop
pub mod evaluation;  // Accuracy breakdowns, feature importance and breakout scores
pub mod storage;     // Model persistence

// Re-export commonly used items for convenience
pub use classifier::{ClassifierConfig, SequenceClassifier, SharedClassifier};
pub use config::AppConfig;
pub use data::RecordStore;
pub use dataset::{DatasetSplitter, WindowBuilder};
pub use evaluation::Evaluator;
pub use features::{FeatureNormalizer, TrackSelector};
pub use metrics::{LogProgress, ProgressEvent};
pub use storage::{FileModelStore, ModelStore, SavedModel};
pub use utils::TrainingError;
