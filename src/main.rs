// projeto: streamtrend
// file: src/main.rs
// Trains the GRU stream-trend classifier on a CSV history and writes report, history and model

mod neural;

use chrono::Utc;
use clap::Parser;
use log::{debug, error, info, warn};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::neural::dataset::SplitData;
use crate::neural::features::{TrackSelection, TrackSet};
use crate::neural::metrics::ProgressObserver;
use crate::neural::{
    AppConfig, ClassifierConfig, DatasetSplitter, Evaluator, FeatureNormalizer, FileModelStore, LogProgress,
    ModelStore, ProgressEvent, RecordStore, SavedModel, SequenceClassifier, SharedClassifier, TrackSelector,
    TrainingError, WindowBuilder,
};

#[derive(Parser, Debug)]
#[command(
    name = "stream-train",
    version,
    about = "Trains a GRU classifier that predicts daily stream-count rises for the top tracks",
    long_about = "Reads a daily per-track streaming CSV, keeps the most-streamed tracks, builds sliding windows \
                  with three-day rise labels, trains a stacked GRU with early stopping and writes an evaluation \
                  report, the training history and the best model. With --model-in a saved model is evaluated \
                  on the same tracks without training."
)]
struct Cli {
    /// Streaming history CSV (date, track_id, streams, danceability, energy, ...)
    #[arg(long)]
    input: PathBuf,

    /// TOML configuration file; defaults are used when it does not exist
    #[arg(long, default_value = "streamtrend.toml")]
    config: PathBuf,

    /// Number of tracks kept by total streams
    #[arg(long)]
    top_n: Option<usize>,

    /// Days per input window
    #[arg(long)]
    window: Option<usize>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Epochs without validation improvement before stopping
    #[arg(long)]
    patience: Option<usize>,

    /// Share of windows used for training (0.0-1.0)
    #[arg(long)]
    train_ratio: Option<f64>,

    /// Seed for weight init, shuffling and dropout
    #[arg(long)]
    seed: Option<u64>,

    /// Dropout-active passes averaged by the ensemble prediction
    #[arg(long)]
    passes: Option<usize>,

    /// Model output (.json or .bin)
    #[arg(long)]
    model_out: Option<String>,

    #[arg(long)]
    report_out: Option<String>,

    #[arg(long)]
    history_out: Option<String>,

    /// Evaluate a saved model (.json or .bin) on the test split instead of training
    #[arg(long)]
    model_in: Option<PathBuf>,

    /// Debug-level logging
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(v) = self.top_n { config.pipeline.top_n = v; }
        if let Some(v) = self.window { config.pipeline.window_size = v; }
        if let Some(v) = self.train_ratio { config.pipeline.train_ratio = v; }
        if let Some(v) = self.epochs { config.training.epochs = v; }
        if let Some(v) = self.batch_size { config.training.batch_size = v; }
        if let Some(v) = self.patience { config.training.patience = v; }
        if let Some(v) = self.passes { config.training.uncertainty_passes = v; }
        if let Some(v) = self.seed { config.model.seed = v; }
        if let Some(v) = &self.model_out { config.output.model_path = v.clone(); }
        if let Some(v) = &self.report_out { config.output.report_path = v.clone(); }
        if let Some(v) = &self.history_out { config.output.history_path = v.clone(); }
    }
}

fn main() -> Result<(), TrainingError> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let start_time = Instant::now();
    info!("🚀 Stream trend training started");
    info!("🕐 Started at: {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));

    match run(&cli) {
        Ok(()) => {
            info!("✅ Finished in {:.2}s", start_time.elapsed().as_secs_f64());
            info!("🏁 Finished at: {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
        }
        Err(e) => {
            error!("❌ Training failed: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_secs()
        .init();
}

fn run(cli: &Cli) -> Result<(), TrainingError> {
    let mut config = AppConfig::load(&cli.config)?;
    cli.apply_overrides(&mut config);
    config.validate()?;
    debug!("⚙️ Effective configuration:\n{}", config.to_toml()?);

    let store = RecordStore::from_path(&cli.input)?;

    match &cli.model_in {
        Some(path) => evaluate_saved(&config, &store, path),
        None => train_and_evaluate(&config, &store),
    }
}

/// Windows for one track selection, split in date order.
struct PreparedData {
    tracks: TrackSet,
    window_size: usize,
    train: SplitData,
    test: SplitData,
    latest_window: Option<Array2<f64>>,
}

fn prepare(
    config: &AppConfig,
    store: &RecordStore,
    selection: &TrackSelection,
    window_size: usize,
) -> Result<PreparedData, TrainingError> {
    for (rank, (id, total)) in selection.totals.iter().enumerate() {
        debug!("   {:>2}. {} ({:.0} streams)", rank + 1, store.track_name(id), total);
    }

    let normalized = FeatureNormalizer::fit(selection);
    let windows = WindowBuilder::new(window_size);
    let dataset = windows.build(&normalized);
    if dataset.is_empty() {
        return Err(TrainingError::DataProcessing(format!(
            "not enough distinct dates for a window of {} days plus 3 label days",
            window_size
        )));
    }
    let latest_window = windows.latest_window(&normalized);
    let tracks = dataset.tracks.clone();
    let window_size = dataset.window_size;

    let (train, test) = DatasetSplitter::new(config.pipeline.train_ratio)?.split(dataset);
    info!("✅ Data split - Train: {} | Test: {}", train.len(), test.len());
    debug!("   ├── Train anchors: {}", anchor_range(&train));
    debug!("   └── Test anchors: {}", anchor_range(&test));

    Ok(PreparedData { tracks, window_size, train, test, latest_window })
}

fn anchor_range(split: &SplitData) -> String {
    match (split.anchors.first(), split.anchors.last()) {
        (Some(first), Some(last)) => format!("{} .. {}", first, last),
        _ => "none".to_string(),
    }
}

fn train_and_evaluate(config: &AppConfig, store: &RecordStore) -> Result<(), TrainingError> {
    let selection = TrackSelector::new(config.pipeline.top_n).select(store);
    let data = prepare(config, store, &selection, config.pipeline.window_size)?;
    let width = data.tracks.feature_width();

    let mut classifier = SequenceClassifier::new(ClassifierConfig::from_app(config));
    classifier.build(data.window_size, width, width)?;
    let shared = SharedClassifier::new(classifier);

    let (progress_tx, progress_rx) = crossbeam::channel::unbounded::<ProgressEvent>();
    let progress_logger = std::thread::spawn(move || {
        for event in progress_rx.iter() {
            LogProgress.on_epoch(&event);
        }
    });

    let training = shared.train(&data.train, &data.test, config.training.epochs, config.training.batch_size, &progress_tx);
    drop(progress_tx);
    if let Err(e) = progress_logger.join() {
        warn!("⚠️ Progress logger thread panicked: {:?}", e);
    }
    let model_state = training?;

    model_state.history.print_summary();
    model_state.history.save_to_csv(&config.output.history_path)?;

    match (&model_state.best_fingerprint, shared.with(|c| c.fingerprint())?) {
        (Some(best), Some(current)) if *best != current => {
            warn!("⚠️ Final weights differ from the best snapshot");
        }
        (Some(_), Some(current)) => {
            debug!("🔐 Best weights in place (sha256 {})", current.get(..12).unwrap_or(&current));
        }
        _ => {}
    }

    write_report(config, &shared, &data, store)?;

    let saved = shared.with(|c| SavedModel::from_classifier(c, &data.tracks))??;
    FileModelStore::new(&config.output.model_path).save(&saved)?;

    shared.dispose()
}

fn evaluate_saved(config: &AppConfig, store: &RecordStore, path: &Path) -> Result<(), TrainingError> {
    let saved = FileModelStore::new(path).load()?;
    let tracks = saved.tracks();
    if tracks.is_empty() {
        return Err(TrainingError::ModelConfiguration(format!(
            "saved model {} lists no tracks", path.display()
        )));
    }
    if saved.window_size != config.pipeline.window_size {
        warn!("⚠️ Using the saved {}-day window instead of the configured {} days",
              saved.window_size, config.pipeline.window_size);
    }
    info!("📦 Saved model: {} tracks, {}-day window, best epoch {}",
          tracks.len(), saved.window_size, saved.best_epoch);

    let selection = TrackSelector::restrict(store, &tracks);
    let data = prepare(config, store, &selection, saved.window_size)?;

    let shared = SharedClassifier::new(saved.into_classifier(ClassifierConfig::from_app(config))?);
    write_report(config, &shared, &data, store)?;

    shared.dispose()
}

fn write_report(
    config: &AppConfig,
    shared: &SharedClassifier,
    data: &PreparedData,
    store: &RecordStore,
) -> Result<(), TrainingError> {
    let report = Evaluator::new(config.evaluation.importance_seed).evaluate(
        shared,
        &data.test,
        &data.tracks,
        store,
        config.training.uncertainty_passes,
        data.latest_window.as_ref(),
    )?;
    report.print_summary();
    report.save_json(&config.output.report_path)
}
