// projeto: streamtrend
// file: src/neural/evaluation.rs
// Accuracy breakdowns, permutation feature importance and breakout scoring

use chrono::{DateTime, Utc};
use log::{debug, info};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::neural::classifier::SharedClassifier;
use crate::neural::data::RecordStore;
use crate::neural::dataset::{SplitData, HORIZONS};
use crate::neural::features::{TrackSet, FEATURES_PER_TRACK, FEATURE_NAMES};
use crate::neural::utils::TrainingError;

const THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackAccuracy {
    pub track_id: String,
    /// Percent over all three horizons.
    pub overall: f64,
    /// Percent per horizon (+1, +2, +3 days).
    pub horizons: [f64; HORIZONS],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackAccuracyReport {
    pub tracks: Vec<TrackAccuracy>,
    pub horizons: [f64; HORIZONS],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    /// Accuracy lost, in percentage points, when the feature is shuffled.
    pub importance_score: f64,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskLevel {
    pub fn classify(signal: f64, confidence: f64) -> Self {
        if signal > 0.10 && confidence > 0.70 {
            RiskLevel::Low
        } else if signal > 0.05 && confidence > 0.60 {
            RiskLevel::Medium
        } else if signal > 0.0 {
            RiskLevel::High
        } else {
            RiskLevel::VeryHigh
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutScore {
    pub track_id: String,
    pub track_name: String,
    pub breakout_score: f64,
    pub confidence: f64,
    pub trend: Trend,
    pub risk_level: RiskLevel,
}

/// Rise probabilities for the three days after the last observed date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackForecast {
    pub track_id: String,
    pub track_name: String,
    pub probabilities: [f64; HORIZONS],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub generated_at: DateTime<Utc>,
    pub test_samples: usize,
    pub test_loss: f64,
    pub consistent_accuracy: f64,
    pub ensemble_accuracy: f64,
    pub track_accuracy: TrackAccuracyReport,
    pub feature_importance: Vec<FeatureImportance>,
    pub breakout_tracks: Vec<BreakoutScore>,
    pub forecast: Vec<TrackForecast>,
}

impl EvaluationReport {
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), TrainingError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("📝 Evaluation report saved to: {}", path.display());
        Ok(())
    }

    pub fn print_summary(&self) {
        info!("📊 Evaluation on {} test samples", self.test_samples);
        info!("   ├── Loss: {:.6}", self.test_loss);
        info!("   ├── Consistent accuracy: {:.2}%", self.consistent_accuracy);
        info!("   ├── Ensemble accuracy: {:.2}%", self.ensemble_accuracy);
        info!("   └── Per horizon: +1d {:.2}% | +2d {:.2}% | +3d {:.2}%",
              self.track_accuracy.horizons[0], self.track_accuracy.horizons[1], self.track_accuracy.horizons[2]);
        for f in &self.feature_importance {
            info!("🔍 {:<13} {:>6.2} pp", f.feature, f.importance_score);
        }
        for b in self.breakout_tracks.iter().take(5) {
            info!("🚀 {} ({}) score={:.3} confidence={:.3} {:?} {:?}",
                  b.track_name, b.track_id, b.breakout_score, b.confidence, b.trend, b.risk_level);
        }
    }
}

fn describe(feature: &str) -> &'static str {
    match feature {
        "streams" => "Daily stream count, min-max scaled per track",
        "danceability" => "Audio danceability, min-max scaled per track",
        "energy" => "Audio energy, min-max scaled per track",
        _ => "Unknown feature",
    }
}

fn is_match(p: f64, y: f64) -> bool {
    (p > THRESHOLD) == (y > THRESHOLD)
}

fn percent(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64 * 100.0
    }
}

pub type Predictor<'a> = dyn Fn(&[Array2<f64>]) -> Result<Vec<Array1<f64>>, TrainingError> + 'a;

#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    pub importance_seed: u64,
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator { importance_seed: 42 }
    }
}

impl Evaluator {
    pub fn new(importance_seed: u64) -> Self {
        Evaluator { importance_seed }
    }

    /// Percent of output units whose thresholded prediction matches the label.
    pub fn compute_consistent_accuracy(predictions: &[Array1<f64>], labels: &[Array1<f64>]) -> f64 {
        let mut hits = 0;
        let mut total = 0;
        for (p, y) in predictions.iter().zip(labels) {
            for (&pv, &yv) in p.iter().zip(y.iter()) {
                total += 1;
                if is_match(pv, yv) {
                    hits += 1;
                }
            }
        }
        percent(hits, total)
    }

    pub fn compute_track_specific_accuracy(
        predictions: &[Array1<f64>],
        labels: &[Array1<f64>],
        tracks: &TrackSet,
    ) -> TrackAccuracyReport {
        let mut global_hits = [0usize; HORIZONS];
        let mut global_total = [0usize; HORIZONS];

        let per_track = tracks.ids().iter().enumerate()
            .map(|(slot, id)| {
                let mut hits = [0usize; HORIZONS];
                let mut total = [0usize; HORIZONS];
                for (p, y) in predictions.iter().zip(labels) {
                    for h in 0..HORIZONS {
                        let idx = slot * HORIZONS + h;
                        let (Some(&pv), Some(&yv)) = (p.get(idx), y.get(idx)) else { continue };
                        total[h] += 1;
                        if is_match(pv, yv) {
                            hits[h] += 1;
                        }
                    }
                }
                for h in 0..HORIZONS {
                    global_hits[h] += hits[h];
                    global_total[h] += total[h];
                }
                TrackAccuracy {
                    track_id: id.clone(),
                    overall: percent(hits.iter().sum(), total.iter().sum()),
                    horizons: std::array::from_fn(|h| percent(hits[h], total[h])),
                }
            })
            .collect();

        TrackAccuracyReport {
            tracks: per_track,
            horizons: std::array::from_fn(|h| percent(global_hits[h], global_total[h])),
        }
    }

    /// Permutation importance: one feature at a time, its values are shuffled
    /// across every (sample, day, track) slot and the accuracy drop against
    /// `baseline` (percent) is recorded. Sorted by importance, descending.
    pub fn compute_feature_importance(
        &self,
        baseline: f64,
        samples: &[Array2<f64>],
        labels: &[Array1<f64>],
        predict: &Predictor<'_>,
    ) -> Result<Vec<FeatureImportance>, TrainingError> {
        let mut rng = StdRng::seed_from_u64(self.importance_seed);
        let mut importances = Vec::with_capacity(FEATURES_PER_TRACK);

        for (feature, name) in FEATURE_NAMES.iter().enumerate() {
            let shuffled = permute_feature(samples, feature, &mut rng);
            let predictions = predict(&shuffled)?;
            let accuracy = Self::compute_consistent_accuracy(&predictions, labels);
            let importance = (baseline - accuracy).max(0.0);
            debug!("🔀 {} shuffled: accuracy {:.2}% (baseline {:.2}%)", name, accuracy, baseline);
            importances.push(FeatureImportance {
                feature: name.to_string(),
                importance_score: importance,
                description: describe(name).to_string(),
            });
        }

        importances.sort_by(|a, b| {
            b.importance_score.partial_cmp(&a.importance_score).unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(importances)
    }

    /// Trend signal `(p3 - p1) * 2 + (p2 - p1)` and confidence `mean(p1..p3)`,
    /// averaged over samples per track. Sorted by signal, descending.
    pub fn detect_breakout_tracks(
        predictions: &[Array1<f64>],
        tracks: &TrackSet,
        store: &RecordStore,
    ) -> Vec<BreakoutScore> {
        let mut scores: Vec<BreakoutScore> = tracks.ids().iter().enumerate()
            .map(|(slot, id)| {
                let mut signal_sum = 0.0;
                let mut confidence_sum = 0.0;
                let mut count = 0usize;
                for p in predictions {
                    let base = slot * HORIZONS;
                    let (Some(&p1), Some(&p2), Some(&p3)) = (p.get(base), p.get(base + 1), p.get(base + 2)) else {
                        continue;
                    };
                    signal_sum += (p3 - p1) * 2.0 + (p2 - p1);
                    confidence_sum += (p1 + p2 + p3) / 3.0;
                    count += 1;
                }
                let n = count.max(1) as f64;
                let signal = signal_sum / n;
                let confidence = confidence_sum / n;
                BreakoutScore {
                    track_id: id.clone(),
                    track_name: store.track_name(id),
                    breakout_score: signal,
                    confidence,
                    trend: if signal > 0.0 { Trend::Rising } else { Trend::Stable },
                    risk_level: RiskLevel::classify(signal, confidence),
                }
            })
            .collect();

        scores.sort_by(|a, b| b.breakout_score.partial_cmp(&a.breakout_score).unwrap_or(std::cmp::Ordering::Equal));
        scores
    }

    pub fn forecast(probabilities: &Array1<f64>, tracks: &TrackSet, store: &RecordStore) -> Vec<TrackForecast> {
        tracks.ids().iter().enumerate()
            .map(|(slot, id)| TrackForecast {
                track_id: id.clone(),
                track_name: store.track_name(id),
                probabilities: std::array::from_fn(|h| {
                    probabilities.get(slot * HORIZONS + h).copied().unwrap_or(0.0)
                }),
            })
            .collect()
    }

    /// Scores the trained model on the test split and assembles the report.
    pub fn evaluate(
        &self,
        classifier: &SharedClassifier,
        test: &SplitData,
        tracks: &TrackSet,
        store: &RecordStore,
        uncertainty_passes: usize,
        latest_window: Option<&Array2<f64>>,
    ) -> Result<EvaluationReport, TrainingError> {
        if test.is_empty() {
            return Err(TrainingError::EmptySplit("test"));
        }
        info!("🧪 Evaluating on {} test samples", test.len());

        let (test_loss, _) = classifier.evaluate(&test.samples, &test.labels)?;
        let predictions = classifier.predict(&test.samples)?;
        let consistent_accuracy = Self::compute_consistent_accuracy(&predictions, &test.labels);

        let ensemble = classifier.predict_with_uncertainty(&test.samples, uncertainty_passes)?;
        let ensemble_accuracy = Self::compute_consistent_accuracy(&ensemble, &test.labels);

        let track_accuracy = Self::compute_track_specific_accuracy(&predictions, &test.labels, tracks);
        let predict = |x: &[Array2<f64>]| classifier.predict(x);
        let feature_importance = self.compute_feature_importance(consistent_accuracy, &test.samples, &test.labels, &predict)?;
        let breakout_tracks = Self::detect_breakout_tracks(&ensemble, tracks, store);

        let forecast = match latest_window {
            Some(window) => {
                let probs = classifier.predict_with_uncertainty(std::slice::from_ref(window), uncertainty_passes)?;
                probs.first().map(|p| Self::forecast(p, tracks, store)).unwrap_or_default()
            }
            None => Vec::new(),
        };

        Ok(EvaluationReport {
            generated_at: Utc::now(),
            test_samples: test.len(),
            test_loss,
            consistent_accuracy,
            ensemble_accuracy,
            track_accuracy,
            feature_importance,
            breakout_tracks,
            forecast,
        })
    }
}

/// Copy of `samples` with one feature's values shuffled across all tracks,
/// days and samples.
fn permute_feature(samples: &[Array2<f64>], feature: usize, rng: &mut StdRng) -> Vec<Array2<f64>> {
    let mut values: Vec<f64> = Vec::new();
    for sample in samples {
        for column in (feature..sample.ncols()).step_by(FEATURES_PER_TRACK) {
            values.extend(sample.column(column).iter().copied());
        }
    }
    values.shuffle(rng);

    let mut next = values.into_iter();
    samples.iter()
        .map(|sample| {
            let mut shuffled = sample.clone();
            for column in (feature..shuffled.ncols()).step_by(FEATURES_PER_TRACK) {
                for v in shuffled.column_mut(column).iter_mut() {
                    if let Some(value) = next.next() {
                        *v = value;
                    }
                }
            }
            shuffled
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::classifier::{ClassifierConfig, SequenceClassifier};
    use crate::neural::model::DropoutRates;
    use crate::neural::utils::LearningRateScheduler;
    use ndarray::array;
    use rand::Rng;

    fn tracks(n: usize) -> TrackSet {
        TrackSet::new((0..n).map(|i| format!("t{}", i)).collect())
    }

    #[test]
    fn test_consistent_accuracy_exactly_half() {
        let predictions = vec![array![0.9, 0.1, 0.6, 0.4], array![0.7, 0.2, 0.51, 0.5]];
        let labels = vec![array![1.0, 1.0, 0.0, 0.0], array![0.0, 0.0, 1.0, 1.0]];
        assert_eq!(Evaluator::compute_consistent_accuracy(&predictions, &labels), 50.0);
        assert_eq!(Evaluator::compute_consistent_accuracy(&[], &[]), 0.0);
    }

    #[test]
    fn test_track_specific_accuracy() {
        // two tracks, one sample: track 0 all right, track 1 only +2d right
        let predictions = vec![array![0.9, 0.1, 0.8, 0.9, 0.1, 0.8]];
        let labels = vec![array![1.0, 0.0, 1.0, 0.0, 0.0, 0.0]];
        let report = Evaluator::compute_track_specific_accuracy(&predictions, &labels, &tracks(2));
        assert_eq!(report.tracks[0].overall, 100.0);
        assert_eq!(report.tracks[1].horizons, [0.0, 100.0, 0.0]);
        assert_eq!(report.horizons, [50.0, 100.0, 50.0]);
    }

    #[test]
    fn test_breakout_signal_and_trend() {
        let store = RecordStore::new();
        let falling = Evaluator::detect_breakout_tracks(&[array![0.9, 0.5, 0.1]], &tracks(1), &store);
        assert!((falling[0].breakout_score + 2.0).abs() < 1e-12);
        assert_eq!(falling[0].trend, Trend::Stable);
        assert_eq!(falling[0].risk_level, RiskLevel::VeryHigh);
        assert_eq!(falling[0].track_name, "t0");

        let rising = Evaluator::detect_breakout_tracks(&[array![0.1, 0.5, 0.9]], &tracks(1), &store);
        assert!((rising[0].breakout_score - 2.0).abs() < 1e-12);
        assert_eq!(rising[0].trend, Trend::Rising);
        assert_eq!(rising[0].risk_level, RiskLevel::High);
    }

    #[test]
    fn test_breakout_sorted_descending() {
        let predictions = vec![array![0.5, 0.5, 0.5, 0.1, 0.5, 0.9, 0.9, 0.5, 0.1]];
        let scores = Evaluator::detect_breakout_tracks(&predictions, &tracks(3), &RecordStore::new());
        let ids: Vec<&str> = scores.iter().map(|s| s.track_id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t0", "t2"]);
    }

    #[test]
    fn test_risk_levels() {
        assert_eq!(RiskLevel::classify(0.2, 0.8), RiskLevel::Low);
        assert_eq!(RiskLevel::classify(0.2, 0.65), RiskLevel::Medium);
        assert_eq!(RiskLevel::classify(0.06, 0.5), RiskLevel::High);
        assert_eq!(RiskLevel::classify(0.0, 0.99), RiskLevel::VeryHigh);
        assert_eq!(serde_json::to_string(&RiskLevel::VeryHigh).unwrap(), "\"very-high\"");
    }

    #[test]
    fn test_permutation_preserves_feature_multiset() {
        let samples = vec![
            Array2::from_shape_fn((2, 6), |(r, c)| (r * 6 + c) as f64),
            Array2::from_shape_fn((2, 6), |(r, c)| 100.0 + (r * 6 + c) as f64),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        let shuffled = permute_feature(&samples, 1, &mut rng);
        let collect = |set: &[Array2<f64>], cols: &[usize]| {
            let mut v: Vec<f64> = set.iter()
                .flat_map(|s| cols.iter().flat_map(move |&c| s.column(c).to_vec()))
                .collect();
            v.sort_by(|a, b| a.partial_cmp(b).unwrap());
            v
        };
        assert_eq!(collect(&samples, &[1, 4]), collect(&shuffled, &[1, 4]));
        for (a, b) in samples.iter().zip(&shuffled) {
            for c in [0, 2, 3, 5] {
                assert_eq!(a.column(c), b.column(c));
            }
        }
    }

    fn toy_test_set(n: usize) -> SplitData {
        let mut rng = StdRng::seed_from_u64(21);
        let mut split = SplitData::default();
        for _ in 0..n {
            let x = Array2::from_shape_fn((4, 6), |_| rng.random::<f64>());
            let y = Array1::from_shape_fn(6, |_| if rng.random::<f64>() > 0.5 { 1.0 } else { 0.0 });
            split.samples.push(x);
            split.labels.push(y);
        }
        split
    }

    fn config() -> ClassifierConfig {
        ClassifierConfig {
            gru_units: vec![5, 4],
            dense_units: 4,
            dropout: DropoutRates { input: 0.1, recurrent: 0.1, dense: 0.2 },
            l2_weight: 0.0,
            learning_rate: 1e-3,
            lr_schedule: LearningRateScheduler::Constant,
            clip_norm: 1.0,
            patience: 3,
            seed: 5,
        }
    }

    #[test]
    fn test_unused_feature_has_zero_importance() {
        let test = toy_test_set(12);
        let mut classifier = SequenceClassifier::new(config());
        classifier.build(4, 6, 6).unwrap();
        if let Some(network) = classifier.network_mut() {
            // danceability columns of both tracks
            network.zero_input_column(1);
            network.zero_input_column(4);
        }

        let predictions = classifier.predict(&test.samples).unwrap();
        let baseline = Evaluator::compute_consistent_accuracy(&predictions, &test.labels);
        let predict = |x: &[Array2<f64>]| classifier.predict(x);

        for seed in 0..5 {
            let importances = Evaluator::new(seed)
                .compute_feature_importance(baseline, &test.samples, &test.labels, &predict)
                .unwrap();
            assert_eq!(importances.len(), 3);
            assert!(importances.iter().all(|f| f.importance_score >= 0.0));
            assert!(importances.windows(2).all(|w| w[0].importance_score >= w[1].importance_score));
            let dance = importances.iter().find(|f| f.feature == "danceability").unwrap();
            assert!(dance.importance_score.abs() < 1e-9);
        }
    }

    #[test]
    fn test_full_report() {
        let test = toy_test_set(6);
        let mut classifier = SequenceClassifier::new(config());
        classifier.build(4, 6, 6).unwrap();
        let shared = SharedClassifier::new(classifier);
        let mut store = RecordStore::new();
        store.set_track_name("t0", "First Song");

        let window = test.samples[0].clone();
        let report = Evaluator::default()
            .evaluate(&shared, &test, &tracks(2), &store, 4, Some(&window))
            .unwrap();
        assert_eq!(report.test_samples, 6);
        assert_eq!(report.track_accuracy.tracks.len(), 2);
        assert_eq!(report.breakout_tracks.len(), 2);
        assert_eq!(report.forecast.len(), 2);
        assert_eq!(report.forecast[0].track_name, "First Song");
        assert!((0.0..=100.0).contains(&report.consistent_accuracy));

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["feature_importance"][0]["importance_score"].is_number());
        assert!(json["breakout_tracks"][0]["risk_level"].is_string());

        assert!(matches!(
            Evaluator::default().evaluate(&shared, &SplitData::default(), &tracks(2), &store, 4, None),
            Err(TrainingError::EmptySplit("test"))
        ));
    }
}
