// projeto: streamtrend
// file: src/neural/dataset.rs
// Sliding-window sample/label construction and the ordered train/test split

use chrono::NaiveDate;
use log::{debug, info, warn};
use ndarray::{Array1, Array2};

use crate::neural::features::{NormalizedSet, TrackSet, FEATURES_PER_TRACK};
use crate::neural::utils::TrainingError;

/// Days ahead of the anchor that carry a label.
pub const HORIZONS: usize = 3;

/// Samples and labels in anchor-date order.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub tracks: TrackSet,
    pub window_size: usize,
    pub samples: Vec<Array2<f64>>,
    pub labels: Vec<Array1<f64>>,
    pub anchors: Vec<NaiveDate>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One side of the train/test split.
#[derive(Debug, Clone, Default)]
pub struct SplitData {
    pub samples: Vec<Array2<f64>>,
    pub labels: Vec<Array1<f64>>,
    pub anchors: Vec<NaiveDate>,
}

impl SplitData {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WindowBuilder {
    pub window_size: usize,
}

impl WindowBuilder {
    pub fn new(window_size: usize) -> Self {
        WindowBuilder { window_size }
    }

    pub fn build(&self, set: &NormalizedSet) -> Dataset {
        let dates = set.dates();
        let w = self.window_size;
        let mut dataset = Dataset {
            tracks: set.tracks.clone(),
            window_size: w,
            samples: Vec::new(),
            labels: Vec::new(),
            anchors: Vec::new(),
        };

        if dates.len() <= w + HORIZONS {
            warn!("⚠️ Only {} distinct dates: need more than {} for a single window", dates.len(), w + HORIZONS);
            return dataset;
        }

        for i in w..dates.len() - HORIZONS {
            let sample = day_matrix(set, &dates[i - w..i]);
            if sample.nrows() != w {
                continue;
            }
            let label = horizon_labels(set, dates[i], &dates[i + 1..=i + HORIZONS]);
            dataset.samples.push(sample);
            dataset.labels.push(label);
            dataset.anchors.push(dates[i]);
        }

        info!("🔧 Built {} windows of {} days x {} features", dataset.len(), w, set.tracks.feature_width());
        dataset
    }

    /// Input window made of the last `window_size` dates, used to forecast
    /// the days after the data ends.
    pub fn latest_window(&self, set: &NormalizedSet) -> Option<Array2<f64>> {
        let dates = set.dates();
        if dates.len() < self.window_size || self.window_size == 0 {
            return None;
        }
        Some(day_matrix(set, &dates[dates.len() - self.window_size..]))
    }
}

/// One row per date; absent (track, date) pairs stay zero.
fn day_matrix(set: &NormalizedSet, days: &[NaiveDate]) -> Array2<f64> {
    let width = set.tracks.feature_width();
    let mut matrix = Array2::zeros((days.len(), width));
    for (row, &date) in days.iter().enumerate() {
        for slot in 0..set.tracks.len() {
            if let Some(obs) = set.get(slot, date) {
                for (f, value) in obs.features().into_iter().enumerate() {
                    matrix[[row, slot * FEATURES_PER_TRACK + f]] = value;
                }
            }
        }
    }
    matrix
}

/// Missing anchor or future observations count as "not an increase".
fn horizon_labels(set: &NormalizedSet, anchor: NaiveDate, future: &[NaiveDate]) -> Array1<f64> {
    let mut label = Array1::zeros(set.tracks.len() * HORIZONS);
    for slot in 0..set.tracks.len() {
        let Some(base) = set.get(slot, anchor) else { continue };
        for (h, &date) in future.iter().enumerate() {
            if let Some(obs) = set.get(slot, date) {
                if obs.raw.streams > base.raw.streams {
                    label[slot * HORIZONS + h] = 1.0;
                }
            }
        }
    }
    label
}

#[derive(Debug, Clone, Copy)]
pub struct DatasetSplitter {
    pub train_ratio: f64,
}

impl DatasetSplitter {
    pub fn new(train_ratio: f64) -> Result<Self, TrainingError> {
        if !(0.0..=1.0).contains(&train_ratio) {
            return Err(TrainingError::DataProcessing(
                format!("train ratio must lie in [0, 1], got {}", train_ratio)
            ));
        }
        Ok(DatasetSplitter { train_ratio })
    }

    pub fn split_index(&self, total: usize) -> usize {
        ((total as f64 * self.train_ratio).floor() as usize).min(total)
    }

    /// Ordered split: train is the prefix, test the suffix.
    pub fn split(&self, dataset: Dataset) -> (SplitData, SplitData) {
        let split_index = self.split_index(dataset.len());
        let Dataset { mut samples, mut labels, mut anchors, .. } = dataset;

        let test = SplitData {
            samples: samples.split_off(split_index),
            labels: labels.split_off(split_index),
            anchors: anchors.split_off(split_index),
        };
        let train = SplitData { samples, labels, anchors };

        debug!("✂️ Split at {}: train={} test={}", split_index, train.len(), test.len());
        (train, test)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::data::{Observation, RecordStore};
    use crate::neural::features::{FeatureNormalizer, TrackSelector};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap() + chrono::Days::new(d as u64)
    }

    fn obs(track: &str, d: u32, streams: f64) -> Observation {
        Observation {
            date: date(d),
            track_id: track.to_string(),
            streams,
            danceability: 0.5,
            energy: d as f64 / 100.0,
            valence: 0.0,
            acousticness: 0.0,
        }
    }

    fn normalized(rows: Vec<Observation>, top_n: usize) -> NormalizedSet {
        let mut store = RecordStore::new();
        for row in rows {
            store.insert(row);
        }
        FeatureNormalizer::fit(&TrackSelector::new(top_n).select(&store))
    }

    #[test]
    fn test_window_count_and_shapes() {
        let rows: Vec<Observation> = (0..20)
            .flat_map(|d| vec![obs("a", d, 100.0 + d as f64), obs("b", d, 50.0)])
            .collect();
        let set = normalized(rows, 10);
        let dataset = WindowBuilder::new(7).build(&set);
        assert_eq!(dataset.len(), 20 - 7 - 3);
        for (sample, label) in dataset.samples.iter().zip(&dataset.labels) {
            assert_eq!(sample.dim(), (7, 6));
            assert_eq!(label.len(), 6);
            assert!(label.iter().all(|&v| v == 0.0 || v == 1.0));
        }
        assert_eq!(dataset.anchors[0], date(7));
    }

    #[test]
    fn test_too_few_dates_yields_empty_dataset() {
        let rows: Vec<Observation> = (0..10).map(|d| obs("a", d, 1.0)).collect();
        let dataset = WindowBuilder::new(7).build(&normalized(rows, 10));
        assert!(dataset.is_empty());
    }

    #[test]
    fn test_one_date_past_the_minimum_gives_one_window() {
        let rows: Vec<Observation> = (0..7 + 4).map(|d| obs("a", d, d as f64)).collect();
        let dataset = WindowBuilder::new(7).build(&normalized(rows, 10));
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.anchors, vec![date(7)]);
        assert_eq!(dataset.samples[0].dim(), (7, 3));
        assert_eq!(dataset.labels[0].to_vec(), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_horizon_labels_against_anchor() {
        // anchor index 2 (streams 10), futures 20, 15, 30
        let streams = [1.0, 2.0, 10.0, 20.0, 15.0, 30.0, 5.0];
        let rows: Vec<Observation> = streams.iter().enumerate()
            .map(|(d, &s)| obs("a", d as u32, s))
            .collect();
        let dataset = WindowBuilder::new(2).build(&normalized(rows, 1));
        assert_eq!(dataset.anchors[0], date(2));
        assert_eq!(dataset.labels[0].to_vec(), vec![1.0, 1.0, 1.0]);
        // anchor 20 with futures 15, 30, 5
        assert_eq!(dataset.labels[1].to_vec(), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_missing_days_are_zero_and_not_increases() {
        let mut rows: Vec<Observation> = (0..12).map(|d| obs("a", d, d as f64)).collect();
        // track b only appears on the first and last days
        rows.push(obs("b", 0, 1000.0));
        rows.push(obs("b", 11, 2000.0));
        let set = normalized(rows, 2);
        let b = set.tracks.position("b").unwrap();
        let dataset = WindowBuilder::new(3).build(&set);
        let first = &dataset.samples[0];
        for day in 0..3 {
            let slice = first.row(day).to_vec();
            let b_slice = &slice[b * 3..b * 3 + 3];
            if day == 0 {
                assert!(b_slice.iter().any(|&v| v != 0.0));
            } else {
                assert!(b_slice.iter().all(|&v| v == 0.0));
            }
        }
        for label in &dataset.labels {
            assert!(label.slice(ndarray::s![b * 3..b * 3 + 3]).iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_latest_window_uses_last_dates() {
        let rows: Vec<Observation> = (0..12).map(|d| obs("a", d, d as f64)).collect();
        let set = normalized(rows, 1);
        let window = WindowBuilder::new(4).latest_window(&set).unwrap();
        assert_eq!(window.dim(), (4, 3));
        assert_eq!(window[[3, 0]], 1.0);
    }

    #[test]
    fn test_split_is_ordered_prefix_suffix() {
        let rows: Vec<Observation> = (0..30).map(|d| obs("a", d, (d % 4) as f64)).collect();
        let dataset = WindowBuilder::new(7).build(&normalized(rows, 1));
        let total = dataset.len();
        let (train, test) = DatasetSplitter::new(0.8).unwrap().split(dataset);
        assert_eq!(train.len(), (total as f64 * 0.8).floor() as usize);
        assert_eq!(train.len() + test.len(), total);
        let last_train = *train.anchors.last().unwrap();
        assert!(test.anchors.iter().all(|&a| a > last_train));
    }

    #[test]
    fn test_invalid_ratio_rejected() {
        assert!(DatasetSplitter::new(1.5).is_err());
        assert_eq!(DatasetSplitter::new(0.0).unwrap().split_index(10), 0);
    }
}
