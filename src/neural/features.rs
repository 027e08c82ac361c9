// projeto: streamtrend
// file: src/neural/features.rs
// Top-N track selection and per-track min-max feature scaling

use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::neural::data::{Observation, RecordStore};

/// Features fed to the window builder, in per-track slot order.
pub const FEATURE_NAMES: [&str; 3] = ["streams", "danceability", "energy"];
pub const FEATURES_PER_TRACK: usize = FEATURE_NAMES.len();

/// Ordered set of selected track ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSet {
    ids: Vec<String>,
}

impl TrackSet {
    pub fn new(ids: Vec<String>) -> Self {
        TrackSet { ids }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn position(&self, track_id: &str) -> Option<usize> {
        self.ids.iter().position(|id| id == track_id)
    }

    /// Width of one day vector (and of one label vector).
    pub fn feature_width(&self) -> usize {
        self.ids.len() * FEATURES_PER_TRACK
    }
}

/// Output of `TrackSelector::select` or `TrackSelector::restrict`.
#[derive(Debug, Clone)]
pub struct TrackSelection {
    pub tracks: TrackSet,
    /// (track_id, total streams) for the kept tracks, ranked.
    pub totals: Vec<(String, f64)>,
    pub records: Vec<Observation>,
}

#[derive(Debug, Clone, Copy)]
pub struct TrackSelector {
    pub top_n: usize,
}

impl TrackSelector {
    pub fn new(top_n: usize) -> Self {
        TrackSelector { top_n }
    }

    pub fn select(&self, store: &RecordStore) -> TrackSelection {
        let mut order: Vec<String> = Vec::new();
        let mut totals: HashMap<&str, f64> = HashMap::new();
        for record in store.records() {
            let entry = totals.entry(record.track_id.as_str()).or_insert_with(|| {
                order.push(record.track_id.clone());
                0.0
            });
            *entry += record.streams;
        }

        let mut ranked: Vec<(String, f64)> = order.into_iter()
            .map(|id| {
                let total = totals[id.as_str()];
                (id, total)
            })
            .collect();
        // stable: equal totals keep first-seen order
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(self.top_n);

        let tracks = TrackSet::new(ranked.iter().map(|(id, _)| id.clone()).collect());
        info!("🎯 Selected {} of {} tracks by total streams", tracks.len(), totals.len());
        TrackSelection { records: records_for(store, &tracks), tracks, totals: ranked }
    }

    /// Keeps a fixed track set in its given order, e.g. the tracks a saved
    /// model was trained on. Tracks absent from the store get a zero total.
    pub fn restrict(store: &RecordStore, tracks: &TrackSet) -> TrackSelection {
        let records = records_for(store, tracks);
        let totals = tracks.ids().iter()
            .map(|id| {
                let total = records.iter().filter(|r| &r.track_id == id).map(|r| r.streams).sum();
                (id.clone(), total)
            })
            .collect::<Vec<(String, f64)>>();

        for (id, _) in totals.iter().filter(|(_, total)| *total == 0.0) {
            warn!("⚠️ Track {} has no streams in the input", id);
        }
        debug!("🎯 Restricted input to {} known tracks", tracks.len());
        TrackSelection { tracks: tracks.clone(), totals, records }
    }
}

fn records_for(store: &RecordStore, tracks: &TrackSet) -> Vec<Observation> {
    store.records().iter()
        .filter(|r| tracks.position(&r.track_id).is_some())
        .cloned()
        .collect()
}

/// An observation with its three scaled features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedObservation {
    pub raw: Observation,
    pub streams_norm: f64,
    pub danceability_norm: f64,
    pub energy_norm: f64,
}

impl NormalizedObservation {
    pub fn features(&self) -> [f64; FEATURES_PER_TRACK] {
        [self.streams_norm, self.danceability_norm, self.energy_norm]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackScaling {
    pub mins: [f64; FEATURES_PER_TRACK],
    pub maxs: [f64; FEATURES_PER_TRACK],
}

impl TrackScaling {
    /// Flat series map to 0.5.
    pub fn scale(&self, feature: usize, value: f64) -> f64 {
        let (min, max) = (self.mins[feature], self.maxs[feature]);
        if max > min {
            (value - min) / (max - min)
        } else {
            0.5
        }
    }
}

/// Normalized records for one track selection, indexed by (track slot, date).
#[derive(Debug, Clone)]
pub struct NormalizedSet {
    pub tracks: TrackSet,
    observations: Vec<NormalizedObservation>,
    index: HashMap<(usize, NaiveDate), usize>,
}

impl NormalizedSet {
    #[cfg(test)]
    pub fn observations(&self) -> &[NormalizedObservation] {
        &self.observations
    }

    pub fn get(&self, track_slot: usize, date: NaiveDate) -> Option<&NormalizedObservation> {
        self.index.get(&(track_slot, date)).map(|&i| &self.observations[i])
    }

    /// Distinct observation dates, ascending.
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.observations.iter().map(|o| o.raw.date).collect();
        dates.sort_unstable();
        dates.dedup();
        dates
    }
}

pub struct FeatureNormalizer;

impl FeatureNormalizer {
    pub fn fit(selection: &TrackSelection) -> NormalizedSet {
        let tracks = selection.tracks.clone();
        let mut scaling = vec![
            TrackScaling {
                mins: [f64::INFINITY; FEATURES_PER_TRACK],
                maxs: [f64::NEG_INFINITY; FEATURES_PER_TRACK],
            };
            tracks.len()
        ];

        let slots: Vec<usize> = selection.records.iter()
            .map(|r| tracks.position(&r.track_id).unwrap_or(usize::MAX))
            .collect();

        for (record, &slot) in selection.records.iter().zip(&slots) {
            let Some(s) = scaling.get_mut(slot) else { continue };
            for (f, value) in raw_features(record).into_iter().enumerate() {
                s.mins[f] = s.mins[f].min(value);
                s.maxs[f] = s.maxs[f].max(value);
            }
        }

        let mut observations = Vec::with_capacity(selection.records.len());
        let mut index = HashMap::new();
        for (record, &slot) in selection.records.iter().zip(&slots) {
            let Some(s) = scaling.get(slot) else { continue };
            let raw = raw_features(record);
            index.insert((slot, record.date), observations.len());
            observations.push(NormalizedObservation {
                raw: record.clone(),
                streams_norm: s.scale(0, raw[0]),
                danceability_norm: s.scale(1, raw[1]),
                energy_norm: s.scale(2, raw[2]),
            });
        }

        debug!("📊 Normalized {} observations across {} tracks", observations.len(), tracks.len());
        NormalizedSet { tracks, observations, index }
    }
}

fn raw_features(record: &Observation) -> [f64; FEATURES_PER_TRACK] {
    [record.streams, record.danceability, record.energy]
}
