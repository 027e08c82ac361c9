// projeto: streamtrend
// file: src/neural/data.rs
// Observation records and CSV ingestion into the record store

use chrono::{DateTime, NaiveDate};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::neural::utils::TrainingError;

/// One (track, day) measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub track_id: String,
    pub streams: f64,
    pub danceability: f64,
    pub energy: f64,
    pub valence: f64,
    pub acousticness: f64,
}

/// Observations keyed by (track_id, date); later rows overwrite earlier ones.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Vec<Observation>,
    index: HashMap<(String, NaiveDate), usize>,
    track_names: HashMap<String, String>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, observation: Observation) {
        let key = (observation.track_id.clone(), observation.date);
        match self.index.get(&key) {
            Some(&pos) => self.records[pos] = observation,
            None => {
                self.index.insert(key, self.records.len());
                self.records.push(observation);
            }
        }
    }

    pub fn set_track_name(&mut self, track_id: &str, name: &str) {
        if !name.is_empty() {
            self.track_names.insert(track_id.to_string(), name.to_string());
        }
    }

    /// Display name for a track, falling back to its id.
    pub fn track_name(&self, track_id: &str) -> String {
        self.track_names.get(track_id).cloned().unwrap_or_else(|| track_id.to_string())
    }

    /// Records in first-seen order of their (track, date) key.
    pub fn records(&self) -> &[Observation] {
        &self.records
    }

    #[cfg(test)]
    pub fn get(&self, track_id: &str, date: NaiveDate) -> Option<&Observation> {
        self.index.get(&(track_id.to_string(), date)).map(|&pos| &self.records[pos])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct track ids in order of first appearance.
    pub fn track_ids(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.records.iter()
            .filter(|r| seen.insert(r.track_id.as_str()))
            .map(|r| r.track_id.clone())
            .collect()
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, TrainingError> {
        let path = path.as_ref();
        info!("📥 Loading streaming history from {}", path.display());
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Parses CSV text. Columns are located by case-insensitive substring
    /// match on the header and may appear in any order.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TrainingError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let columns = ColumnMap::from_headers(&headers);
        debug!("🔎 Column mapping: {:?}", columns);

        let mut store = RecordStore::new();
        let mut skipped = 0usize;

        for (line, row) in csv_reader.records().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!("⚠️ Skipping malformed row {}: {}", line + 2, e);
                    skipped += 1;
                    continue;
                }
            };

            match columns.parse_row(&row) {
                Some((observation, name)) => {
                    if let Some(name) = name {
                        store.set_track_name(&observation.track_id, &name);
                    }
                    store.insert(observation);
                }
                None => skipped += 1,
            }
        }

        if store.is_empty() {
            return Err(TrainingError::Ingestion(
                format!("no usable rows found ({} rows skipped)", skipped)
            ));
        }

        info!("✅ Ingested {} observations for {} tracks ({} rows skipped)",
              store.len(), store.track_ids().len(), skipped);
        Ok(store)
    }
}

#[derive(Debug, Default)]
struct ColumnMap {
    date: Option<usize>,
    track_id: Option<usize>,
    track_name: Option<usize>,
    streams: Option<usize>,
    danceability: Option<usize>,
    energy: Option<usize>,
    valence: Option<usize>,
    acousticness: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let lowered: Vec<String> = headers.iter().map(|h| h.to_lowercase()).collect();
        let find = |needles: &[&str]| -> Option<usize> {
            needles.iter().find_map(|needle| lowered.iter().position(|h| h.contains(needle)))
        };

        let track_id = find(&["track_id", "trackid", "track id"]).or_else(|| {
            lowered.iter().position(|h| h.contains("track") && !h.contains("name"))
        });

        ColumnMap {
            date: find(&["date"]),
            track_id,
            track_name: find(&["track_name", "trackname", "title", "name"]),
            streams: find(&["stream"]),
            danceability: find(&["danceability"]),
            energy: find(&["energy"]),
            valence: find(&["valence"]),
            acousticness: find(&["acousticness"]),
        }
    }

    fn parse_row(&self, row: &csv::StringRecord) -> Option<(Observation, Option<String>)> {
        let field = |idx: Option<usize>| idx.and_then(|i| row.get(i)).map(str::trim);
        let number = |idx: Option<usize>| field(idx).and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .unwrap_or(0.0);

        let track_id = field(self.track_id).filter(|v| !v.is_empty())?;
        let date = field(self.date).and_then(parse_date)?;

        let observation = Observation {
            date,
            track_id: track_id.to_string(),
            streams: number(self.streams).max(0.0),
            danceability: number(self.danceability),
            energy: number(self.energy),
            valence: number(self.valence),
            acousticness: number(self.acousticness),
        };
        let name = field(self.track_name).filter(|v| !v.is_empty()).map(str::to_string);
        Some((observation, name))
    }
}

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d.%m.%Y", "%m/%d/%Y"];

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DATE_FORMATS.iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_columns_in_any_order_and_case() {
        let csv = "Energy,STREAMS,Track_ID,Date,Danceability,valence,Acousticness\n\
                   0.5,100,a,2024-01-01,0.7,0.1,0.2\n";
        let store = RecordStore::from_reader(csv.as_bytes()).unwrap();
        let obs = store.get("a", day(1)).unwrap();
        assert_eq!(obs.streams, 100.0);
        assert_eq!(obs.energy, 0.5);
        assert_eq!(obs.danceability, 0.7);
        assert_eq!(obs.valence, 0.1);
        assert_eq!(obs.acousticness, 0.2);
    }

    #[test]
    fn test_unparsable_numbers_default_to_zero() {
        let csv = "date,track_id,streams,danceability,energy\n2024-01-01,a,n/a,,abc\n";
        let store = RecordStore::from_reader(csv.as_bytes()).unwrap();
        let obs = store.get("a", day(1)).unwrap();
        assert_eq!(obs.streams, 0.0);
        assert_eq!(obs.danceability, 0.0);
        assert_eq!(obs.energy, 0.0);
    }

    #[test]
    fn test_rows_without_track_or_date_are_dropped() {
        let csv = "date,track_id,streams\n\
                   2024-01-01,,5\n\
                   ,b,6\n\
                   not-a-date,c,7\n\
                   2024-01-02,d,8\n";
        let store = RecordStore::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.track_ids(), vec!["d".to_string()]);
    }

    #[test]
    fn test_zero_usable_rows_is_an_error() {
        let csv = "date,track_id,streams\n,,1\n";
        assert!(matches!(
            RecordStore::from_reader(csv.as_bytes()),
            Err(TrainingError::Ingestion(_))
        ));
    }

    #[test]
    fn test_duplicate_key_keeps_last_seen() {
        let csv = "date,track_id,streams\n2024-01-01,a,1\n2024-01-01,a,9\n";
        let store = RecordStore::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a", day(1)).unwrap().streams, 9.0);
    }

    #[test]
    fn test_quoted_fields_and_track_names() {
        let csv = "date,track_id,track_name,streams\n2024-01-03,x1,\"Hello, World\",42\n";
        let store = RecordStore::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(store.track_name("x1"), "Hello, World");
        assert_eq!(store.track_name("missing"), "missing");
    }

    #[test]
    fn test_date_formats() {
        assert_eq!(parse_date("2024-01-05"), Some(day(5)));
        assert_eq!(parse_date("05.01.2024"), Some(day(5)));
        assert_eq!(parse_date("2024-01-05T10:00:00Z"), Some(day(5)));
        assert_eq!(parse_date("yesterday"), None);
    }
}
