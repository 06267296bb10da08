//! Station ordinal codes per line.
//!
//! Codes come from a CSV export with `station_name,line_id,ordinal_code` columns.
//! Smaller codes sit closer to the line's origin terminus.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct CatalogRow {
    station_name: String,
    line_id: String,
    ordinal_code: i64,
}

/// Drops surrounding whitespace and a trailing `역` ("station").
pub fn normalize_station_name(name: &str) -> String {
    let trimmed = name.trim();
    match trimmed.strip_suffix('역') {
        Some(base) if !base.is_empty() => base.trim_end().to_string(),
        _ => trimmed.to_string(),
    }
}

#[derive(Debug, Default, Clone)]
pub struct StationCatalog {
    codes: HashMap<(String, String), i64>,
}

impl StationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut catalog = Self::new();
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        for row in rdr.deserialize::<CatalogRow>() {
            let row = row?;
            catalog.insert(&row.line_id, &row.station_name, row.ordinal_code);
        }
        debug!(entries = catalog.len(), "station catalog loaded");
        Ok(catalog)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, csv::Error> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Builds a catalog for one line from stops in ordinal order, numbering from `first_code`.
    pub fn with_line(mut self, line_id: &str, stops: &[&str], first_code: i64) -> Self {
        for (i, stop) in stops.iter().enumerate() {
            self.insert(line_id, stop, first_code + i as i64);
        }
        self
    }

    pub fn insert(&mut self, line_id: &str, station_name: &str, code: i64) {
        self.codes
            .insert((line_id.to_string(), normalize_station_name(station_name)), code);
    }

    pub fn ordinal(&self, line_id: &str, station_name: &str) -> Option<i64> {
        self.codes
            .get(&(line_id.to_string(), normalize_station_name(station_name)))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}
