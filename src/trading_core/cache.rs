//! Session data files
//!
//! One file per trading day in a data directory:
//! - `<date>.json.zst` - zstd-compressed `SessionData`
//! - `<date>.csv` - candle rows only (`timestamp,open,high,low,close,volume`)
//!
//! CSV sessions start at the 09:30 New York open of their date.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::types::{Candle, DepthSnapshot};

const ZST_SUFFIX: &str = ".json.zst";
const CSV_SUFFIX: &str = ".csv";

/// Everything needed to replay one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub symbol: String,
    pub date: String,
    pub session_start: DateTime<Utc>,
    /// Falls back to the first session candle's open
    #[serde(default)]
    pub daily_open: Option<f64>,
    pub candles: Vec<Candle>,
    #[serde(default)]
    pub depth: Vec<DepthSnapshot>,
}

impl SessionData {
    /// Index of the first candle at or after the session start
    pub fn session_start_index(&self) -> usize {
        self.candles.partition_point(|c| c.timestamp < self.session_start)
    }

    pub fn daily_open(&self) -> Option<f64> {
        self.daily_open.or_else(|| {
            self.candles
                .get(self.session_start_index())
                .or_else(|| self.candles.last())
                .map(|c| c.open)
        })
    }
}

/// 09:30 America/New_York on `date` (YYYYMMDD)
pub fn rth_open(date: &str) -> Result<DateTime<Utc>> {
    let day = NaiveDate::parse_from_str(date, "%Y%m%d").with_context(|| format!("Invalid session date {}", date))?;
    let Some(open) = day.and_hms_opt(9, 30, 0) else {
        bail!("Invalid session open for {}", date);
    };
    match New_York.from_local_datetime(&open).earliest() {
        Some(local) => Ok(local.with_timezone(&Utc)),
        None => bail!("Session open does not exist in New York time on {}", date),
    }
}

/// Load one session, preferring the compressed JSON form
pub fn load_session(date: &str, data_dir: &Path, symbol: &str) -> Result<Option<SessionData>> {
    let zst = data_dir.join(format!("{}{}", date, ZST_SUFFIX));
    if zst.exists() {
        let compressed = std::fs::read(&zst).with_context(|| format!("Reading {}", zst.display()))?;
        let json = zstd::decode_all(&compressed[..]).with_context(|| format!("Decompressing {}", zst.display()))?;
        let data: SessionData = serde_json::from_slice(&json).with_context(|| format!("Parsing {}", zst.display()))?;
        return Ok(Some(data));
    }

    let csv_path = data_dir.join(format!("{}{}", date, CSV_SUFFIX));
    if csv_path.exists() {
        let candles = read_candles_csv(&csv_path)?;
        return Ok(Some(SessionData {
            symbol: symbol.to_string(),
            date: date.to_string(),
            session_start: rth_open(date)?,
            daily_open: None,
            candles,
            depth: Vec::new(),
        }));
    }

    Ok(None)
}

fn read_candles_csv(path: &Path) -> Result<Vec<Candle>> {
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("Opening {}", path.display()))?;
    let mut candles = Vec::new();
    for (row, record) in reader.deserialize::<Candle>().enumerate() {
        let candle = record.with_context(|| format!("{} row {}", path.display(), row + 1))?;
        candles.push(candle);
    }
    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}

/// Write a session as `<date>.json.zst`
pub fn write_session(data: &SessionData, data_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(data_dir)?;
    let path = data_dir.join(format!("{}{}", data.date, ZST_SUFFIX));
    let json = serde_json::to_vec(data)?;
    let compressed = zstd::encode_all(&json[..], 3)?;
    std::fs::write(&path, compressed).with_context(|| format!("Writing {}", path.display()))?;
    Ok(path)
}

/// Dates with session data, sorted and deduplicated across formats
pub fn get_session_dates(data_dir: &Path) -> Result<Vec<String>> {
    if !data_dir.exists() {
        return Ok(vec![]);
    }

    let mut dates = Vec::new();
    for entry in std::fs::read_dir(data_dir)? {
        let entry = entry?;
        let filename = entry.file_name().to_string_lossy().to_string();
        if let Some(date) = filename
            .strip_suffix(ZST_SUFFIX)
            .or_else(|| filename.strip_suffix(CSV_SUFFIX))
        {
            dates.push(date.to_string());
        }
    }

    dates.sort();
    dates.dedup();
    Ok(dates)
}

/// date_filter can be:
/// - Single date: "20250915"
/// - Month prefix: "202509"
/// - Date range: "20250901:20251120" (inclusive)
pub fn filter_dates(dates: Vec<String>, date_filter: Option<&str>) -> Vec<String> {
    let Some(filter) = date_filter else {
        return dates;
    };
    match filter.split_once(':') {
        Some((start, end)) if !end.contains(':') => dates
            .into_iter()
            .filter(|d| d.as_str() >= start && d.as_str() <= end)
            .collect(),
        _ => dates.into_iter().filter(|d| d.contains(filter)).collect(),
    }
}

/// Load every session matching the filter. Unreadable files are skipped.
pub fn load_all_sessions(data_dir: &Path, date_filter: Option<&str>, symbol: &str) -> Result<Vec<SessionData>> {
    let dates = filter_dates(get_session_dates(data_dir)?, date_filter);
    info!("Loading {} sessions from {}...", dates.len(), data_dir.display());

    let sessions: Vec<_> = dates
        .iter()
        .filter_map(|date| match load_session(date, data_dir, symbol) {
            Ok(Some(data)) => Some(data),
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to load session {}: {:#}", date, e);
                None
            }
        })
        .collect();

    info!("Loaded {} sessions", sessions.len());
    Ok(sessions)
}
