//! Tick-cache ingestion and sampling.
//!
//! Historical trades live in per-symbol cache directories as CSV chunks
//! named `<start>_<end>_<first_ts>_<last_ts>.csv` with columns
//! `timestamp,qty,price`. Raw trades are aggregated into uniform samples
//! before replay: qty accumulates inside a bucket, price is the last trade
//! price, and empty buckets carry the previous price forward as heartbeats.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::market::Tick;

/// Default sample bucket of one second.
pub const DEFAULT_SAMPLE_MS: i64 = 1_000;

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("failed to read tick cache {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse tick cache {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("no cached ticks in {path} between {start_ts} and {end_ts}")]
    EmptyWindow {
        path: PathBuf,
        start_ts: i64,
        end_ts: i64,
    },
}

/// Aggregate raw trades into fixed-interval samples.
pub fn sample_ticks(ticks: &[Tick], sample_size_ms: i64) -> Vec<Tick> {
    let (Some(first), Some(last)) = (ticks.first(), ticks.last()) else {
        return Vec::new();
    };
    let first_ts = first.timestamp / sample_size_ms * sample_size_ms;
    let last_ts = last.timestamp / sample_size_ms * sample_size_ms;
    let n = ((last_ts - first_ts) / sample_size_ms + 1) as usize;
    let mut samples: Vec<Tick> = (0..n)
        .map(|i| Tick {
            timestamp: first_ts + i as i64 * sample_size_ms,
            qty: 0.0,
            price: 0.0,
        })
        .collect();
    let mut k = 0;
    for tick in ticks {
        let bucket_ts = tick.timestamp / sample_size_ms * sample_size_ms;
        while samples[k].timestamp < bucket_ts {
            let carry = samples[k].price;
            k += 1;
            samples[k].price = carry;
        }
        samples[k].qty += tick.qty;
        samples[k].price = tick.price;
    }
    samples
}

/// Read one cache chunk.
pub fn load_ticks_csv(path: &Path) -> Result<Vec<Tick>, DataError> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| DataError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    let mut ticks = Vec::new();
    for row in reader.deserialize::<Tick>() {
        ticks.push(row.map_err(|source| DataError::Csv {
            path: path.to_path_buf(),
            source,
        })?);
    }
    Ok(ticks)
}

/// Time coverage encoded in a cache chunk's file name.
fn chunk_span(path: &Path) -> Option<(i64, i64)> {
    let stem = path.file_stem()?.to_str()?;
    let parts: Vec<i64> = stem.split('_').filter_map(|p| p.parse().ok()).collect();
    if parts.len() != 4 {
        return None;
    }
    Some((parts[2], parts[3]))
}

/// Load every cache chunk intersecting `[start_ts, end_ts]`, filtered to the
/// window and sorted by timestamp. Chunks with unparseable names are skipped
/// with a warning.
pub fn load_cached_ticks(dir: &Path, start_ts: i64, end_ts: i64) -> Result<Vec<Tick>, DataError> {
    let entries = std::fs::read_dir(dir).map_err(|source| DataError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut chunk_paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map_or(false, |ext| ext == "csv"))
        .collect();
    chunk_paths.sort();

    let mut ticks: Vec<Tick> = Vec::new();
    for path in chunk_paths {
        let Some((first_ts, last_ts)) = chunk_span(&path) else {
            warn!(path = %path.display(), "skipping cache chunk with unparseable name");
            continue;
        };
        if first_ts > end_ts || last_ts < start_ts {
            continue;
        }
        debug!(path = %path.display(), "loading tick cache chunk");
        let chunk = load_ticks_csv(&path)?;
        ticks.extend(
            chunk
                .into_iter()
                .filter(|t| t.timestamp >= start_ts && t.timestamp <= end_ts),
        );
    }
    if ticks.is_empty() {
        return Err(DataError::EmptyWindow {
            path: dir.to_path_buf(),
            start_ts,
            end_ts,
        });
    }
    ticks.sort_by_key(|t| t.timestamp);
    Ok(ticks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(timestamp: i64, qty: f64, price: f64) -> Tick {
        Tick {
            timestamp,
            qty,
            price,
        }
    }

    #[test]
    fn test_sampling_accumulates_qty_and_keeps_last_price() {
        let ticks = vec![
            tick(1_100, 1.0, 100.0),
            tick(1_900, 2.0, 101.0),
            tick(3_050, 1.0, 99.0),
        ];
        let samples = sample_ticks(&ticks, 1_000);
        assert_eq!(samples.len(), 3);
        // Both trades of the first second merged.
        assert_eq!(samples[0], tick(1_000, 3.0, 101.0));
        // Empty second carries the price forward as a heartbeat.
        assert_eq!(samples[1], tick(2_000, 0.0, 101.0));
        assert_eq!(samples[2], tick(3_000, 1.0, 99.0));
    }

    #[test]
    fn test_sampling_empty_input() {
        assert!(sample_ticks(&[], 1_000).is_empty());
    }

    #[test]
    fn test_chunk_span_parsing() {
        let span = chunk_span(Path::new("/tmp/1000_2000_1612345_1698765.csv"));
        assert_eq!(span, Some((1_612_345, 1_698_765)));
        assert_eq!(chunk_span(Path::new("/tmp/notachunk.csv")), None);
    }

    #[test]
    fn test_load_cached_ticks_filters_window() {
        let dir = std::env::temp_dir().join("grid_lab_data_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("0_0_1000_4000.csv");
        std::fs::write(&path, "timestamp,qty,price\n1000,1.0,100.0\n2500,2.0,101.0\n4000,1.0,102.0\n").unwrap();

        let ticks = load_cached_ticks(&dir, 2_000, 3_000).unwrap();
        assert_eq!(ticks, vec![tick(2_500, 2.0, 101.0)]);

        // Disjoint window: nothing survives.
        assert!(load_cached_ticks(&dir, 10_000, 20_000).is_err());

        std::fs::remove_file(&path).unwrap();
    }
}
