//! Output file naming and existence checks.

use chrono::{DateTime, Utc};
use std::io;
use std::path::Path;

/// Build the parquet file name for one (instrument, data type) pair
/// and the UTC date of `t`: `<instrument>_<dataType>_<YYYY-MM-DD>.parquet`.
pub fn build_file_name(data_type: &str, instrument: &str, t: DateTime<Utc>) -> String {
    format!("{}_{}_{}.parquet", instrument, data_type, t.format("%Y-%m-%d"))
}

/// Whether `path` exists.
///
/// Any stat error other than NotFound also counts as existing, so an
/// unreadable target never gets overwritten; the underlying error is
/// surfaced through the diagnostic log.
pub fn file_exists(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(_) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => {
            tracing::warn!("stat {} failed, treating as existing: {err}", path.display());
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn file_name_uses_utc_date() {
        let t = Utc.with_ymd_and_hms(2023, 10, 15, 12, 34, 56).unwrap();
        assert_eq!(
            build_file_name("trade", "BTCUSDT", t),
            "BTCUSDT_trade_2023-10-15.parquet"
        );
    }

    #[test]
    fn file_name_covers_all_data_types() {
        let t = Utc.with_ymd_and_hms(2025, 2, 19, 0, 0, 0).unwrap();
        for data_type in ["trade", "aggTrade", "orderBookDiff", "bestPrice", "snapshot"] {
            let name = build_file_name(data_type, "ETHUSDT", t);
            assert_eq!(name, format!("ETHUSDT_{data_type}_2025-02-19.parquet"));
        }
    }

    #[test]
    fn exists_reports_present_and_absent_paths() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.parquet");
        std::fs::write(&present, b"x").unwrap();
        assert!(file_exists(&present));
        assert!(!file_exists(&dir.path().join("absent.parquet")));
    }
}
