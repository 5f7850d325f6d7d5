use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

fn stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

fn slug(label: &str) -> String {
    let slug: String = label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    slug.trim_matches('_').to_string()
}

/// Raw batch file: `{dir}/raw_{label}_{YYYYMMDD_HHMMSS}.csv`
pub fn raw_batch_filename(dir: &Path, label: &str, at: DateTime<Utc>) -> PathBuf {
    let label = slug(label);
    let name = if label.is_empty() {
        format!("raw_{}.csv", stamp(at))
    } else {
        format!("raw_{}_{}.csv", label, stamp(at))
    };
    dir.join(name)
}

/// Attributed clean dataset: `{dir}/processed_{YYYYMMDD_HHMMSS}.parquet`
pub fn processed_dataset_filename(dir: &Path, at: DateTime<Utc>) -> PathBuf {
    dir.join(format!("processed_{}.parquet", stamp(at)))
}

/// Trend summary: `{dir}/trends_{granularity}_{YYYYMMDD_HHMMSS}.parquet`
pub fn trend_summary_filename(dir: &Path, granularity: &str, at: DateTime<Utc>) -> PathBuf {
    dir.join(format!("trends_{}_{}.parquet", slug(granularity), stamp(at)))
}

/// `path`, or `{stem}_{n}.{ext}` with the first free `n` when it already exists.
pub fn next_free_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|n| path.with_file_name(format!("{}_{}{}", stem, n, extension)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_raw_batch_filename() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let path = raw_batch_filename(Path::new("data/raw"), "CUNDINAMARCA", at);
        assert_eq!(path, PathBuf::from("data/raw/raw_cundinamarca_20240305_140709.csv"));

        let path = raw_batch_filename(Path::new("data/raw"), "", at);
        assert_eq!(path, PathBuf::from("data/raw/raw_20240305_140709.csv"));
    }

    #[test]
    fn test_processed_filenames() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let processed = processed_dataset_filename(Path::new("out"), at);
        assert_eq!(processed, PathBuf::from("out/processed_20240305_140709.parquet"));

        let trends = trend_summary_filename(Path::new("out"), "YearMonth", at);
        assert_eq!(trends, PathBuf::from("out/trends_yearmonth_20240305_140709.parquet"));
    }

    #[test]
    fn test_next_free_path_skips_existing_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let first = dir.path().join("raw_20240305_140709.csv");
        assert_eq!(next_free_path(first.clone()), first);

        std::fs::write(&first, "x").unwrap();
        let second = next_free_path(first.clone());
        assert_eq!(second, dir.path().join("raw_20240305_140709_1.csv"));

        std::fs::write(&second, "x").unwrap();
        assert_eq!(
            next_free_path(first),
            dir.path().join("raw_20240305_140709_2.csv")
        );
    }
}
