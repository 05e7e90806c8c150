//! Discovery of daily NSIDC charts on disk
//!
//! Charts are stored one directory per year, named
//! `nt_YYYYMMDD_<sensor>_<version>_n.bin`, optionally gzip-compressed.

use crate::types::{IceError, IceResult};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// A daily chart file and the date it covers
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DailyFile {
    pub date: NaiveDate,
    pub path: PathBuf,
}

fn chart_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^nt_(\d{8})_.*\.bin(\.gz)?$").expect("static chart name pattern")
    })
}

/// Date encoded in a chart file name, `None` for any other file
pub fn parse_chart_date(file_name: &str) -> Option<NaiveDate> {
    let captures = chart_name_pattern().captures(file_name)?;
    NaiveDate::parse_from_str(&captures[1], "%Y%m%d").ok()
}

/// Collect the charts of `month` for every year in `start_year..=stop_year`.
///
/// Missing year directories are skipped with a warning; the result is sorted
/// by date.
pub fn discover_daily_files<P: AsRef<Path>>(
    root: P,
    start_year: i32,
    stop_year: i32,
    month: u32,
) -> IceResult<Vec<DailyFile>> {
    if !(1..=12).contains(&month) {
        return Err(IceError::Config(format!("invalid month {}", month)));
    }
    if stop_year < start_year {
        return Err(IceError::Config(format!(
            "stop year {} before start year {}",
            stop_year, start_year
        )));
    }

    let mut files = Vec::new();
    for year in start_year..=stop_year {
        let dir = root.as_ref().join(year.to_string());
        if !dir.is_dir() {
            log::warn!("No chart directory for {}: {}", year, dir.display());
            continue;
        }

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(date) = name.to_str().and_then(parse_chart_date) else {
                continue;
            };
            if date.year() == year && date.month() == month {
                files.push(DailyFile {
                    date,
                    path: entry.path(),
                });
            }
        }
    }

    files.sort();
    log::info!(
        "Found {} daily charts for month {:02}, {}-{}",
        files.len(),
        month,
        start_year,
        stop_year
    );
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_chart_date() {
        assert_eq!(
            parse_chart_date("nt_20140402_f17_v1.1_n.bin"),
            NaiveDate::from_ymd_opt(2014, 4, 2)
        );
        assert_eq!(
            parse_chart_date("nt_19991231_f13_v1.1_n.bin.gz"),
            NaiveDate::from_ymd_opt(1999, 12, 31)
        );
        assert_eq!(parse_chart_date("nt_20140231_f17_v1.1_n.bin"), None);
        assert_eq!(parse_chart_date("nt_201404_f17_v1.1_n.bin"), None);
        assert_eq!(parse_chart_date("readme.txt"), None);
    }

    #[test]
    fn test_discover_filters_month_and_sorts() {
        let root = TempDir::new().unwrap();
        for (year, names) in [
            ("2013", vec!["nt_20130415_f17_v1.1_n.bin", "nt_20130501_f17_v1.1_n.bin"]),
            ("2014", vec!["nt_20140403_f17_v1.1_n.bin.gz", "nt_20140401_f17_v1.1_n.bin", "notes.txt"]),
        ] {
            let dir = root.path().join(year);
            fs::create_dir(&dir).unwrap();
            for name in names {
                fs::write(dir.join(name), b"").unwrap();
            }
        }

        let files = discover_daily_files(root.path(), 2012, 2014, 4).unwrap();
        let dates: Vec<String> = files.iter().map(|f| f.date.to_string()).collect();
        assert_eq!(dates, vec!["2013-04-15", "2014-04-01", "2014-04-03"]);
        assert!(files[2].path.ends_with("2014/nt_20140403_f17_v1.1_n.bin.gz"));
    }

    #[test]
    fn test_discover_rejects_bad_range() {
        let root = TempDir::new().unwrap();
        assert!(matches!(
            discover_daily_files(root.path(), 2014, 2014, 13),
            Err(IceError::Config(_))
        ));
        assert!(matches!(
            discover_daily_files(root.path(), 2015, 2014, 4),
            Err(IceError::Config(_))
        ));
    }
}
