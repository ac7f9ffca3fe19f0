//! Run history CSV.
//!
//! One row per finished run, appended as soon as the run ends so an
//! interrupted session keeps everything recorded so far.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::Duration;

use crate::automation::state::RunOutcome;

/// CSV header row.
const CSV_HEADER: &str = "run,started_at,map,outcome,final_round,duration_secs";

/// Summary of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Sequence number within this process, starting at 1
    pub run: u32,
    pub started_at: DateTime<Local>,
    pub map: String,
    pub outcome: RunOutcome,
    pub final_round: u32,
    pub duration: Duration,
}

/// Initializes CSV file with header if it doesn't exist or is empty.
///
/// If the file exists and has content, this does nothing (preserves existing data).
pub fn init_csv(path: &Path) -> Result<()> {
    if path.exists() {
        let file = File::open(path).context("Failed to open existing CSV")?;
        let reader = BufReader::new(file);
        if reader.lines().next().is_some() {
            return Ok(());
        }
    }

    let mut file = File::create(path).context("Failed to create CSV file")?;
    writeln!(file, "{}", CSV_HEADER).context("Failed to write CSV header")?;
    Ok(())
}

/// Appends one run to the CSV file.
///
/// Opens the file in append mode for each write.
pub fn append_run(path: &Path, report: &RunReport) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context("Failed to open CSV for append")?;

    let line = format!(
        "{},{},{},{},{},{}",
        report.run,
        report.started_at.format("%Y-%m-%dT%H:%M:%S"),
        report.map,
        report.outcome,
        report.final_round,
        report.duration.as_secs(),
    );

    writeln!(file, "{}", line).context("Failed to write CSV row")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn report(run: u32, outcome: RunOutcome) -> RunReport {
        RunReport {
            run,
            started_at: Local::now(),
            map: "DARKDUNGEONS".to_string(),
            outcome,
            final_round: 99,
            duration: Duration::from_secs(1234),
        }
    }

    #[test]
    fn test_init_csv_creates_header() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("runs.csv");

        init_csv(&csv_path).unwrap();

        let content = std::fs::read_to_string(&csv_path).unwrap();
        assert!(content.starts_with(CSV_HEADER));
    }

    #[test]
    fn test_init_csv_preserves_existing() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("runs.csv");

        std::fs::write(&csv_path, "existing,data\n1,2,3\n").unwrap();

        init_csv(&csv_path).unwrap();

        let content = std::fs::read_to_string(&csv_path).unwrap();
        assert!(content.starts_with("existing,data"));
    }

    #[test]
    fn test_append_runs() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("runs.csv");

        init_csv(&csv_path).unwrap();
        append_run(&csv_path, &report(1, RunOutcome::Completed)).unwrap();
        append_run(&csv_path, &report(2, RunOutcome::Defeated)).unwrap();

        let content = std::fs::read_to_string(&csv_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines.len(), 3); // header + 2 data rows
        assert!(lines[1].starts_with("1,"));
        assert!(lines[1].ends_with(",DARKDUNGEONS,completed,99,1234"));
        assert!(lines[2].ends_with(",DARKDUNGEONS,defeated,99,1234"));
    }
}
