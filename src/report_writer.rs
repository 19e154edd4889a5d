//! Persist a [`ComparisonReport`] as JSON, CSV and per-run plan files.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::Result;
use crate::report::{ComparisonReport, Totals};

const CSV_HEADER: [&str; 7] = [
    "query",
    "engine",
    "duration_ms",
    "row_count",
    "status",
    "plan_ref",
    "error",
];

/// Paths written for one report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFiles {
    pub json: PathBuf,
    pub csv: PathBuf,
    /// `plans/<timestamp>/` directory holding `<plan_ref>.txt` files, if any plan was captured
    pub plans: Option<PathBuf>,
}

#[derive(Serialize)]
struct Document<'a> {
    timestamp: &'a str,
    #[serde(flatten)]
    report: &'a ComparisonReport,
}

/// Write the report into `output_dir`, stamped with the current UTC time.
pub fn write(report: &ComparisonReport, output_dir: &Path) -> Result<ReportFiles> {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    write_to(report, output_dir, &timestamp)
}

pub fn write_to(report: &ComparisonReport, output_dir: &Path, timestamp: &str) -> Result<ReportFiles> {
    fs::create_dir_all(output_dir)?;

    let json_path = output_dir.join(format!("report_{}.json", timestamp));
    let json = serde_json::to_string_pretty(&Document {
        timestamp,
        report,
    })?;
    fs::write(&json_path, json)?;

    let csv_path = output_dir.join(format!("report_{}.csv", timestamp));
    let mut csv_writer = csv::Writer::from_path(&csv_path)?;
    csv_writer.write_record(CSV_HEADER)?;
    for run in report.summaries() {
        let duration_ms = run.duration_ms.map(|ms| format!("{:.2}", ms)).unwrap_or_default();
        let row_count = run.row_count.map(|n| n.to_string()).unwrap_or_default();
        csv_writer.write_record([
            run.query.as_str(),
            run.engine.as_str(),
            duration_ms.as_str(),
            row_count.as_str(),
            run.status.as_str(),
            run.plan_ref.as_deref().unwrap_or_default(),
            run.error.as_deref().unwrap_or_default(),
        ])?;
    }
    csv_writer.flush()?;

    let mut plans = None;
    for (run, summary) in report.results().iter().zip(report.summaries()) {
        let (Some(plan), Some(plan_ref)) = (&run.plan, &summary.plan_ref) else {
            continue;
        };
        let dir = output_dir.join("plans").join(timestamp);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(format!("{}.txt", plan_ref)), plan)?;
        plans = Some(dir);
    }

    tracing::info!(
        json = %json_path.display(),
        csv = %csv_path.display(),
        "report written"
    );

    Ok(ReportFiles {
        json: json_path,
        csv: csv_path,
        plans,
    })
}

/// One-line digest of the totals
pub fn totals_line(totals: &Totals) -> String {
    format!(
        "{} runs: {} ok, {} query errors, {} timeouts, {} connection errors, {} skipped, {} divergences",
        totals.runs,
        totals.ok,
        totals.query_errors,
        totals.timeouts,
        totals.connection_errors,
        totals.skipped,
        totals.divergences
    )
}
