//! JSON report rendering
//!
//! One report per input file, plus a run summary at the root of the output
//! directory.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{
    config_summary, Config, FileReport, RunStats, REPORT_SCHEMA_VERSION, SUMMARY_FILE_NAME,
};

/// Render a per-file report.
pub fn render_file_report(report: &FileReport, include_timestamp: bool) -> Value {
    let mut value = json!({
        "schema_version": REPORT_SCHEMA_VERSION,
        "input": report.input,
        "status": report.status,
        "series": report.series,
    });
    if let Some(error) = report.error.as_deref() {
        value["error"] = json!(error);
    }
    if include_timestamp {
        value["generated_at"] = json!(chrono::Utc::now().to_rfc3339());
    }
    value
}

/// Render the run summary.
pub fn render_summary(
    reports: &[(PathBuf, FileReport)],
    output_dir: &Path,
    config: &Config,
    include_timestamp: bool,
) -> Value {
    let file_reports: Vec<FileReport> = reports.iter().map(|(_, r)| r.clone()).collect();
    let stats = RunStats::from_reports(&file_reports);

    let files: Vec<Value> = reports
        .iter()
        .map(|(path, report)| {
            let relative = path.strip_prefix(output_dir).unwrap_or(path);
            json!({
                "input": report.input,
                "report": relative.to_string_lossy().replace('\\', "/"),
                "status": report.status,
                "series_passed": report.series_passed(),
                "series_failed": report.series_failed(),
            })
        })
        .collect();

    let mut value = json!({
        "schema_version": REPORT_SCHEMA_VERSION,
        "tool": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": stats.status(),
        "stats": stats,
        "files": files,
        "config": config_summary(config),
    });
    if include_timestamp {
        value["generated_at"] = json!(chrono::Utc::now().to_rfc3339());
    }
    value
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let mut body = serde_json::to_string_pretty(value)?;
    body.push('\n');
    fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn write_file_report(path: &Path, report: &FileReport, include_timestamp: bool) -> Result<()> {
    write_json(path, &render_file_report(report, include_timestamp))
}

/// Write the summary and return its path.
pub fn write_summary(
    output_dir: &Path,
    reports: &[(PathBuf, FileReport)],
    config: &Config,
    include_timestamp: bool,
) -> Result<PathBuf> {
    let path = output_dir.join(SUMMARY_FILE_NAME);
    write_json(
        &path,
        &render_summary(reports, output_dir, config, include_timestamp),
    )?;
    Ok(path)
}
