//! Output formatting.

use crate::cli::OutputFormat;
use camino::Utf8Path;
use preprocess_bridge::{Resolution, SubResult, TransformResult};
use serde::Serialize;
use std::fmt;

/// Where a file's result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Fresh,
    Stale,
    Empty,
}

impl Status {
    pub fn of(resolution: &Resolution) -> Self {
        match resolution {
            Resolution::Fresh(_) => Status::Fresh,
            Resolution::Stale { .. } => Status::Stale,
            Resolution::Empty(_) => Status::Empty,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Fresh => "fresh",
            Status::Stale => "stale",
            Status::Empty => "empty",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one file.
#[derive(Debug, Serialize)]
pub struct FileReport {
    /// The file path, relative to the workspace.
    pub filename: String,
    pub status: Status,
    /// Why the fresh result was not available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    /// The result handed to the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TransformResult>,
}

impl FileReport {
    pub fn new(filename: &Utf8Path, resolution: Resolution) -> Self {
        Self {
            filename: filename.to_string(),
            status: Status::of(&resolution),
            reason: resolution.fallback_reason().map(|reason| reason.as_str()),
            result: resolution.into_result(),
        }
    }
}

/// Totals for a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of files preprocessed.
    pub file_count: usize,
    /// Files whose result came from this call.
    pub fresh_count: usize,
    /// Files that got the previous file's result.
    pub stale_count: usize,
    /// Files that got no result at all.
    pub empty_count: usize,
    /// Whether empty results fail the run.
    pub fail_on_empty: bool,
}

impl RunSummary {
    pub fn record(&mut self, report: &FileReport) {
        self.file_count += 1;
        match report.status {
            Status::Fresh => self.fresh_count += 1,
            Status::Stale => self.stale_count += 1,
            Status::Empty => self.empty_count += 1,
        }
    }

    /// Returns whether the process should exit with an error.
    pub fn failed(&self) -> bool {
        self.fail_on_empty && self.empty_count > 0
    }

    /// Formats the summary line.
    pub fn format(&self) -> String {
        let file_word = if self.file_count == 1 {
            "file"
        } else {
            "files"
        };

        format!(
            "====================================\nsvelte-preprocess-sync processed {} {}: {} fresh, {} stale, {} empty",
            self.file_count, file_word, self.fresh_count, self.stale_count, self.empty_count
        )
    }
}

/// Formats file reports for output.
pub struct Formatter {
    format: OutputFormat,
}

impl Formatter {
    /// Creates a new formatter.
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats one file's report.
    pub fn format(&self, report: &FileReport) -> String {
        match self.format {
            OutputFormat::Human => format_human(report),
            OutputFormat::Json => format_json(report),
        }
    }

    /// Formats the closing summary, or nothing for JSON output.
    pub fn format_summary(&self, summary: &RunSummary) -> Option<String> {
        match self.format {
            OutputFormat::Human => Some(summary.format()),
            OutputFormat::Json => None,
        }
    }
}

fn format_human(report: &FileReport) -> String {
    let mut output = match (report.status, report.reason) {
        (status, Some(reason)) => format!("{}: {} ({})\n", report.filename, status, reason),
        (status, None) => format!("{}: {}\n", report.filename, status),
    };

    let Some(result) = &report.result else {
        return output;
    };

    let regions = [
        ("markup", &result.markup),
        ("module", &result.module),
        ("instance", &result.instance),
        ("style", &result.style),
    ];
    for (name, region) in regions {
        if let Some(region) = region {
            output.push_str(&format_region(name, region));
        }
    }
    for dependency in &result.dependencies {
        output.push_str(&format!("  depends on {}\n", dependency));
    }

    output
}

fn format_region(name: &str, region: &SubResult) -> String {
    let ext = region
        .ext
        .as_deref()
        .map(|ext| format!(" [{}]", ext))
        .unwrap_or_default();
    match region.size_delta {
        Some(delta) => format!("  {}{}: {:+} chars\n", name, ext, -delta),
        None => format!("  {}{}: not finished\n", name, ext),
    }
}

fn format_json(report: &FileReport) -> String {
    match serde_json::to_string(report) {
        Ok(json) => format!("{}\n", json),
        Err(e) => {
            tracing::error!(filename = %report.filename, "Failed to serialize report: {e}");
            String::new()
        }
    }
}
