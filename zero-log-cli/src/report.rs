//! Report generation
//!
//! Renders a decoded log as a plain text summary, or writes it as JSON.

use anyhow::{Context, Result};
use chrono::DateTime;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use zero_log_decoder::{DecodeResult, DecodedEntry, HeaderInfo, WarningKind};

const RULE: &str = "───────────────────────────────────────────────";

/// Text summary of one decoded file: layout, header, counts and the newest entries
pub fn render_summary(path: &Path, result: &DecodeResult, limit: usize) -> String {
    Summary {
        path,
        result,
        limit,
    }
    .to_string()
}

struct Summary<'a> {
    path: &'a Path,
    result: &'a DecodeResult,
    limit: usize,
}

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = self.result;
        writeln!(f, "📄 {}", self.path.display())?;
        writeln!(f, "{}", RULE)?;
        writeln!(f, "  Log type:  {}", result.category)?;
        writeln!(f, "  Layout:    {}", result.layout)?;
        write_header(f, &result.header)?;

        let valid = result.entries.iter().filter(|e| e.timestamp_valid).count();
        match result.declared_count {
            Some(count) => writeln!(f, "  Entries:   {} ({} claimed)", result.entries.len(), count)?,
            None => writeln!(f, "  Entries:   {}", result.entries.len())?,
        }
        writeln!(f, "  Timed:     {} valid, {} invalid", valid, result.entries.len() - valid)?;
        write_warnings(f, result)?;

        if self.limit > 0 && !result.entries.is_empty() {
            writeln!(f, "\n  Newest entries:")?;
            for entry in result.iter_newest_first().take(self.limit) {
                writeln!(f, "  {}", format_entry(entry))?;
            }
            if result.entries.len() > self.limit {
                writeln!(f, "  ... {} more", result.entries.len() - self.limit)?;
            }
        }
        Ok(())
    }
}

fn write_header(f: &mut fmt::Formatter<'_>, header: &HeaderInfo) -> fmt::Result {
    let rows = [
        ("VIN", &header.vin),
        ("Serial", &header.serial_number),
        ("Firmware", &header.firmware_rev),
        ("Board", &header.board_rev),
        ("Model", &header.model),
        ("BMS serial", &header.bms_serial_number),
        ("Pack serial", &header.pack_serial_number),
        ("First run", &header.first_run_date),
        ("Built", &header.build_date),
    ];
    for (name, value) in rows {
        if let Some(value) = value {
            writeln!(f, "  {:<11}{}", format!("{}:", name), value)?;
        }
    }
    Ok(())
}

fn write_warnings(f: &mut fmt::Formatter<'_>, result: &DecodeResult) -> fmt::Result {
    if result.warnings.is_empty() {
        return Ok(());
    }
    let kinds = [
        (WarningKind::MalformedEntry, "malformed"),
        (WarningKind::TruncatedEntry, "truncated"),
        (WarningKind::TimestampInvalid, "bad timestamp"),
        (WarningKind::UnknownTypeCode, "unknown type"),
        (WarningKind::SkippedTail, "skipped bytes"),
    ];
    let counts: Vec<String> = kinds
        .iter()
        .filter_map(|&(kind, name)| {
            let n = result.warning_count(kind);
            (n > 0).then(|| format!("{} {}", n, name))
        })
        .collect();
    writeln!(f, "  ⚠️  Warnings: {}", counts.join(", "))
}

/// One listing line: sequence, UTC time, type and fields
pub fn format_entry(entry: &DecodedEntry) -> String {
    let time = if entry.timestamp_valid {
        format_timestamp(entry.timestamp)
    } else {
        format!("{:<19}", "invalid")
    };
    let fields: Vec<String> = entry
        .fields
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect();
    format!(
        "{:>6}  {}  {:<36} {}",
        entry.sequence,
        time,
        entry.type_name,
        fields.join(" ")
    )
}

/// Unix seconds as `YYYY-MM-DD HH:MM:SS` in UTC
pub fn format_timestamp(timestamp: u32) -> String {
    DateTime::from_timestamp(i64::from(timestamp), 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Write the full decode result as pretty JSON to `<dir>/<file stem>.json`
pub fn write_json(dir: &Path, input: &Path, result: &DecodeResult) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create output directory: {:?}", dir))?;
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "log".to_string());
    let out_path = dir.join(format!("{}.json", stem));

    let json = serde_json::to_string_pretty(result).context("Failed to serialize decode result")?;
    fs::write(&out_path, json).with_context(|| format!("Failed to write JSON output: {:?}", out_path))?;
    Ok(out_path)
}
