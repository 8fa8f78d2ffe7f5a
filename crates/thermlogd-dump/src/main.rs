use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use clap::Parser;
use serde::Serialize;

use thermlog_core::SensorRecord;
use thermlog_core::record::TIMESTAMP_FORMAT;
use thermlog_core::store::{LoadedTable, SkippedRow, read_table};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "thermlogd-dump", about = "Inspect thermlogd output tables")]
struct Cli {
    /// Path to a table written by thermlogd
    path: PathBuf,

    /// List every dropped row
    #[arg(long)]
    skipped: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();

    let table = match read_table(&cli.path) {
        Ok(table) => table,
        Err(e) => {
            eprintln!("Failed to read {}: {}", cli.path.display(), e);
            std::process::exit(1);
        }
    };
    let file_size = std::fs::metadata(&cli.path).map(|m| m.len()).unwrap_or(0);
    let summary = summarize(&cli.path, file_size, &table, cli.skipped);

    if cli.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Failed to serialize summary: {e}");
                std::process::exit(1);
            }
        }
    } else {
        print_summary(&summary);
    }
}

// ── Formatting helpers ───────────────────────────────────────────────────────

fn human_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    let b = bytes as f64;
    if b >= MIB {
        format!("{:.1} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{bytes} B")
    }
}

fn human_duration(secs: i64) -> String {
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

fn pct(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

// ── JSON output types ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct TableJson {
    file: String,
    file_size: u64,
    protocol: String,
    rows: usize,
    skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_range: Option<TimeRangeJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    row_range: Option<RowRangeJson>,
    reference_temp_c: Option<RangeJson>,
    thermistor_voltage_v: Option<RangeJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skipped_rows: Option<Vec<SkippedRow>>,
}

#[derive(Serialize)]
struct TimeRangeJson {
    first: String,
    last: String,
    duration_secs: i64,
}

#[derive(Serialize)]
struct RowRangeJson {
    first: u64,
    last: u64,
}

#[derive(Serialize, Debug, PartialEq)]
struct RangeJson {
    min: f64,
    max: f64,
}

fn value_range(values: impl Iterator<Item = f64>) -> Option<RangeJson> {
    values.fold(None, |acc, v| match acc {
        None => Some(RangeJson { min: v, max: v }),
        Some(r) => Some(RangeJson {
            min: r.min.min(v),
            max: r.max.max(v),
        }),
    })
}

fn time_range(records: &[SensorRecord]) -> Option<TimeRangeJson> {
    let stamps: Vec<NaiveDateTime> = records
        .iter()
        .filter_map(|r| match r {
            SensorRecord::Pair(p) => Some(p.timestamp),
            SensorRecord::Sample(_) => None,
        })
        .collect();
    let first = *stamps.iter().min()?;
    let last = *stamps.iter().max()?;
    Some(TimeRangeJson {
        first: first.format(TIMESTAMP_FORMAT).to_string(),
        last: last.format(TIMESTAMP_FORMAT).to_string(),
        duration_secs: (last - first).num_seconds(),
    })
}

fn row_range(records: &[SensorRecord]) -> Option<RowRangeJson> {
    let sequences: Vec<u64> = records
        .iter()
        .filter_map(|r| match r {
            SensorRecord::Sample(s) => Some(s.sequence),
            SensorRecord::Pair(_) => None,
        })
        .collect();
    Some(RowRangeJson {
        first: *sequences.first()?,
        last: *sequences.last()?,
    })
}

fn summarize(path: &Path, file_size: u64, table: &LoadedTable, list_skipped: bool) -> TableJson {
    TableJson {
        file: path.display().to_string(),
        file_size,
        protocol: table.protocol.to_string(),
        rows: table.records.len(),
        skipped: table.skipped.len(),
        time_range: time_range(&table.records),
        row_range: row_range(&table.records),
        reference_temp_c: value_range(table.records.iter().map(SensorRecord::reference_temp_c)),
        thermistor_voltage_v: value_range(
            table.records.iter().map(SensorRecord::thermistor_voltage_v),
        ),
        skipped_rows: list_skipped.then(|| table.skipped.clone()),
    }
}

// ── Human output ─────────────────────────────────────────────────────────────

fn print_summary(s: &TableJson) {
    println!("File:      {} ({})", s.file, human_bytes(s.file_size));
    println!("Protocol:  {}", s.protocol);
    let total = s.rows + s.skipped;
    println!(
        "Rows:      {} accepted, {} skipped ({:.1}%)",
        s.rows,
        s.skipped,
        pct(s.skipped, total)
    );
    if let Some(t) = &s.time_range {
        println!(
            "Time:      {} .. {} ({})",
            t.first,
            t.last,
            human_duration(t.duration_secs)
        );
    }
    if let Some(r) = &s.row_range {
        println!("Row range: {} .. {}", r.first, r.last);
    }
    if let Some(r) = &s.reference_temp_c {
        println!("DS18B20:   {:.2} .. {:.2} °C", r.min, r.max);
    }
    if let Some(r) = &s.thermistor_voltage_v {
        println!("Voltage:   {:.3} .. {:.3} V", r.min, r.max);
    }
    if let Some(rows) = &s.skipped_rows
        && !rows.is_empty()
    {
        println!("\nSkipped rows:");
        for row in rows {
            println!("  line {:>6}: {} ({})", row.line_number, row.content, row.reason);
        }
    }
}
