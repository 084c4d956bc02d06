//! Participant intake from JSONL files.
//!
//! Pipeline flow:
//! JSONL records → Schema validation → Allocator → Ledger
//!
//! Rejected records are counted and logged; the run continues with the
//! next record.

use crate::allocator::Allocator;
use crate::models::{AllocationError, MinimiserError, ParticipantRecord, Result, RunStats};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Load participant records from a JSONL file.
///
/// Each non-empty line is `{"id": ..., "characteristics": {...}}`.
pub fn load_participants(path: &Path) -> Result<Vec<ParticipantRecord>> {
    let file = File::open(path).map_err(|e| MinimiserError::io("opening participants file", e))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| MinimiserError::io("reading participants file", e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ParticipantRecord = serde_json::from_str(&line)
            .map_err(|e| MinimiserError::ParseError(format!("Line {}: {}", line_num + 1, e)))?;
        records.push(record);
    }

    info!(count = records.len(), "Loaded participants");
    Ok(records)
}

/// Allocate every record in order.
pub fn allocate_all(
    allocator: &mut Allocator,
    records: Vec<ParticipantRecord>,
    show_progress: bool,
) -> Result<RunStats> {
    let start = Instant::now();
    let mut stats = RunStats {
        total_records: records.len(),
        ..Default::default()
    };

    let pb = if show_progress {
        let pb = ProgressBar::new(records.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
                .map_err(|e| MinimiserError::Internal(format!("Progress template: {e}")))?
                .progress_chars("##-"),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    for record in records {
        match allocator.allocate(record.id, record.characteristics) {
            Ok(arm) => stats.record_arm(arm),
            Err(AllocationError::DuplicateParticipant(_)) => stats.total_duplicates += 1,
            Err(AllocationError::Validation { .. }) => stats.total_invalid += 1,
        }
        pb.inc(1);
    }

    pb.finish_with_message(format!(
        "{} allocated, {} rejected",
        stats.total_allocated,
        stats.total_duplicates + stats.total_invalid
    ));

    stats.runtime_secs = start.elapsed().as_secs_f64();
    info!(
        allocated = stats.total_allocated,
        duplicates = stats.total_duplicates,
        invalid = stats.total_invalid,
        participants = allocator.len(),
        "Intake complete"
    );
    Ok(stats)
}
