//! Ledger persistence for resumable allocation.
//!
//! Epistemic foundation:
//! - K_i: The snapshot is written atomically (write-then-rename)
//! - K_i: A restored allocator is rebuilt by replaying the ledger
//! - K_i: The random source resumes at its saved position, so enrolling
//!   one participant per process matches a single continuous run
//! - B_i: Ledger file may not exist → Option
//! - I^B: Crash during write → backup file provides recovery

use crate::allocator::{Allocator, SourceState};
use crate::models::{Enrollment, MinimiserError, Result, TrialConfig};
use crate::schema::{Schema, RESERVED_VARIABLE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Saved allocator ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Arm display labels at save time
    pub arms: [String; 2],
    /// Variable names at save time, in declaration order
    pub variables: Vec<String>,
    /// Participants in allocation order
    pub participants: Vec<Enrollment>,
    /// Random source position after the last allocation
    #[serde(default)]
    pub source: Option<SourceState>,
    /// When the snapshot was written
    pub saved_at: DateTime<Utc>,
}

impl LedgerSnapshot {
    pub fn from_allocator(allocator: &Allocator) -> Self {
        Self {
            arms: allocator.options().arms.clone(),
            variables: allocator
                .schema()
                .variables()
                .iter()
                .map(|v| v.name().to_string())
                .collect(),
            participants: allocator.participants().to_vec(),
            source: allocator.source_state(),
            saved_at: Utc::now(),
        }
    }
}

/// Store for persisting and loading the ledger.
pub struct LedgerStore {
    /// Directory for ledger files
    dir: PathBuf,
    /// Path to main ledger file
    ledger_path: PathBuf,
    /// Path to backup file
    backup_path: PathBuf,
}

impl LedgerStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| MinimiserError::io("creating ledger dir", e))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            ledger_path: dir.join("ledger.json"),
            backup_path: dir.join("ledger.backup.json"),
        })
    }

    /// Check if a saved ledger exists.
    pub fn exists(&self) -> bool {
        self.ledger_path.exists()
    }

    /// Load the saved ledger, falling back to the backup if the main file
    /// is unreadable.
    pub fn load(&self) -> Result<Option<LedgerSnapshot>> {
        if !self.exists() {
            return Ok(None);
        }
        match Self::read_snapshot(&self.ledger_path) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) if self.backup_path.exists() => {
                warn!(error = %e, "Ledger unreadable, loading backup");
                Self::read_snapshot(&self.backup_path).map(Some)
            }
            Err(e) => Err(e),
        }
    }

    fn read_snapshot(path: &Path) -> Result<LedgerSnapshot> {
        let file = File::open(path).map_err(|e| MinimiserError::io("opening ledger", e))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .map_err(|e| MinimiserError::ParseError(format!("Invalid ledger: {}", e)))
    }

    /// Save the allocator's ledger (atomic write).
    pub fn save(&self, allocator: &Allocator) -> Result<()> {
        let snapshot = LedgerSnapshot::from_allocator(allocator);

        // Backup existing ledger
        if self.ledger_path.exists() {
            fs::copy(&self.ledger_path, &self.backup_path)
                .map_err(|e| MinimiserError::io("backing up ledger", e))?;
        }

        let temp_path = self.dir.join("ledger.tmp.json");
        let file =
            File::create(&temp_path).map_err(|e| MinimiserError::io("creating temp ledger", e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &snapshot)
            .map_err(|e| MinimiserError::Internal(format!("Serializing ledger: {}", e)))?;
        writer
            .flush()
            .map_err(|e| MinimiserError::io("flushing temp ledger", e))?;
        drop(writer);

        fs::rename(&temp_path, &self.ledger_path)
            .map_err(|e| MinimiserError::io("renaming ledger", e))?;

        debug!(participants = snapshot.participants.len(), "Ledger saved");
        Ok(())
    }

    /// Restore an allocator from the saved ledger, or start a fresh one.
    pub fn open_allocator(&self, schema: Schema, options: TrialConfig) -> Result<Allocator> {
        match self.load()? {
            Some(snapshot) => {
                if snapshot.arms != options.arms {
                    warn!(
                        saved = ?snapshot.arms,
                        configured = ?options.arms,
                        "Arm labels changed since the ledger was saved"
                    );
                }
                info!(participants = snapshot.participants.len(), "Resuming from ledger");
                Allocator::restore(schema, options, snapshot.participants, snapshot.source)
            }
            None => {
                info!("Starting new ledger");
                Ok(Allocator::new(schema, options)?)
            }
        }
    }

    /// Get ledger directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Write the ledger as JSONL rows for external analysis: one object per
/// participant with each characteristic as a column plus `id` and `arm`
/// (the arm's display label).
pub fn export_jsonl(allocator: &Allocator, path: &Path) -> Result<usize> {
    let file = File::create(path).map_err(|e| MinimiserError::io("creating export file", e))?;
    let mut writer = BufWriter::new(file);

    for entry in allocator.participants() {
        let mut row = serde_json::Map::new();
        row.insert("id".into(), entry.id.as_str().into());
        for (var, cat) in &entry.characteristics {
            row.insert(var.clone(), cat.as_str().into());
        }
        row.insert(
            RESERVED_VARIABLE.into(),
            allocator.arm_label(entry.arm).into(),
        );
        serde_json::to_writer(&mut writer, &row)
            .map_err(|e| MinimiserError::Internal(format!("Serializing row: {}", e)))?;
        writeln!(writer).map_err(|e| MinimiserError::io("writing export", e))?;
    }

    writer
        .flush()
        .map_err(|e| MinimiserError::io("flushing export", e))?;
    info!(rows = allocator.len(), path = %path.display(), "Exported ledger");
    Ok(allocator.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Allocation, AllocationError, AllocationMethod, Characteristics};
    use tempfile::TempDir;

    fn schema() -> Schema {
        Schema::new([
            ("sex", vec!["male", "female"]),
            ("age", vec!["<=50", ">50"]),
        ])
        .unwrap()
    }

    fn chars(sex: &str, age: &str) -> Characteristics {
        Characteristics::from([
            ("sex".to_string(), sex.to_string()),
            ("age".to_string(), age.to_string()),
        ])
    }

    fn populated() -> Allocator {
        let options = TrialConfig {
            seed: Some(5),
            ..Default::default()
        };
        let mut allocator = Allocator::new(schema(), options).unwrap();
        for i in 0..20u64 {
            let sex = if i % 2 == 0 { "male" } else { "female" };
            let age = if i % 3 == 0 { ">50" } else { "<=50" };
            allocator.allocate(i, chars(sex, age)).unwrap();
        }
        allocator
    }

    #[test]
    fn test_save_and_restore() {
        let temp_dir = TempDir::new().unwrap();
        let store = LedgerStore::new(&temp_dir.path().join("ledger")).unwrap();
        assert!(!store.exists());

        let original = populated();
        store.save(&original).unwrap();
        assert!(store.exists());

        let restored = store
            .open_allocator(schema(), original.options().clone())
            .unwrap();
        assert_eq!(restored.len(), 20);
        assert_eq!(restored.participants(), original.participants());
        assert_eq!(restored.tally(), original.tally());
        assert_eq!(restored.characteristics_by_arm(), original.characteristics_by_arm());
    }

    #[test]
    fn test_restored_allocator_rejects_known_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = LedgerStore::new(temp_dir.path()).unwrap();
        store.save(&populated()).unwrap();

        let mut restored = store.open_allocator(schema(), TrialConfig::default()).unwrap();
        let err = restored.allocate(3u64, chars("male", ">50")).unwrap_err();
        assert!(matches!(err, AllocationError::DuplicateParticipant(_)));
        restored.allocate(20u64, chars("male", ">50")).unwrap();
        assert_eq!(restored.len(), 21);
    }

    #[test]
    fn test_second_save_keeps_backup() {
        let temp_dir = TempDir::new().unwrap();
        let store = LedgerStore::new(temp_dir.path()).unwrap();
        let mut allocator = populated();
        store.save(&allocator).unwrap();
        allocator.allocate("late", chars("female", ">50")).unwrap();
        store.save(&allocator).unwrap();

        let backup = LedgerStore::read_snapshot(&temp_dir.path().join("ledger.backup.json")).unwrap();
        assert_eq!(backup.participants.len(), 20);
        let current = store.load().unwrap().unwrap();
        assert_eq!(current.participants.len(), 21);
        assert_eq!(current.variables, vec!["sex", "age"]);
    }

    #[test]
    fn test_corrupt_ledger_falls_back_to_backup() {
        let temp_dir = TempDir::new().unwrap();
        let store = LedgerStore::new(temp_dir.path()).unwrap();
        let allocator = populated();
        store.save(&allocator).unwrap();
        store.save(&allocator).unwrap();
        fs::write(temp_dir.path().join("ledger.json"), "{ truncated").unwrap();

        let snapshot = store.load().unwrap().unwrap();
        assert_eq!(snapshot.participants.len(), 20);
    }

    #[test]
    fn test_restore_rejects_schema_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let store = LedgerStore::new(temp_dir.path()).unwrap();
        store.save(&populated()).unwrap();

        let other = Schema::new([("sex", vec!["male", "female"])]).unwrap();
        let err = store.open_allocator(other, TrialConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            MinimiserError::LedgerMismatch {
                position: 0,
                source: AllocationError::Validation { .. }
            }
        ));
        assert!(!err.is_recoverable());
    }

    fn cohort() -> Vec<(u64, Characteristics)> {
        (0..30u64)
            .map(|i| {
                let sex = if i % 3 == 0 { "female" } else { "male" };
                let age = if i % 4 < 2 { "<=50" } else { ">50" };
                (100 + i, chars(sex, age))
            })
            .collect()
    }

    fn continuous_run(options: &TrialConfig) -> Vec<Allocation> {
        let mut allocator = Allocator::new(schema(), options.clone()).unwrap();
        cohort()
            .into_iter()
            .map(|(id, c)| allocator.allocate_detailed(id, c).unwrap())
            .collect()
    }

    /// Open, allocate one participant, save: once per participant.
    fn resumed_run(dir: &Path, options: &TrialConfig) -> Vec<Allocation> {
        let store = LedgerStore::new(dir).unwrap();
        cohort()
            .into_iter()
            .map(|(id, c)| {
                let mut allocator = store.open_allocator(schema(), options.clone()).unwrap();
                let allocation = allocator.allocate_detailed(id, c).unwrap();
                store.save(&allocator).unwrap();
                allocation
            })
            .collect()
    }

    #[test]
    fn test_resume_with_configured_seed_matches_continuous_run() {
        let temp_dir = TempDir::new().unwrap();
        let options = TrialConfig {
            true_randomization_probability: 0.5,
            seed_first_with_id: false,
            seed: Some(1234),
            ..Default::default()
        };

        let resumed = resumed_run(temp_dir.path(), &options);
        assert_eq!(resumed, continuous_run(&options));

        let randomised = resumed
            .iter()
            .filter(|a| a.method == AllocationMethod::Randomised)
            .count();
        assert!(randomised > 0 && randomised < resumed.len() - 1);
    }

    #[test]
    fn test_resume_with_id_seeding_matches_continuous_run() {
        let temp_dir = TempDir::new().unwrap();
        let options = TrialConfig::default();
        assert_eq!(resumed_run(temp_dir.path(), &options), continuous_run(&options));
    }

    #[test]
    fn test_resume_continues_source_position() {
        let temp_dir = TempDir::new().unwrap();
        let store = LedgerStore::new(temp_dir.path()).unwrap();
        let allocator = populated();
        store.save(&allocator).unwrap();

        let snapshot = store.load().unwrap().unwrap();
        assert_eq!(snapshot.source, allocator.source_state());
        let restored = store
            .open_allocator(schema(), allocator.options().clone())
            .unwrap();
        assert_eq!(restored.source_state(), allocator.source_state());
    }

    #[test]
    fn test_ledger_without_source_state_still_opens() {
        let temp_dir = TempDir::new().unwrap();
        let store = LedgerStore::new(temp_dir.path()).unwrap();
        store.save(&populated()).unwrap();

        let path = temp_dir.path().join("ledger.json");
        let mut value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        value.as_object_mut().unwrap().remove("source");
        fs::write(&path, value.to_string()).unwrap();

        assert_eq!(store.load().unwrap().unwrap().source, None);
        let mut restored = store.open_allocator(schema(), TrialConfig::default()).unwrap();
        assert_eq!(restored.len(), 20);
        restored.allocate(20u64, chars("female", "<=50")).unwrap();
    }

    #[test]
    fn test_export_jsonl_rows() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("export.jsonl");
        let allocator = populated();

        assert_eq!(export_jsonl(&allocator, &path).unwrap(), 20);
        let content = fs::read_to_string(&path).unwrap();
        let rows: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows.len(), 20);
        assert_eq!(rows[0]["id"], "0");
        assert_eq!(rows[0]["sex"], "male");
        let arm = rows[0]["arm"].as_str().unwrap();
        assert!(arm == "A" || arm == "B");
    }
}
