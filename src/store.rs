//! Persistence for the medicine list and the dose log.
//!
//! Both files are JSON Lines: one record per line. The medicine list is
//! appended on add and rewritten wholesale on edit or delete; the log is
//! append-only.

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{ReminderError, Result};
use crate::model::{LogRecord, MedicineEntry, ScheduledTime, validate_name};

pub const MEDICINES_FILE: &str = "medicines.jsonl";
pub const LOGS_FILE: &str = "logs.jsonl";

// ============================================================================
// Store Trait
// ============================================================================

pub trait RecordStore: Send + Sync {
    fn load_medicines(&self) -> Result<Vec<MedicineEntry>>;
    fn append_medicine(&self, entry: &MedicineEntry) -> Result<()>;
    fn rewrite_medicines(&self, entries: &[MedicineEntry]) -> Result<()>;
    fn append_log(&self, record: &LogRecord) -> Result<()>;
    fn load_logs(&self) -> Result<Vec<LogRecord>>;

    /// Validates and appends a new medicine. Names are unique.
    fn add_medicine(&self, name: &str, time: &str) -> Result<MedicineEntry> {
        let entry = MedicineEntry::new(name, time)?;
        if self.load_medicines()?.iter().any(|m| m.name == entry.name) {
            return Err(ReminderError::Duplicate(entry.name));
        }
        self.append_medicine(&entry)?;
        Ok(entry)
    }

    fn update_medicine(
        &self,
        name: &str,
        new_name: Option<&str>,
        new_time: Option<&str>,
    ) -> Result<MedicineEntry> {
        let mut entries = self.load_medicines()?;
        let idx = entries
            .iter()
            .position(|m| m.name == name)
            .ok_or_else(|| ReminderError::NotFound(name.to_string()))?;

        if let Some(n) = new_name {
            let n = validate_name(n)?;
            if n != name && entries.iter().any(|m| m.name == n) {
                return Err(ReminderError::Duplicate(n));
            }
            entries[idx].name = n;
        }
        if let Some(t) = new_time {
            entries[idx].time = ScheduledTime::parse(t)?;
        }

        let updated = entries[idx].clone();
        self.rewrite_medicines(&entries)?;
        Ok(updated)
    }

    fn remove_medicine(&self, name: &str) -> Result<MedicineEntry> {
        let mut entries = self.load_medicines()?;
        let idx = entries
            .iter()
            .position(|m| m.name == name)
            .ok_or_else(|| ReminderError::NotFound(name.to_string()))?;
        let removed = entries.remove(idx);
        self.rewrite_medicines(&entries)?;
        Ok(removed)
    }
}

// ============================================================================
// JSON Lines Store
// ============================================================================

pub struct JsonLinesStore {
    dir: PathBuf,
    // Serializes writers inside this process; appends and renames are each a
    // single syscall, so readers never need it.
    write_lock: Mutex<()>,
}

impl JsonLinesStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, write_lock: Mutex::new(()) })
    }

    pub fn medicines_path(&self) -> PathBuf {
        self.dir.join(MEDICINES_FILE)
    }

    pub fn logs_path(&self) -> PathBuf {
        self.dir.join(LOGS_FILE)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RecordStore for JsonLinesStore {
    fn load_medicines(&self) -> Result<Vec<MedicineEntry>> {
        read_lines(&self.medicines_path())
    }

    fn append_medicine(&self, entry: &MedicineEntry) -> Result<()> {
        let _guard = self.lock();
        append_line(&self.medicines_path(), entry)
    }

    fn rewrite_medicines(&self, entries: &[MedicineEntry]) -> Result<()> {
        let _guard = self.lock();
        rewrite_lines(&self.dir, &self.medicines_path(), entries)
    }

    fn append_log(&self, record: &LogRecord) -> Result<()> {
        let _guard = self.lock();
        append_line(&self.logs_path(), record)
    }

    fn load_logs(&self) -> Result<Vec<LogRecord>> {
        read_lines(&self.logs_path())
    }
}

fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => out.push(record),
            Err(e) => warn!("Skipping malformed record {}:{}: {}", path.display(), idx + 1, e),
        }
    }
    Ok(out)
}

fn append_line<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.flush()?;
    debug!("Appended record to {}", path.display());
    Ok(())
}

fn rewrite_lines<T: Serialize>(dir: &Path, path: &Path, records: &[T]) -> Result<()> {
    let mut body = String::new();
    for record in records {
        body.push_str(&serde_json::to_string(record)?);
        body.push('\n');
    }

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(body.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ReminderError::StoreUnavailable(e.error))?;
    debug!("Rewrote {} ({} records)", path.display(), records.len());
    Ok(())
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Keeps records in memory. Reads and writes can be switched to fail to
/// simulate an unavailable disk.
#[derive(Default)]
pub struct MemoryStore {
    medicines: Mutex<Vec<MedicineEntry>>,
    logs: Mutex<Vec<LogRecord>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_medicines(entries: Vec<MedicineEntry>) -> Self {
        Self { medicines: Mutex::new(entries), ..Self::default() }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn logs(&self) -> Vec<LogRecord> {
        self.logs.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn check(&self, flag: &AtomicBool, op: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(io::Error::other(format!("{op} disabled")).into());
        }
        Ok(())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> ReminderError {
    ReminderError::StoreUnavailable(io::Error::other("memory store lock poisoned"))
}

impl RecordStore for MemoryStore {
    fn load_medicines(&self) -> Result<Vec<MedicineEntry>> {
        self.check(&self.fail_reads, "read")?;
        Ok(self.medicines.lock().map_err(poisoned)?.clone())
    }

    fn append_medicine(&self, entry: &MedicineEntry) -> Result<()> {
        self.check(&self.fail_writes, "write")?;
        self.medicines.lock().map_err(poisoned)?.push(entry.clone());
        Ok(())
    }

    fn rewrite_medicines(&self, entries: &[MedicineEntry]) -> Result<()> {
        self.check(&self.fail_writes, "write")?;
        *self.medicines.lock().map_err(poisoned)? = entries.to_vec();
        Ok(())
    }

    fn append_log(&self, record: &LogRecord) -> Result<()> {
        self.check(&self.fail_writes, "write")?;
        self.logs.lock().map_err(poisoned)?.push(record.clone());
        Ok(())
    }

    fn load_logs(&self) -> Result<Vec<LogRecord>> {
        self.check(&self.fail_reads, "read")?;
        Ok(self.logs.lock().map_err(poisoned)?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DoseStatus;
    use chrono::NaiveDate;

    fn ts() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap().and_hms_opt(8, 0, 12).unwrap()
    }

    #[test]
    fn missing_files_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesStore::open(dir.path()).unwrap();
        assert!(store.load_medicines().unwrap().is_empty());
        assert!(store.load_logs().unwrap().is_empty());
    }

    #[test]
    fn add_appends_in_order_and_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesStore::open(dir.path()).unwrap();

        store.add_medicine("Aspirin", "08:00").unwrap();
        store.add_medicine("Vitamin", "09:00").unwrap();
        let err = store.add_medicine("Aspirin", "10:00").unwrap_err();
        assert!(matches!(err, ReminderError::Duplicate(_)));

        let names: Vec<_> = store.load_medicines().unwrap().into_iter().map(|m| m.name).collect();
        assert_eq!(names, ["Aspirin", "Vitamin"]);

        let raw = fs::read_to_string(store.medicines_path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[test]
    fn add_rejects_empty_fields_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesStore::open(dir.path()).unwrap();

        assert!(store.add_medicine("", "08:00").unwrap_err().is_input_error());
        assert!(store.add_medicine("Aspirin", "").unwrap_err().is_input_error());
        assert!(!store.medicines_path().exists());
    }

    #[test]
    fn update_and_remove_rewrite_the_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesStore::open(dir.path()).unwrap();
        store.add_medicine("Aspirin", "08:00").unwrap();
        store.add_medicine("Vitamin", "09:00").unwrap();

        let updated = store.update_medicine("Aspirin", None, Some("07:30")).unwrap();
        assert_eq!(updated.time.as_str(), "07:30");

        let renamed = store.update_medicine("Vitamin", Some("Vitamin D"), None).unwrap();
        assert_eq!(renamed.name, "Vitamin D");

        let err = store.update_medicine("Aspirin", Some("Vitamin D"), None).unwrap_err();
        assert!(matches!(err, ReminderError::Duplicate(_)));

        store.remove_medicine("Aspirin").unwrap();
        let left = store.load_medicines().unwrap();
        assert_eq!(left, vec![MedicineEntry::new("Vitamin D", "09:00").unwrap()]);

        assert!(matches!(store.remove_medicine("Aspirin"), Err(ReminderError::NotFound(_))));
    }

    #[test]
    fn log_is_append_only_with_exact_status_labels() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesStore::open(dir.path()).unwrap();

        store.append_log(&LogRecord::new("Aspirin", ts(), DoseStatus::Taken)).unwrap();
        store.append_log(&LogRecord::new("Vitamin", ts(), DoseStatus::MissedAuto)).unwrap();

        let raw = fs::read_to_string(store.logs_path()).unwrap();
        assert!(raw.contains("\"status\":\"Taken\""));
        assert!(raw.contains("\"status\":\"Missed (Auto)\""));

        let logs = store.load_logs().unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].status, DoseStatus::MissedAuto);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesStore::open(dir.path()).unwrap();
        fs::write(
            store.medicines_path(),
            "{\"name\":\"Aspirin\",\"time\":\"08:00\"}\n\n{\"name\":\"Vit\n",
        )
        .unwrap();

        let entries = store.load_medicines().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Aspirin");
    }

    #[test]
    fn memory_store_failures_surface_as_store_unavailable() {
        let store = MemoryStore::new();
        store.add_medicine("Aspirin", "08:00").unwrap();

        store.set_fail_reads(true);
        assert!(matches!(store.load_medicines(), Err(ReminderError::StoreUnavailable(_))));
        store.set_fail_reads(false);

        store.set_fail_writes(true);
        let rec = LogRecord::new("Aspirin", ts(), DoseStatus::Taken);
        assert!(matches!(store.append_log(&rec), Err(ReminderError::StoreUnavailable(_))));
        assert!(store.logs().is_empty());
        assert_eq!(store.load_medicines().unwrap().len(), 1);
    }
}
