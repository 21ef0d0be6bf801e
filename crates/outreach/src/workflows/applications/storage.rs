use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tracing::{info, warn};

use super::domain::{Application, ApplicationId, MaterialRefs, StateRecord};
use super::rate_limit::DailyBudget;

/// One append-only ledger line. Replaying every entry in order rebuilds the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEntry {
    Created {
        application: Application,
    },
    Transitioned {
        id: ApplicationId,
        record: StateRecord,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        external_reference: Option<String>,
    },
    MaterialsAttached {
        id: ApplicationId,
        materials: MaterialRefs,
    },
    FollowUpSent {
        id: ApplicationId,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io failure: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("corrupt record in {path} at line {line}: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
}

/// Durable sink for ledger entries. `append` returns only once the entry is stored.
pub trait LedgerStore: Send + Sync {
    fn append(&self, entry: &LedgerEntry) -> Result<(), StorageError>;
    fn load(&self) -> Result<Vec<LedgerEntry>, StorageError>;
}

/// Persistence for the per-day budget snapshot.
pub trait BudgetStore: Send + Sync {
    fn load(&self, day: NaiveDate) -> Result<Option<DailyBudget>, StorageError>;
    fn save(&self, budget: &DailyBudget) -> Result<(), StorageError>;
}

/// Where each file-backed store keeps its data under one root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger(&self) -> PathBuf {
        self.root.join("applications.jsonl")
    }

    pub fn budgets(&self) -> PathBuf {
        self.root.join("budget")
    }

    pub fn locks(&self) -> PathBuf {
        self.root.join("locks")
    }

    pub fn summaries(&self) -> PathBuf {
        self.root.join("summaries")
    }
}

#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl MemoryLedgerStore {
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.lock().expect("ledger mutex poisoned").clone()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn append(&self, entry: &LedgerEntry) -> Result<(), StorageError> {
        self.entries
            .lock()
            .expect("ledger mutex poisoned")
            .push(entry.clone());
        Ok(())
    }

    fn load(&self) -> Result<Vec<LedgerEntry>, StorageError> {
        Ok(self.entries())
    }
}

/// JSON-lines ledger. Each entry is flushed and synced before `append` returns.
#[derive(Debug)]
pub struct JsonlLedgerStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl JsonlLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cuts a partial last line left by an interrupted append so the next entry starts
    /// on a fresh line instead of being glued onto the fragment.
    fn drop_torn_tail(&self, file: &mut File) -> Result<(), StorageError> {
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(());
        }

        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))?;
        file.read_exact(&mut last)?;
        if last[0] == b'\n' {
            return Ok(());
        }

        let mut contents = Vec::with_capacity(len as usize);
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut contents)?;
        let keep = contents
            .iter()
            .rposition(|&byte| byte == b'\n')
            .map_or(0, |newline| newline + 1);
        warn!(
            path = %self.path.display(),
            dropped_bytes = contents.len() - keep,
            "truncating torn ledger tail before append"
        );
        file.set_len(keep as u64)?;
        Ok(())
    }
}

impl LedgerStore for JsonlLedgerStore {
    fn append(&self, entry: &LedgerEntry) -> Result<(), StorageError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.writer.lock().expect("ledger writer mutex poisoned");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        self.drop_torn_tail(&mut file)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<LedgerEntry>, StorageError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let lines: Vec<String> = BufReader::new(file).lines().collect::<Result<_, _>>()?;
        let last = lines.len();
        let mut entries = Vec::with_capacity(last);

        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                // A torn final line means the process died mid-append; nothing after it exists.
                Err(err) if index + 1 == last => {
                    warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        error = %err,
                        "ignoring truncated trailing ledger entry"
                    );
                }
                Err(source) => {
                    return Err(StorageError::Corrupt {
                        path: self.path.clone(),
                        line: index + 1,
                        source,
                    })
                }
            }
        }

        Ok(entries)
    }
}

#[derive(Debug, Default)]
pub struct MemoryBudgetStore {
    budgets: Mutex<HashMap<NaiveDate, DailyBudget>>,
}

impl BudgetStore for MemoryBudgetStore {
    fn load(&self, day: NaiveDate) -> Result<Option<DailyBudget>, StorageError> {
        Ok(self
            .budgets
            .lock()
            .expect("budget mutex poisoned")
            .get(&day)
            .cloned())
    }

    fn save(&self, budget: &DailyBudget) -> Result<(), StorageError> {
        self.budgets
            .lock()
            .expect("budget mutex poisoned")
            .insert(budget.date, budget.clone());
        Ok(())
    }
}

/// One pretty-printed JSON file per day, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonBudgetStore {
    dir: PathBuf,
}

impl JsonBudgetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", day.format("%Y-%m-%d")))
    }
}

impl BudgetStore for JsonBudgetStore {
    fn load(&self, day: NaiveDate) -> Result<Option<DailyBudget>, StorageError> {
        let path = self.path_for(day);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StorageError::Corrupt {
                path,
                line: 1,
                source,
            })
    }

    fn save(&self, budget: &DailyBudget) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(budget.date);
        let staging = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(budget)?;

        let mut file = File::create(&staging)?;
        file.write_all(&body)?;
        file.sync_data()?;
        fs::rename(&staging, &path)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunLockError {
    #[error("another outreach run already holds the lock for {day}")]
    AlreadyRunning { day: NaiveDate },
    #[error("failed to manage run lock: {0}")]
    Io(#[from] io::Error),
}

/// Exclusive per-day run guard.
pub trait RunLocks: Send + Sync {
    fn acquire(&self, day: NaiveDate) -> Result<RunLease, RunLockError>;
}

/// Held for the duration of a run; dropping it releases the lock.
pub struct RunLease {
    day: NaiveDate,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl RunLease {
    fn new(day: NaiveDate, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            day,
            release: Some(Box::new(release)),
        }
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }
}

impl std::fmt::Debug for RunLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLease").field("day", &self.day).finish()
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryRunLocks {
    held: Arc<Mutex<BTreeSet<NaiveDate>>>,
}

impl MemoryRunLocks {
    pub fn is_held(&self, day: NaiveDate) -> bool {
        self.held.lock().expect("lock mutex poisoned").contains(&day)
    }
}

impl RunLocks for MemoryRunLocks {
    fn acquire(&self, day: NaiveDate) -> Result<RunLease, RunLockError> {
        if !self.held.lock().expect("lock mutex poisoned").insert(day) {
            return Err(RunLockError::AlreadyRunning { day });
        }
        let held = Arc::clone(&self.held);
        Ok(RunLease::new(day, move || {
            held.lock().expect("lock mutex poisoned").remove(&day);
        }))
    }
}

/// Lock files created with `create_new`, so two processes cannot both win. Each file
/// records its holder's pid; a file whose holder has exited is reclaimed.
#[derive(Debug, Clone)]
pub struct FileRunLocks {
    dir: PathBuf,
}

impl FileRunLocks {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("run-{}.lock", day.format("%Y-%m-%d")))
    }

    fn create(path: &Path) -> io::Result<File> {
        OpenOptions::new().write(true).create_new(true).open(path)
    }

    /// Removes the lock at `path` if its recorded holder is no longer running.
    fn reclaim_if_stale(path: &Path) -> Result<bool, RunLockError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(err.into()),
        };
        let Some(pid) = holder_pid(&raw) else {
            // Holder may still be writing its pid.
            return Ok(false);
        };
        if process_is_running(pid) {
            return Ok(false);
        }

        warn!(path = %path.display(), pid, "reclaiming run lock left by an exited process");
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(err) => Err(err.into()),
        }
    }
}

fn holder_pid(raw: &str) -> Option<u32> {
    raw.split_whitespace()
        .find_map(|field| field.strip_prefix("pid="))
        .and_then(|pid| pid.parse().ok())
}

fn process_is_running(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new_with_specifics(RefreshKind::nothing());
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        false,
        ProcessRefreshKind::nothing(),
    );
    system.process(pid).is_some()
}

impl RunLocks for FileRunLocks {
    fn acquire(&self, day: NaiveDate) -> Result<RunLease, RunLockError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(day);
        let mut file = match Self::create(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                if !Self::reclaim_if_stale(&path)? {
                    return Err(RunLockError::AlreadyRunning { day });
                }
                match Self::create(&path) {
                    Ok(file) => file,
                    Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                        return Err(RunLockError::AlreadyRunning { day })
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            Err(err) => return Err(err.into()),
        };
        writeln!(file, "pid={} acquired_at={}", std::process::id(), Utc::now())?;
        file.sync_data()?;
        info!(path = %path.display(), "run lock acquired");

        Ok(RunLease::new(day, move || {
            if let Err(err) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %err, "failed to release run lock");
            }
        }))
    }
}
