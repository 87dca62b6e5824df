use std::{
    fs::{self, File, OpenOptions},
    io::{BufReader, BufWriter, ErrorKind, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, StoreError},
    loader::{load_observed, load_predicted, LoadOptions},
    schema::{
        observed_columns, ObservedRecord, PredictedRecord, OBSERVED_TABLE, PREDICTED_COLUMN_MAP,
        PREDICTED_TABLE,
    },
};

/// The two loaded tables. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableStore {
    pub observed: Vec<ObservedRecord>,
    pub predicted: Vec<PredictedRecord>,
}

/// Row count and column names of one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub rows: usize,
    pub columns: Vec<String>,
}

/// Leading rows of one table, in load order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TableRows {
    Observed(Vec<ObservedRecord>),
    Predicted(Vec<PredictedRecord>),
}

impl TableRows {
    pub fn len(&self) -> usize {
        match self {
            TableRows::Observed(rows) => rows.len(),
            TableRows::Predicted(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TableStore {
    pub fn new(observed: Vec<ObservedRecord>, predicted: Vec<PredictedRecord>) -> Self {
        Self { observed, predicted }
    }

    pub fn table_names() -> [&'static str; 2] {
        [OBSERVED_TABLE, PREDICTED_TABLE]
    }

    pub fn describe(&self, name: &str) -> Result<TableSummary> {
        let (rows, columns): (usize, Vec<String>) = match name {
            OBSERVED_TABLE => (
                self.observed.len(),
                observed_columns::ALL.iter().map(|c| c.to_string()).collect(),
            ),
            PREDICTED_TABLE => (
                self.predicted.len(),
                PREDICTED_COLUMN_MAP.iter().map(|(_, c)| c.to_string()).collect(),
            ),
            other => return Err(StoreError::UnknownTable(other.to_string())),
        };
        Ok(TableSummary {
            name: name.to_string(),
            rows,
            columns,
        })
    }

    /// First `limit` rows of `name` as loaded.
    pub fn sample(&self, name: &str, limit: usize) -> Result<TableRows> {
        match name {
            OBSERVED_TABLE => Ok(TableRows::Observed(
                self.observed.iter().take(limit).cloned().collect(),
            )),
            PREDICTED_TABLE => Ok(TableRows::Predicted(
                self.predicted.iter().take(limit).cloned().collect(),
            )),
            other => Err(StoreError::UnknownTable(other.to_string())),
        }
    }

    pub fn summaries(&self) -> Vec<TableSummary> {
        Self::table_names()
            .iter()
            .filter_map(|name| self.describe(name).ok())
            .collect()
    }

    /// Open a published store. A missing file means no load has completed.
    pub fn open(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::StoreUnavailable(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let store: TableStore = serde_json::from_reader(BufReader::new(file))?;
        tracing::info!(
            "opened store {} ({} observed, {} predicted)",
            path.display(),
            store.observed.len(),
            store.predicted.len()
        );
        Ok(store)
    }
}

/// Exclusive rebuild lock, released on drop. The file holds the owner's pid
/// so a lock left behind by a killed build can be reclaimed.
struct WriteLock {
    path: PathBuf,
}

impl WriteLock {
    fn acquire(store: &Path) -> Result<Self> {
        let path = sibling(store, "lock");
        match Self::create(&path) {
            Err(StoreError::Io(e)) if e.kind() == ErrorKind::AlreadyExists => {}
            other => return other,
        }

        let owner = fs::read_to_string(&path)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok());
        match owner {
            Some(pid) if !process_alive(pid) => {
                tracing::warn!("removing stale lock {} left by pid {}", path.display(), pid);
                fs::remove_file(&path)?;
                Self::create(&path).map_err(|e| match e {
                    StoreError::Io(io) if io.kind() == ErrorKind::AlreadyExists => {
                        busy(store, &path, None)
                    }
                    other => other,
                })
            }
            owner => Err(busy(store, &path, owner)),
        }
    }

    fn create(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let lock = Self { path: path.to_path_buf() };
        write!(file, "{}", std::process::id())?;
        file.sync_all()?;
        Ok(lock)
    }
}

fn busy(store: &Path, lock: &Path, owner: Option<u32>) -> StoreError {
    StoreError::StoreBusy {
        store: store.to_path_buf(),
        lock: lock.to_path_buf(),
        owner,
    }
}

/// Whether `pid` names a running process. Without `/proc` the owner is
/// assumed alive.
fn process_alive(pid: u32) -> bool {
    let proc_root = Path::new("/proc");
    if !proc_root.is_dir() {
        return true;
    }
    proc_root.join(pid.to_string()).exists()
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

fn sibling(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(ext);
    path.with_file_name(name)
}

/// Load both input files and publish them as the store at `store_path`,
/// replacing whatever was there.
///
/// Nothing is written unless both files load cleanly; the new store becomes
/// visible in one rename.
pub fn build_store(
    observed_csv: &Path,
    predicted_csv: &Path,
    store_path: &Path,
    opts: &LoadOptions,
) -> Result<TableStore> {
    let _lock = WriteLock::acquire(store_path)?;

    let observed = load_observed(observed_csv, opts)?;
    let predicted = load_predicted(predicted_csv, opts)?;
    let store = TableStore::new(observed, predicted);

    publish(&store, store_path)?;
    Ok(store)
}

/// Serialize to a temp file next to the target, fsync, rename over it.
pub fn publish(store: &TableStore, store_path: &Path) -> Result<()> {
    let tmp = sibling(store_path, "tmp");
    let result = write_synced(store, &tmp).and_then(|_| fs::rename(&tmp, store_path).map_err(StoreError::from));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
        return result;
    }
    tracing::info!(
        "published store {} ({} observed, {} predicted)",
        store_path.display(),
        store.observed.len(),
        store.predicted.len()
    );
    Ok(())
}

fn write_synced(store: &TableStore, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, store)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}
