use std::fs;
use std::io::Write;
use std::time::{Duration, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tempfile::Builder;
use tracing::info;

use crate::domain::{Dataset, Observation};
use crate::error::SyncError;

/// On-disk CSV snapshots, one file per dataset. The file's mtime is the
/// staleness signal for the scheduler.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotStatus {
    pub dataset: Dataset,
    pub path: String,
    pub exists: bool,
    pub modified_at: Option<String>,
    pub age_secs: Option<u64>,
    pub rows: Option<usize>,
}

impl SnapshotStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn path(&self, dataset: Dataset) -> Utf8PathBuf {
        self.root.join(dataset.snapshot_file_name())
    }

    pub fn ensure_root(&self) -> Result<(), SyncError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))
    }

    pub fn exists(&self, dataset: Dataset) -> bool {
        self.path(dataset).as_std_path().is_file()
    }

    pub fn all_present(&self) -> bool {
        Dataset::ALL.iter().all(|dataset| self.exists(*dataset))
    }

    /// Replaces the snapshot via a temp file in the same directory, so readers
    /// never observe a half-written file.
    pub fn write<T: Observation>(&self, rows: &[T]) -> Result<(), SyncError> {
        let path = self.path(T::DATASET);
        self.ensure_root()?;
        let mut temp = Builder::new()
            .prefix(".unsd-sync-snapshot")
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        {
            let mut writer = csv::Writer::from_writer(temp.as_file_mut());
            for row in rows {
                writer
                    .serialize(row)
                    .map_err(|err| SyncError::Filesystem(err.to_string()))?;
            }
            writer
                .flush()
                .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        }
        if rows.is_empty() {
            temp.as_file_mut()
                .write_all(header_line(T::DATASET).as_bytes())
                .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        info!(dataset = %T::DATASET, rows = rows.len(), path = %path, "snapshot stored");
        Ok(())
    }

    pub fn read<T: Observation>(&self) -> Result<Vec<T>, SyncError> {
        let path = self.path(T::DATASET);
        if !path.as_std_path().is_file() {
            return Err(SyncError::SnapshotNotFound(path.to_string()));
        }
        let mut reader = csv::Reader::from_path(path.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        reader
            .deserialize()
            .collect::<Result<Vec<T>, _>>()
            .map_err(|err| SyncError::SnapshotFormat {
                path: path.to_string(),
                message: err.to_string(),
            })
    }

    pub fn modified(&self, dataset: Dataset) -> Result<SystemTime, SyncError> {
        let path = self.path(dataset);
        let metadata = fs::metadata(path.as_std_path()).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                SyncError::SnapshotNotFound(path.to_string())
            } else {
                SyncError::Filesystem(err.to_string())
            }
        })?;
        metadata
            .modified()
            .map_err(|err| SyncError::Filesystem(err.to_string()))
    }

    /// Time since the last write, measured against `now`. A modification time
    /// in the future counts as zero age.
    pub fn age(&self, dataset: Dataset, now: SystemTime) -> Result<Duration, SyncError> {
        let modified = self.modified(dataset)?;
        Ok(now.duration_since(modified).unwrap_or(Duration::ZERO))
    }

    /// Age of the older of the two snapshots.
    pub fn oldest_age(&self, now: SystemTime) -> Result<Duration, SyncError> {
        let mut oldest = Duration::ZERO;
        for dataset in Dataset::ALL {
            oldest = oldest.max(self.age(dataset, now)?);
        }
        Ok(oldest)
    }

    pub fn status(&self, now: SystemTime) -> Vec<SnapshotStatus> {
        Dataset::ALL
            .iter()
            .map(|dataset| {
                let path = self.path(*dataset);
                let modified = self.modified(*dataset).ok();
                SnapshotStatus {
                    dataset: *dataset,
                    path: path.to_string(),
                    exists: modified.is_some(),
                    modified_at: modified
                        .map(|time| DateTime::<Utc>::from(time).to_rfc3339()),
                    age_secs: modified.map(|time| {
                        now.duration_since(time).unwrap_or(Duration::ZERO).as_secs()
                    }),
                    rows: modified.and_then(|_| count_rows(&path).ok()),
                }
            })
            .collect()
    }
}

fn header_line(dataset: Dataset) -> &'static str {
    match dataset {
        Dataset::Ebal => "REF_AREA,COMMODITY,TRANSACTION,TIME_PERIOD,value\n",
        Dataset::Unfcc => "REF_AREA,INDICATOR,TIME_PERIOD,value\n",
    }
}

fn count_rows(path: &Utf8Path) -> Result<usize, SyncError> {
    let mut reader = csv::Reader::from_path(path.as_std_path())
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    let mut rows = 0;
    for record in reader.records() {
        record.map_err(|err| SyncError::Filesystem(err.to_string()))?;
        rows += 1;
    }
    Ok(rows)
}
