use mongodb::bson::Document;
use serde::Serialize;
use tracing::{info, warn};

use crate::docstore::{DocumentStore, UpsertOutcome, WriteReport, to_documents};
use crate::domain::{Dataset, Observation, UpsertStrategy};
use crate::error::SyncError;

#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub collection: String,
    pub index: Option<String>,
    pub error: Option<String>,
}

/// Writes normalized tables into their collections and keeps the area/time
/// index in place.
pub struct Upserter<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    batch_size: usize,
}

impl<'a, S: DocumentStore + ?Sized> Upserter<'a, S> {
    pub fn new(store: &'a S, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn sync<T: Observation>(
        &self,
        rows: &[T],
        strategy: UpsertStrategy,
    ) -> Result<WriteReport, SyncError> {
        let collection = T::DATASET.collection();
        let documents = to_documents(rows)?;
        let report = match strategy {
            UpsertStrategy::FullReplace => self.full_replace(collection, &documents)?,
            UpsertStrategy::Incremental => self.incremental(collection, &documents)?,
        };
        info!(
            collection,
            %strategy,
            deleted = report.deleted,
            inserted = report.inserted,
            matched = report.matched,
            "collection synchronized"
        );
        Ok(report)
    }

    /// Deletes everything, then inserts in batches. A failure part way leaves
    /// the batches already inserted in place.
    fn full_replace(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> Result<WriteReport, SyncError> {
        let mut report = WriteReport {
            deleted: self.store.delete_all(collection)?,
            ..WriteReport::default()
        };
        for batch in documents.chunks(self.batch_size) {
            let inserted = self
                .store
                .insert_many(collection, batch)
                .map_err(|err| with_applied(err, report.inserted))?;
            report.inserted += inserted;
        }
        Ok(report)
    }

    fn incremental(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> Result<WriteReport, SyncError> {
        let mut report = WriteReport::default();
        for document in documents {
            match self
                .store
                .replace_or_insert(collection, document)
                .map_err(|err| with_applied(err, report.inserted + report.matched))?
            {
                UpsertOutcome::Matched => report.matched += 1,
                UpsertOutcome::Inserted => report.inserted += 1,
            }
        }
        Ok(report)
    }

    /// Index failures are logged and reported, never propagated.
    pub fn rebuild_indexes(&self) -> Vec<IndexReport> {
        Dataset::ALL
            .iter()
            .map(|dataset| {
                let collection = dataset.collection();
                match self.store.create_area_time_index(collection) {
                    Ok(index) => IndexReport {
                        collection: collection.to_string(),
                        index: Some(index),
                        error: None,
                    },
                    Err(err) => {
                        warn!(collection, error = %err, "index build failed");
                        IndexReport {
                            collection: collection.to_string(),
                            index: None,
                            error: Some(err.to_string()),
                        }
                    }
                }
            })
            .collect()
    }
}

fn with_applied(err: SyncError, applied: u64) -> SyncError {
    match err {
        SyncError::StoreConnection { message, .. } => {
            SyncError::StoreConnection { message, applied }
        }
        other => other,
    }
}
