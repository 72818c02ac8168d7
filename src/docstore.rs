//! Document-store seam. The refresh pipeline only needs a handful of
//! primitives; strategy and batching logic lives in [`crate::upsert`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use mongodb::bson::{self, Bson, Document, doc};
use serde::Serialize;

use crate::domain::{FIELD_REF_AREA, FIELD_TIME_PERIOD, FIELD_VALUE, RecordFilter};
use crate::error::SyncError;

pub const AREA_TIME_INDEX: &str = "REF_AREA_1_TIME_PERIOD_-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Matched,
    Inserted,
}

pub trait DocumentStore: Send + Sync {
    fn delete_all(&self, collection: &str) -> Result<u64, SyncError>;
    fn insert_many(&self, collection: &str, documents: &[Document]) -> Result<u64, SyncError>;
    /// Replace the document equal to `document`, inserting it when none matches.
    fn replace_or_insert(
        &self,
        collection: &str,
        document: &Document,
    ) -> Result<UpsertOutcome, SyncError>;
    /// Compound index (`REF_AREA` asc, `TIME_PERIOD` desc). Returns the index name.
    fn create_area_time_index(&self, collection: &str) -> Result<String, SyncError>;

    fn find(&self, collection: &str, filter: &RecordFilter) -> Result<Vec<Document>, SyncError>;
    fn aggregate_average(
        &self,
        collection: &str,
        filter: &RecordFilter,
    ) -> Result<BTreeMap<String, f64>, SyncError>;
    fn distinct(&self, collection: &str, field: &str) -> Result<BTreeSet<String>, SyncError>;
    fn count(&self, collection: &str) -> Result<u64, SyncError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub deleted: u64,
    pub inserted: u64,
    pub matched: u64,
}

pub fn to_documents<T: Serialize>(rows: &[T]) -> Result<Vec<Document>, SyncError> {
    rows.iter()
        .map(|row| bson::to_document(row).map_err(|err| SyncError::DocumentEncode(err.to_string())))
        .collect()
}

pub fn filter_document(filter: &RecordFilter) -> Document {
    let mut document = Document::new();
    for (field, value) in filter.text_conditions() {
        document.insert(field, value);
    }
    if let Some(year) = filter.time_period {
        document.insert(FIELD_TIME_PERIOD, year);
    }
    document
}

pub fn area_time_index_keys() -> Document {
    doc! { "REF_AREA": 1, "TIME_PERIOD": -1 }
}

pub fn average_pipeline(filter: &RecordFilter) -> Vec<Document> {
    vec![
        doc! { "$match": filter_document(filter) },
        doc! {
            "$group": {
                "_id": "$REF_AREA",
                "avg_value": { "$avg": "$value" },
            }
        },
        doc! { "$sort": { "_id": 1 } },
    ]
}

pub fn bson_to_string(value: &Bson) -> String {
    match value {
        Bson::String(text) => text.clone(),
        Bson::Int32(number) => number.to_string(),
        Bson::Int64(number) => number.to_string(),
        Bson::Double(number) => number.to_string(),
        other => other.to_string(),
    }
}

pub fn bson_to_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(number) => Some(*number),
        Bson::Int32(number) => Some(f64::from(*number)),
        Bson::Int64(number) => Some(*number as f64),
        _ => None,
    }
}

/// Process-local store with the same semantics as the MongoDB backend. Used for
/// dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<BTreeMap<String, Vec<Document>>>,
    indexes: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn indexes(&self, collection: &str) -> BTreeSet<String> {
        self.indexes
            .lock()
            .map(|guard| guard.get(collection).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn with_collection<R>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut Vec<Document>) -> R,
    ) -> Result<R, SyncError> {
        let mut guard = self
            .collections
            .lock()
            .map_err(|_| SyncError::store("memory store lock poisoned"))?;
        Ok(f(guard.entry(collection.to_string()).or_default()))
    }
}

fn matches_filter(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, value)| document.get(key) == Some(value))
}

impl DocumentStore for MemoryDocumentStore {
    fn delete_all(&self, collection: &str) -> Result<u64, SyncError> {
        self.with_collection(collection, |documents| {
            let deleted = documents.len() as u64;
            documents.clear();
            deleted
        })
    }

    fn insert_many(&self, collection: &str, documents: &[Document]) -> Result<u64, SyncError> {
        self.with_collection(collection, |stored| {
            stored.extend(documents.iter().cloned());
            documents.len() as u64
        })
    }

    fn replace_or_insert(
        &self,
        collection: &str,
        document: &Document,
    ) -> Result<UpsertOutcome, SyncError> {
        self.with_collection(collection, |stored| {
            match stored
                .iter_mut()
                .find(|existing| matches_filter(existing, document))
            {
                Some(existing) => {
                    *existing = document.clone();
                    UpsertOutcome::Matched
                }
                None => {
                    stored.push(document.clone());
                    UpsertOutcome::Inserted
                }
            }
        })
    }

    fn create_area_time_index(&self, collection: &str) -> Result<String, SyncError> {
        let mut guard = self.indexes.lock().map_err(|_| SyncError::Index {
            collection: collection.to_string(),
            message: "memory store lock poisoned".to_string(),
        })?;
        guard
            .entry(collection.to_string())
            .or_default()
            .insert(AREA_TIME_INDEX.to_string());
        Ok(AREA_TIME_INDEX.to_string())
    }

    fn find(&self, collection: &str, filter: &RecordFilter) -> Result<Vec<Document>, SyncError> {
        let filter = filter_document(filter);
        self.with_collection(collection, |stored| {
            stored
                .iter()
                .filter(|document| matches_filter(document, &filter))
                .cloned()
                .collect()
        })
    }

    fn aggregate_average(
        &self,
        collection: &str,
        filter: &RecordFilter,
    ) -> Result<BTreeMap<String, f64>, SyncError> {
        let matched = self.find(collection, filter)?;
        let mut sums: BTreeMap<String, (f64, u64)> = BTreeMap::new();
        for document in &matched {
            let Some(area) = document.get(FIELD_REF_AREA).map(bson_to_string) else {
                continue;
            };
            let Some(value) = document.get(FIELD_VALUE).and_then(bson_to_f64) else {
                continue;
            };
            let entry = sums.entry(area).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
        Ok(sums
            .into_iter()
            .map(|(area, (sum, count))| (area, sum / count as f64))
            .collect())
    }

    fn distinct(&self, collection: &str, field: &str) -> Result<BTreeSet<String>, SyncError> {
        self.with_collection(collection, |stored| {
            stored
                .iter()
                .filter_map(|document| document.get(field).map(bson_to_string))
                .collect()
        })
    }

    fn count(&self, collection: &str) -> Result<u64, SyncError> {
        self.with_collection(collection, |stored| stored.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_document_uses_typed_year() {
        let filter = RecordFilter {
            ref_area: Some("USA".to_string()),
            time_period: Some(2015),
            ..RecordFilter::default()
        };
        assert_eq!(
            filter_document(&filter),
            doc! { "REF_AREA": "USA", "TIME_PERIOD": 2015 }
        );
    }

    #[test]
    fn average_pipeline_groups_by_area() {
        let pipeline = average_pipeline(&RecordFilter::commodity_transaction(
            "Electricity",
            "Imports",
        ));
        assert_eq!(
            pipeline[0],
            doc! { "$match": { "COMMODITY": "Electricity", "TRANSACTION": "Imports" } }
        );
        assert_eq!(
            pipeline[1],
            doc! { "$group": { "_id": "$REF_AREA", "avg_value": { "$avg": "$value" } } }
        );
    }

    #[test]
    fn index_keys_order() {
        let keys = area_time_index_keys();
        let fields: Vec<&String> = keys.keys().collect();
        assert_eq!(fields, vec!["REF_AREA", "TIME_PERIOD"]);
        assert_eq!(keys.get_i32("TIME_PERIOD").unwrap(), -1);
    }
}
