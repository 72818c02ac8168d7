use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use assert_matches::assert_matches;
use mongodb::bson::{Bson, Document};

use unsd_sync::app::{Query, QueryResult, run_query};
use unsd_sync::docstore::{
    AREA_TIME_INDEX, DocumentStore, MemoryDocumentStore, UpsertOutcome, WriteReport,
};
use unsd_sync::domain::{
    Dataset, EmissionObservation, EnergyObservation, RecordFilter, UpsertStrategy,
};
use unsd_sync::error::SyncError;
use unsd_sync::upsert::Upserter;

fn energy(area: &str, year: i32, value: f64) -> EnergyObservation {
    EnergyObservation {
        ref_area: area.to_string(),
        commodity: "Electricity".to_string(),
        transaction: "Imports".to_string(),
        time_period: year,
        value,
    }
}

/// Delegates to the in-memory store but rejects inserts after a budget of batches.
struct FlakyStore {
    inner: MemoryDocumentStore,
    insert_batches_left: Mutex<usize>,
}

impl FlakyStore {
    fn new(insert_batches: usize) -> Self {
        Self {
            inner: MemoryDocumentStore::new(),
            insert_batches_left: Mutex::new(insert_batches),
        }
    }
}

impl DocumentStore for FlakyStore {
    fn delete_all(&self, collection: &str) -> Result<u64, SyncError> {
        self.inner.delete_all(collection)
    }

    fn insert_many(&self, collection: &str, documents: &[Document]) -> Result<u64, SyncError> {
        let mut left = self.insert_batches_left.lock().unwrap();
        if *left == 0 {
            return Err(SyncError::store("connection reset"));
        }
        *left -= 1;
        self.inner.insert_many(collection, documents)
    }

    fn replace_or_insert(
        &self,
        collection: &str,
        document: &Document,
    ) -> Result<UpsertOutcome, SyncError> {
        self.inner.replace_or_insert(collection, document)
    }

    fn create_area_time_index(&self, collection: &str) -> Result<String, SyncError> {
        Err(SyncError::Index {
            collection: collection.to_string(),
            message: "not primary".to_string(),
        })
    }

    fn find(&self, collection: &str, filter: &RecordFilter) -> Result<Vec<Document>, SyncError> {
        self.inner.find(collection, filter)
    }

    fn aggregate_average(
        &self,
        collection: &str,
        filter: &RecordFilter,
    ) -> Result<BTreeMap<String, f64>, SyncError> {
        self.inner.aggregate_average(collection, filter)
    }

    fn distinct(&self, collection: &str, field: &str) -> Result<BTreeSet<String>, SyncError> {
        self.inner.distinct(collection, field)
    }

    fn count(&self, collection: &str) -> Result<u64, SyncError> {
        self.inner.count(collection)
    }
}

#[test]
fn full_replace_leaves_exactly_the_snapshot() {
    let store = MemoryDocumentStore::new();
    let upserter = Upserter::new(&store, 2);

    let first: Vec<_> = (2015..2020).map(|year| energy("USA", year, 1.0)).collect();
    let report = upserter.sync(&first, UpsertStrategy::FullReplace).unwrap();
    assert_eq!(
        report,
        WriteReport {
            deleted: 0,
            inserted: 5,
            matched: 0
        }
    );

    let second = vec![energy("FRA", 2020, 3.0), energy("FRA", 2021, 4.0)];
    let report = upserter.sync(&second, UpsertStrategy::FullReplace).unwrap();
    assert_eq!(report.deleted, 5);
    assert_eq!(report.inserted, 2);

    assert_eq!(store.count("ebal").unwrap(), 2);
    let areas = store.distinct("ebal", "REF_AREA").unwrap();
    assert_eq!(areas, BTreeSet::from(["FRA".to_string()]));
}

#[test]
fn incremental_updates_without_duplicates() {
    let store = MemoryDocumentStore::new();
    let upserter = Upserter::new(&store, 100);
    let rows = vec![energy("USA", 2019, 10.0), energy("USA", 2020, 20.0)];

    let report = upserter.sync(&rows, UpsertStrategy::Incremental).unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.matched, 0);

    let mut next = rows.clone();
    next.push(energy("CAN", 2020, 5.0));
    let report = upserter.sync(&next, UpsertStrategy::Incremental).unwrap();
    assert_eq!(report.matched, 2);
    assert_eq!(report.inserted, 1);
    assert_eq!(store.count("ebal").unwrap(), 3);
}

#[test]
fn average_groups_by_area() {
    let store = MemoryDocumentStore::new();
    let upserter = Upserter::new(&store, 100);
    let mut rows = vec![
        energy("USA", 2015, 10.0),
        energy("USA", 2016, 20.0),
        energy("CAN", 2016, 4.0),
    ];
    rows.push(EnergyObservation {
        commodity: "Hard coal".to_string(),
        ..energy("USA", 2016, 1000.0)
    });
    upserter.sync(&rows, UpsertStrategy::FullReplace).unwrap();

    let filter = RecordFilter::commodity_transaction("Electricity", "Imports");
    let averages = store.aggregate_average("ebal", &filter).unwrap();
    assert_eq!(averages.len(), 2);
    assert_eq!(averages["USA"], 15.0);
    assert_eq!(averages["CAN"], 4.0);
}

#[test]
fn queries_filter_on_typed_year() {
    let store = MemoryDocumentStore::new();
    let upserter = Upserter::new(&store, 100);
    upserter
        .sync(
            &[energy("USA", 2019, 10.0), energy("USA", 2020, 20.0)],
            UpsertStrategy::FullReplace,
        )
        .unwrap();

    let query = Query::Find {
        dataset: Dataset::Ebal,
        filter: RecordFilter {
            ref_area: Some("USA".to_string()),
            time_period: Some(2020),
            ..RecordFilter::default()
        },
    };
    let result = run_query(&store, &query).unwrap();
    assert_matches!(result, QueryResult::Documents(documents) => {
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0]["value"], 20.0);
        assert_eq!(documents[0]["TIME_PERIOD"], 2020);
    });

    let emissions = vec![EmissionObservation {
        ref_area: "AUS".to_string(),
        indicator: "EN_ATM_CO2E_XLULUCF".to_string(),
        time_period: 1990,
        value: 425.3,
    }];
    upserter.sync(&emissions, UpsertStrategy::FullReplace).unwrap();
    let found = store.find("unfcc", &RecordFilter::default()).unwrap();
    assert_eq!(found[0].get("TIME_PERIOD"), Some(&Bson::Int32(1990)));
}

#[test]
fn failed_batch_reports_applied_records() {
    let store = FlakyStore::new(2);
    let upserter = Upserter::new(&store, 2);
    let rows: Vec<_> = (2010..2016).map(|year| energy("USA", year, 1.0)).collect();

    let err = upserter
        .sync(&rows, UpsertStrategy::FullReplace)
        .unwrap_err();
    assert_matches!(err, SyncError::StoreConnection { applied: 4, .. });
    assert_eq!(store.count("ebal").unwrap(), 4);
}

#[test]
fn index_failures_are_reported_not_raised() {
    let store = MemoryDocumentStore::new();
    let reports = Upserter::new(&store, 10).rebuild_indexes();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|report| report.error.is_none()));
    assert!(store.indexes("ebal").contains(AREA_TIME_INDEX));
    assert!(store.indexes("unfcc").contains(AREA_TIME_INDEX));

    let flaky = FlakyStore::new(0);
    let reports = Upserter::new(&flaky, 10).rebuild_indexes();
    assert!(reports.iter().all(|report| report.index.is_none()));
    assert!(reports[0].error.as_deref().unwrap().contains("not primary"));
}
