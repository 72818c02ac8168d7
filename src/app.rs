use std::collections::BTreeMap;
use std::thread;
use std::time::SystemTime;

use chrono::Utc;
use mongodb::bson::Bson;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{ResolvedConfig, RetryPolicy};
use crate::country::CountryNormalizer;
use crate::docstore::{DocumentStore, WriteReport};
use crate::domain::{Dataset, RecordFilter, UpsertStrategy};
use crate::error::SyncError;
use crate::resolver::CodeResolver;
use crate::store::{SnapshotStatus, SnapshotStore};
use crate::unsd::{CodelistSource, SourceClient};
use crate::upsert::{IndexReport, Upserter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleKind {
    /// At least one snapshot is missing: reload both collections from scratch.
    Bootstrap,
    /// Snapshots exist but are stale.
    Refresh,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub strategy: UpsertStrategy,
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl PipelineOptions {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            strategy: config.strategy,
            batch_size: config.insert_batch_size,
            retry: config.retry,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub kind: CycleKind,
    pub strategy: UpsertStrategy,
    pub started_at: String,
    pub finished_at: String,
    pub ebal_rows: usize,
    pub unfcc_rows: usize,
    pub ebal: WriteReport,
    pub unfcc: WriteReport,
    pub indexes: Vec<IndexReport>,
}

/// One refresh cycle, as seen by the scheduler.
pub trait Pipeline: Send + Sync {
    fn snapshots(&self) -> &SnapshotStore;
    fn run_cycle(&self, kind: CycleKind) -> Result<CycleReport, SyncError>;
}

pub struct App<S, C, N, D>
where
    S: SourceClient,
    C: CodelistSource,
    N: CountryNormalizer,
    D: DocumentStore,
{
    snapshots: SnapshotStore,
    source: S,
    resolver: CodeResolver<C, N>,
    store: D,
    options: PipelineOptions,
}

impl<S, C, N, D> App<S, C, N, D>
where
    S: SourceClient,
    C: CodelistSource,
    N: CountryNormalizer,
    D: DocumentStore,
{
    pub fn new(
        snapshots: SnapshotStore,
        source: S,
        resolver: CodeResolver<C, N>,
        store: D,
        options: PipelineOptions,
    ) -> Self {
        Self {
            snapshots,
            source,
            resolver,
            store,
            options,
        }
    }

    /// Runs `step` until it succeeds, fails with a non-retryable class, or the
    /// attempt budget is spent.
    fn retrying<T>(
        &self,
        step: &str,
        mut run: impl FnMut() -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let policy = self.options.retry;
        let mut attempt = 1u32;
        loop {
            match run() {
                Ok(value) => return Ok(value),
                Err(err) if err.class().is_retryable() && attempt < policy.max_attempts => {
                    warn!(
                        step,
                        attempt,
                        max_attempts = policy.max_attempts,
                        class = err.class().as_str(),
                        error = %err,
                        "step failed, retrying"
                    );
                    thread::sleep(policy.backoff * attempt);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<S, C, N, D> Pipeline for App<S, C, N, D>
where
    S: SourceClient,
    C: CodelistSource,
    N: CountryNormalizer,
    D: DocumentStore,
{
    fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Fetch and decode both datasets before touching the store, so fetch and
    /// decode failures never leave a partial write. Snapshots are written last:
    /// a failed store phase keeps them old (or missing) and the next tick retries.
    fn run_cycle(&self, kind: CycleKind) -> Result<CycleReport, SyncError> {
        let started_at = Utc::now().to_rfc3339();
        let strategy = match kind {
            CycleKind::Bootstrap => UpsertStrategy::FullReplace,
            CycleKind::Refresh => self.options.strategy,
        };
        info!(?kind, %strategy, "refresh cycle started");

        let emissions = self.retrying("fetch unfcc", || self.source.fetch_emissions())?;
        let raw_energy = self.retrying("fetch ebal", || self.source.fetch_energy_balance())?;
        let energy = self.retrying("decode ebal", || self.resolver.resolve(&raw_energy))?;

        let upserter = Upserter::new(&self.store, self.options.batch_size);
        let unfcc = self.retrying("upsert unfcc", || upserter.sync(&emissions, strategy))?;
        let ebal = self.retrying("upsert ebal", || upserter.sync(&energy, strategy))?;
        let indexes = upserter.rebuild_indexes();

        self.snapshots.write(&emissions)?;
        self.snapshots.write(&energy)?;

        Ok(CycleReport {
            kind,
            strategy,
            started_at,
            finished_at: Utc::now().to_rfc3339(),
            ebal_rows: energy.len(),
            unfcc_rows: emissions.len(),
            ebal,
            unfcc,
            indexes,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionStatus {
    pub collection: String,
    pub documents: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub snapshots: Vec<SnapshotStatus>,
    pub collections: Vec<CollectionStatus>,
}

/// Snapshot ages plus per-collection document counts. A store that cannot be
/// reached is reported per collection rather than failing the whole report.
pub fn status(
    snapshots: &SnapshotStore,
    store: Option<&dyn DocumentStore>,
    now: SystemTime,
) -> StatusReport {
    let collections = Dataset::ALL
        .iter()
        .map(|dataset| {
            let collection = dataset.collection().to_string();
            match store.map(|store| store.count(dataset.collection())) {
                Some(Ok(documents)) => CollectionStatus {
                    collection,
                    documents: Some(documents),
                    error: None,
                },
                Some(Err(err)) => CollectionStatus {
                    collection,
                    documents: None,
                    error: Some(err.to_string()),
                },
                None => CollectionStatus {
                    collection,
                    documents: None,
                    error: None,
                },
            }
        })
        .collect();
    StatusReport {
        snapshots: snapshots.status(now),
        collections,
    }
}

#[derive(Debug, Clone)]
pub enum Query {
    Find { dataset: Dataset, filter: RecordFilter },
    Average { dataset: Dataset, filter: RecordFilter },
    Distinct { dataset: Dataset, field: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    Documents(Vec<serde_json::Value>),
    Averages(BTreeMap<String, f64>),
    Values(Vec<String>),
}

pub fn run_query(store: &dyn DocumentStore, query: &Query) -> Result<QueryResult, SyncError> {
    match query {
        Query::Find { dataset, filter } => {
            let documents = store.find(dataset.collection(), filter)?;
            Ok(QueryResult::Documents(
                documents
                    .into_iter()
                    .map(|document| Bson::Document(document).into_relaxed_extjson())
                    .collect(),
            ))
        }
        Query::Average { dataset, filter } => Ok(QueryResult::Averages(
            store.aggregate_average(dataset.collection(), filter)?,
        )),
        Query::Distinct { dataset, field } => Ok(QueryResult::Values(
            store
                .distinct(dataset.collection(), field)?
                .into_iter()
                .collect(),
        )),
    }
}
