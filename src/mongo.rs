use std::collections::{BTreeMap, BTreeSet};

use mongodb::IndexModel;
use mongodb::bson::{Document, doc};
use mongodb::event::EventHandler;
use mongodb::event::command::CommandEvent;
use mongodb::options::ClientOptions;
use mongodb::sync::{Client, Collection, Database};
use tracing::debug;

use crate::config::ResolvedConfig;
use crate::docstore::{
    DocumentStore, UpsertOutcome, area_time_index_keys, average_pipeline, bson_to_f64,
    bson_to_string, filter_document,
};
use crate::domain::RecordFilter;
use crate::error::SyncError;

/// MongoDB backend over the driver's blocking API.
pub struct MongoDocumentStore {
    database: Database,
}

impl MongoDocumentStore {
    /// Builds the client with bounded connect and server-selection timeouts. The
    /// driver connects lazily, so an unreachable server surfaces on first use.
    pub fn connect(config: &ResolvedConfig) -> Result<Self, SyncError> {
        let mut options = ClientOptions::parse(config.mongo_uri.as_str())
            .run()
            .map_err(|err| SyncError::store(err.to_string()))?;
        options.app_name = Some("unsd-sync".to_string());
        options.connect_timeout = Some(config.store_timeout);
        options.server_selection_timeout = Some(config.store_timeout);
        options.command_event_handler = Some(EventHandler::callback(log_command_event));

        let client =
            Client::with_options(options).map_err(|err| SyncError::store(err.to_string()))?;
        let database = client.database(&config.database);
        Ok(Self { database })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

fn log_command_event(event: CommandEvent) {
    match event {
        CommandEvent::Started(event) => debug!(
            command = %event.command_name,
            request_id = event.request_id,
            server = %event.connection.address,
            "command started"
        ),
        CommandEvent::Succeeded(event) => debug!(
            command = %event.command_name,
            request_id = event.request_id,
            server = %event.connection.address,
            micros = event.duration.as_micros() as u64,
            "command succeeded"
        ),
        CommandEvent::Failed(event) => debug!(
            command = %event.command_name,
            request_id = event.request_id,
            server = %event.connection.address,
            micros = event.duration.as_micros() as u64,
            error = %event.failure,
            "command failed"
        ),
        _ => {}
    }
}

fn store_error(err: mongodb::error::Error) -> SyncError {
    SyncError::store(err.to_string())
}

impl DocumentStore for MongoDocumentStore {
    fn delete_all(&self, collection: &str) -> Result<u64, SyncError> {
        let result = self
            .collection(collection)
            .delete_many(doc! {})
            .run()
            .map_err(store_error)?;
        Ok(result.deleted_count)
    }

    fn insert_many(&self, collection: &str, documents: &[Document]) -> Result<u64, SyncError> {
        if documents.is_empty() {
            return Ok(0);
        }
        let result = self
            .collection(collection)
            .insert_many(documents)
            .run()
            .map_err(store_error)?;
        Ok(result.inserted_ids.len() as u64)
    }

    fn replace_or_insert(
        &self,
        collection: &str,
        document: &Document,
    ) -> Result<UpsertOutcome, SyncError> {
        let result = self
            .collection(collection)
            .replace_one(document.clone(), document)
            .upsert(true)
            .run()
            .map_err(store_error)?;
        if result.upserted_id.is_some() {
            Ok(UpsertOutcome::Inserted)
        } else {
            Ok(UpsertOutcome::Matched)
        }
    }

    fn create_area_time_index(&self, collection: &str) -> Result<String, SyncError> {
        let model = IndexModel::builder().keys(area_time_index_keys()).build();
        let result = self
            .collection(collection)
            .create_index(model)
            .run()
            .map_err(|err| SyncError::Index {
                collection: collection.to_string(),
                message: err.to_string(),
            })?;
        Ok(result.index_name)
    }

    fn find(&self, collection: &str, filter: &RecordFilter) -> Result<Vec<Document>, SyncError> {
        let cursor = self
            .collection(collection)
            .find(filter_document(filter))
            .projection(doc! { "_id": 0 })
            .run()
            .map_err(store_error)?;
        cursor
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_error)
    }

    fn aggregate_average(
        &self,
        collection: &str,
        filter: &RecordFilter,
    ) -> Result<BTreeMap<String, f64>, SyncError> {
        let cursor = self
            .collection(collection)
            .aggregate(average_pipeline(filter))
            .run()
            .map_err(store_error)?;
        let mut averages = BTreeMap::new();
        for group in cursor {
            let group = group.map_err(store_error)?;
            let Some(area) = group.get("_id").map(bson_to_string) else {
                continue;
            };
            if let Some(value) = group.get("avg_value").and_then(bson_to_f64) {
                averages.insert(area, value);
            }
        }
        Ok(averages)
    }

    fn distinct(&self, collection: &str, field: &str) -> Result<BTreeSet<String>, SyncError> {
        let values = self
            .collection(collection)
            .distinct(field, doc! {})
            .run()
            .map_err(store_error)?;
        Ok(values.iter().map(bson_to_string).collect())
    }

    fn count(&self, collection: &str) -> Result<u64, SyncError> {
        self.collection(collection)
            .count_documents(doc! {})
            .run()
            .map_err(store_error)
    }
}
