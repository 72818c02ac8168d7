use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

pub const FIELD_REF_AREA: &str = "REF_AREA";
pub const FIELD_COMMODITY: &str = "COMMODITY";
pub const FIELD_TRANSACTION: &str = "TRANSACTION";
pub const FIELD_INDICATOR: &str = "INDICATOR";
pub const FIELD_TIME_PERIOD: &str = "TIME_PERIOD";
pub const FIELD_VALUE: &str = "value";

/// The two upstream dataflows mirrored into the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    Ebal,
    Unfcc,
}

impl Dataset {
    pub const ALL: [Dataset; 2] = [Dataset::Unfcc, Dataset::Ebal];

    pub fn flow_id(self) -> &'static str {
        match self {
            Dataset::Ebal => "DF_UNData_EnergyBalance",
            Dataset::Unfcc => "DF_UNData_UNFCC",
        }
    }

    pub fn collection(self) -> &'static str {
        match self {
            Dataset::Ebal => "ebal",
            Dataset::Unfcc => "unfcc",
        }
    }

    pub fn snapshot_file_name(self) -> &'static str {
        match self {
            Dataset::Ebal => "data_ebal.csv",
            Dataset::Unfcc => "data_unfcc.csv",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.collection())
    }
}

impl FromStr for Dataset {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ebal" | "energy" | "energy-balance" => Ok(Dataset::Ebal),
            "unfcc" | "emissions" | "ghg" => Ok(Dataset::Unfcc),
            _ => Err(SyncError::InvalidConfig(format!("unknown dataset: {value}"))),
        }
    }
}

/// How a fresh snapshot is written into its collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum UpsertStrategy {
    /// Drop every document, then bulk insert the snapshot.
    #[default]
    FullReplace,
    /// `replace_one(record, record, upsert)` for each row.
    Incremental,
}

impl fmt::Display for UpsertStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpsertStrategy::FullReplace => write!(f, "full-replace"),
            UpsertStrategy::Incremental => write!(f, "incremental"),
        }
    }
}

impl FromStr for UpsertStrategy {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "full-replace" | "full_replace" | "replace" => Ok(UpsertStrategy::FullReplace),
            "incremental" | "upsert" => Ok(UpsertStrategy::Incremental),
            _ => Err(SyncError::InvalidConfig(format!(
                "unknown upsert strategy: {value}"
            ))),
        }
    }
}

/// Codelists used to decode the energy balance dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeDomain {
    Area,
    Commodity,
    Transaction,
}

impl CodeDomain {
    pub const ALL: [CodeDomain; 3] = [
        CodeDomain::Area,
        CodeDomain::Commodity,
        CodeDomain::Transaction,
    ];

    pub fn codelist_id(self) -> &'static str {
        match self {
            CodeDomain::Area => "CL_AREA",
            CodeDomain::Commodity => "CL_COMMODITY_ENERGY_BALANCE_UNDATA",
            CodeDomain::Transaction => "CL_TRANS_ENERGY_BALANCE_UNDATA",
        }
    }
}

/// Energy balance row as published, with coded dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEnergyRow {
    #[serde(rename = "REF_AREA")]
    pub ref_area: String,
    #[serde(rename = "COMMODITY")]
    pub commodity: String,
    #[serde(rename = "TRANSACTION")]
    pub transaction: String,
    #[serde(rename = "TIME_PERIOD")]
    pub time_period: i32,
    pub value: f64,
}

/// Decoded energy balance row stored in `ebal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyObservation {
    #[serde(rename = "REF_AREA")]
    pub ref_area: String,
    #[serde(rename = "COMMODITY")]
    pub commodity: String,
    #[serde(rename = "TRANSACTION")]
    pub transaction: String,
    #[serde(rename = "TIME_PERIOD")]
    pub time_period: i32,
    pub value: f64,
}

/// Greenhouse-gas row stored in `unfcc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionObservation {
    #[serde(rename = "REF_AREA")]
    pub ref_area: String,
    #[serde(rename = "INDICATOR")]
    pub indicator: String,
    #[serde(rename = "TIME_PERIOD")]
    pub time_period: i32,
    pub value: f64,
}

/// A normalized row type that can be snapshotted and upserted.
pub trait Observation: Serialize + DeserializeOwned + Clone + Send + Sync {
    const DATASET: Dataset;
}

impl Observation for EnergyObservation {
    const DATASET: Dataset = Dataset::Ebal;
}

impl Observation for EmissionObservation {
    const DATASET: Dataset = Dataset::Unfcc;
}

/// Equality filter for the downstream read interface. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    #[serde(rename = "REF_AREA", default, skip_serializing_if = "Option::is_none")]
    pub ref_area: Option<String>,
    #[serde(rename = "COMMODITY", default, skip_serializing_if = "Option::is_none")]
    pub commodity: Option<String>,
    #[serde(rename = "TRANSACTION", default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(rename = "TIME_PERIOD", default, skip_serializing_if = "Option::is_none")]
    pub time_period: Option<i32>,
    #[serde(rename = "INDICATOR", default, skip_serializing_if = "Option::is_none")]
    pub indicator: Option<String>,
}

impl RecordFilter {
    pub fn commodity_transaction(commodity: &str, transaction: &str) -> Self {
        Self {
            commodity: Some(commodity.to_string()),
            transaction: Some(transaction.to_string()),
            ..Self::default()
        }
    }

    pub fn text_conditions(&self) -> Vec<(&'static str, &str)> {
        let mut conditions = Vec::new();
        if let Some(value) = &self.ref_area {
            conditions.push((FIELD_REF_AREA, value.as_str()));
        }
        if let Some(value) = &self.commodity {
            conditions.push((FIELD_COMMODITY, value.as_str()));
        }
        if let Some(value) = &self.transaction {
            conditions.push((FIELD_TRANSACTION, value.as_str()));
        }
        if let Some(value) = &self.indicator {
            conditions.push((FIELD_INDICATOR, value.as_str()));
        }
        conditions
    }
}
