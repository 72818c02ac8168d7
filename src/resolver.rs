use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::country::{self, CountryNormalizer};
use crate::domain::{CodeDomain, EnergyObservation, RawEnergyRow};
use crate::error::SyncError;
use crate::unsd::CodelistSource;

/// The three energy-balance codelists, held only for one decode pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Codelists {
    pub area: BTreeMap<String, String>,
    pub commodity: BTreeMap<String, String>,
    pub transaction: BTreeMap<String, String>,
}

impl Codelists {
    /// Downloads all three codelists. Called once per decode; nothing is cached.
    pub fn fetch(source: &dyn CodelistSource) -> Result<Self, SyncError> {
        let mut codelists = Codelists::default();
        for domain in CodeDomain::ALL {
            let parsed = source.fetch_codelist(domain)?;
            debug!(
                codelist = domain.codelist_id(),
                codes = parsed.codes.len(),
                skipped = parsed.skipped,
                "codelist loaded"
            );
            *codelists.domain_mut(domain) = parsed.codes;
        }
        Ok(codelists)
    }

    pub fn domain(&self, domain: CodeDomain) -> &BTreeMap<String, String> {
        match domain {
            CodeDomain::Area => &self.area,
            CodeDomain::Commodity => &self.commodity,
            CodeDomain::Transaction => &self.transaction,
        }
    }

    fn domain_mut(&mut self, domain: CodeDomain) -> &mut BTreeMap<String, String> {
        match domain {
            CodeDomain::Area => &mut self.area,
            CodeDomain::Commodity => &mut self.commodity,
            CodeDomain::Transaction => &mut self.transaction,
        }
    }

    /// Numeric area codes lose their leading zeros in tabular round trips, so a
    /// miss is retried with the three-digit M49 form.
    pub fn lookup(&self, domain: CodeDomain, code: &str) -> Result<&str, SyncError> {
        let map = self.domain(domain);
        let code = code.trim();
        if let Some(label) = map.get(code) {
            return Ok(label.as_str());
        }
        if domain == CodeDomain::Area {
            if let Ok(number) = code.parse::<u32>() {
                if let Some(label) = map.get(&format!("{number:03}")) {
                    return Ok(label.as_str());
                }
            }
        }
        Err(SyncError::UnknownCode {
            codelist: domain.codelist_id().to_string(),
            code: code.to_string(),
        })
    }
}

pub struct CodeResolver<C: CodelistSource, N: CountryNormalizer> {
    codelists: C,
    normalizer: N,
}

impl<C: CodelistSource, N: CountryNormalizer> CodeResolver<C, N> {
    pub fn new(codelists: C, normalizer: N) -> Self {
        Self {
            codelists,
            normalizer,
        }
    }

    /// Fetches fresh codelists and decodes every row. Any unresolved code fails
    /// the whole batch.
    pub fn resolve(&self, rows: &[RawEnergyRow]) -> Result<Vec<EnergyObservation>, SyncError> {
        let codelists = Codelists::fetch(&self.codelists)?;
        let decoded = decode_energy(rows, &codelists, &self.normalizer)?;
        info!(rows = decoded.len(), "energy balance decoded");
        Ok(decoded)
    }
}

pub fn decode_energy(
    rows: &[RawEnergyRow],
    codelists: &Codelists,
    normalizer: &dyn CountryNormalizer,
) -> Result<Vec<EnergyObservation>, SyncError> {
    let mut iso3_by_name: BTreeMap<&str, String> = BTreeMap::new();
    let mut decoded = Vec::with_capacity(rows.len());
    for row in rows {
        let area_name = codelists.lookup(CodeDomain::Area, &row.ref_area)?;
        let iso3 = match iso3_by_name.get(area_name) {
            Some(iso3) => iso3.clone(),
            None => {
                let iso3 = country::area_to_iso3(normalizer, area_name)?;
                iso3_by_name.insert(area_name, iso3.clone());
                iso3
            }
        };
        decoded.push(EnergyObservation {
            ref_area: iso3,
            commodity: codelists
                .lookup(CodeDomain::Commodity, &row.commodity)?
                .to_string(),
            transaction: codelists
                .lookup(CodeDomain::Transaction, &row.transaction)?
                .to_string(),
            time_period: row.time_period,
            value: row.value,
        });
    }
    Ok(decoded)
}
