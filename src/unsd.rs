use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, info, warn};

use crate::config::{HttpRetry, ResolvedConfig};
use crate::domain::{CodeDomain, Dataset, EmissionObservation, RawEnergyRow};
use crate::error::SyncError;
use crate::sdmx::{self, ParsedCodelist};

const DATA_ACCEPT: &str = "application/vnd.sdmx.structurespecificdata+xml;version=2.1";
const STRUCTURE_ACCEPT: &str = "application/vnd.sdmx.structure+xml;version=2.1";

/// Upstream observation tables.
pub trait SourceClient: Send + Sync {
    fn fetch_energy_balance(&self) -> Result<Vec<RawEnergyRow>, SyncError>;
    fn fetch_emissions(&self) -> Result<Vec<EmissionObservation>, SyncError>;
}

/// Remote codelists used to decode coded dimensions.
pub trait CodelistSource: Send + Sync {
    fn fetch_codelist(&self, domain: CodeDomain) -> Result<ParsedCodelist, SyncError>;
}

impl<T: SourceClient + ?Sized> SourceClient for &T {
    fn fetch_energy_balance(&self) -> Result<Vec<RawEnergyRow>, SyncError> {
        (**self).fetch_energy_balance()
    }

    fn fetch_emissions(&self) -> Result<Vec<EmissionObservation>, SyncError> {
        (**self).fetch_emissions()
    }
}

impl<T: CodelistSource + ?Sized> CodelistSource for &T {
    fn fetch_codelist(&self, domain: CodeDomain) -> Result<ParsedCodelist, SyncError> {
        (**self).fetch_codelist(domain)
    }
}

#[derive(Clone)]
pub struct UnsdHttpClient {
    client: Client,
    base_url: String,
    retry: HttpRetry,
}

impl UnsdHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, SyncError> {
        Self::with_base_url(&config.api_base_url, config.http_timeout, config.http_retry)
    }

    pub fn with_base_url(
        base_url: &str,
        timeout: Duration,
        retry: HttpRetry,
    ) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("unsd-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::InvalidConfig(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| SyncError::SourceHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    pub fn data_url(&self, dataset: Dataset) -> String {
        format!("{}/data/{}/", self.base_url, dataset.flow_id())
    }

    pub fn codelist_url(&self, domain: CodeDomain) -> String {
        format!("{}/codelist/unsd/{}/", self.base_url, domain.codelist_id())
    }

    fn fetch_dataset(&self, dataset: Dataset) -> Result<Vec<sdmx::SdmxObservation>, SyncError> {
        let url = self.data_url(dataset);
        info!(dataset = %dataset, %url, "loading dataset");
        let body = self.get_text(&url, DATA_ACCEPT)?;
        let observations = sdmx::parse_data_message(&body)?;
        debug!(dataset = %dataset, observations = observations.len(), "parsed data message");
        Ok(observations)
    }

    /// GET with per-request retries. A retryable status that outlasts the
    /// budget is returned as `SourceStatus`, not as a transport error.
    fn get_text(&self, url: &str, accept: &'static str) -> Result<String, SyncError> {
        let mut retry = 0;
        let response = loop {
            let can_retry = retry < self.retry.retries;
            match self.client.get(url).header(ACCEPT, accept).send() {
                Ok(response) if can_retry && is_retryable_status(response.status()) => {
                    warn!(
                        %url,
                        status = response.status().as_u16(),
                        retry,
                        "UNSD request will be retried"
                    );
                }
                Ok(response) => break response,
                Err(err) if can_retry && is_retryable_error(&err) => {
                    warn!(%url, error = %err, retry, "UNSD request will be retried");
                }
                Err(err) => return Err(SyncError::SourceHttp(err.to_string())),
            }
            retry += 1;
            thread::sleep(self.retry.delay(retry));
        };

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .ok()
                .filter(|body| !body.trim().is_empty())
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                });
            return Err(SyncError::SourceStatus {
                status: status.as_u16(),
                message,
            });
        }
        response
            .text()
            .map_err(|err| SyncError::SourceHttp(err.to_string()))
    }
}

impl SourceClient for UnsdHttpClient {
    fn fetch_energy_balance(&self) -> Result<Vec<RawEnergyRow>, SyncError> {
        let observations = self.fetch_dataset(Dataset::Ebal)?;
        sdmx::energy_rows(&observations)
    }

    fn fetch_emissions(&self) -> Result<Vec<EmissionObservation>, SyncError> {
        let observations = self.fetch_dataset(Dataset::Unfcc)?;
        sdmx::emission_rows(&observations)
    }
}

impl CodelistSource for UnsdHttpClient {
    fn fetch_codelist(&self, domain: CodeDomain) -> Result<ParsedCodelist, SyncError> {
        let url = self.codelist_url(domain);
        debug!(codelist = domain.codelist_id(), %url, "fetching codelist");
        let body = self.get_text(&url, STRUCTURE_ACCEPT)?;
        sdmx::parse_codelist(&body)
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
