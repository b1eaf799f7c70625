use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{EntityId, Fact, PropertyId, ReferenceGroup};
use crate::error::SyncError;

/// A value currently asserted on a remote entity, with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingClaim {
    pub value: String,
    #[serde(default)]
    pub references: Vec<ReferenceGroup>,
}

/// Remote knowledge-base collaborator. The store enforces uniqueness for
/// properties marked unique and detects edit conflicts server-side.
pub trait KbClient: Send + Sync {
    /// Entities whose `property` equals `value`. Zero, one, or many.
    fn query_by_value(
        &self,
        property: &PropertyId,
        value: &str,
    ) -> Result<Vec<EntityId>, SyncError>;

    /// Full value → entity-set index for `property`, fetched in one pass.
    fn fetch_value_index(
        &self,
        property: &PropertyId,
    ) -> Result<HashMap<String, Vec<EntityId>>, SyncError>;

    /// Current claims for `property` across all entities that have it set.
    fn fetch_claims(
        &self,
        property: &PropertyId,
    ) -> Result<HashMap<EntityId, Vec<ExistingClaim>>, SyncError>;

    /// Writes `fact` onto `entity`. With `replace_references` the submitted
    /// reference groups supersede any existing ones for the matching value.
    fn write_claim(
        &self,
        entity: &EntityId,
        fact: &Fact,
        replace_references: bool,
    ) -> Result<(), SyncError>;

    /// Validates credentials; returns the authenticated user name.
    fn whoami(&self) -> Result<String, SyncError>;
}

#[derive(Clone)]
pub struct KbHttpClient {
    client: Client,
    base_url: String,
}

impl KbHttpClient {
    pub fn new(base_url: &str) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("taxref-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::KbHttp(err.to_string()))?,
        );

        if let Ok(token) = std::env::var("TAXREF_SYNC_TOKEN") {
            if !token.trim().is_empty() {
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                        .map_err(|err| SyncError::Auth(err.to_string()))?,
                );
            }
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| SyncError::KbHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<reqwest::blocking::Response, SyncError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(SyncError::KbHttp(err.to_string()));
                }
            }
        }
    }

    fn read_json<T: for<'de> Deserialize<'de>>(
        response: reqwest::blocking::Response,
    ) -> Result<T, SyncError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "knowledge base request failed".to_string());
            return Err(SyncError::KbStatus { status, message });
        }
        response
            .json::<T>()
            .map_err(|err| SyncError::KbHttp(err.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct EntityListBody {
    entities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ValueIndexBody {
    values: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ClaimsBody {
    claims: HashMap<String, Vec<ExistingClaim>>,
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    user: String,
}

#[derive(Debug, Serialize)]
struct WriteBody<'a> {
    value: &'a str,
    references: &'a [ReferenceGroup],
    replace_references: bool,
}

impl KbClient for KbHttpClient {
    fn query_by_value(
        &self,
        property: &PropertyId,
        value: &str,
    ) -> Result<Vec<EntityId>, SyncError> {
        let url = format!("{}/entities", self.base_url);
        debug!(property = %property, value, "kb.query_by_value");
        let response = self.send_with_retries(|| {
            self.client
                .get(&url)
                .query(&[("property", property.as_str()), ("value", value)])
        })?;
        let body: EntityListBody = Self::read_json(response)?;
        body.entities
            .iter()
            .map(|id| id.parse())
            .collect::<Result<Vec<EntityId>, SyncError>>()
    }

    fn fetch_value_index(
        &self,
        property: &PropertyId,
    ) -> Result<HashMap<String, Vec<EntityId>>, SyncError> {
        let url = format!("{}/properties/{}/index", self.base_url, property.as_str());
        debug!(property = %property, "kb.fetch_value_index");
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let body: ValueIndexBody = Self::read_json(response)?;
        let mut index = HashMap::with_capacity(body.values.len());
        for (value, ids) in body.values {
            let ids = ids
                .iter()
                .map(|id| id.parse())
                .collect::<Result<Vec<EntityId>, SyncError>>()?;
            index.insert(value, ids);
        }
        Ok(index)
    }

    fn fetch_claims(
        &self,
        property: &PropertyId,
    ) -> Result<HashMap<EntityId, Vec<ExistingClaim>>, SyncError> {
        let url = format!("{}/properties/{}/claims", self.base_url, property.as_str());
        debug!(property = %property, "kb.fetch_claims");
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let body: ClaimsBody = Self::read_json(response)?;
        let mut claims = HashMap::with_capacity(body.claims.len());
        for (entity, entries) in body.claims {
            claims.insert(entity.parse::<EntityId>()?, entries);
        }
        Ok(claims)
    }

    fn write_claim(
        &self,
        entity: &EntityId,
        fact: &Fact,
        replace_references: bool,
    ) -> Result<(), SyncError> {
        let url = format!(
            "{}/entities/{}/claims/{}",
            self.base_url,
            entity.as_str(),
            fact.property.as_str()
        );
        debug!(entity = %entity, property = %fact.property, "kb.write_claim");
        // Writes are sent exactly once; the executor owns write retries so a
        // conflict is never replayed blindly.
        let response = self
            .client
            .post(&url)
            .json(&WriteBody {
                value: &fact.value,
                references: &fact.references,
                replace_references,
            })
            .send()
            .map_err(|err| SyncError::KbHttp(err.to_string()))?;

        let status = response.status().as_u16();
        if status == 409 {
            let message = response
                .text()
                .unwrap_or_else(|_| "uniqueness constraint violated".to_string());
            return Err(SyncError::WriteConflict {
                entity: entity.as_str().to_string(),
                property: fact.property.as_str().to_string(),
                message,
            });
        }
        if !response.status().is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "knowledge base request failed".to_string());
            return Err(SyncError::KbStatus { status, message });
        }
        Ok(())
    }

    fn whoami(&self) -> Result<String, SyncError> {
        let url = format!("{}/session", self.base_url);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        if response.status().as_u16() == 401 {
            let message = response
                .text()
                .unwrap_or_else(|_| "unauthorized".to_string());
            return Err(SyncError::Auth(message));
        }
        let body: SessionBody = Self::read_json(response)?;
        Ok(body.user)
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
