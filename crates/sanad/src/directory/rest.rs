//! PostgREST-backed profile directory.
//!
//! Talks to a Supabase-style REST endpoint: `GET`, `POST`, `PATCH`,
//! `DELETE` and `HEAD` on `/rest/v1/<table>` with `eq.` filters.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    DirectoryError, DirectoryResult, DonorFilters, DonorStats, ProfileDirectory, SEARCH_LIMIT,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::profile::{mask_phone, Profile, ProfileInput, ProfileUpdate};

/// Postgres error code for a unique-constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

/// Error body returned by PostgREST.
#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

/// Profile directory client for a PostgREST endpoint.
#[derive(Debug, Clone)]
pub struct RestDirectory {
    client: Client,
    endpoint: String,
}

impl RestDirectory {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL or API key is unusable or the HTTP client
    /// cannot be constructed.
    pub fn from_config(config: &Config) -> Result<Self> {
        let base = config.directory_url()?;
        let endpoint = format!(
            "{}/rest/v1/{}",
            base.as_str().trim_end_matches('/'),
            config.directory.table
        );

        let mut headers = HeaderMap::new();
        let key = &config.directory.anon_key;
        if !key.is_empty() {
            let api_key = HeaderValue::from_str(key)
                .map_err(|_| Error::config_validation("anon_key is not a valid header value"))?;
            let bearer = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| Error::config_validation("anon_key is not a valid header value"))?;
            headers.insert("apikey", api_key);
            headers.insert(AUTHORIZATION, bearer);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self { client, endpoint })
    }

    /// The table endpoint all requests go to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, request: RequestBuilder) -> DirectoryResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| DirectoryError::unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }

    async fn rows<T: DeserializeOwned>(&self, request: RequestBuilder) -> DirectoryResult<Vec<T>> {
        let response = self.send(request).await?;
        let status = response.status();
        response.json::<Vec<T>>().await.map_err(|e| {
            if e.is_decode() {
                DirectoryError::Rejected {
                    status: status.as_u16(),
                    code: None,
                    message: format!("unexpected response body: {e}"),
                }
            } else {
                DirectoryError::unavailable(e.to_string())
            }
        })
    }

    async fn count(&self, filters: &[(&str, String)]) -> DirectoryResult<u64> {
        let request = self
            .client
            .head(&self.endpoint)
            .header("Prefer", "count=exact")
            .query(&[("select", "id")])
            .query(filters);
        let response = self.send(request).await?;

        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| DirectoryError::Rejected {
                status: response.status().as_u16(),
                code: None,
                message: "missing or malformed Content-Range header".to_string(),
            })
    }
}

/// Map a non-success HTTP answer onto the directory taxonomy.
///
/// Gateway failures mean the backend was not reached and count as
/// unavailable; everything else is a rejection by a live backend.
fn classify_failure(status: StatusCode, body: &str) -> DirectoryError {
    if matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    ) {
        return DirectoryError::unavailable(format!("directory answered {status}"));
    }

    let parsed: PostgrestError = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .or(parsed.details)
        .unwrap_or_else(|| body.trim().to_string());

    DirectoryError::Rejected {
        status: status.as_u16(),
        code: parsed.code,
        message,
    }
}

fn is_unique_violation(err: &DirectoryError) -> bool {
    match err {
        DirectoryError::Rejected { status, code, .. } => {
            *status == StatusCode::CONFLICT.as_u16() || code.as_deref() == Some(UNIQUE_VIOLATION)
        }
        _ => false,
    }
}

/// Extract the total from a `Content-Range` value such as `0-24/3573` or `*/0`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

fn search_query(filters: &DonorFilters) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("select", "*".to_string()),
        ("is_active", "eq.true".to_string()),
    ];
    if let Some(id) = &filters.exclude_id {
        query.push(("id", format!("neq.{id}")));
    }
    if let Some(blood_type) = filters.blood_type {
        query.push(("blood_type", format!("eq.{blood_type}")));
    }
    if let Some(governorate) = &filters.governorate {
        query.push(("governorate", format!("eq.{governorate}")));
    }
    if let Some(city) = &filters.city {
        query.push(("city", format!("eq.{city}")));
    }
    query.push(("order", "created_at.desc".to_string()));
    query.push(("limit", SEARCH_LIMIT.to_string()));
    query
}

#[async_trait]
impl ProfileDirectory for RestDirectory {
    async fn find_by_phone(&self, phone: &str) -> DirectoryResult<Option<Profile>> {
        let phone = phone.trim();
        debug!(phone = %mask_phone(phone), "Looking up profile by phone");

        let request = self
            .client
            .get(&self.endpoint)
            .query(&[("select", "*".to_string()), ("phone", format!("eq.{phone}"))])
            .query(&[("limit", "1")]);
        let mut rows: Vec<Profile> = self.rows(request).await?;
        Ok(rows.pop())
    }

    async fn insert(&self, input: &ProfileInput) -> DirectoryResult<Profile> {
        let payload = input.clone().normalized();
        debug!(phone = %mask_phone(&payload.phone), "Inserting profile");

        let request = self
            .client
            .post(&self.endpoint)
            .header("Prefer", "return=representation")
            .json(&payload);

        let mut rows: Vec<Profile> = match self.rows(request).await {
            Ok(rows) => rows,
            Err(e) if is_unique_violation(&e) => {
                return Err(DirectoryError::DuplicatePhone(payload.phone));
            }
            Err(e) => return Err(e),
        };

        rows.pop().ok_or_else(|| DirectoryError::Rejected {
            status: StatusCode::CREATED.as_u16(),
            code: None,
            message: "insert returned no row".to_string(),
        })
    }

    async fn update(&self, id: &str, update: &ProfileUpdate) -> DirectoryResult<Profile> {
        debug!(profile_id = %id, "Updating profile");

        let request = self
            .client
            .patch(&self.endpoint)
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{id}"))])
            .json(update);

        let mut rows: Vec<Profile> = match self.rows(request).await {
            Ok(rows) => rows,
            Err(e) if update.phone.is_some() && is_unique_violation(&e) => {
                let phone = update.phone.clone().unwrap_or_default();
                return Err(DirectoryError::DuplicatePhone(phone));
            }
            Err(e) => return Err(e),
        };

        rows.pop()
            .ok_or_else(|| DirectoryError::NotFound(id.to_string()))
    }

    async fn delete(&self, id: &str) -> DirectoryResult<()> {
        debug!(profile_id = %id, "Deleting profile");

        let request = self
            .client
            .delete(&self.endpoint)
            .query(&[("id", format!("eq.{id}"))]);
        self.send(request).await?;
        Ok(())
    }

    async fn search(&self, filters: &DonorFilters) -> DirectoryResult<Vec<Profile>> {
        let request = self.client.get(&self.endpoint).query(&search_query(filters));
        let donors: Vec<Profile> = self.rows(request).await?;
        debug!(count = donors.len(), "Donor search finished");
        Ok(donors)
    }

    async fn stats(&self) -> DirectoryResult<DonorStats> {
        let total_donors = self.count(&[]).await?;
        let available_donors = match self.count(&[("is_active", "eq.true".to_string())]).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Failed to count available donors");
                return Err(e);
            }
        };
        Ok(DonorStats {
            total_donors,
            available_donors,
        })
    }
}
