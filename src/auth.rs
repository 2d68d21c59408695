use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::BEARER_HEADER;
use crate::envelope::{self, ApiRequest};
use crate::error::Result;

/// Access/refresh token pair with their expiry timestamps.
///
/// Serializes to the payload handed to [`TokenUpdateCallback`]: absent values become
/// `null` and timestamps are RFC 3339 strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub access_token_expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub refresh_token_expires: Option<DateTime<Utc>>,
}

impl TokenSet {
    /// The access token, if one is held and its expiry (when known) is still ahead of `now`.
    pub fn usable_access_token(&self, now: DateTime<Utc>) -> Option<&str> {
        match (&self.access_token, self.access_token_expires) {
            (Some(token), None) => Some(token.as_str()),
            (Some(token), Some(expires)) if now < expires => Some(token.as_str()),
            _ => None,
        }
    }

    pub fn refresh_token_usable(&self, now: DateTime<Utc>) -> bool {
        match (&self.refresh_token, self.refresh_token_expires) {
            (Some(_), None) => true,
            (Some(_), Some(expires)) => now < expires,
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none()
            && self.refresh_token.is_none()
            && self.access_token_expires.is_none()
            && self.refresh_token_expires.is_none()
    }
}

/// Receives a snapshot every time a session changes its tokens.
///
/// Meant for persisting tokens outside the process. Implementations must not panic;
/// there is no way to report a failure back into the session.
pub trait TokenUpdateCallback: Send + Sync {
    fn on_tokens_updated(&self, tokens: &TokenSet);
}

impl<F> TokenUpdateCallback for F
where
    F: Fn(&TokenSet) + Send + Sync,
{
    fn on_tokens_updated(&self, tokens: &TokenSet) {
        self(tokens)
    }
}

/// Parse an expiry timestamp from an auth response.
///
/// The service sends naive `YYYY-MM-DD HH:MM:SS` values, read here as UTC. RFC 3339
/// strings are accepted as well.
pub fn parse_expiry(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = value?.as_str()?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// A source of access tokens that can make authenticated requests.
///
/// Each strategy owns its tokens and how they are renewed; request plumbing is shared.
#[async_trait]
pub trait Authenticator: Send + Sync {
    fn client(&self) -> &reqwest::Client;

    /// Versioned API root for the current region.
    fn api_url(&self) -> String;

    fn region(&self) -> String;

    fn device_id(&self) -> &str;

    /// A usable access token, renewing it first when needed. `None` when nothing can be
    /// obtained; the request then goes out without a bearer token.
    async fn access_token(&self) -> Result<Option<String>>;

    /// Called once after an HTTP 401 with the token that was rejected. Return `true` to
    /// have the request retried with a fresh token.
    async fn renew_after_unauthorized(&self, _rejected: Option<&str>) -> Result<bool> {
        Ok(false)
    }

    fn standard_headers(&self) -> Result<HeaderMap> {
        envelope::default_headers(&self.region(), self.device_id())
    }

    async fn send(&self, request: &ApiRequest, token: Option<&str>) -> Result<reqwest::Response> {
        let mut headers = self.standard_headers()?;
        if let Some(token) = token {
            headers.insert(
                HeaderName::from_static(BEARER_HEADER),
                HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }

        debug!("Request {} {}", request.method(), request.path());
        let response = request
            .to_builder(self.client(), &self.api_url(), headers)
            .send()
            .await?;
        Ok(response)
    }

    /// Make an authenticated request and return the unwrapped envelope payload.
    async fn request(&self, request: ApiRequest) -> Result<Value> {
        let token = self.access_token().await?;
        let mut response = self.send(&request, token.as_deref()).await?;

        if response.status() == StatusCode::UNAUTHORIZED
            && self.renew_after_unauthorized(token.as_deref()).await?
        {
            debug!("Retrying {} {} after 401", request.method(), request.path());
            let token = self.access_token().await?;
            response = self.send(&request, token.as_deref()).await?;
        }

        envelope::decode_response(request.method(), request.path(), response).await
    }
}

#[async_trait]
impl<T: Authenticator + ?Sized> Authenticator for Arc<T> {
    fn client(&self) -> &reqwest::Client {
        (**self).client()
    }

    fn api_url(&self) -> String {
        (**self).api_url()
    }

    fn region(&self) -> String {
        (**self).region()
    }

    fn device_id(&self) -> &str {
        (**self).device_id()
    }

    async fn access_token(&self) -> Result<Option<String>> {
        (**self).access_token().await
    }

    async fn renew_after_unauthorized(&self, rejected: Option<&str>) -> Result<bool> {
        (**self).renew_after_unauthorized(rejected).await
    }
}
