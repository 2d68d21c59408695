use std::sync::{LazyLock, PoisonError, RwLock};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use log::debug;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::auth::Authenticator;
use crate::constants::{DEFAULT_AUTH_TYPE, DEFAULT_PLATFORM};
use crate::envelope::{self, ApiRequest};
use crate::error::{Error, Result};
use crate::region;

/// Tokens are renewed this long before their `exp` claim.
const EXPIRY_MARGIN_SECONDS: i64 = 30;

const TOKEN_KEYS: &[&str] = &[
    "accessToken",
    "access_token",
    "token",
    "jwt",
    "idToken",
    "id_token",
    "bearerToken",
    "bearer_token",
];

static JWT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+)").expect("valid JWT pattern")
});

#[derive(Debug, Deserialize)]
struct Claims {
    exp: Option<f64>,
}

/// Read the `exp` claim of a JWT. Neither the signature nor the header is checked.
pub fn jwt_expiration(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claims.exp? as i64, 0)
}

/// Find the first JWT-looking string in an arbitrary payload, preferring well-known keys.
pub fn find_jwt(data: &Value) -> Option<String> {
    match data {
        Value::String(text) => JWT_RE.find(text).map(|m| m.as_str().to_string()),
        Value::Array(items) => items.iter().find_map(find_jwt),
        Value::Object(map) => TOKEN_KEYS
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(find_jwt)
            .or_else(|| map.values().find_map(find_jwt)),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
struct JwtState {
    token: Option<String>,
    expires: Option<DateTime<Utc>>,
}

impl JwtState {
    fn from_token(token: String) -> Self {
        let expires = jwt_expiration(&token);
        Self {
            token: Some(token),
            expires,
        }
    }

    fn usable(&self, now: DateTime<Utc>) -> Option<String> {
        let token = self.token.as_ref()?;
        match self.expires {
            None => Some(token.clone()),
            Some(expires) if expires - Duration::seconds(EXPIRY_MARGIN_SECONDS) > now => {
                Some(token.clone())
            }
            Some(_) => None,
        }
    }
}

/// Login-only session for the mobile endpoints.
///
/// Holds a single JWT scraped from the login response and logs in again when it is
/// about to expire or when the server answers 401.
pub struct MobileSession {
    client: reqwest::Client,
    login: String,
    password: String,
    region: String,
    base_url: Option<String>,
    device_id: String,
    state: RwLock<JwtState>,
    renewal: Mutex<()>,
}

impl MobileSession {
    pub fn new(client: reqwest::Client, login: &str, password: &str, region: &str) -> Self {
        Self {
            client,
            login: login.to_string(),
            password: password.to_string(),
            region: region.to_string(),
            base_url: None,
            device_id: uuid::Uuid::new_v4().to_string(),
            state: RwLock::new(JwtState::default()),
            renewal: Mutex::new(()),
        }
    }

    /// Build a session whose region is derived from an account number.
    pub fn from_account(
        client: reqwest::Client,
        login: &str,
        password: &str,
        account: &str,
    ) -> Result<Self> {
        let region = region::region_for_account(account)?;
        Ok(Self::new(client, login, password, region))
    }

    pub fn with_access_token(self, token: impl Into<String>) -> Self {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) =
            JwtState::from_token(token.into());
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn token(&self) -> Option<String> {
        self.state_snapshot().token
    }

    pub fn token_expiration(&self) -> Option<DateTime<Utc>> {
        self.state_snapshot().expires
    }

    fn state_snapshot(&self) -> JwtState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Log in and store the JWT found in the response.
    pub async fn authorize(&self) -> Result<String> {
        let _guard = self.renewal.lock().await;
        self.authorize_locked().await
    }

    async fn authorize_locked(&self) -> Result<String> {
        if self.login.is_empty() || self.password.is_empty() {
            return Err(Error::Auth(
                "Login and password are required for login".to_string(),
            ));
        }

        debug!("Requesting mobile auth token for region={}", self.region);
        let request = ApiRequest::post("user/auth").json(json!({
            "login": self.login,
            "authType": DEFAULT_AUTH_TYPE,
            "password": self.password,
            "region": self.region,
            "platform": DEFAULT_PLATFORM,
        }));
        let response = request
            .to_builder(&self.client, &self.api_url(), self.standard_headers()?)
            .send()
            .await?;
        let data = envelope::decode_response(request.method(), request.path(), response)
            .await
            .map_err(|err| match err {
                Error::Http(_) => err,
                other => Error::Auth(other.description()),
            })?;

        let token = find_jwt(&data).ok_or_else(|| {
            Error::Auth("JWT token was not found in authorization response".to_string())
        })?;

        *self.state.write().unwrap_or_else(PoisonError::into_inner) =
            JwtState::from_token(token.clone());
        Ok(token)
    }
}

#[async_trait]
impl Authenticator for MobileSession {
    fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn api_url(&self) -> String {
        match &self.base_url {
            Some(url) => region::api_url(url),
            None => region::api_url(&region::base_url(&self.region)),
        }
    }

    fn region(&self) -> String {
        self.region.clone()
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn access_token(&self) -> Result<Option<String>> {
        if let Some(token) = self.state_snapshot().usable(Utc::now()) {
            return Ok(Some(token));
        }

        let _guard = self.renewal.lock().await;
        if let Some(token) = self.state_snapshot().usable(Utc::now()) {
            return Ok(Some(token));
        }
        self.authorize_locked().await.map(Some)
    }

    async fn renew_after_unauthorized(&self, rejected: Option<&str>) -> Result<bool> {
        let _guard = self.renewal.lock().await;

        // A concurrent request may already have replaced the rejected token.
        let current = self.state_snapshot().token;
        if current.is_some() && current.as_deref() != rejected {
            debug!("Token already renewed after 401");
            return Ok(true);
        }

        debug!("Got 401, logging in again");
        self.authorize_locked().await?;
        Ok(true)
    }
}
