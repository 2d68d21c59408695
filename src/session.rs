use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::auth::{parse_expiry, Authenticator, TokenSet, TokenUpdateCallback};
use crate::constants::{self, DEFAULT_AUTH_TYPE, DEFAULT_PLATFORM};
use crate::envelope::{self, ApiRequest};
use crate::error::{Error, Result};
use crate::region;

#[derive(Clone)]
struct Credentials {
    email: String,
    password: String,
}

/// Email/password session holding an access and a refresh token.
///
/// The session is shared by reference across tasks. Token renewal is serialized by an
/// async mutex: when several callers find the access token expired at once, exactly one
/// of them talks to the server and the rest reuse its result.
pub struct Session {
    client: reqwest::Client,
    region: RwLock<String>,
    base_url: Option<String>,
    device_id: String,
    credentials: RwLock<Option<Credentials>>,
    tokens: RwLock<TokenSet>,
    renewal: Mutex<()>,
    callback: Option<Arc<dyn TokenUpdateCallback>>,
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    client: reqwest::Client,
    region: String,
    base_url: Option<String>,
    device_id: Option<String>,
    credentials: Option<Credentials>,
    tokens: TokenSet,
    callback: Option<Arc<dyn TokenUpdateCallback>>,
}

impl SessionBuilder {
    pub fn credentials(mut self, email: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            email: email.into(),
            password: password.into(),
        });
        self
    }

    /// Seed the session with previously stored tokens.
    pub fn tokens(mut self, tokens: TokenSet) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn callback(mut self, callback: Arc<dyn TokenUpdateCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    // Replaces the region host, e.g. with a mock server
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn build(self) -> Session {
        Session {
            client: self.client,
            region: RwLock::new(self.region),
            base_url: self.base_url,
            device_id: self
                .device_id
                .unwrap_or_else(|| constants::device_id().to_string()),
            credentials: RwLock::new(self.credentials),
            tokens: RwLock::new(self.tokens),
            renewal: Mutex::new(()),
            callback: self.callback,
        }
    }
}

impl Session {
    pub fn builder(client: reqwest::Client, region: impl Into<String>) -> SessionBuilder {
        SessionBuilder {
            client,
            region: region.into(),
            base_url: None,
            device_id: None,
            credentials: None,
            tokens: TokenSet::default(),
            callback: None,
        }
    }

    /// Login mode: tokens are obtained with [`Session::login`].
    pub fn with_credentials(
        client: reqwest::Client,
        region: &str,
        email: &str,
        password: &str,
    ) -> Self {
        Self::builder(client, region).credentials(email, password).build()
    }

    /// Restore mode: reuse tokens stored by an earlier process.
    pub fn with_tokens(client: reqwest::Client, region: &str, tokens: TokenSet) -> Self {
        Self::builder(client, region).tokens(tokens).build()
    }

    pub fn set_region(&self, region: &str) {
        *write(&self.region) = region.to_string();
    }

    pub fn set_credentials(&self, email: &str, password: &str) {
        *write(&self.credentials) = Some(Credentials {
            email: email.to_string(),
            password: password.to_string(),
        });
    }

    pub fn email(&self) -> Option<String> {
        read(&self.credentials).as_ref().map(|c| c.email.clone())
    }

    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.clone(),
            None => region::base_url(&read(&self.region)),
        }
    }

    /// Snapshot of the current tokens.
    pub fn tokens(&self) -> TokenSet {
        read(&self.tokens).clone()
    }

    fn current_access_token(&self, now: DateTime<Utc>) -> Option<String> {
        read(&self.tokens).usable_access_token(now).map(str::to_string)
    }

    fn has_credentials(&self) -> bool {
        read(&self.credentials)
            .as_ref()
            .is_some_and(|c| !c.email.is_empty() && !c.password.is_empty())
    }

    fn notify(&self) {
        if let Some(callback) = &self.callback {
            let snapshot = self.tokens();
            callback.on_tokens_updated(&snapshot);
        }
    }

    /// Return a usable access token, refreshing or logging in first when needed.
    ///
    /// Falls back to whatever token is held when no renewal path exists; the API call
    /// made with it reports the failure.
    pub async fn get_access_token(&self) -> Result<Option<String>> {
        if let Some(token) = self.current_access_token(Utc::now()) {
            return Ok(Some(token));
        }

        let _guard = self.renewal.lock().await;

        // Another caller may have renewed while we waited.
        let now = Utc::now();
        if let Some(token) = self.current_access_token(now) {
            debug!("Access token renewed by a concurrent caller");
            return Ok(Some(token));
        }

        let refreshable = read(&self.tokens).refresh_token_usable(now);
        if refreshable {
            debug!("Access token expired, refreshing");
            self.refresh_locked().await?;
        } else if self.has_credentials() {
            debug!("Tokens expired, logging in again");
            self.login_locked().await?;
        } else {
            warn!("Access token expired and no way to renew it");
        }

        Ok(read(&self.tokens).access_token.clone())
    }

    async fn auth_request(&self, path: &str, body: Value) -> Result<Value> {
        let request = ApiRequest::post(path).json(body);
        let headers = envelope::default_headers(&read(&self.region), &self.device_id)?;
        let response = request
            .to_builder(&self.client, &self.api_url(), headers)
            .send()
            .await?;
        envelope::decode_response(request.method(), request.path(), response).await
    }

    /// Log in with the stored email and password.
    pub async fn login(&self) -> Result<TokenSet> {
        let _guard = self.renewal.lock().await;
        self.login_locked().await
    }

    async fn login_locked(&self) -> Result<TokenSet> {
        let credentials = read(&self.credentials)
            .clone()
            .filter(|c| !c.email.is_empty() && !c.password.is_empty())
            .ok_or_else(|| Error::Auth("Email and password are required for login".to_string()))?;

        debug!("Logging in as {}", credentials.email);
        let region = read(&self.region).clone();
        let data = self
            .auth_request(
                "user/auth",
                json!({
                    "login": credentials.email,
                    "authType": DEFAULT_AUTH_TYPE,
                    "password": credentials.password,
                    "region": region,
                    "platform": DEFAULT_PLATFORM,
                }),
            )
            .await
            .map_err(|err| match err {
                Error::Http(_) => err,
                other => Error::Auth(other.description()),
            })?;

        let access_token = data
            .get("accessToken")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Auth("Authentication response has no access token".to_string()))?;

        let updated = TokenSet {
            access_token: Some(access_token.to_string()),
            refresh_token: data
                .get("refreshToken")
                .and_then(Value::as_str)
                .map(str::to_string),
            access_token_expires: parse_expiry(data.get("accessTokenExpires")),
            refresh_token_expires: parse_expiry(data.get("refreshTokenExpires")),
        };
        *write(&self.tokens) = updated.clone();

        debug!("Login successful");
        self.notify();
        Ok(updated)
    }

    /// Exchange the refresh token for a new access token.
    pub async fn refresh(&self) -> Result<TokenSet> {
        let _guard = self.renewal.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<TokenSet> {
        let refresh_token = read(&self.tokens)
            .refresh_token
            .clone()
            .ok_or_else(|| Error::TokenRefresh("No refresh token available".to_string()))?;

        let data = self
            .auth_request("user/refresh-token", json!({ "refreshToken": refresh_token }))
            .await
            .map_err(|err| match err {
                Error::Http(_) => err,
                other => Error::TokenRefresh(other.description()),
            })?;

        let access_token = data
            .get("accessToken")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::TokenRefresh("Refresh response has no access token".to_string())
            })?;

        let updated = {
            let mut tokens = write(&self.tokens);
            tokens.access_token = Some(access_token.to_string());
            tokens.access_token_expires = parse_expiry(data.get("accessTokenExpires"));
            tokens.clone()
        };

        debug!("Token refresh successful");
        self.notify();
        Ok(updated)
    }

    /// Invalidate the tokens on the server and forget them locally.
    pub async fn logout(&self) -> Result<Value> {
        let data = self.request(ApiRequest::post("user/logout")).await?;

        {
            let _guard = self.renewal.lock().await;
            *write(&self.tokens) = TokenSet::default();
        }

        debug!("Logout successful");
        self.notify();
        Ok(data)
    }
}

#[async_trait]
impl Authenticator for Session {
    fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn api_url(&self) -> String {
        region::api_url(&self.base_url())
    }

    fn region(&self) -> String {
        read(&self.region).clone()
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn access_token(&self) -> Result<Option<String>> {
        self.get_access_token().await
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
