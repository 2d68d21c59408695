//! Outgoing headers and the `{result, data, error}` response envelope.

use log::{debug, error};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::Method;
use serde_json::Value;

use crate::constants::{
    API_HASH_HEADER, DEFAULT_API_HASH, DEFAULT_CONTENT_TYPE, DEFAULT_USER_AGENT, DEVICE_ID_HEADER,
};
use crate::error::{Error, Result};
use crate::region;

const DEFAULT_API_ERROR: &str = "API request failed";
const DEFAULT_HTTP_ERROR: &str = "HTTP request failed";

/// Headers sent with every request, authenticated or not.
pub fn default_headers(region: &str, device_id: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    headers.insert(
        HeaderName::from_static(API_HASH_HEADER),
        HeaderValue::from_static(DEFAULT_API_HASH),
    );
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&region::basic_auth(region))?);
    headers.insert(
        HeaderName::from_static(DEVICE_ID_HEADER),
        HeaderValue::from_str(device_id)?,
    );
    Ok(headers)
}

/// A single API call relative to the versioned API root.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    headers: HeaderMap,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Build the transport request. Standard headers win over caller headers.
    pub fn to_builder(
        &self,
        client: &reqwest::Client,
        api_url: &str,
        standard: HeaderMap,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", api_url.trim_end_matches('/'), self.path);
        let mut headers = self.headers.clone();
        headers.extend(standard);

        let mut builder = client.request(self.method.clone(), url).headers(headers);
        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }
        if let Some(body) = &self.body {
            builder = builder.json(body);
        }
        builder
    }
}

fn embedded_description(payload: Option<&Value>) -> Option<String> {
    payload?
        .get("error")?
        .get("description")?
        .as_str()
        .map(str::to_string)
}

/// Turn a raw response into the unwrapped `data` payload or a typed failure.
pub fn parse_envelope(method: &str, path: &str, status: u16, body: &[u8]) -> Result<Value> {
    let payload = match serde_json::from_slice::<Value>(body) {
        Ok(payload) if (200..300).contains(&status) => payload,
        parsed => {
            let description = embedded_description(parsed.ok().as_ref())
                .unwrap_or_else(|| DEFAULT_HTTP_ERROR.to_string());
            error!("{} {} failed with status {}: {}", method, path, status, description);
            return Err(Error::Transport {
                description,
                method: method.to_string(),
                path: path.to_string(),
                status,
            });
        }
    };

    match payload {
        Value::Object(mut map) => {
            if map.get("result").and_then(Value::as_bool) != Some(true) {
                let description = embedded_description(Some(&Value::Object(map)))
                    .unwrap_or_else(|| DEFAULT_API_ERROR.to_string());
                debug!("{} {} returned an error envelope: {}", method, path, description);
                return Err(Error::Api {
                    description,
                    method: method.to_string(),
                    path: path.to_string(),
                    status,
                });
            }
            match map.remove("data") {
                Some(data) => Ok(data),
                None => Ok(Value::Object(map)),
            }
        }
        other => Ok(other),
    }
}

/// Read the body of `response` and run it through [`parse_envelope`].
pub async fn decode_response(
    method: &Method,
    path: &str,
    response: reqwest::Response,
) -> Result<Value> {
    let status = response.status();
    let body = response.bytes().await?;
    debug!("Response {} {} -> {}", method, path, status);
    parse_envelope(method.as_str(), path, status.as_u16(), &body)
}
