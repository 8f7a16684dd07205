//! Thin HTTP layer over the edge proxy

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

#[derive(Debug, Serialize)]
pub struct Credentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct MeResponse {
    pub username: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: serde_json::Value,
}

/// Base URL plus a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ClientResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.url(path))
    }
}

/// Human-readable message from an error response: the `error` field when
/// the body is `{error}` JSON, the raw body otherwise, the status as a last
/// resort.
pub async fn error_message(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if let Ok(body) = serde_json::from_str::<ErrorBody>(&text) {
        return match body.error {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
    }
    if text.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        text
    }
}

/// Generic non-2xx mapping
pub async fn http_error(response: Response) -> ClientError {
    let status = response.status().as_u16();
    ClientError::Http {
        status,
        message: error_message(response).await,
    }
}
