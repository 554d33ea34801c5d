//! Cloud control-plane API client.
//!
//! Two GET endpoints are consumed: `/objects/{id}` (this edge's config) and
//! `/models/{id}` (the device tree). Construction issues a `HEAD` liveness
//! probe; a dead cloud aborts startup.

pub mod types;

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use types::{ActionConfig, EdgeObject, Model, ModelError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("cloud: empty url")]
    EmptyUrl,
    #[error("cloud: invalid token")]
    InvalidToken,
    #[error("cloud: {0}")]
    Http(#[from] reqwest::Error),
    #[error("cloud: {message}")]
    Api { message: String },
    #[error(transparent)]
    Model(#[from] ModelError),
}

pub struct CloudClient {
    http: reqwest::Client,
    base: String,
}

impl CloudClient {
    pub async fn new(base_url: &str, token: &str, version: &str) -> Result<Self, CloudError> {
        if base_url.is_empty() {
            return Err(CloudError::EmptyUrl);
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| CloudError::InvalidToken)?,
        );

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .user_agent(format!("ric-edge/{version}"))
            .build()?;

        let client = Self {
            http,
            base: base_url.trim_end_matches('/').to_string(),
        };
        client.ping().await?;
        Ok(client)
    }

    async fn ping(&self) -> Result<(), CloudError> {
        self.http.head(&self.base).send().await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CloudError> {
        let resp = self.http.get(url).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.bytes().await.unwrap_or_default();
            let message = serde_json::from_slice::<Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
                .unwrap_or_else(|| format!("unexpected status {status}"));
            return Err(CloudError::Api { message });
        }

        Ok(resp.json().await?)
    }

    pub async fn load_object(&self, id: &str) -> Result<EdgeObject, CloudError> {
        self.get_json(&format!("{}/objects/{id}", self.base))
            .await
            .map_err(|e| annotate(e, &format!("load.object[{id}]")))
    }

    pub async fn load_model(&self, id: &str) -> Result<Model, CloudError> {
        let mut model: Model = self
            .get_json(&format!("{}/models/{id}", self.base))
            .await
            .map_err(|e| annotate(e, &format!("load.model[{id}]")))?;
        model.prepare()?;
        Ok(model)
    }
}

fn annotate(err: CloudError, context: &str) -> CloudError {
    match err {
        CloudError::Api { message } => CloudError::Api {
            message: format!("{context}: {message}"),
        },
        other => other,
    }
}
