//! Network client for backend annotators
//!
//! Speaks the backend protocol over HTTP/JSON: `GET /api/identity` and one
//! `POST` route per role operation, each taking the record as body.

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration;

use crate::models::{Clustering, Forest, Labeling, Record};

use super::{AnnotatorBackend, BackendError, BackendIdentity};

/// Error body a backend returns on failure
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    kind: Option<String>,
}

/// Client for one backend endpoint
#[derive(Debug, Clone)]
pub struct HttpAnnotator {
    base_url: String,
    http_client: Client,
}

impl HttpAnnotator {
    /// Create a client for `base_url` with a uniform connect/read timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: normalize_base_url(base_url.into()),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<R: DeserializeOwned>(&self, route: &str, record: &Record) -> Result<R, BackendError> {
        let url = format!("{}/api/{}", self.base_url, route);
        let response = self.http_client.post(&url).json(record).send().await?;
        decode_response(response).await
    }
}

async fn decode_response<R: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<R, BackendError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<R>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()));
    }

    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(ErrorBody {
            error,
            kind: Some(kind),
        }) if kind == "annotation_failed" => {
            Err(BackendError::AnnotationFailed(error.unwrap_or(text)))
        }
        Ok(ErrorBody { error: Some(e), .. }) => Err(BackendError::Http {
            status: status.as_u16(),
            message: e,
        }),
        _ => Err(BackendError::Http {
            status: status.as_u16(),
            message: text,
        }),
    }
}

/// Accept `host:port` as well as full URLs, without a trailing slash
pub(crate) fn normalize_base_url(url: String) -> String {
    let url = url.trim_end_matches('/').to_string();
    if url.starts_with("http://") || url.starts_with("https://") {
        url
    } else {
        format!("http://{url}")
    }
}

#[async_trait]
impl AnnotatorBackend for HttpAnnotator {
    async fn identity(&self) -> Result<BackendIdentity, BackendError> {
        let url = format!("{}/api/identity", self.base_url);
        let response = self.http_client.get(&url).send().await?;
        decode_response(response).await
    }

    async fn label_record(&self, record: &Record) -> Result<Labeling, BackendError> {
        self.post("label", record).await
    }

    async fn label_record_multi(&self, record: &Record) -> Result<Vec<Labeling>, BackendError> {
        self.post("labels", record).await
    }

    async fn cluster_record(&self, record: &Record) -> Result<Clustering, BackendError> {
        self.post("cluster", record).await
    }

    async fn parse_record(&self, record: &Record) -> Result<Forest, BackendError> {
        self.post("parse", record).await
    }

    async fn parse_record_multi(&self, record: &Record) -> Result<Vec<Forest>, BackendError> {
        self.post("parses", record).await
    }
}
