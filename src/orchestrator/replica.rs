//! Link from a replica to its master curator
//!
//! A replica runs no backends. Every computation is forwarded to the master
//! and the returned view is cached locally. Each call opens its own
//! connection; nothing is kept alive between calls.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};

use crate::annotator::client::normalize_base_url;
use crate::annotator::BackendIdentity;
use crate::error::{Error, ErrorKind, Result};
use crate::models::Record;
use crate::server::api::{ProvideRequest, RecordRequest, WsProvideRequest};

/// Operations a replica forwards to its master
#[async_trait]
pub trait MasterLink: Send + Sync {
    /// Where the master lives, for logging
    fn endpoint(&self) -> &str;

    async fn provide(&self, view: &str, text: &str, force_update: bool) -> Result<Record>;

    async fn ws_provide(&self, view: &str, sentences: &[String], force_update: bool)
        -> Result<Record>;

    async fn get_record(&self, text: &str) -> Result<Record>;

    async fn get_record_by_id(&self, identifier: &str) -> Result<Record>;

    /// Backend identities the master currently knows, per view
    async fn identities(&self) -> Result<HashMap<String, BackendIdentity>>;
}

/// Response envelope returned by a curator server
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    kind: Option<ErrorKind>,
}

/// [`MasterLink`] over the curator HTTP API
#[derive(Debug, Clone)]
pub struct HttpMaster {
    base_url: String,
    http_client: Client,
}

impl HttpMaster {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| Error::config(format!("cannot build master client: {e}")))?;

        Ok(Self {
            base_url: normalize_base_url(base_url.into()),
            http_client,
        })
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        view: &str,
    ) -> Result<T> {
        let response = request.send().await.map_err(|e| {
            tracing::warn!(master = %self.base_url, error = %e, "Problem communicating with master curator");
            Error::unavailable(view, format!("master {}: {e}", self.base_url))
        })?;

        let status = response.status();
        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            Error::unavailable(
                view,
                format!("master {} replied {status} with unreadable body: {e}", self.base_url),
            )
        })?;

        match envelope {
            Envelope {
                success: true,
                data: Some(data),
                ..
            } => Ok(data),
            Envelope { error, kind, .. } => Err(Error::from_remote(
                kind.unwrap_or(ErrorKind::Unexpected),
                view,
                error.unwrap_or_else(|| format!("master replied {status}")),
            )),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}/api/{}", self.base_url, route)
    }
}

#[async_trait]
impl MasterLink for HttpMaster {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn provide(&self, view: &str, text: &str, force_update: bool) -> Result<Record> {
        crate::metrics::record_forwarded("provide");
        let body = ProvideRequest {
            view_name: view.to_string(),
            text: text.to_string(),
            force_update,
        };
        self.send(self.http_client.post(self.url("provide")).json(&body), view)
            .await
    }

    async fn ws_provide(
        &self,
        view: &str,
        sentences: &[String],
        force_update: bool,
    ) -> Result<Record> {
        crate::metrics::record_forwarded("ws_provide");
        let body = WsProvideRequest {
            view_name: view.to_string(),
            sentences: sentences.to_vec(),
            force_update,
        };
        self.send(self.http_client.post(self.url("ws-provide")).json(&body), view)
            .await
    }

    async fn get_record(&self, text: &str) -> Result<Record> {
        crate::metrics::record_forwarded("get_record");
        let body = RecordRequest {
            text: text.to_string(),
        };
        self.send(self.http_client.post(self.url("record")).json(&body), "master")
            .await
    }

    async fn get_record_by_id(&self, identifier: &str) -> Result<Record> {
        crate::metrics::record_forwarded("get_record_by_id");
        let url = self.url(&format!("record/{identifier}"));
        self.send(self.http_client.get(url), "master").await
    }

    async fn identities(&self) -> Result<HashMap<String, BackendIdentity>> {
        self.send(self.http_client.get(self.url("identities")), "master")
            .await
    }
}
