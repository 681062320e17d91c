//! HTTP implementation of the sync target.
//!
//! Posts documents to a remote knowledge endpoint as JSON. Each request
//! carries an idempotency key derived from the outbox entry, so at-least-
//! once replay after a crash stays safe on the receiving side.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::SyncTarget;
use crate::types::HindsightError;

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    namespace: &'a str,
    id: &'a str,
    text: &'a str,
    metadata: &'a HashMap<String, String>,
}

pub struct HttpSyncTarget {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSyncTarget {
    pub fn new(endpoint: String, api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build sync HTTP client")?;

        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl SyncTarget for HttpSyncTarget {
    async fn upsert_document(
        &self,
        namespace: &str,
        id: &str,
        text: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let request = UpsertRequest {
            namespace,
            id,
            text,
            metadata,
        };

        let mut builder = self.http
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .header("idempotency-key", format!("{namespace}:{id}"))
            .json(&request);

        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Sync request to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HindsightError::Sync {
                namespace: namespace.to_string(),
                document_id: id.to_string(),
                message: format!("endpoint returned {status}: {body}"),
            }
            .into());
        }

        debug!(namespace, id, "Document synced");
        Ok(())
    }
}
