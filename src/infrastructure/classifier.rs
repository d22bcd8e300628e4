//! Product category classification port.
//!
//! The classifier is a black box returning a primary/secondary category
//! label pair. It is consulted at most once per product; failures are
//! logged and leave the product uncategorized rather than retried.

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::domain::CategoryLabels;

#[async_trait]
pub trait ProductClassifier: Send + Sync {
    /// Classify a product name into category slugs. `None` on any failure
    /// or when the classifier cannot decide.
    async fn classify(&self, product_name: &str) -> Option<CategoryLabels>;
}

/// HTTP classifier: POSTs the product name, expects a JSON
/// `{"primary": ..., "secondary": ...}` body back.
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpClassifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ProductClassifier for HttpClassifier {
    async fn classify(&self, product_name: &str) -> Option<CategoryLabels> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "name": product_name }))
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!("classifier request failed: {e}");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "classifier returned an error status");
            return None;
        }

        match response.json::<CategoryLabels>().await {
            Ok(labels) if !labels.primary.trim().is_empty() => Some(labels),
            Ok(_) => None,
            Err(e) => {
                warn!("classifier returned undecodable payload: {e}");
                None
            }
        }
    }
}

/// Used when no classifier endpoint is configured: products stay
/// uncategorized.
pub struct NoopClassifier;

#[async_trait]
impl ProductClassifier for NoopClassifier {
    async fn classify(&self, _product_name: &str) -> Option<CategoryLabels> {
        None
    }
}
