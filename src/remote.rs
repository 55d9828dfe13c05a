//! Remote data store client.
//!
//! `RemoteStore` is the seam the sync engine talks through; tests substitute
//! a recording fake. `RestRemoteStore` speaks the PostgREST dialect of the
//! production backend: one resource path per collection, `id=eq.<id>`
//! filters, and `Prefer: return=representation` so mutations echo the
//! committed row back.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::fmt;
use tracing::{instrument, warn};

use crate::model::Collection;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the full collection in its canonical order.
    async fn select(&self, collection: Collection) -> Result<Vec<Value>>;

    /// Insert one row; returns the committed row with its server identifier.
    async fn insert(&self, collection: Collection, row: &Value) -> Result<Value>;

    /// Patch the row with the given id; returns the committed row.
    async fn update(&self, collection: Collection, id: &str, patch: &Value) -> Result<Value>;

    /// Delete the row with the given id.
    async fn delete(&self, collection: Collection, id: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct RestRemoteStore {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for RestRemoteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestRemoteStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestRemoteStore {
    pub fn new(base_url: &str, api_key: String) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid remote base URL")?;
        let http = Client::builder()
            .user_agent("frota-sync/0.1")
            .build()
            .context("reqwest client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn collection_url(&self, collection: Collection) -> Result<Url> {
        self.base_url
            .join(&format!("rest/v1/{}", collection.as_str()))
            .context("invalid remote base URL")
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let key =
            HeaderValue::from_str(&self.api_key).context("API key is not a valid header value")?;
        headers.insert("apikey", key.clone());
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .context("API key is not a valid header value")?;
        headers.insert("Authorization", bearer);
        Ok(headers)
    }

    async fn read_rows(res: reqwest::Response, context: &str) -> Result<Vec<Value>> {
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, body, "remote store error");
            return Err(anyhow!("remote error {status} on {context}: {body}"));
        }
        res.json::<Vec<Value>>()
            .await
            .with_context(|| format!("invalid remote response for {context}"))
    }

    fn single_row(mut rows: Vec<Value>, context: &str) -> Result<Value> {
        if rows.is_empty() {
            return Err(anyhow!("remote returned no row for {context}"));
        }
        Ok(rows.remove(0))
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    #[instrument(skip_all, fields(collection = %collection))]
    async fn select(&self, collection: Collection) -> Result<Vec<Value>> {
        let mut url = self.collection_url(collection)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("order", collection.order_param());
        let res = self
            .http
            .get(url)
            .headers(self.auth_headers()?)
            .send()
            .await
            .context("failed to reach remote store")?;
        Self::read_rows(res, collection.as_str()).await
    }

    #[instrument(skip_all, fields(collection = %collection))]
    async fn insert(&self, collection: Collection, row: &Value) -> Result<Value> {
        let url = self.collection_url(collection)?;
        let res = self
            .http
            .post(url)
            .headers(self.auth_headers()?)
            .header("Prefer", "return=representation")
            .json(&[row])
            .send()
            .await
            .context("failed to reach remote store")?;
        let rows = Self::read_rows(res, collection.as_str()).await?;
        Self::single_row(rows, collection.as_str())
    }

    #[instrument(skip_all, fields(collection = %collection, id))]
    async fn update(&self, collection: Collection, id: &str, patch: &Value) -> Result<Value> {
        let mut url = self.collection_url(collection)?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{id}"));
        let res = self
            .http
            .patch(url)
            .headers(self.auth_headers()?)
            .header("Prefer", "return=representation")
            .json(patch)
            .send()
            .await
            .context("failed to reach remote store")?;
        let rows = Self::read_rows(res, collection.as_str()).await?;
        Self::single_row(rows, collection.as_str())
    }

    #[instrument(skip_all, fields(collection = %collection, id))]
    async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        let mut url = self.collection_url(collection)?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{id}"));
        let res = self
            .http
            .delete(url)
            .headers(self.auth_headers()?)
            .send()
            .await
            .context("failed to reach remote store")?;
        if res.status() == StatusCode::NOT_FOUND || res.status().is_success() {
            return Ok(());
        }
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        Err(anyhow!(
            "remote error {status} deleting from {}: {body}",
            collection.as_str()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_urls_follow_rest_dialect() {
        let store = RestRemoteStore::new("https://example.test/", "key".into()).unwrap();
        let url = store.collection_url(Collection::Dollys).unwrap();
        assert_eq!(url.as_str(), "https://example.test/rest/v1/dollys_disponiveis");
    }

    #[test]
    fn auth_headers_carry_key_and_bearer() {
        let store = RestRemoteStore::new("https://example.test/", "secret".into()).unwrap();
        let headers = store.auth_headers().unwrap();
        assert_eq!(headers.get("apikey").unwrap(), "secret");
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer secret");
    }

    #[test]
    fn single_row_rejects_empty_responses() {
        let err = RestRemoteStore::single_row(vec![], "dollys_disponiveis").unwrap_err();
        assert!(err.to_string().contains("no row"));
    }
}
