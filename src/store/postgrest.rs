//! PostgREST backend for the hosted table.

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{Method, RequestBuilder, Response};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::records::{Queue, Record, RecordUpdate, TimeRange};
use crate::store::traits::RecordStore;

/// Record store backed by a PostgREST endpoint (Supabase-compatible).
pub struct PostgrestStore {
    client: reqwest::Client,
    config: StoreConfig,
}

impl PostgrestStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn request(&self, method: Method) -> RequestBuilder {
        let key = self.config.key.expose_secret();
        self.client
            .request(method, self.config.rest_url())
            .header("apikey", key)
            .bearer_auth(key)
    }

    fn request_failed(&self, e: reqwest::Error) -> StoreError {
        StoreError::Request {
            table: self.config.table_name.clone(),
            reason: e.to_string(),
        }
    }

    /// Check the status and decode a row list.
    async fn rows(&self, resp: Response) -> Result<Vec<Record>, StoreError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(table = %self.config.table_name, status = %status, "Store request failed");
            return Err(StoreError::Status {
                table: self.config.table_name.clone(),
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<Vec<Record>>()
            .await
            .map_err(|e| StoreError::InvalidResponse {
                table: self.config.table_name.clone(),
                reason: e.to_string(),
            })
    }
}

/// Query parameters for a listing: selection, queue filter, window, ordering.
pub fn list_query(queue: Option<Queue>, window: Option<&TimeRange>) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    if let Some(queue) = queue {
        params.extend(queue.filter_params());
    }
    if let Some(window) = window {
        params.push((
            "created_at".into(),
            format!(
                "gte.{}",
                window.start.to_rfc3339_opts(SecondsFormat::Micros, true)
            ),
        ));
        params.push((
            "created_at".into(),
            format!(
                "lte.{}",
                window.end.to_rfc3339_opts(SecondsFormat::Micros, true)
            ),
        ));
    }
    params.push(("order".into(), "created_at.desc".into()));
    params
}

fn id_filter(id: i64) -> [(&'static str, String); 1] {
    [("id", format!("eq.{id}"))]
}

#[async_trait]
impl RecordStore for PostgrestStore {
    fn table(&self) -> &str {
        &self.config.table_name
    }

    async fn list(
        &self,
        queue: Option<Queue>,
        window: Option<&TimeRange>,
    ) -> Result<Vec<Record>, StoreError> {
        let resp = self
            .request(Method::GET)
            .query(&list_query(queue, window))
            .send()
            .await
            .map_err(|e| self.request_failed(e))?;
        let records = self.rows(resp).await?;
        debug!(
            table = %self.config.table_name,
            queue = ?queue,
            count = records.len(),
            "Fetched records"
        );
        Ok(records)
    }

    async fn get(&self, id: i64) -> Result<Option<Record>, StoreError> {
        let resp = self
            .request(Method::GET)
            .query(&[("select", "*")])
            .query(&id_filter(id))
            .send()
            .await
            .map_err(|e| self.request_failed(e))?;
        Ok(self.rows(resp).await?.into_iter().next())
    }

    async fn update(&self, id: i64, update: &RecordUpdate) -> Result<Record, StoreError> {
        let resp = self
            .request(Method::PATCH)
            .query(&id_filter(id))
            .header("Prefer", "return=representation")
            .json(update)
            .send()
            .await
            .map_err(|e| self.request_failed(e))?;

        let record = self
            .rows(resp)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound {
                table: self.config.table_name.clone(),
                id,
            })?;
        info!(table = %self.config.table_name, record_id = id, "Record updated");
        Ok(record)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let resp = self
            .request(Method::DELETE)
            .query(&id_filter(id))
            .header("Prefer", "return=representation")
            .send()
            .await
            .map_err(|e| self.request_failed(e))?;

        if self.rows(resp).await?.is_empty() {
            return Err(StoreError::NotFound {
                table: self.config.table_name.clone(),
                id,
            });
        }
        info!(table = %self.config.table_name, record_id = id, "Record deleted");
        Ok(())
    }
}
