use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderValue};
use tracing::debug;
use url::Url;

use crate::config::ClientConfig;
use crate::storage::rucio::classify_status;
use crate::storage::{CatalogResult, TaskSourceTrait};
use crate::types::TaskRecord;
use crate::types::error::CatalogError;

/// Task source backed by the PanDA monitor task listing.
#[derive(Clone)]
pub struct PandaTaskSource {
    client: Client,
    tasks_url: Url,
}

impl PandaTaskSource {
    pub fn new(client_config: &ClientConfig) -> anyhow::Result<Self> {
        let base = Url::parse(&client_config.panda_url).map_err(|e| {
            anyhow::anyhow!("invalid task service URL '{}': {e}", client_config.panda_url)
        })?;
        let tasks_url = Url::parse(&format!("{}/tasks/", base.as_str().trim_end_matches('/')))?;

        let mut builder = Client::builder();
        if let Some(timeout) = client_config.timeout_milliseconds {
            builder = builder.timeout(Duration::from_millis(timeout));
        }
        let client = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))?;

        Ok(Self { client, tasks_url })
    }

    fn query_url(&self, user: &str, days: u32, status_filter: Option<&str>) -> Url {
        let mut url = self.tasks_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("username", user);
            pairs.append_pair("days", &days.to_string());
            if let Some(status) = status_filter {
                pairs.append_pair("status", status);
            }
            pairs.append_pair("datasets", "true");
            pairs.append_key_only("json");
        }
        url
    }
}

#[async_trait]
impl TaskSourceTrait for PandaTaskSource {
    async fn query_tasks(
        &self,
        user: &str,
        days: u32,
        status_filter: Option<&str>,
    ) -> CatalogResult<Vec<TaskRecord>> {
        let what = format!("query tasks of {user}");
        let url = self.query_url(user, days, status_filter);
        debug!(user = user, days = days, status = status_filter, "querying tasks.");

        let response = self
            .client
            .get(url)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .send()
            .await
            .map_err(|e| CatalogError::Transient(format!("{what}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(
                status,
                None,
                format!("{what}: {status} {}", body.trim()),
            ));
        }

        let tasks: Vec<TaskRecord> = response
            .json()
            .await
            .map_err(|e| CatalogError::Rejected(format!("{what}: malformed response: {e}")))?;
        debug!(user = user, tasks = tasks.len(), "tasks received.");
        Ok(tasks)
    }
}
