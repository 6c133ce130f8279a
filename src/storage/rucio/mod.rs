//! Catalog binding for the Rucio REST API.
//!
//! List endpoints answer with one JSON document per line; some deployments
//! answer with a plain JSON array instead, both are accepted.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, trace};
use url::Url;

use crate::config::ClientConfig;
use crate::storage::{CatalogResult, CatalogTrait};
use crate::types::error::CatalogError;
use crate::types::{
    CatalogFile, Did, DidMetadata, DidType, FileReplica, ReplicationRule, RseInfo,
    RucioCredentials, RuleHistoryEntry, RuleLockStatus,
};

pub(crate) const HEADER_AUTH_TOKEN: &str = "X-Rucio-Auth-Token";
pub(crate) const HEADER_ACCOUNT: &str = "X-Rucio-Account";
const HEADER_EXCEPTION_CLASS: &str = "ExceptionClass";
const TEMPORARY_FAILURE_EXCEPTION: &str = "ReplicationRuleCreationTemporaryFailed";
const RUCIO_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S UTC";

#[derive(Clone)]
pub struct RucioCatalog {
    client: Client,
    base_url: String,
    credentials: RucioCredentials,
}

impl RucioCatalog {
    pub fn new(client_config: &ClientConfig) -> anyhow::Result<Self> {
        let parsed = Url::parse(&client_config.rucio_url)
            .map_err(|e| anyhow::anyhow!("invalid catalog URL '{}': {e}", client_config.rucio_url))?;

        let mut builder = Client::builder();
        if let Some(timeout) = client_config.timeout_milliseconds {
            builder = builder.timeout(Duration::from_millis(timeout));
        }
        let client = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))?;

        Ok(Self {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            credentials: client_config.credentials.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        trace!(method = %method, url = url, "catalog request.");

        let mut builder = self.client.request(method, url);
        if let Some(token) = self.credentials.auth_token.as_deref() {
            builder = builder.header(HEADER_AUTH_TOKEN, token);
        }
        if let Some(account) = self.credentials.account.as_deref() {
            builder = builder.header(HEADER_ACCOUNT, account);
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> CatalogResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(what, &e))?;
        check_status(response, what).await
    }

    async fn get_lines<T: DeserializeOwned>(&self, path: &str, what: &str) -> CatalogResult<Vec<T>> {
        let response = self.send(self.request(Method::GET, path), what).await?;
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(what, &e))?;
        parse_json_lines(&body, what)
    }
}

fn did_path(did: &Did) -> String {
    format!(
        "{}/{}",
        urlencoding::encode(&did.scope),
        urlencoding::encode(&did.name)
    )
}

fn transport_error(what: &str, e: &reqwest::Error) -> CatalogError {
    if e.is_decode() || e.is_builder() {
        return CatalogError::Rejected(format!("{what}: {e}"));
    }
    CatalogError::Transient(format!("{what}: {e}"))
}

async fn check_status(response: Response, what: &str) -> CatalogResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let header_class = response
        .headers()
        .get(HEADER_EXCEPTION_CLASS)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();
    let exception_class = header_class.or_else(|| body_exception_class(&body));

    Err(classify_status(
        status,
        exception_class.as_deref(),
        format!("{what}: {status} {}", body.trim()),
    ))
}

fn body_exception_class(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get(HEADER_EXCEPTION_CLASS)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

pub(crate) fn classify_status(
    status: StatusCode,
    exception_class: Option<&str>,
    message: String,
) -> CatalogError {
    if exception_class == Some(TEMPORARY_FAILURE_EXCEPTION)
        || status == StatusCode::SERVICE_UNAVAILABLE
    {
        return CatalogError::TemporarilyUnavailable(message);
    }
    match status {
        StatusCode::NOT_FOUND => CatalogError::NotFound(message),
        StatusCode::CONFLICT => CatalogError::DuplicateRule(message),
        s if s.is_server_error() => CatalogError::Transient(message),
        _ => CatalogError::Rejected(message),
    }
}

pub(crate) fn parse_json_lines<T: DeserializeOwned>(body: &str, what: &str) -> CatalogResult<Vec<T>> {
    let trimmed = body.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| CatalogError::Rejected(format!("{what}: malformed response: {e}")));
    }

    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| CatalogError::Rejected(format!("{what}: malformed response: {e}")))
        })
        .collect()
}

/// Parse catalog timestamps, either RFC 1123 style or RFC 3339.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, RUCIO_DATE_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|datetime| datetime.with_timezone(&Utc))
}

fn parse_optional_timestamp(value: Option<&str>, what: &str) -> CatalogResult<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(raw) => parse_timestamp(raw)
            .map(Some)
            .ok_or_else(|| CatalogError::Rejected(format!("{what}: unparsable timestamp '{raw}'"))),
    }
}

#[derive(Deserialize)]
struct RseRecord {
    rse: String,
    #[serde(flatten)]
    attributes: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct RuleRecordWire {
    id: String,
    rse_expression: String,
    #[serde(default)]
    expires_at: Option<String>,
}

#[derive(Deserialize)]
struct HistoryRecord {
    rse_expression: String,
}

#[derive(Deserialize)]
struct ReplicaRecord {
    name: String,
    #[serde(default)]
    rses: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    states: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct FileRecord {
    name: String,
    #[serde(default)]
    bytes: Option<u64>,
}

#[derive(Deserialize)]
struct MetaRecord {
    did_type: DidType,
}

#[derive(Deserialize)]
struct ParentRecord {
    name: String,
}

#[derive(Deserialize)]
struct RuleStatusRecord {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    locks_ok_cnt: u64,
    #[serde(default)]
    locks_replicating_cnt: u64,
    #[serde(default)]
    locks_stuck_cnt: u64,
    #[serde(default)]
    updated_at: Option<String>,
}

#[async_trait]
impl CatalogTrait for RucioCatalog {
    async fn list_rses(&self) -> CatalogResult<Vec<RseInfo>> {
        let records: Vec<RseRecord> = self.get_lines("/rses/", "list sites").await?;
        Ok(records
            .into_iter()
            .map(|record| RseInfo {
                name: record.rse,
                attributes: record.attributes,
            })
            .collect())
    }

    async fn list_did_rules(&self, did: &Did) -> CatalogResult<Vec<ReplicationRule>> {
        let what = format!("list rules of {did}");
        let records: Vec<RuleRecordWire> = self
            .get_lines(&format!("/dids/{}/rules", did_path(did)), &what)
            .await?;

        records
            .into_iter()
            .map(|record| {
                Ok(ReplicationRule {
                    expires_at: parse_optional_timestamp(record.expires_at.as_deref(), &what)?,
                    id: record.id,
                    rse_expression: record.rse_expression,
                })
            })
            .collect()
    }

    async fn list_rule_history(&self, did: &Did) -> CatalogResult<Vec<RuleHistoryEntry>> {
        let records: Vec<HistoryRecord> = self
            .get_lines(
                &format!("/rules/{}/history", did_path(did)),
                &format!("list rule history of {did}"),
            )
            .await?;
        Ok(records
            .into_iter()
            .map(|record| RuleHistoryEntry {
                rse_expression: record.rse_expression,
            })
            .collect())
    }

    async fn list_replicas(&self, did: &Did) -> CatalogResult<Vec<FileReplica>> {
        let what = format!("list replicas of {did}");
        let body = json!({
            "dids": [{"scope": did.scope, "name": did.name}],
            "all_states": true,
        });
        let response = self
            .send(self.request(Method::POST, "/replicas/list").json(&body), &what)
            .await?;
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(&what, &e))?;

        let records: Vec<ReplicaRecord> = parse_json_lines(&text, &what)?;
        Ok(records
            .into_iter()
            .map(|record| FileReplica {
                name: record.name,
                rses: record.rses,
                states: record.states,
            })
            .collect())
    }

    async fn list_files(&self, did: &Did) -> CatalogResult<Vec<CatalogFile>> {
        let records: Vec<FileRecord> = self
            .get_lines(
                &format!("/dids/{}/files", did_path(did)),
                &format!("list files of {did}"),
            )
            .await?;
        Ok(records
            .into_iter()
            .map(|record| CatalogFile {
                name: record.name,
                bytes: record.bytes.unwrap_or(0),
            })
            .collect())
    }

    async fn get_metadata(&self, did: &Did) -> CatalogResult<DidMetadata> {
        let what = format!("get metadata of {did}");
        let response = self
            .send(
                self.request(Method::GET, &format!("/dids/{}/meta", did_path(did))),
                &what,
            )
            .await?;
        let meta: MetaRecord = response
            .json()
            .await
            .map_err(|e| transport_error(&what, &e))?;

        let parents: Vec<ParentRecord> = self
            .get_lines(
                &format!("/dids/{}/parents", did_path(did)),
                &format!("list parents of {did}"),
            )
            .await?;

        Ok(DidMetadata {
            did_type: meta.did_type,
            parent: parents.into_iter().next().map(|parent| parent.name),
        })
    }

    async fn list_dids(
        &self,
        scope: &str,
        name_filter: &str,
        did_type: DidType,
    ) -> CatalogResult<Vec<String>> {
        let path = format!(
            "/dids/{}/dids/search?type={}&name={}",
            urlencoding::encode(scope),
            did_type.as_query(),
            urlencoding::encode(name_filter)
        );
        self.get_lines(&path, &format!("search {scope} for {name_filter}"))
            .await
    }

    async fn get_rule(&self, rule_id: &str) -> CatalogResult<Option<RuleLockStatus>> {
        let what = format!("get rule {rule_id}");
        let result = self
            .send(
                self.request(
                    Method::GET,
                    &format!("/rules/{}", urlencoding::encode(rule_id)),
                ),
                &what,
            )
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let record: RuleStatusRecord = response
            .json()
            .await
            .map_err(|e| transport_error(&what, &e))?;

        Ok(Some(RuleLockStatus {
            updated_at: parse_optional_timestamp(record.updated_at.as_deref(), &what)?,
            id: record.id,
            name: record.name,
            locks_ok: record.locks_ok_cnt,
            locks_replicating: record.locks_replicating_cnt,
            locks_stuck: record.locks_stuck_cnt,
        }))
    }

    async fn create_rule(
        &self,
        did: &Did,
        rse_expression: &str,
        lifetime_seconds: u64,
    ) -> CatalogResult<String> {
        let what = format!("create rule for {did} on {rse_expression}");
        let mut body = json!({
            "dids": [{"scope": did.scope, "name": did.name}],
            "copies": 1,
            "rse_expression": rse_expression,
            "lifetime": lifetime_seconds,
        });
        if let Some(account) = self.credentials.account.as_deref() {
            body["account"] = json!(account);
        }

        let response = self
            .send(self.request(Method::POST, "/rules/").json(&body), &what)
            .await?;
        let ids: Vec<String> = response
            .json()
            .await
            .map_err(|e| transport_error(&what, &e))?;

        let id = ids
            .into_iter()
            .next()
            .ok_or_else(|| CatalogError::Rejected(format!("{what}: no rule id returned")))?;
        debug!(did = %did, rse = rse_expression, rule_id = id, "rule created.");
        Ok(id)
    }

    async fn delete_rule(&self, rule_id: &str, purge_replicas: bool) -> CatalogResult<()> {
        self.send(
            self.request(
                Method::DELETE,
                &format!("/rules/{}", urlencoding::encode(rule_id)),
            )
            .json(&json!({"purge_replicas": purge_replicas})),
            &format!("delete rule {rule_id}"),
        )
        .await?;
        Ok(())
    }

    async fn update_rule(&self, rule_id: &str, lifetime_seconds: u64) -> CatalogResult<()> {
        self.send(
            self.request(
                Method::PUT,
                &format!("/rules/{}", urlencoding::encode(rule_id)),
            )
            .json(&json!({"options": {"lifetime": lifetime_seconds}})),
            &format!("update rule {rule_id}"),
        )
        .await?;
        Ok(())
    }
}
