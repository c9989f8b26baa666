//! Zabbix JSON-RPC client (control plane)
//!
//! Builds the session the data plane depends on:
//! - `user.login` for the auth token
//! - `host.get` to resolve the monitored host
//! - `item.get` / `item.create` to make sure every catalog item exists
//!
//! `initialize` can be re-run at any time; it rebuilds everything from scratch.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::error::{classify_server_message, ErrorKind};
use super::sender::DataEndpoint;
use super::session::{ItemMap, Session, SessionState};
use crate::catalog::{CatalogItem, CATALOG};

/// Zabbix item type for values pushed by a sender
const ITEM_TYPE_TRAPPER: u8 = 2;

#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("invalid Zabbix API URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("{method} request failed: {source}")]
    Http {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} returned HTTP {status}")]
    Status { method: &'static str, status: reqwest::StatusCode },
    #[error("failed to encode {method} request: {source}")]
    Encode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode {method} response: {source}")]
    Decode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{method} response carries neither result nor error")]
    EmptyResponse { method: &'static str },
    #[error("Zabbix API error on {method}: {message} {data} (code {code})")]
    Rpc {
        method: &'static str,
        code: i64,
        message: String,
        data: String,
        kind: ErrorKind,
    },
    #[error("login rejected: {0}")]
    LoginRejected(String),
    #[error("host {0:?} not found in Zabbix")]
    HostNotFound(String),
    #[error("host name {name:?} matches {count} hosts")]
    AmbiguousHost { name: String, count: usize },
    #[error("requested {requested} items but Zabbix created {created}")]
    CreateMismatch { requested: usize, created: usize },
}

impl ControlPlaneError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlPlaneError::Http { .. }
            | ControlPlaneError::Status { .. }
            | ControlPlaneError::Decode { .. }
            | ControlPlaneError::EmptyResponse { .. } => ErrorKind::Transient,
            ControlPlaneError::Rpc { kind, .. } => *kind,
            ControlPlaneError::InvalidUrl { .. }
            | ControlPlaneError::Client(_)
            | ControlPlaneError::Encode { .. }
            | ControlPlaneError::LoginRejected(_)
            | ControlPlaneError::HostNotFound(_)
            | ControlPlaneError::AmbiguousHost { .. }
            | ControlPlaneError::CreateMismatch { .. } => ErrorKind::Fatal,
        }
    }
}

/// Establishes the session needed before any metric can be sent
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn initialize(&self, host_name: &str) -> Result<SessionState, ControlPlaneError>;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    method: &'static str,
    params: P,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<&'a str>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct HostRecord {
    hostid: String,
    host: String,
}

#[derive(Debug, Deserialize)]
struct ItemRecord {
    itemid: String,
    key_: String,
}

#[derive(Debug, Deserialize)]
struct CreatedItems {
    itemids: Vec<String>,
}

/// HTTP client for the Zabbix JSON-RPC endpoint
pub struct ZabbixApi {
    http: reqwest::Client,
    url: Url,
    user: String,
    password: String,
    trapper_port: u16,
    next_id: AtomicU64,
}

impl ZabbixApi {
    pub fn new(
        url: &str,
        user: impl Into<String>,
        password: impl Into<String>,
        http_timeout: Duration,
        trapper_port: u16,
    ) -> Result<Self, ControlPlaneError> {
        let parsed = Url::parse(url)
            .map_err(|e| ControlPlaneError::InvalidUrl { url: url.to_string(), reason: e.to_string() })?;
        if parsed.host_str().is_none() {
            return Err(ControlPlaneError::InvalidUrl { url: url.to_string(), reason: "missing host".into() });
        }

        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(ControlPlaneError::Client)?;

        Ok(Self {
            http,
            url: parsed,
            user: user.into(),
            password: password.into(),
            trapper_port,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<P, T>(&self, method: &'static str, params: P, auth: Option<&str>) -> Result<T, ControlPlaneError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            auth,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        let body = serde_json::to_vec(&request).map_err(|source| ControlPlaneError::Encode { method, source })?;

        debug!(method, id = request.id, "Calling Zabbix API");
        let response = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json-rpc")
            .body(body)
            .send()
            .await
            .map_err(|source| ControlPlaneError::Http { method, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControlPlaneError::Status { method, status });
        }

        let bytes = response.bytes().await.map_err(|source| ControlPlaneError::Http { method, source })?;
        let decoded: RpcResponse<T> =
            serde_json::from_slice(&bytes).map_err(|source| ControlPlaneError::Decode { method, source })?;

        if let Some(err) = decoded.error {
            let kind = classify_server_message([err.message.as_str(), err.data.as_str()]);
            return Err(ControlPlaneError::Rpc { method, code: err.code, message: err.message, data: err.data, kind });
        }
        decoded.result.ok_or(ControlPlaneError::EmptyResponse { method })
    }

    pub async fn login(&self) -> Result<String, ControlPlaneError> {
        let params = json!({ "username": self.user, "password": self.password });
        match self.call::<_, String>("user.login", params, None).await {
            Ok(token) => Ok(token),
            Err(ControlPlaneError::Rpc { message, data, .. }) => {
                Err(ControlPlaneError::LoginRejected(format!("{message} {data}").trim().to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Exact-name lookup; exactly one host must match
    pub async fn find_host(&self, auth: &str, name: &str) -> Result<(String, String), ControlPlaneError> {
        let params = json!({
            "output": ["hostid", "host"],
            "filter": { "host": [name] },
        });
        let mut hosts: Vec<HostRecord> = self.call("host.get", params, Some(auth)).await?;

        match hosts.len() {
            0 => Err(ControlPlaneError::HostNotFound(name.to_string())),
            1 => {
                let host = hosts.remove(0);
                Ok((host.hostid, host.host))
            }
            count => Err(ControlPlaneError::AmbiguousHost { name: name.to_string(), count }),
        }
    }

    pub async fn host_items(&self, auth: &str, host_id: &str) -> Result<ItemMap, ControlPlaneError> {
        let params = json!({
            "output": ["itemid", "key_"],
            "hostids": [host_id],
        });
        let items: Vec<ItemRecord> = self.call("item.get", params, Some(auth)).await?;
        Ok(items.into_iter().map(|item| (item.key_, item.itemid)).collect())
    }

    /// Create trapper items; returned ids follow the order of `items`
    pub async fn create_items(
        &self,
        auth: &str,
        host_id: &str,
        items: &[&CatalogItem],
    ) -> Result<Vec<String>, ControlPlaneError> {
        let params: Vec<_> = items
            .iter()
            .map(|item| {
                json!({
                    "name": item.name,
                    "key_": item.key,
                    "hostid": host_id,
                    "type": ITEM_TYPE_TRAPPER,
                    "value_type": item.value_type.code(),
                    "description": item.description,
                })
            })
            .collect();

        let created: CreatedItems = self.call("item.create", params, Some(auth)).await?;
        if created.itemids.len() != items.len() {
            return Err(ControlPlaneError::CreateMismatch { requested: items.len(), created: created.itemids.len() });
        }
        Ok(created.itemids)
    }

    /// Trapper endpoint: API host, fixed trapper port
    pub fn data_endpoint(&self) -> Result<DataEndpoint, ControlPlaneError> {
        let host = self.url.host_str().ok_or_else(|| ControlPlaneError::InvalidUrl {
            url: self.url.to_string(),
            reason: "missing host".into(),
        })?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok(DataEndpoint { host: host.to_string(), port: self.trapper_port })
    }
}

#[async_trait]
impl ControlPlane for ZabbixApi {
    async fn initialize(&self, host_name: &str) -> Result<SessionState, ControlPlaneError> {
        let auth_token = self.login().await?;
        debug!("Authenticated with Zabbix API");

        let (host_id, resolved_name) = self.find_host(&auth_token, host_name).await?;
        debug!(host_id = %host_id, host = %resolved_name, "Resolved Zabbix host");

        let mut items = self.host_items(&auth_token, &host_id).await?;

        let missing: Vec<&CatalogItem> = CATALOG.iter().filter(|item| !items.contains_key(item.key)).collect();
        if !missing.is_empty() {
            let ids = self.create_items(&auth_token, &host_id, &missing).await?;
            info!(created = ids.len(), host = %resolved_name, "Created missing Zabbix items");
            for (item, id) in missing.iter().zip(ids) {
                items.insert(item.key.to_string(), id);
            }
        }

        let endpoint = self.data_endpoint()?;
        info!(
            host = %resolved_name,
            items = items.len(),
            endpoint = %endpoint,
            "Zabbix session initialized"
        );

        Ok(SessionState {
            session: Session { auth_token, host_id, host_name: resolved_name },
            items,
            endpoint,
        })
    }
}
