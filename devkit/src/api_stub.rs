/*!
Faux serveur JSON-RPC Zabbix (axum)

Implémente le strict nécessaire pour l'agent:
- `user.login` (jetons `mock-token-N`)
- `host.get` filtré par nom exact
- `item.get` par `hostids`
- `item.create` (ids attribués à partir de 40000)

Chaque appel est enregistré (méthode, params, auth, content-type). Les erreurs
sont scriptables: login refusé, erreur RPC ponctuelle par méthode, statut
HTTP forcé, création partielle, expiration des sessions.
*/

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::lock;

const SESSION_TERMINATED: &str = "Session terminated, re-login, please.";

/// Un appel JSON-RPC reçu
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub params: Value,
    pub auth: Option<String>,
    pub content_type: String,
}

#[derive(Debug, Clone)]
struct RpcFailure {
    code: i64,
    message: String,
    data: String,
}

#[derive(Debug, Clone)]
struct MockItem {
    host_id: String,
    item_id: String,
    key: String,
}

#[derive(Default)]
struct ApiState {
    hosts: Vec<(String, String)>,
    items: Vec<MockItem>,
    tokens: HashSet<String>,
    tokens_issued: u64,
    next_item_id: u64,
    login_error: Option<String>,
    failures: HashMap<String, VecDeque<RpcFailure>>,
    http_status: Option<StatusCode>,
    create_shortfall: usize,
    calls: Vec<RecordedCall>,
}

type Shared = Arc<Mutex<ApiState>>;

/// API Zabbix en mémoire
pub struct MockZabbixApi {
    addr: SocketAddr,
    state: Shared,
    task: JoinHandle<()>,
}

impl MockZabbixApi {
    pub async fn start() -> Result<Self> {
        let state: Shared = Arc::new(Mutex::new(ApiState { next_item_id: 40000, ..ApiState::default() }));

        let app = Router::new().route("/api_jsonrpc.php", post(rpc)).with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("❌ [MOCK API] server stopped: {}", e);
            }
        });

        log::info!("🌐 [MOCK API] listening on {}", addr);
        Ok(Self { addr, state, task })
    }

    pub fn url(&self) -> String {
        format!("http://{}/api_jsonrpc.php", self.addr)
    }

    pub fn add_host(&self, host_id: &str, name: &str) {
        lock(&self.state).hosts.push((host_id.to_string(), name.to_string()));
    }

    pub fn add_item(&self, host_id: &str, item_id: &str, key: &str) {
        lock(&self.state).items.push(MockItem {
            host_id: host_id.to_string(),
            item_id: item_id.to_string(),
            key: key.to_string(),
        });
    }

    /// Toutes les clés d'items connues pour un hôte
    pub fn item_keys(&self, host_id: &str) -> Vec<String> {
        lock(&self.state)
            .items
            .iter()
            .filter(|item| item.host_id == host_id)
            .map(|item| item.key.clone())
            .collect()
    }

    /// `user.login` répondra par cette erreur
    pub fn reject_login(&self, message: &str) {
        lock(&self.state).login_error = Some(message.to_string());
    }

    /// Le prochain appel à `method` échoue avec cette erreur JSON-RPC
    pub fn fail_next(&self, method: &str, code: i64, message: &str, data: &str) {
        lock(&self.state).failures.entry(method.to_string()).or_default().push_back(RpcFailure {
            code,
            message: message.to_string(),
            data: data.to_string(),
        });
    }

    /// Force un statut HTTP sur toutes les réponses (`None` pour revenir à 200)
    pub fn set_http_status(&self, status: Option<u16>) {
        lock(&self.state).http_status = status.and_then(|code| StatusCode::from_u16(code).ok());
    }

    /// `item.create` renvoie `n` ids de moins que demandé
    pub fn set_create_shortfall(&self, n: usize) {
        lock(&self.state).create_shortfall = n;
    }

    /// Invalide tous les jetons émis
    pub fn expire_sessions(&self) {
        lock(&self.state).tokens.clear();
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.state).calls.clone()
    }

    pub fn calls_for(&self, method: &str) -> Vec<RecordedCall> {
        lock(&self.state).calls.iter().filter(|call| call.method == method).cloned().collect()
    }
}

impl Drop for MockZabbixApi {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn rpc_result(id: &Value, result: Value) -> Response {
    Json(json!({ "jsonrpc": "2.0", "result": result, "id": id })).into_response()
}

fn rpc_error(id: &Value, code: i64, message: &str, data: &str) -> Response {
    Json(json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message, "data": data },
        "id": id,
    }))
    .into_response()
}

async fn rpc(State(state): State<Shared>, headers: HeaderMap, body: Bytes) -> Response {
    let request: Value = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return rpc_error(&Value::Null, -32700, "Parse error.", &e.to_string()),
    };

    let id = request["id"].clone();
    let method = request["method"].as_str().unwrap_or_default().to_string();
    let params = request["params"].clone();
    let auth = request["auth"].as_str().map(str::to_string);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let mut state = lock(&state);
    state.calls.push(RecordedCall {
        method: method.clone(),
        params: params.clone(),
        auth: auth.clone(),
        content_type,
    });
    log::info!("📨 [MOCK API] {}", method);

    if let Some(status) = state.http_status {
        return (status, "mock upstream failure").into_response();
    }

    if let Some(failure) = state.failures.get_mut(&method).and_then(VecDeque::pop_front) {
        return rpc_error(&id, failure.code, &failure.message, &failure.data);
    }

    if method != "user.login" && !auth.as_ref().is_some_and(|token| state.tokens.contains(token)) {
        return rpc_error(&id, -32602, "Invalid params.", SESSION_TERMINATED);
    }

    match method.as_str() {
        "user.login" => {
            if let Some(message) = &state.login_error {
                return rpc_error(&id, -32500, "Application error.", message);
            }
            state.tokens_issued += 1;
            let token = format!("mock-token-{}", state.tokens_issued);
            state.tokens.insert(token.clone());
            rpc_result(&id, json!(token))
        }
        "host.get" => {
            let wanted: Vec<&str> = params["filter"]["host"]
                .as_array()
                .map(|names| names.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            let hosts: Vec<Value> = state
                .hosts
                .iter()
                .filter(|(_, name)| wanted.contains(&name.as_str()))
                .map(|(host_id, name)| json!({ "hostid": host_id, "host": name }))
                .collect();
            rpc_result(&id, json!(hosts))
        }
        "item.get" => {
            let host_ids: Vec<&str> = params["hostids"]
                .as_array()
                .map(|ids| ids.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            let items: Vec<Value> = state
                .items
                .iter()
                .filter(|item| host_ids.contains(&item.host_id.as_str()))
                .map(|item| json!({ "itemid": item.item_id, "key_": item.key }))
                .collect();
            rpc_result(&id, json!(items))
        }
        "item.create" => {
            let requested = params.as_array().cloned().unwrap_or_default();
            let mut item_ids = Vec::with_capacity(requested.len());
            for item in &requested {
                let item_id = state.next_item_id.to_string();
                state.next_item_id += 1;
                state.items.push(MockItem {
                    host_id: item["hostid"].as_str().unwrap_or_default().to_string(),
                    item_id: item_id.clone(),
                    key: item["key_"].as_str().unwrap_or_default().to_string(),
                });
                item_ids.push(item_id);
            }
            let keep = item_ids.len().saturating_sub(state.create_shortfall);
            item_ids.truncate(keep);
            rpc_result(&id, json!({ "itemids": item_ids }))
        }
        other => rpc_error(&id, -32601, "Method not found.", other),
    }
}
