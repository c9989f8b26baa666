/*!
Faux trapper Zabbix pour tests sans serveur

Écoute sur `127.0.0.1:0`, décode chaque trame sender reçue et répond selon
un script. Toutes les requêtes reçues sont enregistrées pour les assertions.
*/

use anyhow::Result;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::lock;

pub const HEADER: &[u8; 5] = b"ZBXD\x01";

/// Réponse scriptée pour la prochaine connexion
#[derive(Debug, Clone)]
pub enum TrapperReply {
    /// `response: success` avec un `info` calculé sur la requête
    Success,
    /// `response: failed` avec l'`info` donné
    Failed(String),
    /// Octets envoyés tels quels (en-tête invalide, longueur énorme...)
    Raw(Vec<u8>),
    /// Lit la requête puis ne répond jamais
    Silent,
    /// Lit la requête puis ferme la connexion
    Close,
}

#[derive(Default)]
struct TrapperState {
    replies: VecDeque<TrapperReply>,
    received: Vec<Value>,
    connections: usize,
}

/// Trapper Zabbix en mémoire
pub struct MockTrapper {
    addr: SocketAddr,
    state: Arc<Mutex<TrapperState>>,
    task: JoinHandle<()>,
}

impl MockTrapper {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(TrapperState::default()));

        let task = tokio::spawn({
            let state = state.clone();
            async move {
                loop {
                    let (stream, peer) = match listener.accept().await {
                        Ok(conn) => conn,
                        Err(e) => {
                            log::warn!("⚠️ [MOCK TRAPPER] accept failed: {}", e);
                            continue;
                        }
                    };
                    lock(&state).connections += 1;
                    log::debug!("🔌 [MOCK TRAPPER] connection from {}", peer);
                    tokio::spawn(handle_connection(stream, state.clone()));
                }
            }
        });

        log::info!("📡 [MOCK TRAPPER] listening on {}", addr);
        Ok(Self { addr, state, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Ajoute une réponse à la file; file vide = `Success`
    pub fn push_reply(&self, reply: TrapperReply) {
        lock(&self.state).replies.push_back(reply);
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.state).connections
    }

    /// Corps JSON de toutes les requêtes reçues
    pub fn received(&self) -> Vec<Value> {
        lock(&self.state).received.clone()
    }

    /// Entrées `data` de toutes les requêtes, dans l'ordre de réception
    pub fn received_metrics(&self) -> Vec<Value> {
        lock(&self.state)
            .received
            .iter()
            .filter_map(|request| request["data"].as_array())
            .flatten()
            .cloned()
            .collect()
    }
}

impl Drop for MockTrapper {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Trame sender: en-tête, longueur u64 little-endian, payload
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER.len() + 8 + payload.len());
    frame.extend_from_slice(HEADER);
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

async fn read_request(stream: &mut TcpStream) -> Result<Value> {
    let mut header = [0u8; 13];
    stream.read_exact(&mut header).await?;
    if &header[..5] != HEADER {
        anyhow::bail!("invalid header {:?}", &header[..5]);
    }
    let len = u64::from_le_bytes(header[5..].try_into()?);
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    Ok(serde_json::from_slice(&payload)?)
}

async fn handle_connection(mut stream: TcpStream, state: Arc<Mutex<TrapperState>>) {
    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            log::warn!("⚠️ [MOCK TRAPPER] unreadable request: {}", e);
            return;
        }
    };

    let count = request["data"].as_array().map_or(0, Vec::len);
    let reply = {
        let mut state = lock(&state);
        state.received.push(request);
        state.replies.pop_front().unwrap_or(TrapperReply::Success)
    };
    log::info!("📥 [MOCK TRAPPER] received {} values, replying {:?}", count, reply);

    let bytes = match reply {
        TrapperReply::Success => {
            let info = format!("processed: {count}; failed: 0; total: {count}; seconds spent: 0.000042");
            encode_frame(json!({ "response": "success", "info": info }).to_string().as_bytes())
        }
        TrapperReply::Failed(info) => encode_frame(json!({ "response": "failed", "info": info }).to_string().as_bytes()),
        TrapperReply::Raw(bytes) => bytes,
        TrapperReply::Silent => {
            // Bloque jusqu'à ce que le client abandonne
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink).await;
            return;
        }
        TrapperReply::Close => return,
    };

    if let Err(e) = stream.write_all(&bytes).await {
        log::warn!("⚠️ [MOCK TRAPPER] write failed: {}", e);
    }
    let _ = stream.shutdown().await;
}
