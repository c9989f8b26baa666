//! Zabbix sender protocol (data plane)
//!
//! Frame layout, identical for requests and responses:
//!
//! ```text
//! +------------+----------------------+-----------------+
//! | "ZBXD\x01" | payload length (u64) | JSON payload    |
//! |  5 bytes   | 8 bytes little-endian| `length` bytes  |
//! +------------+----------------------+-----------------+
//! ```
//!
//! One TCP connection per exchange. Nothing is retried here; the scheduler
//! owns retries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::error::{classify_server_message, ErrorKind};

pub const HEADER: &[u8; 5] = b"ZBXD\x01";
const LENGTH_SIZE: usize = 8;
/// Largest response payload accepted from the server
pub const MAX_RESPONSE_LEN: u64 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum SenderError {
    #[error("failed to connect to zabbix server {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("exchange with {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },
    #[error("sender connection i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("invalid response header: {0:?}")]
    BadHeader([u8; 5]),
    #[error("response data too large: {0} bytes")]
    TooLarge(u64),
    #[error("failed to encode sender request: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to parse sender response: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("zabbix sender error: {info}")]
    Rejected { info: String, kind: ErrorKind },
}

impl SenderError {
    /// Build a rejection, tagged from the server's own wording
    pub fn rejected(info: impl Into<String>) -> Self {
        let info = info.into();
        let kind = classify_server_message([info.as_str()]);
        SenderError::Rejected { info, kind }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SenderError::Encode(_) => ErrorKind::Fatal,
            SenderError::Rejected { kind, .. } => *kind,
            _ => ErrorKind::Transient,
        }
    }
}

/// Trapper address derived from the control-plane URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataEndpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for DataEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// One value pushed to a trapper item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMetric {
    pub host: String,
    pub key: String,
    pub value: String,
    pub clock: i64,
}

#[derive(Debug, Serialize)]
struct SenderRequest<'a> {
    request: &'static str,
    data: &'a [WireMetric],
    clock: i64,
}

#[derive(Debug, Deserialize)]
struct SenderResponse {
    response: String,
    #[serde(default)]
    info: Option<String>,
}

/// Counters reported by the trapper in its `info` string
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SenderInfo {
    pub processed: u64,
    pub failed: u64,
    pub total: u64,
    pub seconds_spent: f64,
}

impl SenderInfo {
    /// Parse `processed: 3; failed: 0; total: 3; seconds spent: 0.000055`
    pub fn parse(info: &str) -> Option<Self> {
        let mut processed = None;
        let mut failed = None;
        let mut total = None;
        let mut seconds_spent = None;

        for field in info.split(';').filter(|field| !field.trim().is_empty()) {
            let (name, value) = field.split_once(':')?;
            let value = value.trim();
            match name.trim() {
                "processed" => processed = value.parse().ok(),
                "failed" => failed = value.parse().ok(),
                "total" => total = value.parse().ok(),
                "seconds spent" => seconds_spent = value.parse().ok(),
                _ => {}
            }
        }

        Some(SenderInfo {
            processed: processed?,
            failed: failed?,
            total: total?,
            seconds_spent: seconds_spent?,
        })
    }
}

/// Successful trapper answer
#[derive(Debug, Clone, Default)]
pub struct SenderAck {
    pub info: String,
    pub parsed: Option<SenderInfo>,
}

/// Prefix `payload` with the sender header and its little-endian length
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER.len() + LENGTH_SIZE + payload.len());
    frame.extend_from_slice(HEADER);
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Read one frame and return its payload. The declared length is checked
/// against [`MAX_RESPONSE_LEN`] before any payload byte is read.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, SenderError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 5];
    reader.read_exact(&mut header).await?;
    if &header != HEADER {
        return Err(SenderError::BadHeader(header));
    }

    let mut len_bytes = [0u8; LENGTH_SIZE];
    reader.read_exact(&mut len_bytes).await?;
    let len = u64::from_le_bytes(len_bytes);
    if len > MAX_RESPONSE_LEN {
        return Err(SenderError::TooLarge(len));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Delivers one batch of wire metrics to the data plane
#[async_trait]
pub trait MetricTransport: Send + Sync {
    async fn send(&self, endpoint: &DataEndpoint, batch: &[WireMetric]) -> Result<SenderAck, SenderError>;
}

/// Client side of the sender protocol
#[derive(Debug, Clone)]
pub struct ZabbixSender {
    timeout: Duration,
}

impl ZabbixSender {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Send one raw payload and return the response payload
    pub async fn exchange(&self, endpoint: &DataEndpoint, payload: &[u8]) -> Result<Vec<u8>, SenderError> {
        let target = endpoint.to_string();

        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect((endpoint.host.as_str(), endpoint.port)))
            .await
            .map_err(|_| SenderError::Timeout { endpoint: target.clone(), timeout: self.timeout })?
            .map_err(|source| SenderError::Connect { endpoint: target.clone(), source })?;

        let frame = encode_frame(payload);
        let exchange = async {
            stream.write_all(&frame).await?;
            stream.flush().await?;
            read_frame(&mut stream).await
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| SenderError::Timeout { endpoint: target, timeout: self.timeout })?
    }

    /// Push one batch of values; `Ok` only when the trapper answers "success"
    pub async fn send_batch(&self, endpoint: &DataEndpoint, batch: &[WireMetric]) -> Result<SenderAck, SenderError> {
        if batch.is_empty() {
            return Ok(SenderAck::default());
        }

        debug!(endpoint = %endpoint, items = batch.len(), "Sending data via Zabbix sender");

        let request = SenderRequest {
            request: "sender data",
            data: batch,
            clock: chrono::Utc::now().timestamp(),
        };
        let payload = serde_json::to_vec(&request).map_err(SenderError::Encode)?;

        let response = self.exchange(endpoint, &payload).await?;
        let response: SenderResponse = serde_json::from_slice(&response).map_err(SenderError::Decode)?;
        let info = response.info.unwrap_or_default();

        if response.response != "success" {
            return Err(SenderError::rejected(info));
        }

        let parsed = SenderInfo::parse(&info);
        match &parsed {
            Some(counters) if counters.failed > 0 => {
                warn!(
                    processed = counters.processed,
                    failed = counters.failed,
                    total = counters.total,
                    "Zabbix accepted the batch but rejected some values"
                );
            }
            _ => debug!(info = %info, "Successfully sent data via Zabbix sender"),
        }

        Ok(SenderAck { info, parsed })
    }
}

#[async_trait]
impl MetricTransport for ZabbixSender {
    async fn send(&self, endpoint: &DataEndpoint, batch: &[WireMetric]) -> Result<SenderAck, SenderError> {
        self.send_batch(endpoint, batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zabbix_mon_devkit::{MockTrapper, TrapperReply};

    fn metric(key: &str, value: &str) -> WireMetric {
        WireMetric { host: "web-01".into(), key: key.into(), value: value.into(), clock: 1_700_000_000 }
    }

    fn endpoint(port: u16) -> DataEndpoint {
        DataEndpoint { host: "127.0.0.1".into(), port }
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let large: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();
        for payload in [&b""[..], &b"{}"[..], &b"{\"request\":\"sender data\"}"[..], &large[..]] {
            let frame = encode_frame(payload);
            assert_eq!(&frame[..5], HEADER);
            assert_eq!(u64::from_le_bytes(frame[5..13].try_into().unwrap()), payload.len() as u64);
            let decoded = read_frame(&mut &frame[..]).await.unwrap();
            assert_eq!(decoded, payload);
        }
    }

    #[tokio::test]
    async fn test_oversized_length_rejected_before_payload_read() {
        let mut frame = HEADER.to_vec();
        frame.extend_from_slice(&(MAX_RESPONSE_LEN + 1).to_le_bytes());
        // No payload follows: reading it would surface as an EOF instead
        match read_frame(&mut &frame[..]).await {
            Err(SenderError::TooLarge(len)) => assert_eq!(len, MAX_RESPONSE_LEN + 1),
            other => panic!("expected TooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_max_length_is_accepted() {
        let payload = vec![b'x'; MAX_RESPONSE_LEN as usize];
        let frame = encode_frame(&payload);
        assert_eq!(read_frame(&mut &frame[..]).await.unwrap().len(), payload.len());
    }

    #[tokio::test]
    async fn test_bad_header_rejected() {
        for header in [b"ZBXD\x02", b"HTTP/", b"zbxd\x01"] {
            let mut frame = header.to_vec();
            frame.extend_from_slice(&2u64.to_le_bytes());
            frame.extend_from_slice(b"{}");
            assert!(matches!(read_frame(&mut &frame[..]).await, Err(SenderError::BadHeader(h)) if &h == header));
        }
    }

    #[tokio::test]
    async fn test_short_payload_is_io_error() {
        let mut frame = HEADER.to_vec();
        frame.extend_from_slice(&10u64.to_le_bytes());
        frame.extend_from_slice(b"{}");
        match read_frame(&mut &frame[..]).await {
            Err(SenderError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn test_sender_info_parsing() {
        let info = SenderInfo::parse("processed: 17; failed: 1; total: 18; seconds spent: 0.000055").unwrap();
        assert_eq!(info.processed, 17);
        assert_eq!(info.failed, 1);
        assert_eq!(info.total, 18);
        assert!((info.seconds_spent - 0.000055).abs() < f64::EPSILON);

        assert!(SenderInfo::parse("").is_none());

        let trailing = SenderInfo::parse("processed: 2; failed: 0; total: 2; seconds spent: 0.5;").unwrap();
        assert_eq!(trailing.total, 2);
        let gaps = SenderInfo::parse("processed: 2;; failed: 0; ; total: 2; seconds spent: 0.5").unwrap();
        assert_eq!(gaps.processed, 2);
        assert_eq!(gaps.seconds_spent, 0.5);
        assert!(SenderInfo::parse("processed: 1; failed: x; total: 1; seconds spent: 0.1").is_none());
    }

    #[tokio::test]
    async fn test_send_batch_to_trapper() {
        let trapper = MockTrapper::start().await.unwrap();
        let sender = ZabbixSender::new(Duration::from_secs(5));

        let batch = vec![metric("vm.memory.util", "42.5"), metric("vm.memory.size[total]", "1024")];
        let ack = sender.send(&endpoint(trapper.port()), &batch).await.unwrap();

        let counters = ack.parsed.unwrap();
        assert_eq!(counters.processed, 2);
        assert_eq!(counters.failed, 0);

        let requests = trapper.received();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["request"], "sender data");
        assert_eq!(requests[0]["data"][0]["host"], "web-01");
        assert_eq!(requests[0]["data"][0]["key"], "vm.memory.util");
        assert_eq!(requests[0]["data"][0]["value"], "42.5");
        assert_eq!(requests[0]["data"][1]["clock"], 1_700_000_000);
        assert!(requests[0]["clock"].as_i64().unwrap() > 0);
        assert_eq!(trapper.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_does_not_connect() {
        let trapper = MockTrapper::start().await.unwrap();
        let sender = ZabbixSender::new(Duration::from_secs(5));
        sender.send(&endpoint(trapper.port()), &[]).await.unwrap();
        assert_eq!(trapper.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_response_is_rejected() {
        let trapper = MockTrapper::start().await.unwrap();
        trapper.push_reply(TrapperReply::Failed("host is not monitored".into()));
        let sender = ZabbixSender::new(Duration::from_secs(5));

        let err = sender.send(&endpoint(trapper.port()), &[metric("vm.memory.util", "1")]).await.unwrap_err();
        assert!(matches!(err, SenderError::Rejected { .. }));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_session_failure_response_is_auth_expired() {
        let trapper = MockTrapper::start().await.unwrap();
        trapper.push_reply(TrapperReply::Failed("Session terminated, re-login, please.".into()));
        let sender = ZabbixSender::new(Duration::from_secs(5));

        let err = sender.send(&endpoint(trapper.port()), &[metric("vm.memory.util", "1")]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthExpired);
    }

    #[tokio::test]
    async fn test_server_bad_header() {
        let trapper = MockTrapper::start().await.unwrap();
        let mut raw = b"ZBXD\x07".to_vec();
        raw.extend_from_slice(&2u64.to_le_bytes());
        raw.extend_from_slice(b"{}");
        trapper.push_reply(TrapperReply::Raw(raw));
        let sender = ZabbixSender::new(Duration::from_secs(5));

        let err = sender.send(&endpoint(trapper.port()), &[metric("vm.memory.util", "1")]).await.unwrap_err();
        assert!(matches!(err, SenderError::BadHeader(_)));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_server_oversized_length() {
        let trapper = MockTrapper::start().await.unwrap();
        let mut raw = HEADER.to_vec();
        raw.extend_from_slice(&(8 * MAX_RESPONSE_LEN).to_le_bytes());
        trapper.push_reply(TrapperReply::Raw(raw));
        let sender = ZabbixSender::new(Duration::from_secs(5));

        let err = sender.send(&endpoint(trapper.port()), &[metric("vm.memory.util", "1")]).await.unwrap_err();
        assert!(matches!(err, SenderError::TooLarge(_)));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let trapper = MockTrapper::start().await.unwrap();
        trapper.push_reply(TrapperReply::Silent);
        let sender = ZabbixSender::new(Duration::from_millis(200));

        let err = sender.send(&endpoint(trapper.port()), &[metric("vm.memory.util", "1")]).await.unwrap_err();
        assert!(matches!(err, SenderError::Timeout { .. }));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let sender = ZabbixSender::new(Duration::from_secs(2));
        let err = sender.send(&endpoint(port), &[metric("vm.memory.util", "1")]).await.unwrap_err();
        assert!(matches!(err, SenderError::Connect { .. }));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(DataEndpoint { host: "zabbix.lan".into(), port: 10051 }.to_string(), "zabbix.lan:10051");
        assert_eq!(DataEndpoint { host: "::1".into(), port: 10051 }.to_string(), "[::1]:10051");
    }
}
