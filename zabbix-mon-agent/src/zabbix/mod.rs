//! Zabbix server integration: JSON-RPC control plane and sender data plane

pub mod api;
pub mod error;
pub mod sender;
pub mod session;

pub use api::{ControlPlane, ControlPlaneError, ZabbixApi};
pub use error::ErrorKind;
pub use sender::{DataEndpoint, MetricTransport, SenderError, WireMetric, ZabbixSender};
pub use session::{ItemMap, SessionStore};
