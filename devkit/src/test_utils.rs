/*!
Test Harness pour l'agent Zabbix

Démarre un faux serveur Zabbix complet (API JSON-RPC + trapper) sur des ports
éphémères et fournit des attentes sur les valeurs reçues.
*/

use anyhow::Result;
use serde_json::Value;
use std::time::Duration;

use crate::api_stub::MockZabbixApi;
use crate::trapper_stub::MockTrapper;

/// Serveur Zabbix simulé de bout en bout
pub struct TestHarness {
    pub api: MockZabbixApi,
    pub trapper: MockTrapper,
}

impl TestHarness {
    pub async fn start() -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests

        let api = MockZabbixApi::start().await?;
        let trapper = MockTrapper::start().await?;
        Ok(Self { api, trapper })
    }

    /// Harness avec un hôte déjà enregistré
    pub async fn with_host(host_id: &str, name: &str) -> Result<Self> {
        let harness = Self::start().await?;
        harness.api.add_host(host_id, name);
        Ok(harness)
    }

    /// Attend qu'au moins `count` valeurs soient arrivées au trapper
    pub async fn wait_for_metrics(&self, count: usize, timeout_ms: u64) -> Result<Vec<Value>> {
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_millis(timeout_ms) {
            let metrics = self.trapper.received_metrics();
            if metrics.len() >= count {
                log::info!("✅ Received {} values", metrics.len());
                return Ok(metrics);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        log::warn!("⏰ Timeout waiting for {} values", count);
        anyhow::bail!(
            "expected {} values within {}ms, got {}",
            count,
            timeout_ms,
            self.trapper.received_metrics().len()
        );
    }

    /// Vérifie que toutes les valeurs reçues portent ce nom d'hôte
    pub fn assert_all_from_host(&self, host: &str) -> Result<()> {
        for metric in self.trapper.received_metrics() {
            if metric["host"] != host {
                anyhow::bail!("value {} sent for host {}, expected {}", metric["key"], metric["host"], host);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_wait_for_metrics() {
        let harness = TestHarness::with_host("10084", "web-01").await.unwrap();

        let body = json!({
            "request": "sender data",
            "data": [{"host": "web-01", "key": "vm.memory.util", "value": "1", "clock": 1}]
        });
        let mut stream = tokio::net::TcpStream::connect(harness.trapper.addr()).await.unwrap();
        stream
            .write_all(&crate::trapper_stub::encode_frame(body.to_string().as_bytes()))
            .await
            .unwrap();

        let metrics = harness.wait_for_metrics(1, 2000).await.unwrap();
        assert_eq!(metrics[0]["key"], "vm.memory.util");
        harness.assert_all_from_host("web-01").unwrap();
        assert!(harness.assert_all_from_host("db-01").is_err());
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let harness = TestHarness::start().await.unwrap();
        assert!(harness.wait_for_metrics(1, 100).await.is_err());
    }
}
