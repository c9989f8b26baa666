//! Snapshot -> sender wire entries

use crate::metrics::MetricSnapshot;
use crate::zabbix::{ItemMap, WireMetric};

/// Emit one entry per snapshot value whose key is provisioned on the server.
/// Every entry shares the snapshot's capture time.
pub fn translate(snapshot: &MetricSnapshot, items: &ItemMap, host: &str) -> Vec<WireMetric> {
    let clock = snapshot.timestamp.timestamp();

    snapshot
        .values()
        .into_iter()
        .filter(|(key, _)| items.contains_key(*key))
        .map(|(key, value)| WireMetric {
            host: host.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            clock,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::metrics::{CpuMetrics, MemoryMetrics, NetworkMetrics};
    use chrono::{TimeZone, Utc};

    fn snapshot() -> MetricSnapshot {
        let mut snapshot = MetricSnapshot::empty(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        snapshot.cpu = Some(CpuMetrics { usage_percent: 12.5, load_avg_1: 0.5, load_avg_5: 0.25, load_avg_15: 0.0 });
        snapshot.memory = Some(MemoryMetrics {
            total_bytes: 8_000,
            used_bytes: 2_000,
            available_bytes: 6_000,
            free_bytes: 5_000,
            usage_percent: 25.0,
        });
        snapshot
    }

    fn items(keys: &[&str]) -> ItemMap {
        keys.iter().enumerate().map(|(i, k)| (k.to_string(), format!("{}", 23000 + i))).collect()
    }

    #[test]
    fn test_only_provisioned_keys_are_emitted() {
        // Snapshot exposes CPU_UTIL, MEMORY_TOTAL and more; only two are provisioned
        let map = items(&[catalog::CPU_UTIL, catalog::MEMORY_TOTAL]);
        let wire = translate(&snapshot(), &map, "web-01");

        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].key, catalog::CPU_UTIL);
        assert_eq!(wire[0].value, "12.5");
        assert_eq!(wire[1].key, catalog::MEMORY_TOTAL);
        assert_eq!(wire[1].value, "8000");
        assert!(wire.iter().all(|m| m.host == "web-01" && m.clock == 1_700_000_000));
    }

    #[test]
    fn test_missing_category_is_not_emitted() {
        let map = items(&[catalog::NET_IN_BYTES, catalog::MEMORY_UTIL]);
        let wire = translate(&snapshot(), &map, "web-01");
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].key, catalog::MEMORY_UTIL);
        assert_eq!(wire[0].value, "25");
    }

    #[test]
    fn test_full_map_covers_every_value() {
        let keys: Vec<&str> = catalog::CATALOG.iter().map(|i| i.key).collect();
        let mut snap = snapshot();
        snap.network = Some(NetworkMetrics::default());

        let wire = translate(&snap, &items(&keys), "web-01");
        assert_eq!(wire.len(), 4 + 4 + 6);
        assert!(translate(&snap, &ItemMap::new(), "web-01").is_empty());
    }
}
