//! System metrics collection for the Zabbix agent
//!
//! Provides the per-cycle host snapshot:
//! - CPU usage and load averages
//! - Memory usage statistics
//! - Disk usage of the root filesystem
//! - Network counters summed over all interfaces
//!
//! The four categories are sampled concurrently on blocking tasks. A failing
//! category is dropped from the snapshot; collection only fails when every
//! category fails.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use sysinfo::{Disks, Networks, System};
use tracing::{debug, warn};

use crate::catalog;

/// Metric category sampled independently from the others
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Cpu,
    Memory,
    Disk,
    Network,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Cpu => "CPU",
            Category::Memory => "Memory",
            Category::Disk => "Disk",
            Category::Network => "Network",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("{category}: {message}")]
    Category { category: Category, message: String },
    #[error("{category}: collection task aborted: {source}")]
    Task {
        category: Category,
        #[source]
        source: tokio::task::JoinError,
    },
    #[error("failed to collect all metrics: [{}]", join_errors(.0))]
    AllFailed(Vec<CollectError>),
}

impl CollectError {
    fn category(category: Category, message: impl Into<String>) -> Self {
        CollectError::Category { category, message: message.into() }
    }
}

fn join_errors(errors: &[CollectError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// A numeric value as pushed to Zabbix
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Float(f64),
    Unsigned(u64),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Float(v) => write!(f, "{v}"),
            MetricValue::Unsigned(v) => write!(f, "{v}"),
        }
    }
}

/// CPU usage metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CpuMetrics {
    pub usage_percent: f64,
    pub load_avg_1: f64,
    pub load_avg_5: f64,
    pub load_avg_15: f64,
}

/// Memory usage metrics, in bytes
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryMetrics {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub free_bytes: u64,
    pub usage_percent: f64,
}

/// Disk usage of the monitored filesystem, in bytes
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiskMetrics {
    pub mount_point: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub usage_percent: f64,
}

/// Cumulative network counters over all interfaces
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkMetrics {
    pub bytes_recv: u64,
    pub bytes_sent: u64,
    pub packets_recv: u64,
    pub packets_sent: u64,
    pub errors_in: u64,
    pub errors_out: u64,
}

/// One successfully sampled category
#[derive(Debug, Clone)]
pub enum CategoryReading {
    Cpu(CpuMetrics),
    Memory(MemoryMetrics),
    Disk(DiskMetrics),
    Network(NetworkMetrics),
}

/// Host metrics captured by one cycle. Categories that failed are `None`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu: Option<CpuMetrics>,
    pub memory: Option<MemoryMetrics>,
    pub disk: Option<DiskMetrics>,
    pub network: Option<NetworkMetrics>,
}

impl MetricSnapshot {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self { timestamp, cpu: None, memory: None, disk: None, network: None }
    }

    /// Values for every catalog key this snapshot can answer, in catalog order
    pub fn values(&self) -> Vec<(&'static str, MetricValue)> {
        use MetricValue::{Float, Unsigned};

        let mut values = Vec::with_capacity(catalog::CATALOG.len());
        if let Some(cpu) = &self.cpu {
            values.push((catalog::CPU_UTIL, Float(cpu.usage_percent)));
            values.push((catalog::CPU_LOAD_AVG1, Float(cpu.load_avg_1)));
            values.push((catalog::CPU_LOAD_AVG5, Float(cpu.load_avg_5)));
            values.push((catalog::CPU_LOAD_AVG15, Float(cpu.load_avg_15)));
        }
        if let Some(mem) = &self.memory {
            values.push((catalog::MEMORY_TOTAL, Unsigned(mem.total_bytes)));
            values.push((catalog::MEMORY_USED, Unsigned(mem.used_bytes)));
            values.push((catalog::MEMORY_AVAILABLE, Unsigned(mem.available_bytes)));
            values.push((catalog::MEMORY_UTIL, Float(mem.usage_percent)));
        }
        if let Some(disk) = &self.disk {
            values.push((catalog::DISK_TOTAL, Unsigned(disk.total_bytes)));
            values.push((catalog::DISK_USED, Unsigned(disk.used_bytes)));
            values.push((catalog::DISK_FREE, Unsigned(disk.free_bytes)));
            values.push((catalog::DISK_PUSED, Float(disk.usage_percent)));
        }
        if let Some(net) = &self.network {
            values.push((catalog::NET_IN_BYTES, Unsigned(net.bytes_recv)));
            values.push((catalog::NET_OUT_BYTES, Unsigned(net.bytes_sent)));
            values.push((catalog::NET_IN_PACKETS, Unsigned(net.packets_recv)));
            values.push((catalog::NET_OUT_PACKETS, Unsigned(net.packets_sent)));
            values.push((catalog::NET_IN_ERRORS, Unsigned(net.errors_in)));
            values.push((catalog::NET_OUT_ERRORS, Unsigned(net.errors_out)));
        }
        values
    }

    fn apply(&mut self, reading: CategoryReading) {
        match reading {
            CategoryReading::Cpu(m) => self.cpu = Some(m),
            CategoryReading::Memory(m) => self.memory = Some(m),
            CategoryReading::Disk(m) => self.disk = Some(m),
            CategoryReading::Network(m) => self.network = Some(m),
        }
    }
}

/// Produces a host snapshot on demand
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn collect(&self) -> Result<MetricSnapshot, CollectError>;
}

/// Blocking sampler for a single category
pub type Probe = Box<dyn FnOnce() -> Result<CategoryReading, CollectError> + Send + 'static>;

/// Run every probe on its own blocking task and wait for all of them
pub async fn gather(
    probes: Vec<(Category, Probe)>,
) -> Vec<(Category, Result<CategoryReading, CollectError>)> {
    let tasks = probes.into_iter().map(|(category, probe)| async move {
        let result = match tokio::task::spawn_blocking(probe).await {
            Ok(result) => result,
            Err(source) => Err(CollectError::Task { category, source }),
        };
        (category, result)
    });
    join_all(tasks).await
}

/// Build a snapshot from whichever categories succeeded
pub fn assemble(
    timestamp: DateTime<Utc>,
    readings: Vec<(Category, Result<CategoryReading, CollectError>)>,
) -> Result<MetricSnapshot, CollectError> {
    let mut snapshot = MetricSnapshot::empty(timestamp);
    let mut errors = Vec::new();
    let total = readings.len();

    for (category, result) in readings {
        match result {
            Ok(reading) => snapshot.apply(reading),
            Err(e) => {
                warn!(component = %category, error = %e, "Failed to collect metrics");
                errors.push(e);
            }
        }
    }

    if total > 0 && errors.len() == total {
        return Err(CollectError::AllFailed(errors));
    }

    debug!(errors = errors.len(), timestamp = %snapshot.timestamp, "Metrics collection completed");
    Ok(snapshot)
}

/// `MetricSource` backed by `sysinfo`
#[derive(Debug, Default)]
pub struct SystemCollector;

impl SystemCollector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetricSource for SystemCollector {
    async fn collect(&self) -> Result<MetricSnapshot, CollectError> {
        debug!("Starting metrics collection");
        let timestamp = Utc::now();

        let probes: Vec<(Category, Probe)> = vec![
            (Category::Cpu, Box::new(|| CpuMetrics::sample().map(CategoryReading::Cpu))),
            (Category::Memory, Box::new(|| MemoryMetrics::sample().map(CategoryReading::Memory))),
            (
                Category::Disk,
                Box::new(|| DiskMetrics::sample(Path::new(catalog::DISK_MOUNT)).map(CategoryReading::Disk)),
            ),
            (Category::Network, Box::new(|| NetworkMetrics::sample().map(CategoryReading::Network))),
        ];

        assemble(timestamp, gather(probes).await)
    }
}

impl CpuMetrics {
    fn sample() -> Result<Self, CollectError> {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        // Usage is a delta between two refreshes
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu_usage();

        if sys.cpus().is_empty() {
            return Err(CollectError::category(Category::Cpu, "no CPU reported"));
        }

        let load = System::load_average();
        Ok(CpuMetrics {
            usage_percent: sys.global_cpu_info().cpu_usage() as f64,
            load_avg_1: load.one,
            load_avg_5: load.five,
            load_avg_15: load.fifteen,
        })
    }
}

impl MemoryMetrics {
    fn sample() -> Result<Self, CollectError> {
        let mut sys = System::new();
        sys.refresh_memory();

        let total_bytes = sys.total_memory();
        if total_bytes == 0 {
            return Err(CollectError::category(Category::Memory, "total memory reported as 0"));
        }
        let used_bytes = sys.used_memory();

        Ok(MemoryMetrics {
            total_bytes,
            used_bytes,
            available_bytes: sys.available_memory(),
            free_bytes: sys.free_memory(),
            usage_percent: percent(used_bytes, total_bytes),
        })
    }
}

impl DiskMetrics {
    fn sample(mount: &Path) -> Result<Self, CollectError> {
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == mount)
            .ok_or_else(|| {
                CollectError::category(Category::Disk, format!("no filesystem mounted at {}", mount.display()))
            })?;

        let total_bytes = disk.total_space();
        let free_bytes = disk.available_space();
        let used_bytes = total_bytes.saturating_sub(free_bytes);

        Ok(DiskMetrics {
            mount_point: mount.display().to_string(),
            total_bytes,
            used_bytes,
            free_bytes,
            usage_percent: percent(used_bytes, total_bytes),
        })
    }
}

impl NetworkMetrics {
    fn sample() -> Result<Self, CollectError> {
        let networks = Networks::new_with_refreshed_list();

        let mut metrics = NetworkMetrics::default();
        for (_name, data) in networks.iter() {
            metrics.bytes_recv += data.total_received();
            metrics.bytes_sent += data.total_transmitted();
            metrics.packets_recv += data.total_packets_received();
            metrics.packets_sent += data.total_packets_transmitted();
            metrics.errors_in += data.total_errors_on_received();
            metrics.errors_out += data.total_errors_on_transmitted();
        }
        Ok(metrics)
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing(category: Category) -> Probe {
        Box::new(move || Err(CollectError::category(category, "unavailable")))
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_surviving_category() {
        let probes: Vec<(Category, Probe)> = vec![
            (Category::Cpu, failing(Category::Cpu)),
            (
                Category::Memory,
                Box::new(|| {
                    Ok(CategoryReading::Memory(MemoryMetrics {
                        total_bytes: 1000,
                        used_bytes: 250,
                        available_bytes: 750,
                        free_bytes: 500,
                        usage_percent: 25.0,
                    }))
                }),
            ),
            (Category::Disk, failing(Category::Disk)),
            (Category::Network, failing(Category::Network)),
        ];

        let snapshot = assemble(Utc::now(), gather(probes).await).unwrap();
        assert!(snapshot.cpu.is_none());
        assert!(snapshot.disk.is_none());
        assert!(snapshot.network.is_none());
        assert_eq!(snapshot.memory.as_ref().unwrap().used_bytes, 250);

        let keys: Vec<_> = snapshot.values().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![
                catalog::MEMORY_TOTAL,
                catalog::MEMORY_USED,
                catalog::MEMORY_AVAILABLE,
                catalog::MEMORY_UTIL
            ]
        );
    }

    #[tokio::test]
    async fn test_all_categories_failing_is_an_error() {
        let probes: Vec<(Category, Probe)> = vec![
            (Category::Cpu, failing(Category::Cpu)),
            (Category::Memory, failing(Category::Memory)),
            (Category::Disk, failing(Category::Disk)),
            (Category::Network, failing(Category::Network)),
        ];

        match assemble(Utc::now(), gather(probes).await) {
            Err(CollectError::AllFailed(errors)) => assert_eq!(errors.len(), 4),
            other => panic!("expected AllFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panicking_probe_is_isolated() {
        let probes: Vec<(Category, Probe)> = vec![
            (Category::Cpu, Box::new(|| panic!("sensor exploded"))),
            (Category::Network, Box::new(|| Ok(CategoryReading::Network(NetworkMetrics::default())))),
        ];

        let readings = gather(probes).await;
        assert!(matches!(readings[0].1, Err(CollectError::Task { category: Category::Cpu, .. })));
        let snapshot = assemble(Utc::now(), readings).unwrap();
        assert!(snapshot.network.is_some());
    }

    #[test]
    fn test_value_rendering() {
        assert_eq!(MetricValue::Float(12.5).to_string(), "12.5");
        assert_eq!(MetricValue::Float(3.0).to_string(), "3");
        assert_eq!(MetricValue::Unsigned(8_589_934_592).to_string(), "8589934592");
    }

    #[tokio::test]
    async fn test_system_collection() {
        let snapshot = SystemCollector::new().collect().await.unwrap();
        let memory = snapshot.memory.expect("memory should be readable");
        assert!(memory.total_bytes > 0);
        assert!(memory.used_bytes <= memory.total_bytes);

        // Disk keys name the root filesystem, so only root may be sampled
        if let Some(disk) = snapshot.disk {
            assert_eq!(disk.mount_point, catalog::DISK_MOUNT);
        }
    }
}
