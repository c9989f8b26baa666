//! Required Zabbix item catalog
//!
//! The fixed set of trapper items this agent pushes. Provisioning creates the
//! missing ones on the server; translation only emits keys listed here.

use serde::Serialize;

/// Zabbix `value_type` classifier for numeric items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValueType {
    Float,
    Unsigned,
}

impl ValueType {
    /// Numeric code expected by `item.create`
    pub fn code(self) -> u8 {
        match self {
            ValueType::Float => 0,
            ValueType::Unsigned => 3,
        }
    }
}

/// One required item definition
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CatalogItem {
    pub key: &'static str,
    pub name: &'static str,
    pub value_type: ValueType,
    pub description: &'static str,
}

pub const CPU_UTIL: &str = "system.cpu.util[,idle]";
pub const CPU_LOAD_AVG1: &str = "system.cpu.load[percpu,avg1]";
pub const CPU_LOAD_AVG5: &str = "system.cpu.load[percpu,avg5]";
pub const CPU_LOAD_AVG15: &str = "system.cpu.load[percpu,avg15]";

pub const MEMORY_TOTAL: &str = "vm.memory.size[total]";
pub const MEMORY_USED: &str = "vm.memory.size[used]";
pub const MEMORY_AVAILABLE: &str = "vm.memory.size[available]";
pub const MEMORY_UTIL: &str = "vm.memory.util";

/// Filesystem the disk keys below refer to
pub const DISK_MOUNT: &str = "/";

pub const DISK_TOTAL: &str = "vfs.fs.size[/,total]";
pub const DISK_USED: &str = "vfs.fs.size[/,used]";
pub const DISK_FREE: &str = "vfs.fs.size[/,free]";
pub const DISK_PUSED: &str = "vfs.fs.pused[/]";

pub const NET_IN_BYTES: &str = "net.if.in[all]";
pub const NET_OUT_BYTES: &str = "net.if.out[all]";
pub const NET_IN_PACKETS: &str = "net.if.in[all,packets]";
pub const NET_OUT_PACKETS: &str = "net.if.out[all,packets]";
pub const NET_IN_ERRORS: &str = "net.if.in[all,errors]";
pub const NET_OUT_ERRORS: &str = "net.if.out[all,errors]";

const fn item(
    key: &'static str,
    name: &'static str,
    value_type: ValueType,
    description: &'static str,
) -> CatalogItem {
    CatalogItem { key, name, value_type, description }
}

/// All items, grouped CPU / memory / disk / network
pub const CATALOG: [CatalogItem; 18] = [
    item(CPU_UTIL, "CPU utilization", ValueType::Float, "CPU usage percentage"),
    item(CPU_LOAD_AVG1, "Processor load (1 min average per core)", ValueType::Float, "1 minute load average"),
    item(CPU_LOAD_AVG5, "Processor load (5 min average per core)", ValueType::Float, "5 minute load average"),
    item(CPU_LOAD_AVG15, "Processor load (15 min average per core)", ValueType::Float, "15 minute load average"),
    item(MEMORY_TOTAL, "Total memory", ValueType::Unsigned, "Total memory in bytes"),
    item(MEMORY_USED, "Used memory", ValueType::Unsigned, "Used memory in bytes"),
    item(MEMORY_AVAILABLE, "Available memory", ValueType::Unsigned, "Available memory in bytes"),
    item(MEMORY_UTIL, "Memory utilization", ValueType::Float, "Memory usage percentage"),
    item(DISK_TOTAL, "Total disk space on /", ValueType::Unsigned, "Total disk space in bytes"),
    item(DISK_USED, "Used disk space on /", ValueType::Unsigned, "Used disk space in bytes"),
    item(DISK_FREE, "Free disk space on /", ValueType::Unsigned, "Free disk space in bytes"),
    item(DISK_PUSED, "Disk space usage on / (percentage)", ValueType::Float, "Disk usage percentage"),
    item(NET_IN_BYTES, "Incoming network traffic on all interfaces", ValueType::Unsigned, "Bytes received on all network interfaces"),
    item(NET_OUT_BYTES, "Outgoing network traffic on all interfaces", ValueType::Unsigned, "Bytes sent on all network interfaces"),
    item(NET_IN_PACKETS, "Incoming packets on all interfaces", ValueType::Unsigned, "Packets received on all network interfaces"),
    item(NET_OUT_PACKETS, "Outgoing packets on all interfaces", ValueType::Unsigned, "Packets sent on all network interfaces"),
    item(NET_IN_ERRORS, "Incoming errors on all interfaces", ValueType::Unsigned, "Input errors on all network interfaces"),
    item(NET_OUT_ERRORS, "Outgoing errors on all interfaces", ValueType::Unsigned, "Output errors on all network interfaces"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn find(key: &str) -> Option<&'static CatalogItem> {
        CATALOG.iter().find(|item| item.key == key)
    }

    #[test]
    fn test_catalog_keys_are_unique() {
        let keys: HashSet<_> = CATALOG.iter().map(|i| i.key).collect();
        assert_eq!(keys.len(), CATALOG.len());
    }

    #[test]
    fn test_value_type_codes() {
        assert_eq!(ValueType::Float.code(), 0);
        assert_eq!(ValueType::Unsigned.code(), 3);
        assert_eq!(find(MEMORY_TOTAL).unwrap().value_type, ValueType::Unsigned);
        assert_eq!(find(CPU_UTIL).unwrap().value_type, ValueType::Float);
        assert!(find("agent.ping").is_none());
    }
}
