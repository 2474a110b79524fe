use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

/// Placeholder name for a process whose name could not be read.
pub const UNKNOWN_NAME: &str = "unknown";

/// Local ports associated with each pid.
pub type PortMap = HashMap<u32, BTreeSet<u16>>;

/// One per-process reading straight from the probe. `None` marks a field
/// whose read failed (permission denied, process exited mid-pass, ...).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawProcess {
    pub pid: u32,
    pub name: Option<String>,
    pub exe: Option<String>,
    pub cmdline: Option<String>,
    pub username: Option<String>,
    pub status: Option<String>,
    pub create_time: Option<u64>,
    pub parent_pid: Option<u32>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub memory_rss: Option<u64>,
}

impl RawProcess {
    /// A reading where every field failed.
    pub fn new(pid: u32) -> Self {
        RawProcess {
            pid,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub name: String,
    pub exe: String,
    pub cmdline: String,
    pub username: String,
    pub status: String,
    /// Milliseconds since the Unix epoch.
    pub create_time: u64,
    pub parent_pid: u32,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_rss: u64,
    pub ports: Vec<u16>,
}

impl ProcessSnapshot {
    /// Fills every unreadable field with its zero value.
    pub fn from_raw(raw: RawProcess, ports: Option<&BTreeSet<u16>>) -> Self {
        ProcessSnapshot {
            pid: raw.pid,
            name: raw.name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            exe: raw.exe.unwrap_or_default(),
            cmdline: raw.cmdline.unwrap_or_default(),
            username: raw.username.unwrap_or_default(),
            status: raw.status.unwrap_or_default(),
            create_time: raw.create_time.unwrap_or_default(),
            parent_pid: raw.parent_pid.unwrap_or_default(),
            cpu_percent: raw.cpu_percent.unwrap_or_default(),
            memory_percent: raw.memory_percent.unwrap_or_default(),
            memory_rss: raw.memory_rss.unwrap_or_default(),
            ports: ports
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default(),
        }
    }
}

/// Socket state as far as port accounting cares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Listen,
    Established,
    Other,
}

/// One socket owned by a process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connection {
    pub pid: u32,
    pub local_port: u16,
    pub state: ConnectionState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_reads_become_zero_values() {
        let snapshot = ProcessSnapshot::from_raw(RawProcess::new(42), None);
        assert_eq!(snapshot.pid, 42);
        assert_eq!(snapshot.name, UNKNOWN_NAME);
        assert!(snapshot.exe.is_empty());
        assert_eq!(snapshot.cpu_percent, 0.0);
        assert_eq!(snapshot.memory_rss, 0);
        assert!(snapshot.ports.is_empty());
    }

    #[test]
    fn ports_are_sorted() {
        let ports: BTreeSet<u16> = [8080, 22, 443].into_iter().collect();
        let raw = RawProcess {
            name: Some("sshd".into()),
            ..RawProcess::new(7)
        };
        let snapshot = ProcessSnapshot::from_raw(raw, Some(&ports));
        assert_eq!(snapshot.name, "sshd");
        assert_eq!(snapshot.ports, vec![22, 443, 8080]);
    }

    #[test]
    fn serializes_camel_case() {
        let raw = RawProcess {
            name: Some("nginx".into()),
            parent_pid: Some(1),
            memory_rss: Some(4096),
            ..RawProcess::new(10)
        };
        let value = serde_json::to_value(ProcessSnapshot::from_raw(raw, None)).unwrap();
        assert_eq!(value["parentPid"], 1);
        assert_eq!(value["memoryRss"], 4096);
        assert!(value.get("createTime").is_some());
        assert!(value["ports"].as_array().unwrap().is_empty());
    }
}
