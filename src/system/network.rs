use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;

use super::probe::SystemProbe;
use super::process::{Connection, ConnectionState, PortMap, UNKNOWN_NAME};
use crate::error::ProbeError;

const DEFAULT_TOP_LIMIT: usize = 20;

/// Groups local ports by owning pid. Pid 0 and port 0 are ignored.
pub fn ports_by_pid(connections: &[Connection]) -> PortMap {
    let mut map = PortMap::new();
    for conn in connections {
        if conn.pid == 0 || conn.local_port == 0 {
            continue;
        }
        map.entry(conn.pid).or_default().insert(conn.local_port);
    }
    map
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProcessStat {
    pub pid: u32,
    pub process: String,
    pub username: String,
    pub connections: usize,
    pub listening: usize,
    pub established: usize,
    pub other_states: usize,
}

/// Processes ranked by socket activity: established first, then total,
/// then listening, ties broken by pid.
///
/// Re-reads the process table first so owners that started since the last
/// process pass are named.
pub fn top_network_processes(
    probe: &dyn SystemProbe,
    limit: usize,
) -> Result<Vec<NetworkProcessStat>, ProbeError> {
    let limit = if limit == 0 { DEFAULT_TOP_LIMIT } else { limit };
    probe.refresh_processes()?;
    let connections = probe.connections()?;

    let mut counts: HashMap<u32, (usize, usize, usize)> = HashMap::new();
    for conn in connections.iter().filter(|c| c.pid > 0) {
        let entry = counts.entry(conn.pid).or_default();
        match conn.state {
            ConnectionState::Listen => entry.0 += 1,
            ConnectionState::Established => entry.1 += 1,
            ConnectionState::Other => entry.2 += 1,
        }
    }

    let mut stats: Vec<NetworkProcessStat> = counts
        .into_iter()
        .map(|(pid, (listening, established, other_states))| {
            let raw = probe.inspect(pid);
            let process = raw
                .exe
                .as_deref()
                .filter(|exe| !exe.is_empty())
                .and_then(|exe| Path::new(exe).file_name())
                .map(|base| base.to_string_lossy().into_owned())
                .or(raw.name.filter(|n| !n.is_empty()))
                .unwrap_or_else(|| UNKNOWN_NAME.to_string());
            NetworkProcessStat {
                pid,
                process,
                username: raw.username.unwrap_or_default(),
                connections: listening + established + other_states,
                listening,
                established,
                other_states,
            }
        })
        .collect();

    stats.sort_by(|a, b| {
        b.established
            .cmp(&a.established)
            .then(b.connections.cmp(&a.connections))
            .then(b.listening.cmp(&a.listening))
            .then(a.pid.cmp(&b.pid))
    });
    stats.truncate(limit);
    Ok(stats)
}
