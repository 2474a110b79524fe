use std::collections::HashMap;
use std::fs;

use super::PlatformExtensions;
use crate::error::ProbeError;
use crate::system::process::{Connection, ConnectionState};

pub struct Platform;

const SOCKET_TABLES: [&str; 4] = [
    "/proc/net/tcp",
    "/proc/net/tcp6",
    "/proc/net/udp",
    "/proc/net/udp6",
];

impl PlatformExtensions for Platform {
    fn connections() -> Result<Vec<Connection>, ProbeError> {
        let owners = socket_owners()?;
        let mut out = Vec::new();
        for table in SOCKET_TABLES {
            // tcp6/udp6 are absent when IPv6 is disabled
            let Ok(contents) = fs::read_to_string(table) else {
                continue;
            };
            let is_tcp = table.contains("tcp");
            for entry in parse_socket_table(&contents) {
                if let Some(&pid) = owners.get(&entry.inode) {
                    out.push(Connection {
                        pid,
                        local_port: entry.local_port,
                        state: if is_tcp {
                            tcp_state(entry.state)
                        } else {
                            ConnectionState::Other
                        },
                    });
                }
            }
        }
        Ok(out)
    }
}

#[derive(Debug, PartialEq)]
struct SocketEntry {
    local_port: u16,
    state: u8,
    inode: u64,
}

/// Parses the body of `/proc/net/{tcp,tcp6,udp,udp6}`.
fn parse_socket_table(contents: &str) -> Vec<SocketEntry> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            // sl(0) local(1) remote(2) st(3) queues(4) timer(5) retrnsmt(6)
            // uid(7) timeout(8) inode(9)
            let local = fields.get(1)?;
            let (_, port_hex) = local.rsplit_once(':')?;
            let local_port = u16::from_str_radix(port_hex, 16).ok()?;
            let state = u8::from_str_radix(fields.get(3)?, 16).ok()?;
            let inode = fields.get(9)?.parse().ok()?;
            Some(SocketEntry {
                local_port,
                state,
                inode,
            })
        })
        .collect()
}

fn tcp_state(code: u8) -> ConnectionState {
    match code {
        0x01 => ConnectionState::Established,
        0x0A => ConnectionState::Listen,
        _ => ConnectionState::Other,
    }
}

/// Maps socket inodes to the pid holding them open by walking
/// `/proc/<pid>/fd`. Processes we may not inspect are skipped.
fn socket_owners() -> Result<HashMap<u64, u32>, ProbeError> {
    let mut owners = HashMap::new();
    for entry in fs::read_dir("/proc")?.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            if let Ok(target) = fs::read_link(fd.path())
                && let Some(inode) = socket_inode(&target.to_string_lossy())
            {
                owners.entry(inode).or_insert(pid);
            }
        }
    }
    Ok(owners)
}

fn socket_inode(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}
