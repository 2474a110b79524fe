use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, Users};

use super::platform;
use super::process::{Connection, RawProcess};
use crate::error::ProbeError;

const MIB: u64 = 1024 * 1024;

/// Host-wide memory usage.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MemoryReading {
    pub percent: f64,
    pub used_mb: u64,
    pub total_mb: u64,
}

/// Everything the engine reads from the operating system.
///
/// Calls may block on syscalls; async callers go through the blocking pool.
pub trait SystemProbe: Send + Sync + 'static {
    /// Host CPU utilisation since the previous call.
    fn cpu_percent(&self) -> Result<f64, ProbeError>;

    fn memory(&self) -> Result<MemoryReading, ProbeError>;

    /// Re-reads the process table and returns the live pids.
    fn refresh_processes(&self) -> Result<Vec<u32>, ProbeError>;

    /// Best-effort read of one process as of the last refresh.
    fn inspect(&self, pid: u32) -> RawProcess;

    fn connections(&self) -> Result<Vec<Connection>, ProbeError>;
}

/// Production probe backed by `sysinfo`.
pub struct SysinfoProbe {
    sys: RwLock<System>,
    users: RwLock<Users>,
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_usage();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );
        SysinfoProbe {
            sys: RwLock::new(sys),
            users: RwLock::new(Users::new_with_refreshed_list()),
        }
    }
}

impl SystemProbe for SysinfoProbe {
    fn cpu_percent(&self) -> Result<f64, ProbeError> {
        let mut sys = write(&self.sys);
        sys.refresh_cpu_usage();
        Ok(f64::from(sys.global_cpu_usage()))
    }

    fn memory(&self) -> Result<MemoryReading, ProbeError> {
        let mut sys = write(&self.sys);
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return Err(ProbeError::Unavailable(
                "total memory reported as zero".to_string(),
            ));
        }
        let used = sys.used_memory();
        Ok(MemoryReading {
            percent: used as f64 / total as f64 * 100.0,
            used_mb: used / MIB,
            total_mb: total / MIB,
        })
    }

    fn refresh_processes(&self) -> Result<Vec<u32>, ProbeError> {
        let pids = {
            let mut sys = write(&self.sys);
            sys.refresh_memory();
            sys.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::everything(),
            );
            sys.processes().keys().map(|pid| pid.as_u32()).collect()
        };
        *write(&self.users) = Users::new_with_refreshed_list();
        Ok(pids)
    }

    fn inspect(&self, pid: u32) -> RawProcess {
        let sys = read(&self.sys);
        let Some(process) = sys.process(Pid::from_u32(pid)) else {
            return RawProcess::new(pid);
        };

        let name = process.name().to_string_lossy().into_owned();
        let cmdline = process
            .cmd()
            .iter()
            .map(|s| s.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        let username = process.user_id().and_then(|uid| {
            read(&self.users)
                .get_user_by_id(uid)
                .map(|user| user.name().to_string())
        });
        let total_memory = sys.total_memory();

        RawProcess {
            pid,
            name: (!name.is_empty()).then_some(name),
            exe: process.exe().map(|path| path.display().to_string()),
            cmdline: (!cmdline.is_empty()).then_some(cmdline),
            username,
            status: Some(process.status().to_string()),
            create_time: Some(process.start_time().saturating_mul(1000)),
            parent_pid: process.parent().map(|p| p.as_u32()),
            cpu_percent: Some(f64::from(process.cpu_usage())),
            memory_percent: (total_memory > 0)
                .then(|| process.memory() as f64 / total_memory as f64 * 100.0),
            memory_rss: Some(process.memory()),
        }
    }

    fn connections(&self) -> Result<Vec<Connection>, ProbeError> {
        platform::connections()
    }
}

/// Probe that replays readings set by the caller. Used for dry runs,
/// benches and tests.
#[derive(Default)]
pub struct StaticProbe {
    state: Mutex<StaticState>,
}

#[derive(Default)]
struct StaticState {
    cpu: f64,
    memory: MemoryReading,
    processes: Vec<RawProcess>,
    /// The process table as of the last `refresh_processes`.
    listed: Vec<RawProcess>,
    connections: Vec<Connection>,
    unavailable: bool,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_processes(processes: Vec<RawProcess>) -> Self {
        let probe = Self::new();
        probe.set_processes(processes);
        probe
    }

    pub fn set_cpu(&self, percent: f64) {
        lock(&self.state).cpu = percent;
    }

    pub fn set_memory(&self, percent: f64, used_mb: u64, total_mb: u64) {
        lock(&self.state).memory = MemoryReading {
            percent,
            used_mb,
            total_mb,
        };
    }

    pub fn set_processes(&self, processes: Vec<RawProcess>) {
        lock(&self.state).processes = processes;
    }

    pub fn set_connections(&self, connections: Vec<Connection>) {
        lock(&self.state).connections = connections;
    }

    /// Makes every host-level read fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.state).unavailable = unavailable;
    }

    fn check(&self, state: &StaticState) -> Result<(), ProbeError> {
        if state.unavailable {
            return Err(ProbeError::Unavailable("static probe offline".to_string()));
        }
        Ok(())
    }
}

impl SystemProbe for StaticProbe {
    fn cpu_percent(&self) -> Result<f64, ProbeError> {
        let state = lock(&self.state);
        self.check(&state)?;
        Ok(state.cpu)
    }

    fn memory(&self) -> Result<MemoryReading, ProbeError> {
        let state = lock(&self.state);
        self.check(&state)?;
        Ok(state.memory)
    }

    fn refresh_processes(&self) -> Result<Vec<u32>, ProbeError> {
        let mut state = lock(&self.state);
        self.check(&state)?;
        state.listed = state.processes.clone();
        Ok(state.listed.iter().map(|p| p.pid).collect())
    }

    fn inspect(&self, pid: u32) -> RawProcess {
        lock(&self.state)
            .listed
            .iter()
            .find(|p| p.pid == pid)
            .cloned()
            .unwrap_or_else(|| RawProcess::new(pid))
    }

    fn connections(&self) -> Result<Vec<Connection>, ProbeError> {
        let state = lock(&self.state);
        self.check(&state)?;
        Ok(state.connections.clone())
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysinfo_probe_sees_current_process() {
        let probe = SysinfoProbe::new();
        let pids = probe.refresh_processes().unwrap();
        let me = std::process::id();
        assert!(pids.contains(&me));

        let raw = probe.inspect(me);
        assert_eq!(raw.pid, me);
        assert!(raw.name.is_some());
        assert!(raw.memory_rss.is_some());
    }

    #[test]
    fn sysinfo_probe_reports_memory() {
        let probe = SysinfoProbe::new();
        let reading = probe.memory().unwrap();
        assert!(reading.total_mb > 0);
        assert!((0.0..=100.0).contains(&reading.percent));
    }

    #[test]
    fn vanished_pid_yields_empty_reading() {
        let probe = SysinfoProbe::new();
        probe.refresh_processes().unwrap();
        assert_eq!(probe.inspect(u32::MAX), RawProcess::new(u32::MAX));
    }

    #[test]
    fn static_probe_replays_and_fails_on_demand() {
        let probe = StaticProbe::new();
        probe.set_cpu(12.5);
        probe.set_memory(40.0, 400, 1000);
        assert_eq!(probe.cpu_percent().unwrap(), 12.5);
        assert_eq!(probe.memory().unwrap().used_mb, 400);

        probe.set_processes(vec![RawProcess {
            name: Some("late".into()),
            ..RawProcess::new(9)
        }]);
        assert_eq!(probe.inspect(9).name, None);
        assert_eq!(probe.refresh_processes().unwrap(), vec![9]);
        assert_eq!(probe.inspect(9).name.as_deref(), Some("late"));

        probe.set_unavailable(true);
        assert!(probe.cpu_percent().is_err());
        assert!(probe.memory().is_err());
        assert!(probe.refresh_processes().is_err());
    }
}
