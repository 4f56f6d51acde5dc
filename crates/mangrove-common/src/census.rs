use std::collections::BTreeMap;

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::trace;

use crate::link::Pid;

/// Linux keeps at most this many bytes of a command name (`TASK_COMM_LEN`
/// minus the NUL).
pub const COMM_LEN: usize = 15;

/// The live process table at one instant: pid to command name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    procs: BTreeMap<Pid, String>,
}

impl Snapshot {
    pub fn name_of(&self, pid: Pid) -> Option<&str> {
        self.procs.get(&pid).map(String::as_str)
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.procs.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    /// Pids present here but gone from `newer`, ascending.
    pub fn vanished_since(&self, newer: &Snapshot) -> Vec<Pid> {
        self.procs
            .keys()
            .copied()
            .filter(|pid| !newer.contains(*pid))
            .collect()
    }

    /// Live pids whose command name is `name`, ascending.
    pub fn pids_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = Pid> + 'a {
        self.procs
            .iter()
            .filter(move |(_, comm)| name_matches(name, comm))
            .map(|(pid, _)| *pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Pid, &str)> {
        self.procs.iter().map(|(pid, name)| (*pid, name.as_str()))
    }
}

impl<S: Into<String>> FromIterator<(Pid, S)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (Pid, S)>>(iter: I) -> Self {
        Self {
            procs: iter
                .into_iter()
                .map(|(pid, name)| (pid, name.into()))
                .collect(),
        }
    }
}

/// Whether a configured name designates a process whose kernel command name
/// is `comm`. Names longer than [`COMM_LEN`] match their truncation.
pub fn name_matches(wanted: &str, comm: &str) -> bool {
    if wanted == comm {
        return true;
    }
    comm.len() == COMM_LEN
        && wanted.len() > COMM_LEN
        && wanted.as_bytes().starts_with(comm.as_bytes())
}

/// Source of process table snapshots.
pub trait ProcessCensus {
    fn capture(&mut self) -> Snapshot;
}

impl<C: ProcessCensus + ?Sized> ProcessCensus for &mut C {
    fn capture(&mut self) -> Snapshot {
        (**self).capture()
    }
}

/// Census backed by `sysinfo`. Threads are left out.
pub struct SysinfoCensus {
    system: System,
}

impl SysinfoCensus {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoCensus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessCensus for SysinfoCensus {
    fn capture(&mut self) -> Snapshot {
        // names only; cpu, memory and the rest are not worth reading
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );
        let snapshot: Snapshot = self
            .system
            .processes()
            .iter()
            .filter(|(_, proc)| proc.thread_kind().is_none())
            .map(|(pid, proc)| {
                (
                    pid.as_u32() as Pid,
                    proc.name().to_string_lossy().into_owned(),
                )
            })
            .collect();
        trace!("census found {} processes", snapshot.len());
        snapshot
    }
}
