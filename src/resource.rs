//! Process tree resource accounting
//!
//! Reads `/proc/<pid>/stat` and `/proc/<pid>/statm` for every process, links
//! them into a parent/child tree and aggregates CPU time and memory over the
//! monitored process and all of its descendants.
//!
//! CPU usage is the growth of cumulative jiffies (user + system, including
//! reaped children) between two samples, divided by the elapsed wall time.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

/// Kernel clock ticks per second
static CLOCK_TICKS: Lazy<f64> = Lazy::new(|| {
    // SAFETY: sysconf has no preconditions
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 { ticks as f64 } else { 100.0 }
});

static PAGE_SIZE: Lazy<u64> = Lazy::new(|| {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as u64 } else { 4096 }
});

const SIZE_UNITS: [&str; 7] = ["", "KB", "MB", "GB", "TB", "PB", "EB"];

pub fn clock_ticks() -> f64 {
    *CLOCK_TICKS
}

pub fn page_size() -> u64 {
    *PAGE_SIZE
}

/// Render a byte count with a binary unit, dividing while above 10000
pub fn human_size(bytes: u64) -> String {
    let mut size = bytes;
    let mut unit = 0;
    while size > 10000 && unit < SIZE_UNITS.len() - 1 {
        size /= 1024;
        unit += 1;
    }
    format!("{}{}", size, SIZE_UNITS[unit])
}

/// Accounting for one process, or a sum over several
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    /// utime + stime + cutime + cstime
    pub jiffies: u64,
    pub rss_pages: u64,
    pub text_pages: u64,
    pub data_pages: u64,
}

impl std::ops::Add for Usage {
    type Output = Usage;

    fn add(self, other: Usage) -> Usage {
        Usage {
            jiffies: self.jiffies + other.jiffies,
            rss_pages: self.rss_pages + other.rss_pages,
            text_pages: self.text_pages + other.text_pages,
            data_pages: self.data_pages + other.data_pages,
        }
    }
}

/// Parent pid and cumulative jiffies from the contents of `/proc/<pid>/stat`
pub fn parse_stat(pid: i32, stat: &str) -> Result<(i32, u64)> {
    let malformed = |reason: &str| Error::ProcStat {
        pid,
        file: "stat",
        reason: reason.to_string(),
    };
    // The command name may contain spaces and parentheses
    let close = stat.rfind(')').ok_or_else(|| malformed("missing command name"))?;
    let fields: Vec<&str> = stat[close + 1..].split_whitespace().collect();
    if fields.len() < 15 {
        return Err(malformed("too few fields"));
    }
    let ppid = fields[1]
        .parse::<i32>()
        .map_err(|_| malformed("bad ppid"))?;
    let mut jiffies = 0u64;
    for field in &fields[11..=14] {
        // cutime and cstime are signed in the kernel
        let value = field
            .parse::<i64>()
            .map_err(|_| malformed("bad cpu time"))?;
        jiffies += value.max(0) as u64;
    }
    Ok((ppid, jiffies))
}

/// Resident, text and data pages from the contents of `/proc/<pid>/statm`
pub fn parse_statm(pid: i32, statm: &str) -> Result<(u64, u64, u64)> {
    let fields: Vec<u64> = statm
        .split_whitespace()
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e: std::num::ParseIntError| Error::ProcStat {
            pid,
            file: "statm",
            reason: e.to_string(),
        })?;
    if fields.len() < 6 {
        return Err(Error::ProcStat {
            pid,
            file: "statm",
            reason: "too few fields".to_string(),
        });
    }
    Ok((fields[1], fields[3], fields[5]))
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    ppid: i32,
    usage: Usage,
}

/// Snapshot of every process visible in `/proc`
#[derive(Debug, Clone)]
pub struct ProcessTable {
    taken_at: Instant,
    entries: HashMap<i32, Entry>,
}

impl ProcessTable {
    pub fn snapshot() -> Result<Self> {
        Self::snapshot_at(Path::new("/proc"))
    }

    /// Read a procfs-shaped directory tree
    pub fn snapshot_at(root: &Path) -> Result<Self> {
        let taken_at = Instant::now();
        let mut entries = HashMap::new();
        for dirent in fs::read_dir(root)? {
            let dirent = dirent?;
            let Some(pid) = dirent.file_name().to_str().and_then(|n| n.parse::<i32>().ok())
            else {
                continue;
            };
            match read_entry(&dirent.path(), pid) {
                Ok(entry) => {
                    entries.insert(pid, entry);
                }
                // Exited between listing and reading
                Err(Error::Io(e)) if vanished(&e) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Self { taken_at, entries })
    }

    /// Build a table from `(pid, ppid, usage)` rows
    pub fn from_entries(
        taken_at: Instant,
        rows: impl IntoIterator<Item = (i32, i32, Usage)>,
    ) -> Self {
        let entries = rows
            .into_iter()
            .map(|(pid, ppid, usage)| (pid, Entry { ppid, usage }))
            .collect();
        Self { taken_at, entries }
    }

    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, pid: i32) -> bool {
        self.entries.contains_key(&pid)
    }

    pub fn usage(&self, pid: i32) -> Option<Usage> {
        self.entries.get(&pid).map(|e| e.usage)
    }

    /// Subtree rooted at `root`, or `None` if it is not in the table
    pub fn tree(&self, root: i32) -> Option<ProcessTree> {
        let root_entry = self.entries.get(&root)?;
        let mut children: HashMap<i32, Vec<i32>> = HashMap::new();
        for (&pid, entry) in &self.entries {
            if pid != entry.ppid {
                children.entry(entry.ppid).or_default().push(pid);
            }
        }
        let mut visited = HashSet::new();
        Some(self.build(root, root_entry.usage, &children, &mut visited))
    }

    fn build(
        &self,
        pid: i32,
        usage: Usage,
        children: &HashMap<i32, Vec<i32>>,
        visited: &mut HashSet<i32>,
    ) -> ProcessTree {
        visited.insert(pid);
        let mut node = ProcessTree {
            pid,
            usage,
            children: Vec::new(),
        };
        for &child in children.get(&pid).map(Vec::as_slice).unwrap_or_default() {
            if visited.contains(&child) {
                continue;
            }
            if let Some(entry) = self.entries.get(&child) {
                node.children
                    .push(self.build(child, entry.usage, children, visited));
            }
        }
        node
    }
}

fn read_entry(dir: &Path, pid: i32) -> Result<Entry> {
    let (ppid, jiffies) = parse_stat(pid, &fs::read_to_string(dir.join("stat"))?)?;
    let (rss_pages, text_pages, data_pages) =
        parse_statm(pid, &fs::read_to_string(dir.join("statm"))?)?;
    Ok(Entry {
        ppid,
        usage: Usage {
            jiffies,
            rss_pages,
            text_pages,
            data_pages,
        },
    })
}

fn vanished(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(libc::ESRCH)
}

/// A process and its descendants at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessTree {
    pub pid: i32,
    pub usage: Usage,
    pub children: Vec<ProcessTree>,
}

impl ProcessTree {
    /// Sum of usage over the whole subtree
    pub fn total(&self) -> Usage {
        self.children
            .iter()
            .fold(self.usage, |acc, child| acc + child.total())
    }

    /// Every pid in the subtree, root first
    pub fn pids(&self) -> Vec<i32> {
        let mut pids = vec![self.pid];
        for child in &self.children {
            pids.extend(child.pids());
        }
        pids
    }

    fn visit(&self, f: &mut impl FnMut(&ProcessTree)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }
}

struct Sample {
    table: ProcessTable,
    tree: ProcessTree,
}

/// Monitor for a process tree across successive samples
pub struct Process {
    pid: i32,
    previous: Option<Sample>,
    current: Sample,
}

impl Process {
    /// Take the first sample of `pid`
    pub fn find(pid: i32) -> Result<Self> {
        Self::with_table(pid, ProcessTable::snapshot()?)
    }

    pub fn with_table(pid: i32, table: ProcessTable) -> Result<Self> {
        let tree = table.tree(pid).ok_or(Error::ProcessNotFound(pid))?;
        Ok(Self {
            pid,
            previous: None,
            current: Sample { table, tree },
        })
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Take a new sample; the one before it becomes the CPU baseline
    pub fn update(&mut self) -> Result<()> {
        self.update_with(ProcessTable::snapshot()?)
    }

    pub fn update_with(&mut self, table: ProcessTable) -> Result<()> {
        let tree = table.tree(self.pid).ok_or(Error::ProcessGone(self.pid))?;
        debug!(pid = self.pid, processes = tree.pids().len(), "Sampled process tree");
        let previous = std::mem::replace(&mut self.current, Sample { table, tree });
        self.previous = Some(previous);
        Ok(())
    }

    pub fn tree(&self) -> &ProcessTree {
        &self.current.tree
    }

    /// CPU usage of the tree between the last two samples, in percent of one
    /// core. Zero until two samples exist.
    pub fn cpu_percent(&self) -> f64 {
        let Some(previous) = &self.previous else {
            return 0.0;
        };
        let elapsed = self
            .current
            .table
            .taken_at
            .saturating_duration_since(previous.table.taken_at)
            .as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }

        let mut delta: i64 = 0;
        self.current.tree.visit(&mut |node: &ProcessTree| {
            let before = previous.table.usage(node.pid).map_or(0, |u| u.jiffies);
            delta += node.usage.jiffies as i64 - before as i64;
        });
        delta.max(0) as f64 / clock_ticks() / elapsed * 100.0
    }

    /// Resident memory of the tree in bytes
    pub fn memory(&self) -> u64 {
        self.current.tree.total().rss_pages * page_size()
    }

    pub fn code_memory(&self) -> u64 {
        self.current.tree.total().text_pages * page_size()
    }

    pub fn data_memory(&self) -> u64 {
        self.current.tree.total().data_pages * page_size()
    }

    pub fn memory_human(&self) -> String {
        human_size(self.memory())
    }

    pub fn code_memory_human(&self) -> String {
        human_size(self.code_memory())
    }

    pub fn data_memory_human(&self) -> String {
        human_size(self.data_memory())
    }
}
