//! NUMA topology detection and thread pinning
//!
//! On Linux the topology is read from `/sys/devices/system/node/`
//! (cpulist, meminfo, distance). Everywhere else, and on machines
//! without the sysfs tree, a single synthetic node covering every CPU
//! is used so callers never need a special case.

/// One NUMA node: its CPUs and local memory
#[derive(Debug, Clone)]
pub struct NumaNode {
    pub node_id: usize,
    pub cpu_ids: Vec<usize>,
    pub memory_bytes: u64,
}

/// Detected topology, immutable after construction
#[derive(Debug, Clone)]
pub struct NumaTopology {
    nodes: Vec<NumaNode>,
    /// distances[i][j] per the kernel's SLIT table; 10 = local
    distances: Vec<Vec<u32>>,
    /// cpu id -> node id; usize::MAX for unknown CPUs
    cpu_to_node: Vec<usize>,
    total_cpus: usize,
}

impl NumaTopology {
    /// Detect the host topology, falling back to a single node
    pub fn detect() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(target_os = "linux")] {
                Self::detect_linux().unwrap_or_else(Self::fallback)
            } else {
                Self::fallback()
            }
        }
    }

    /// Single synthetic node covering every available CPU
    pub fn fallback() -> Self {
        let total_cpus = num_cpus::get();
        Self {
            nodes: vec![NumaNode {
                node_id: 0,
                cpu_ids: (0..total_cpus).collect(),
                memory_bytes: 0,
            }],
            distances: vec![vec![10]],
            cpu_to_node: vec![0; total_cpus],
            total_cpus,
        }
    }

    #[cfg(target_os = "linux")]
    fn detect_linux() -> Option<Self> {
        let base = std::path::Path::new("/sys/devices/system/node");
        let entries = std::fs::read_dir(base).ok()?;

        let mut node_ids: Vec<usize> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.file_name()
                    .to_str()?
                    .strip_prefix("node")?
                    .parse::<usize>()
                    .ok()
            })
            .collect();
        if node_ids.is_empty() {
            return None;
        }
        node_ids.sort_unstable();

        let mut nodes = Vec::with_capacity(node_ids.len());
        let mut distances = Vec::with_capacity(node_ids.len());
        for &id in &node_ids {
            let dir = base.join(format!("node{}", id));
            let cpu_ids = std::fs::read_to_string(dir.join("cpulist"))
                .ok()
                .map(|s| parse_cpulist(s.trim()))
                .unwrap_or_default();
            let memory_bytes = std::fs::read_to_string(dir.join("meminfo"))
                .ok()
                .and_then(|s| parse_meminfo_total(&s))
                .unwrap_or(0);
            let row = std::fs::read_to_string(dir.join("distance"))
                .ok()
                .map(|s| {
                    s.split_whitespace()
                        .filter_map(|t| t.parse().ok())
                        .collect::<Vec<u32>>()
                })
                .unwrap_or_default();

            nodes.push(NumaNode {
                node_id: id,
                cpu_ids,
                memory_bytes,
            });
            distances.push(row);
        }

        // Normalize ragged or missing distance rows.
        let n = nodes.len();
        for (i, row) in distances.iter_mut().enumerate() {
            if row.len() != n {
                *row = (0..n).map(|j| if i == j { 10 } else { 20 }).collect();
            }
        }

        let total_cpus = num_cpus::get();
        let mut cpu_to_node = vec![usize::MAX; total_cpus];
        for (idx, node) in nodes.iter().enumerate() {
            for &cpu in &node.cpu_ids {
                if cpu < total_cpus {
                    cpu_to_node[cpu] = idx;
                }
            }
        }

        Some(Self {
            nodes,
            distances,
            cpu_to_node,
            total_cpus,
        })
    }

    /// Node index serving `cpu_id`, if known
    pub fn node_for_cpu(&self, cpu_id: usize) -> Option<usize> {
        match self.cpu_to_node.get(cpu_id) {
            Some(&n) if n != usize::MAX => Some(n),
            _ => None,
        }
    }

    /// SLIT distance between two node indices; 10 means local
    pub fn distance(&self, a: usize, b: usize) -> Option<u32> {
        self.distances.get(a)?.get(b).copied()
    }

    pub fn is_same_node(&self, cpu_a: usize, cpu_b: usize) -> bool {
        match (self.node_for_cpu(cpu_a), self.node_for_cpu(cpu_b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// More than one node detected
    pub fn is_numa_available(&self) -> bool {
        self.nodes.len() > 1
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn cpu_count(&self) -> usize {
        self.total_cpus
    }

    pub fn nodes(&self) -> &[NumaNode] {
        &self.nodes
    }

    pub fn cpus_for_node(&self, node_idx: usize) -> &[usize] {
        self.nodes
            .get(node_idx)
            .map(|n| n.cpu_ids.as_slice())
            .unwrap_or(&[])
    }

    /// Node a new worker should land on, round-robin by worker index
    pub fn node_for_worker(&self, worker_idx: usize) -> usize {
        worker_idx % self.nodes.len().max(1)
    }
}

/// Parse a kernel cpulist like "0-3,8,10-11"
fn parse_cpulist(list: &str) -> Vec<usize> {
    let mut cpus = Vec::new();
    for part in list.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('-') {
            Some((lo, hi)) => {
                if let (Ok(lo), Ok(hi)) = (lo.parse::<usize>(), hi.parse::<usize>()) {
                    cpus.extend(lo..=hi);
                }
            }
            None => {
                if let Ok(cpu) = part.parse() {
                    cpus.push(cpu);
                }
            }
        }
    }
    cpus
}

/// Pull "MemTotal: <kB>" out of a node meminfo file
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_meminfo_total(meminfo: &str) -> Option<u64> {
    for line in meminfo.lines() {
        if let Some(pos) = line.find("MemTotal:") {
            let rest = &line[pos + "MemTotal:".len()..];
            let kb: u64 = rest
                .split_whitespace()
                .next()
                .and_then(|t| t.parse().ok())?;
            return Some(kb * 1024);
        }
    }
    None
}

/// CPU the calling thread last ran on; `None` when unsupported
pub fn current_cpu() -> Option<usize> {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            let cpu = unsafe { libc::sched_getcpu() };
            if cpu >= 0 {
                Some(cpu as usize)
            } else {
                None
            }
        } else {
            None
        }
    }
}

/// Pin the calling thread to the given CPUs; false when unsupported
pub fn pin_current_thread(cpus: &[usize]) -> bool {
    if cpus.is_empty() {
        return false;
    }
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            use nix::sched::{sched_setaffinity, CpuSet};
            use nix::unistd::Pid;

            let mut set = CpuSet::new();
            for &cpu in cpus {
                if set.set(cpu).is_err() {
                    return false;
                }
            }
            match sched_setaffinity(Pid::from_raw(0), &set) {
                Ok(()) => true,
                Err(e) => {
                    log::debug!("sched_setaffinity failed: {}", e);
                    false
                }
            }
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpulist() {
        assert_eq!(parse_cpulist("0-3"), vec![0, 1, 2, 3]);
        assert_eq!(parse_cpulist("0-1,4,6-7"), vec![0, 1, 4, 6, 7]);
        assert_eq!(parse_cpulist("2"), vec![2]);
        assert!(parse_cpulist("").is_empty());
    }

    #[test]
    fn test_parse_meminfo_total() {
        let meminfo = "Node 0 MemTotal:       16384000 kB\nNode 0 MemFree: 100 kB\n";
        assert_eq!(parse_meminfo_total(meminfo), Some(16384000 * 1024));
        assert_eq!(parse_meminfo_total("nothing here"), None);
    }

    #[test]
    fn test_fallback_topology() {
        let topo = NumaTopology::fallback();
        assert_eq!(topo.node_count(), 1);
        assert!(!topo.is_numa_available());
        assert_eq!(topo.distance(0, 0), Some(10));
        assert_eq!(topo.node_for_cpu(0), Some(0));
        assert!(topo.cpu_count() >= 1);
    }

    #[test]
    fn test_detect_never_panics_and_covers_cpus() {
        let topo = NumaTopology::detect();
        assert!(topo.node_count() >= 1);
        // Every node's CPUs map back to that node.
        for (idx, node) in topo.nodes().iter().enumerate() {
            for &cpu in &node.cpu_ids {
                if cpu < topo.cpu_count() {
                    assert_eq!(topo.node_for_cpu(cpu), Some(idx));
                }
            }
        }
        // Self-distance is local on every node.
        for i in 0..topo.node_count() {
            assert_eq!(topo.distance(i, i), Some(10));
        }
    }

    #[test]
    fn test_current_cpu_in_range() {
        if let Some(cpu) = current_cpu() {
            assert!(cpu < num_cpus::get());
        }
    }

    #[test]
    fn test_pinning_round_trip() {
        // Pin to one CPU of the detected topology and verify we landed
        // on it; skip silently where pinning is unsupported.
        let topo = NumaTopology::detect();
        let cpus = topo.cpus_for_node(0);
        if cpus.is_empty() {
            return;
        }
        let target = cpus[0];
        if pin_current_thread(&[target]) {
            std::thread::yield_now();
            assert_eq!(current_cpu(), Some(target));
        }
    }

    #[test]
    fn test_worker_round_robin_spread() {
        let topo = NumaTopology::fallback();
        assert_eq!(topo.node_for_worker(0), 0);
        assert_eq!(topo.node_for_worker(5), 0);
    }
}
