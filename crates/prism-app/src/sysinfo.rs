// SPDX-License-Identifier: CEPL-1.0
//! CPU and RAM sampling from procfs. Hosts without `/proc` simply report nothing.

use std::collections::VecDeque;
use std::fs;

pub const HISTORY_LEN: usize = 100;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemInfo {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }

    pub fn used_percent(&self) -> f32 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.used_bytes() as f64 / self.total_bytes as f64 * 100.0) as f32
    }
}

pub fn gib(bytes: u64) -> f64 {
    bytes as f64 / GIB
}

/// `MemTotal` and `MemAvailable` out of a `/proc/meminfo` dump (values in kB).
pub fn parse_meminfo(text: &str) -> Option<MemInfo> {
    let mut total = None;
    let mut available = None;
    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let kb = || rest.split_whitespace().next()?.parse::<u64>().ok();
        match key.trim() {
            "MemTotal" => total = kb(),
            "MemAvailable" => available = kb(),
            _ => {}
        }
    }
    Some(MemInfo {
        total_bytes: total? * 1024,
        available_bytes: available? * 1024,
    })
}

/// Aggregate jiffy counters from the `cpu` line of `/proc/stat`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

pub fn parse_stat(text: &str) -> Option<CpuTimes> {
    let line = text.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|f| f.parse().ok())
        .collect::<Option<_>>()?;
    if fields.len() < 4 {
        return None;
    }
    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        idle,
        total: fields.iter().sum(),
    })
}

/// Busy share between two readings, in percent. `None` when no time passed.
pub fn cpu_percent(prev: CpuTimes, now: CpuTimes) -> Option<f32> {
    let total = now.total.checked_sub(prev.total)?;
    let idle = now.idle.checked_sub(prev.idle)?;
    if total == 0 {
        return None;
    }
    Some(((total - idle.min(total)) as f64 / total as f64 * 100.0) as f32)
}

#[derive(Clone, Debug)]
pub struct History {
    samples: VecDeque<f32>,
}

impl History {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(HISTORY_LEN),
        }
    }

    pub fn push(&mut self, value: f32) {
        if self.samples.len() == HISTORY_LEN {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn latest(&self) -> Option<f32> {
        self.samples.back().copied()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SystemSampler {
    last_cpu: Option<CpuTimes>,
    pub memory: Option<MemInfo>,
    pub cpu_history: History,
    pub ram_history: History,
}

impl SystemSampler {
    pub fn new() -> Self {
        Self {
            last_cpu: None,
            memory: None,
            cpu_history: History::new(),
            ram_history: History::new(),
        }
    }

    /// Reads procfs once and appends one point to each history that has data.
    pub fn sample(&mut self) {
        let stat = fs::read_to_string("/proc/stat").ok();
        let meminfo = fs::read_to_string("/proc/meminfo").ok();
        self.record(stat.as_deref(), meminfo.as_deref());
    }

    fn record(&mut self, stat: Option<&str>, meminfo: Option<&str>) {
        if let Some(now) = stat.and_then(parse_stat) {
            if let Some(pct) = self.last_cpu.and_then(|prev| cpu_percent(prev, now)) {
                self.cpu_history.push(pct);
            }
            self.last_cpu = Some(now);
        }
        self.memory = meminfo.and_then(parse_meminfo);
        if let Some(mem) = self.memory {
            self.ram_history.push(mem.used_percent());
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16384000 kB\n\
                           MemFree:         1000000 kB\n\
                           MemAvailable:    4096000 kB\n\
                           Buffers:          200000 kB\n";

    #[test]
    fn meminfo_used_is_total_minus_available() {
        let m = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(m.total_bytes, 16_384_000 * 1024);
        assert_eq!(m.used_bytes(), (16_384_000 - 4_096_000) * 1024);
        assert!((m.used_percent() - 75.0).abs() < 1e-3);
    }

    #[test]
    fn meminfo_without_available_is_none() {
        assert_eq!(parse_meminfo("MemTotal: 100 kB\n"), None);
    }

    #[test]
    fn stat_delta_gives_busy_percent() {
        let a = parse_stat("cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 1 2 3 4\n").unwrap();
        let b = parse_stat("cpu  200 0 200 850 150 0 0 0 0 0\n").unwrap();
        assert_eq!(a, CpuTimes { idle: 800, total: 1000 });
        // 400 jiffies passed, 200 of them idle
        assert_eq!(cpu_percent(a, b), Some(50.0));
        assert_eq!(cpu_percent(b, b), None);
    }

    #[test]
    fn stat_rejects_garbage() {
        assert_eq!(parse_stat("intr 1 2 3\n"), None);
        assert_eq!(parse_stat("cpu  1 x 3 4\n"), None);
    }

    #[test]
    fn history_keeps_the_newest_samples() {
        let mut h = History::new();
        for i in 0..(HISTORY_LEN + 5) {
            h.push(i as f32);
        }
        assert_eq!(h.len(), HISTORY_LEN);
        assert_eq!(h.iter().next(), Some(5.0));
        assert_eq!(h.latest(), Some((HISTORY_LEN + 4) as f32));
    }

    #[test]
    fn first_cpu_reading_only_primes_the_sampler() {
        let mut s = SystemSampler::new();
        s.record(Some("cpu  1 0 1 8 0\n"), Some(MEMINFO));
        assert_eq!(s.cpu_history.len(), 0);
        assert_eq!(s.ram_history.len(), 1);
        s.record(Some("cpu  2 0 2 16 0\n"), None);
        assert_eq!(s.cpu_history.len(), 1);
        assert_eq!(s.memory, None);
    }
}
