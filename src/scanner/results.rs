use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Result, SweepError};
use crate::network::{CidrRange, HostIter};
use crate::scanner::progress::ProgressTracker;

/// One (host, port) pair to probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Target {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Lazy host x port product, host-major, so the scheduler can pull one
/// target at a time however large the range is.
#[derive(Debug, Clone)]
pub struct TargetIter {
    hosts: HostIter,
    current: Option<Ipv4Addr>,
    ports: Arc<[u16]>,
    index: usize,
}

impl TargetIter {
    pub fn new(range: &CidrRange, ports: Arc<[u16]>) -> Self {
        let mut hosts = range.hosts();
        let current = if ports.is_empty() { None } else { hosts.next() };
        Self {
            hosts,
            current,
            ports,
            index: 0,
        }
    }
}

impl Iterator for TargetIter {
    type Item = Target;

    fn next(&mut self) -> Option<Target> {
        let ip = self.current?;
        let target = Target::new(ip, self.ports[self.index]);

        self.index += 1;
        if self.index == self.ports.len() {
            self.index = 0;
            self.current = self.hosts.next();
        }

        Some(target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortStatus {
    Open,
    Closed,
    Filtered,
    Error,
}

impl std::fmt::Display for PortStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortStatus::Open => write!(f, "open"),
            PortStatus::Closed => write!(f, "closed"),
            PortStatus::Filtered => write!(f, "filtered"),
            PortStatus::Error => write!(f, "error"),
        }
    }
}

/// Why a probe did not produce a clean open/closed answer. Always kept on
/// the per-target result, never returned as a failure of the sweep.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProbeError {
    #[error("no response within {0}ms")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("abandoned after the grace period")]
    Abandoned,

    #[error("probe panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub status: PortStatus,
    pub error: Option<ProbeError>,
    pub timestamp: DateTime<Utc>,
    /// Milliseconds until the connect attempt resolved.
    pub response_time: Option<f64>,
}

impl ProbeResult {
    pub fn open(elapsed: Duration) -> Self {
        Self::answered(PortStatus::Open, elapsed)
    }

    pub fn closed(elapsed: Duration) -> Self {
        Self::answered(PortStatus::Closed, elapsed)
    }

    pub fn filtered(after: Duration) -> Self {
        Self {
            status: PortStatus::Filtered,
            error: Some(ProbeError::Timeout(after.as_millis() as u64)),
            timestamp: Utc::now(),
            response_time: None,
        }
    }

    pub fn error(error: ProbeError) -> Self {
        Self {
            status: PortStatus::Error,
            error: Some(error),
            timestamp: Utc::now(),
            response_time: None,
        }
    }

    fn answered(status: PortStatus, elapsed: Duration) -> Self {
        Self {
            status,
            error: None,
            timestamp: Utc::now(),
            response_time: Some(elapsed.as_secs_f64() * 1000.0),
        }
    }

    /// The host sent something back, either a handshake or a reset.
    pub fn host_responded(&self) -> bool {
        matches!(self.status, PortStatus::Open | PortStatus::Closed)
    }
}

pub type HostPorts = BTreeMap<u16, ProbeResult>;

/// Mutable state of one sweep. Owned by the scheduler while it runs and
/// written through [`ScanSession::record`] only.
#[derive(Debug)]
pub struct ScanSession {
    range: CidrRange,
    ports: Arc<[u16]>,
    hosts: BTreeMap<Ipv4Addr, HostPorts>,
    progress: Arc<ProgressTracker>,
    started_at: DateTime<Utc>,
}

impl ScanSession {
    pub fn new(range: CidrRange, ports: Vec<u16>) -> Result<Self> {
        if ports.is_empty() {
            return Err(SweepError::InvalidPort("empty port list".to_string()));
        }
        if let Some(bad) = ports.iter().find(|p| **p == 0) {
            return Err(SweepError::InvalidPort(bad.to_string()));
        }

        let mut ports = ports;
        ports.sort_unstable();
        ports.dedup();

        let total = range.host_count().saturating_mul(ports.len() as u64);

        Ok(Self {
            range,
            ports: ports.into(),
            hosts: BTreeMap::new(),
            progress: Arc::new(ProgressTracker::new(total)),
            started_at: Utc::now(),
        })
    }

    pub fn range(&self) -> &CidrRange {
        &self.range
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn targets(&self) -> TargetIter {
        TargetIter::new(&self.range, Arc::clone(&self.ports))
    }

    /// Shared handle for observers; reading it never blocks the scheduler.
    pub fn progress(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }

    pub fn total(&self) -> u64 {
        self.progress.total()
    }

    pub fn completed(&self) -> u64 {
        self.progress.snapshot().completed
    }

    /// Stores the outcome for `target` and returns the new completed count.
    /// A target already recorded keeps its first result.
    pub(crate) fn record(&mut self, target: Target, result: ProbeResult) -> u64 {
        let ports = self.hosts.entry(target.ip).or_default();
        if ports.contains_key(&target.port) {
            tracing::warn!(%target, "duplicate probe result ignored");
            return self.completed();
        }
        ports.insert(target.port, result);
        self.progress.advance()
    }

    pub fn freeze(self, cancelled: bool) -> ScanReport {
        let snapshot = self.progress.snapshot();
        ScanReport {
            target: self.range,
            ports: self.ports.to_vec(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            total: snapshot.total,
            completed: snapshot.completed,
            cancelled,
            hosts: self.hosts,
        }
    }
}

/// A finished sweep. Hosts and ports are kept in ascending order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub target: CidrRange,
    pub ports: Vec<u16>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: u64,
    pub completed: u64,
    pub cancelled: bool,
    pub hosts: BTreeMap<Ipv4Addr, HostPorts>,
}

impl ScanReport {
    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    pub fn is_up(ports: &HostPorts) -> bool {
        ports.values().any(ProbeResult::host_responded)
    }

    pub fn hosts_up(&self) -> usize {
        self.hosts.values().filter(|ports| Self::is_up(ports)).count()
    }

    pub fn open_ports(&self) -> usize {
        self.hosts
            .values()
            .flat_map(|ports| ports.values())
            .filter(|r| r.status == PortStatus::Open)
            .count()
    }

    pub fn count_status(ports: &HostPorts, status: PortStatus) -> usize {
        ports.values().filter(|r| r.status == status).count()
    }
}
