//! Upstream server groups.
//!
//! A group collects the WebSocks servers declared under one alias in
//! `proxy.server.list`, carries the worker loop group and health-check
//! configuration handed to the (external) health checker, and picks
//! entries by smooth weighted round-robin. Groups are opaque handles to
//! the policy core: they are created through the [`ServerGroupFactory`]
//! collaborator, and the actual connection establishment, health probing
//! and pooling happen outside this crate.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::transport::{LoopGroup, MuxFdsMap};

/// Health-check probe protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckProtocol {
    Tcp,
    None,
}

/// Health-check parameters attached to every server group.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub initial_delay: Duration,
    pub period: Duration,
    pub up: u32,
    pub down: u32,
    pub protocol: CheckProtocol,
}

impl HealthCheckConfig {
    /// The fixed config every group is created with: first probe after
    /// 5 s, then every 30 s, one success to go up, two failures to go
    /// down.
    pub fn agent_default(no_health_check: bool) -> Self {
        Self {
            initial_delay: Duration::from_millis(5_000),
            period: Duration::from_millis(30_000),
            up: 1,
            down: 2,
            protocol: if no_health_check {
                CheckProtocol::None
            } else {
                CheckProtocol::Tcp
            },
        }
    }
}

/// Upstream selection method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Weighted round-robin (the only method the agent uses).
    Wrr,
}

/// One server declared in `proxy.server.list`.
///
/// Identity is `id`: the original URL line minus its scheme. `host` keeps
/// the host text from the config line — an IP literal or a name — so the
/// health checker can re-resolve named entries.
#[derive(Debug)]
pub struct ServerEntry {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub use_ssl: bool,
    pub use_kcp: bool,
    /// Resolved upstream address. For entries with a helper program this
    /// is `127.0.0.1:<LOCAL_PORT>`.
    pub addr: SocketAddrV4,
    pub weight: u32,
    /// Per-worker-loop KCP mux handles; empty unless `use_kcp`.
    pub kcp_fds: MuxFdsMap,
}

impl ServerEntry {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(self.addr)
    }
}

/// A named group of upstream servers with WRR selection.
pub struct ServerGroup {
    alias: String,
    loop_group: Arc<dyn LoopGroup>,
    health_check: HealthCheckConfig,
    selection: Selection,
    entries: Vec<ServerEntry>,
    wrr: Mutex<Vec<i64>>,
}

impl ServerGroup {
    pub fn new(
        alias: impl Into<String>,
        loop_group: Arc<dyn LoopGroup>,
        health_check: HealthCheckConfig,
        selection: Selection,
    ) -> Self {
        Self {
            alias: alias.into(),
            loop_group,
            health_check,
            selection,
            entries: Vec::new(),
            wrr: Mutex::new(Vec::new()),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Worker loops the health checker schedules its probes on.
    pub fn loop_group(&self) -> &Arc<dyn LoopGroup> {
        &self.loop_group
    }

    pub fn health_check(&self) -> &HealthCheckConfig {
        &self.health_check
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn entries(&self) -> &[ServerEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a server by address. Returns the entry handle so the
    /// caller can attach transport data. Parse-time only; the group is
    /// frozen afterwards.
    pub(crate) fn add(&mut self, id: &str, addr: SocketAddrV4, weight: u32) -> &mut ServerEntry {
        self.add_entry(id, addr.ip().to_string(), addr, weight)
    }

    /// Register a server by hostname with its resolved address.
    pub(crate) fn add_named(
        &mut self,
        id: &str,
        name: &str,
        addr: SocketAddrV4,
        weight: u32,
    ) -> &mut ServerEntry {
        self.add_entry(id, name.to_string(), addr, weight)
    }

    fn add_entry(&mut self, id: &str, host: String, addr: SocketAddrV4, weight: u32) -> &mut ServerEntry {
        self.entries.push(ServerEntry {
            id: id.to_string(),
            host,
            port: addr.port(),
            use_ssl: false,
            use_kcp: false,
            addr,
            weight,
            kcp_fds: MuxFdsMap::new(),
        });
        self.wrr.lock().push(0);
        self.entries.last_mut().expect("entry just pushed")
    }

    /// Pick the next entry by smooth weighted round-robin.
    ///
    /// With equal weights this degenerates to plain round-robin; with
    /// mixed weights each entry is selected proportionally and the
    /// sequence stays evenly interleaved.
    pub fn next(&self) -> Option<&ServerEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let mut current = self.wrr.lock();
        let total: i64 = self.entries.iter().map(|e| e.weight as i64).sum();
        let mut best = 0;
        for (i, entry) in self.entries.iter().enumerate() {
            current[i] += entry.weight as i64;
            if current[i] > current[best] {
                best = i;
            }
        }
        current[best] -= total;
        Some(&self.entries[best])
    }
}

impl std::fmt::Debug for ServerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerGroup")
            .field("alias", &self.alias)
            .field("entries", &self.entries.len())
            .field("selection", &self.selection)
            .finish()
    }
}

/// Creates server groups.
///
/// The agent runtime can substitute its own wiring (attaching the group
/// to its health checker, for instance); the policy core only asks for an
/// opaque group handle per alias.
pub trait ServerGroupFactory: Send + Sync {
    fn new_group(
        &self,
        alias: &str,
        loop_group: Arc<dyn LoopGroup>,
        health_check: HealthCheckConfig,
        selection: Selection,
    ) -> ServerGroup;
}

/// Default factory: plain in-process groups.
pub struct AgentServerGroupFactory;

impl ServerGroupFactory for AgentServerGroupFactory {
    fn new_group(
        &self,
        alias: &str,
        loop_group: Arc<dyn LoopGroup>,
        health_check: HealthCheckConfig,
        selection: Selection,
    ) -> ServerGroup {
        ServerGroup::new(alias, loop_group, health_check, selection)
    }
}
