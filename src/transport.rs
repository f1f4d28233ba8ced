//! Worker-loop tokens and the KCP mux transport seam.
//!
//! The event loops, the KCP transport, and the HTTP/2-style stream
//! multiplexer all live outside this crate. The policy core only needs to
//! (a) enumerate the distinct worker loops and (b) attach one mux-fds
//! handle per loop to each `:kcp` server entry, so the dispatcher can pick
//! the handle belonging to whichever loop a connection lands on.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Result;

/// Opaque identity of one worker event loop. Equality distinguishes loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopToken(pub u64);

/// Round-robin view over the worker loops.
pub trait LoopGroup: Send + Sync {
    /// Yield the next loop; repeated calls cycle through all loops.
    fn next(&self) -> LoopToken;
}

/// In-process loop group with a fixed number of loops.
pub struct RoundRobinLoops {
    size: u64,
    cursor: AtomicUsize,
}

impl RoundRobinLoops {
    /// A group of `size` distinct loops; `size` is clamped to at least 1.
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1) as u64,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl LoopGroup for RoundRobinLoops {
    fn next(&self) -> LoopToken {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) as u64;
        LoopToken(idx % self.size)
    }
}

/// Collect each distinct loop exactly once: keep calling `next()` until a
/// token repeats.
pub fn distinct_loops(loops: &dyn LoopGroup) -> Vec<LoopToken> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    loop {
        let token = loops.next();
        if !seen.insert(token) {
            break;
        }
        out.push(token);
    }
    out
}

/// Opaque handle to a per-loop KCP-backed multiplexed client transport.
#[derive(Debug, Clone)]
pub struct MuxClientFds {
    pub loop_token: LoopToken,
    pub server: SocketAddr,
}

/// Per-loop map attached to a `:kcp` server entry.
pub type MuxFdsMap = HashMap<LoopToken, MuxClientFds>;

/// Builds the per-loop mux transports for `:kcp` server entries.
pub trait MuxFactory: Send + Sync {
    fn kcp_client_fds(&self, loop_token: LoopToken, server: SocketAddr) -> Result<MuxClientFds>;
}

/// Factory returning bare handles; the real transport is wired in by the
/// agent runtime outside this crate.
pub struct NilMuxFactory;

impl MuxFactory for NilMuxFactory {
    fn kcp_client_fds(&self, loop_token: LoopToken, server: SocketAddr) -> Result<MuxClientFds> {
        Ok(MuxClientFds { loop_token, server })
    }
}
