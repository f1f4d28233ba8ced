//! Blocking DNS resolution for the startup path.
//!
//! Upstream server hostnames are resolved synchronously while the config
//! is parsed, before any event loop exists. Only IPv4 is requested: the
//! WebSocks upstream address model is v4.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};

use crate::error::{PolicyError, Result};

/// Blocking v4 resolver interface.
pub trait Resolver: Send + Sync {
    /// Resolve the hostname to an IPv4 address.
    fn resolve_v4(&self, host: &str) -> Result<Ipv4Addr>;
}

/// System DNS resolver using the OS resolver.
pub struct SystemResolver;

impl SystemResolver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for SystemResolver {
    fn resolve_v4(&self, host: &str) -> Result<Ipv4Addr> {
        // IP literals pass straight through
        if let Ok(IpAddr::V4(v4)) = host.parse::<IpAddr>() {
            return Ok(v4);
        }

        let addrs = (host, 0u16)
            .to_socket_addrs()
            .map_err(|e| PolicyError::Resolve(format!("failed to resolve {}: {}", host, e)))?;

        for addr in addrs {
            if let IpAddr::V4(v4) = addr.ip() {
                return Ok(v4);
            }
        }
        Err(PolicyError::Resolve(format!("no A record for {}", host)))
    }
}

/// Static resolver with predefined mappings.
pub struct StaticResolver {
    mappings: HashMap<String, Ipv4Addr>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self {
            mappings: HashMap::new(),
        }
    }

    /// Add a mapping and return self for chaining.
    pub fn with_mapping(mut self, host: impl Into<String>, addr: Ipv4Addr) -> Self {
        self.mappings.insert(host.into(), addr);
        self
    }
}

impl Default for StaticResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for StaticResolver {
    fn resolve_v4(&self, host: &str) -> Result<Ipv4Addr> {
        if let Ok(IpAddr::V4(v4)) = host.parse::<IpAddr>() {
            return Ok(v4);
        }
        self.mappings
            .get(host)
            .copied()
            .ok_or_else(|| PolicyError::Resolve(format!("host not found: {}", host)))
    }
}

/// Resolver that fails every lookup. Used by offline collaborator sets;
/// configs whose server entries are IP literals never reach it.
pub struct NilResolver;

impl Resolver for NilResolver {
    fn resolve_v4(&self, host: &str) -> Result<Ipv4Addr> {
        Err(PolicyError::Resolve(format!(
            "resolution disabled, cannot resolve {}",
            host
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_resolver_ip_literal() {
        let resolver = SystemResolver::new();
        let addr = resolver.resolve_v4("127.0.0.1").unwrap();
        assert_eq!(addr, Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_static_resolver() {
        let resolver =
            StaticResolver::new().with_mapping("proxy.example.com", Ipv4Addr::new(10, 0, 0, 1));

        let addr = resolver.resolve_v4("proxy.example.com").unwrap();
        assert_eq!(addr, Ipv4Addr::new(10, 0, 0, 1));

        assert!(resolver.resolve_v4("unknown.example.com").is_err());
    }

    #[test]
    fn test_static_resolver_ip_passthrough() {
        let resolver = StaticResolver::new();
        let addr = resolver.resolve_v4("192.168.1.1").unwrap();
        assert_eq!(addr, Ipv4Addr::new(192, 168, 1, 1));
    }

    #[test]
    fn test_nil_resolver_errors() {
        assert!(NilResolver.resolve_v4("example.com").is_err());
    }
}
