//! The policy-query facade.
//!
//! This is the only surface the dispatcher sees: given a destination
//! `(host, port)`, decide whether to proxy, through which group, where to
//! resolve the name, and whether the connection goes through the
//! TLS-terminating HTTPS relay. The engine is immutable after
//! construction and safely callable from any number of worker threads
//! without a lock.

use crate::config::Config;
use crate::types::DEFAULT_ALIAS;

/// Routing decision for one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Connect directly; no matcher claimed the destination.
    Direct,
    /// Terminate TLS locally and relay (direct-relay mode).
    HttpsRelay { group: String },
    /// Explicitly excluded from proxying by a no-proxy list.
    NoProxy { group: String },
    /// Forward through the WebSocks servers of `group`.
    Proxy {
        group: String,
        /// Resolve the hostname at the upstream instead of locally.
        resolve_at_upstream: bool,
        /// Relay the TLS-terminated stream through the proxy.
        https_relay: bool,
    },
}

/// Immutable policy engine built from a validated [`Config`].
pub struct PolicyEngine {
    config: Config,
}

impl PolicyEngine {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// The underlying configuration (listen ports, groups, pool size…).
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Classify a destination.
    ///
    /// Walks the per-group lists in declaration order with `DEFAULT`
    /// last; within each list the first matching rule wins.
    pub fn classify(&self, host: &str, port: u16) -> Decision {
        let cfg = &self.config;

        // 1. direct https relay claims the destination before anything else
        if cfg.direct_relay
            && cfg
                .https_relay_domains()
                .iter()
                .any(|r| r.matches(host, port))
        {
            return Decision::HttpsRelay {
                group: self.domain_group(host, port),
            };
        }

        // 2. no-proxy lists
        for (alias, rules) in cfg.no_proxy_domains() {
            if rules.iter().any(|r| r.matches(host, port)) {
                return Decision::NoProxy {
                    group: alias.to_string(),
                };
            }
        }

        // 3. proxy domain lists pick the candidate group
        let group = match self.domain_match(host, port) {
            Some(alias) => alias,
            None => return Decision::Direct,
        };

        // 4. per-group resolve list and the global proxied-relay list
        let resolve_at_upstream = cfg
            .proxy_resolves_for(group)
            .iter()
            .any(|r| r.matches(host, port));
        let https_relay = cfg.is_proxy_relay()
            && cfg
                .proxy_https_relay_domains()
                .iter()
                .any(|r| r.matches(host, port));

        Decision::Proxy {
            group: group.to_string(),
            resolve_at_upstream,
            https_relay,
        }
    }

    /// First group whose domain list matches, in `DEFAULT`-last order.
    fn domain_match(&self, host: &str, port: u16) -> Option<&str> {
        for (alias, rules) in self.config.domains() {
            if rules.iter().any(|r| r.matches(host, port)) {
                return Some(alias);
            }
        }
        None
    }

    /// Group used for an https-relay decision: the https-relay lists are
    /// global, so the group comes from the same domains walk as `Proxy`,
    /// falling back to `DEFAULT`.
    fn domain_group(&self, host: &str, port: u16) -> String {
        self.domain_match(host, port)
            .unwrap_or(DEFAULT_ALIAS)
            .to_string()
    }
}

impl From<Config> for PolicyEngine {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}
