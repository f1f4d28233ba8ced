//! The in-memory configuration model.
//!
//! Built once by the parser, checked by the validator, then frozen inside
//! the policy facade. Alias-keyed maps keep insertion order; the reserved
//! `DEFAULT` alias is yielded last by the read-time views because the
//! policy walk returns on first match and `DEFAULT` is the fallback.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::certkey::CertKey;
use crate::group::{HealthCheckConfig, Selection, ServerGroup, ServerGroupFactory};
use crate::matcher::DomainRule;
use crate::transport::LoopGroup;
use crate::types::{AutoSign, ProxyRelay, DEFAULT_ALIAS};

/// Parsed agent configuration.
///
/// Scalar options are public fields; the alias-keyed collections are
/// reached through the ordered views below.
#[derive(Debug, Default)]
pub struct Config {
    pub socks5_port: u16,
    pub http_connect_port: u16,
    pub ss_port: u16,
    pub ss_password: String,
    pub dns_port: u16,
    pub pac_port: u16,
    pub gateway: bool,
    pub direct_relay: bool,
    pub proxy_relay: ProxyRelay,
    /// Present after successful validation.
    pub user: Option<String>,
    /// Present after successful validation.
    pub pass: Option<String>,
    pub cacerts_path: Option<String>,
    pub cacerts_pswd: Option<String>,
    pub verify_cert: bool,
    pub strict_mode: bool,
    pub pool_size: usize,
    pub no_health_check: bool,
    pub proxy_https_relay_domain_merge: bool,
    pub auto_sign: Option<AutoSign>,

    pub(crate) groups: IndexMap<String, ServerGroup>,
    pub(crate) domains: IndexMap<String, Vec<DomainRule>>,
    pub(crate) proxy_resolves: IndexMap<String, Vec<DomainRule>>,
    pub(crate) no_proxy_domains: IndexMap<String, Vec<DomainRule>>,
    pub(crate) https_relay_domains: Vec<DomainRule>,
    pub(crate) proxy_https_relay_domains: Vec<DomainRule>,
    pub(crate) https_relay_cert_keys: Vec<CertKey>,
    /// Cert-key path lists queued during parsing, resolved by validation.
    pub(crate) https_relay_cert_key_files: Vec<Vec<String>>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            verify_cert: true,
            pool_size: 10,
            ..Default::default()
        }
    }

    /// Fetch or lazily create the server group for `alias`.
    ///
    /// `None` means the reserved `DEFAULT` group. Creation goes through
    /// the [`ServerGroupFactory`] collaborator, handing it the agent's
    /// worker loop group and the fixed agent health-check config;
    /// `proxy.server.hc` therefore only affects groups declared after it,
    /// matching parse order.
    pub(crate) fn get_or_create_group(
        &mut self,
        alias: Option<&str>,
        factory: &dyn ServerGroupFactory,
        loops: &Arc<dyn LoopGroup>,
    ) -> &mut ServerGroup {
        let alias = alias.unwrap_or(DEFAULT_ALIAS);
        if !self.groups.contains_key(alias) {
            let group = factory.new_group(
                alias,
                loops.clone(),
                HealthCheckConfig::agent_default(self.no_health_check),
                Selection::Wrr,
            );
            self.groups.insert(alias.to_string(), group);
        }
        self.groups.get_mut(alias).expect("group just inserted")
    }

    pub(crate) fn domain_list(&mut self, alias: Option<&str>) -> &mut Vec<DomainRule> {
        let alias = alias.unwrap_or(DEFAULT_ALIAS);
        self.domains.entry(alias.to_string()).or_default()
    }

    pub(crate) fn proxy_resolve_list(&mut self, alias: Option<&str>) -> &mut Vec<DomainRule> {
        let alias = alias.unwrap_or(DEFAULT_ALIAS);
        self.proxy_resolves.entry(alias.to_string()).or_default()
    }

    pub(crate) fn no_proxy_list(&mut self, alias: Option<&str>) -> &mut Vec<DomainRule> {
        let alias = alias.unwrap_or(DEFAULT_ALIAS);
        self.no_proxy_domains.entry(alias.to_string()).or_default()
    }

    /// All server groups, in declaration order.
    pub fn groups(&self) -> impl Iterator<Item = (&str, &ServerGroup)> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Look up one server group.
    pub fn group(&self, alias: &str) -> Option<&ServerGroup> {
        self.groups.get(alias)
    }

    /// Per-group proxy domain lists, `DEFAULT` last.
    pub fn domains(&self) -> Vec<(&str, &[DomainRule])> {
        default_last(&self.domains)
    }

    /// Per-group upstream-resolve lists, `DEFAULT` last.
    pub fn proxy_resolves(&self) -> Vec<(&str, &[DomainRule])> {
        default_last(&self.proxy_resolves)
    }

    /// Per-group no-proxy lists, `DEFAULT` last.
    pub fn no_proxy_domains(&self) -> Vec<(&str, &[DomainRule])> {
        default_last(&self.no_proxy_domains)
    }

    /// Upstream-resolve rules for one group; empty when the alias has no
    /// resolve list.
    pub fn proxy_resolves_for(&self, alias: &str) -> &[DomainRule] {
        self.proxy_resolves
            .get(alias)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Global https-relay domain list.
    pub fn https_relay_domains(&self) -> &[DomainRule] {
        &self.https_relay_domains
    }

    /// Global proxied-https-relay domain list (after any merge).
    pub fn proxy_https_relay_domains(&self) -> &[DomainRule] {
        &self.proxy_https_relay_domains
    }

    /// Cert-key handles for the HTTPS relay.
    pub fn https_relay_cert_keys(&self) -> &[CertKey] {
        &self.https_relay_cert_keys
    }

    /// Resolve the `agent.proxy-relay` tri-state; `Auto` follows the
    /// https-relay domain list.
    pub fn is_proxy_relay(&self) -> bool {
        self.proxy_relay.resolve(!self.https_relay_domains.is_empty())
    }
}

/// Ordered view with `DEFAULT` moved to the back. The reordering happens
/// at read time; insertion order of the map itself is untouched.
fn default_last<'a>(map: &'a IndexMap<String, Vec<DomainRule>>) -> Vec<(&'a str, &'a [DomainRule])> {
    let mut out: Vec<(&str, &[DomainRule])> = Vec::with_capacity(map.len());
    for (alias, rules) in map {
        if alias != DEFAULT_ALIAS {
            out.push((alias.as_str(), rules.as_slice()));
        }
    }
    if let Some(rules) = map.get(DEFAULT_ALIAS) {
        out.push((DEFAULT_ALIAS, rules.as_slice()));
    }
    out
}
