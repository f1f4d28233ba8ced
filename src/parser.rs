//! Line-oriented configuration parser.
//!
//! A single synchronous pass over the file: lines are trimmed, blank and
//! `#` lines skipped, and a small state machine tracks which list block is
//! open. Everything that touches the outside world during parsing (DNS,
//! HTTP, process spawn, cert files, worker loops) goes through the
//! [`Collaborators`] bundle so the whole grammar is testable offline.

use std::sync::Arc;

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use tracing::info;

use crate::certkey::{CertKeyStore, FsCertKeyStore, NilCertKeyStore};
use crate::compile::compile_rule;
use crate::config::Config;
use crate::error::{PolicyError, Result};
use crate::group::{AgentServerGroupFactory, ServerGroupFactory};
use crate::loader::{expand_home, home_dir_string, HttpFetch, NilHttpFetch, UreqHttpClient};
use crate::process::{NilProcessRunner, ProcessRunner, StdProcessRunner};
use crate::resolver::{NilResolver, Resolver, SystemResolver};
use crate::transport::{distinct_loops, LoopGroup, MuxFactory, MuxFdsMap, NilMuxFactory, RoundRobinLoops};
use crate::types::{AutoSign, ProxyRelay, WorkDir};
use crate::validate;

/// Matches the scheme prefix of a server-list line.
static SCHEME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(websocks|websockss)(:kcp)?://").expect("SCHEME_PATTERN: hardcoded regex is invalid")
});

/// Helper-program local ports are drawn from this range.
const LOCAL_PORT_RANGE: std::ops::Range<u16> = 30000..40000;

/// External collaborators consumed while parsing.
///
/// Production wiring blocks on real DNS, HTTP and process spawn; the
/// offline set never leaves the process and is what tests use.
pub struct Collaborators {
    pub resolver: Box<dyn Resolver>,
    pub process_runner: Box<dyn ProcessRunner>,
    pub cert_keys: Box<dyn CertKeyStore>,
    pub http: Box<dyn HttpFetch>,
    pub loops: Arc<dyn LoopGroup>,
    pub mux: Box<dyn MuxFactory>,
    pub server_groups: Box<dyn ServerGroupFactory>,
}

impl Collaborators {
    /// Production set over the agent's worker loops and mux factory.
    pub fn production(loops: Arc<dyn LoopGroup>, mux: Box<dyn MuxFactory>) -> Self {
        Self {
            resolver: Box::new(SystemResolver::new()),
            process_runner: Box::new(StdProcessRunner),
            cert_keys: Box::new(FsCertKeyStore),
            http: Box::new(UreqHttpClient::new()),
            loops,
            mux,
            server_groups: Box::new(AgentServerGroupFactory),
        }
    }

    /// Fully offline set: no DNS, no network, no processes, opaque
    /// cert-key and mux handles, a single worker loop.
    pub fn offline() -> Self {
        Self {
            resolver: Box::new(NilResolver),
            process_runner: Box::new(NilProcessRunner::new()),
            cert_keys: Box::new(NilCertKeyStore),
            http: Box::new(NilHttpFetch),
            loops: Arc::new(RoundRobinLoops::new(1)),
            mux: Box::new(NilMuxFactory),
            server_groups: Box::new(AgentServerGroupFactory),
        }
    }
}

/// Parser state: which list block the current line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    TopLevel,
    ServerList,
    DomainList,
    ResolveList,
    NoProxyList,
    HttpsRelayDomain,
    HttpsRelayCertKey,
    ProxyHttpsRelayDomain,
}

impl Section {
    fn name(self) -> &'static str {
        match self {
            Section::TopLevel => "top level",
            Section::ServerList => "proxy.server.list",
            Section::DomainList => "proxy.domain.list",
            Section::ResolveList => "proxy.resolve.list",
            Section::NoProxyList => "no-proxy.domain.list",
            Section::HttpsRelayDomain => "https-relay.domain.list",
            Section::HttpsRelayCertKey => "agent.https-relay.cert-key.list",
            Section::ProxyHttpsRelayDomain => "proxy.https-relay.domain.list",
        }
    }
}

/// Parse and validate a config file. Blocking; startup path only.
pub fn parse_file(path: &str, collab: &Collaborators) -> Result<Config> {
    let expanded = expand_home(path);
    let text = std::fs::read_to_string(&expanded).map_err(|e| PolicyError::Resource {
        path: expanded.display().to_string(),
        message: e.to_string(),
    })?;
    parse_str(&text, collab)
}

/// Parse and validate a config from memory.
pub fn parse_str(text: &str, collab: &Collaborators) -> Result<Config> {
    let mut parser = Parser {
        collab,
        cfg: Config::new(),
        section: Section::TopLevel,
        current_alias: None,
    };

    let mut line_no = 0;
    for (idx, raw) in text.lines().enumerate() {
        line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        parser.line(line, line_no)?;
    }

    if parser.section != Section::TopLevel {
        return Err(PolicyError::at_line(
            line_no,
            format!("unterminated {} block", parser.section.name()),
        ));
    }

    let mut cfg = parser.cfg;
    validate::validate(&mut cfg, collab)?;
    Ok(cfg)
}

struct Parser<'a> {
    collab: &'a Collaborators,
    cfg: Config,
    section: Section,
    current_alias: Option<String>,
}

impl Parser<'_> {
    fn line(&mut self, line: &str, no: usize) -> Result<()> {
        match self.section {
            Section::TopLevel => self.top_level(line, no),
            Section::ServerList => self.in_block(line, no, "proxy.server.list.end", Self::server_line),
            Section::DomainList => self.in_block(line, no, "proxy.domain.list.end", Self::domain_line),
            Section::ResolveList => self.in_block(line, no, "proxy.resolve.list.end", Self::resolve_line),
            Section::NoProxyList => self.in_block(line, no, "no-proxy.domain.list.end", Self::no_proxy_line),
            Section::HttpsRelayDomain => {
                self.in_block(line, no, "https-relay.domain.list.end", Self::https_relay_line)
            }
            Section::HttpsRelayCertKey => self.in_block(
                line,
                no,
                "agent.https-relay.cert-key.list.end",
                Self::cert_key_line,
            ),
            Section::ProxyHttpsRelayDomain => self.in_block(
                line,
                no,
                "proxy.https-relay.domain.list.end",
                Self::proxy_https_relay_line,
            ),
        }
    }

    /// Shared block handling: the end token closes the block, a nested
    /// list start is rejected, anything else is an inner line.
    fn in_block(
        &mut self,
        line: &str,
        no: usize,
        end_token: &str,
        inner: fn(&mut Self, &str, usize) -> Result<()>,
    ) -> Result<()> {
        if line == end_token {
            self.section = Section::TopLevel;
            self.current_alias = None;
            return Ok(());
        }
        if is_list_start(line) {
            return Err(PolicyError::at_line(
                no,
                format!("list started inside {} block: {}", self.section.name(), line),
            ));
        }
        inner(self, line, no)
    }

    fn top_level(&mut self, line: &str, no: usize) -> Result<()> {
        // list starts first: four aliased blocks, three global ones
        if let Some(alias) = section_start(line, "proxy.server.list.start", no)? {
            self.section = Section::ServerList;
            self.current_alias = alias;
            return Ok(());
        }
        if let Some(alias) = section_start(line, "proxy.domain.list.start", no)? {
            self.section = Section::DomainList;
            self.current_alias = alias;
            return Ok(());
        }
        if let Some(alias) = section_start(line, "proxy.resolve.list.start", no)? {
            self.section = Section::ResolveList;
            self.current_alias = alias;
            return Ok(());
        }
        if let Some(alias) = section_start(line, "no-proxy.domain.list.start", no)? {
            self.section = Section::NoProxyList;
            self.current_alias = alias;
            return Ok(());
        }
        if line == "https-relay.domain.list.start" {
            self.section = Section::HttpsRelayDomain;
            return Ok(());
        }
        if line == "agent.https-relay.cert-key.list.start" {
            self.section = Section::HttpsRelayCertKey;
            return Ok(());
        }
        if line == "proxy.https-relay.domain.list.start" {
            self.section = Section::ProxyHttpsRelayDomain;
            return Ok(());
        }

        if let Some(value) = directive(line, "agent.listen").or_else(|| directive(line, "agent.socks5.listen")) {
            self.cfg.socks5_port = parse_listen_port(value, no, "agent.listen")?;
        } else if let Some(value) = directive(line, "agent.httpconnect.listen") {
            self.cfg.http_connect_port = parse_listen_port(value, no, "agent.httpconnect.listen")?;
        } else if let Some(value) = directive(line, "agent.ss.listen") {
            self.cfg.ss_port = parse_listen_port(value, no, "agent.ss.listen")?;
        } else if let Some(value) = directive(line, "agent.ss.password") {
            self.cfg.ss_password = value.to_string();
        } else if let Some(value) = directive(line, "agent.dns.listen") {
            self.cfg.dns_port = parse_listen_port(value, no, "agent.dns.listen")?;
        } else if let Some(value) = directive(line, "agent.gateway") {
            self.cfg.gateway = parse_on_off(value, no, "agent.gateway")?;
        } else if let Some(value) = directive(line, "agent.direct-relay") {
            self.cfg.direct_relay = parse_on_off(value, no, "agent.direct-relay")?;
        } else if let Some(value) = directive(line, "agent.proxy-relay") {
            self.cfg.proxy_relay = match value {
                "on" => ProxyRelay::On,
                "off" => ProxyRelay::Off,
                "auto" => ProxyRelay::Auto,
                other => {
                    return Err(PolicyError::at_line(
                        no,
                        format!("invalid value for agent.proxy-relay: {}", other),
                    ))
                }
            };
        } else if let Some(value) = directive(line, "proxy.server.auth") {
            let parts: Vec<&str> = value.split(':').collect();
            if parts.len() != 2 {
                return Err(PolicyError::at_line(
                    no,
                    format!("invalid proxy.server.auth: {}", value),
                ));
            }
            let user = parts[0].trim();
            if user.is_empty() {
                return Err(PolicyError::at_line(no, "invalid proxy.server.auth: user is empty"));
            }
            let pass = parts[1].trim();
            if pass.is_empty() {
                return Err(PolicyError::at_line(no, "invalid proxy.server.auth: pass is empty"));
            }
            self.cfg.user = Some(user.to_string());
            self.cfg.pass = Some(pass.to_string());
        } else if let Some(value) = directive(line, "proxy.server.hc") {
            self.cfg.no_health_check = !parse_on_off(value, no, "proxy.server.hc")?;
        } else if let Some(value) = directive(line, "agent.cacerts.path") {
            if value.is_empty() {
                return Err(PolicyError::at_line(no, "cacerts path not specified"));
            }
            self.cfg.cacerts_path = Some(expand_home(value).display().to_string());
        } else if let Some(value) = directive(line, "agent.cacerts.pswd") {
            if value.is_empty() {
                return Err(PolicyError::at_line(no, "cacerts password not specified"));
            }
            self.cfg.cacerts_pswd = Some(value.to_string());
        } else if let Some(value) = directive(line, "agent.cert.verify") {
            self.cfg.verify_cert = parse_on_off(value, no, "agent.cert.verify")?;
        } else if let Some(value) = directive(line, "agent.strict") {
            self.cfg.strict_mode = parse_on_off(value, no, "agent.strict")?;
        } else if let Some(value) = directive(line, "agent.pool") {
            let size: i64 = value.parse().map_err(|_| {
                PolicyError::at_line(no, "invalid agent.pool, expecting an integer")
            })?;
            if size < 0 {
                return Err(PolicyError::at_line(no, "invalid agent.pool, should not be negative"));
            }
            self.cfg.pool_size = size as usize;
        } else if let Some(value) = directive(line, "agent.gateway.pac.listen") {
            self.cfg.pac_port = value.parse().map_err(|_| {
                PolicyError::at_line(no, "invalid agent.gateway.pac.listen, the port is invalid")
            })?;
        } else if line == "agent.auto-sign" {
            // no arguments: auto-sign stays disabled
        } else if let Some(value) = directive(line, "agent.auto-sign") {
            self.auto_sign(value, no)?;
        } else if let Some(value) = directive(line, "proxy.https-relay.domain.merge") {
            self.cfg.proxy_https_relay_domain_merge =
                parse_on_off(value, no, "proxy.https-relay.domain.merge")?;
        } else {
            return Err(PolicyError::at_line(no, format!("unknown line: {}", line)));
        }
        Ok(())
    }

    fn auto_sign(&mut self, value: &str, no: usize) -> Result<()> {
        let args: Vec<&str> = value.split_whitespace().collect();
        if args.len() != 2 && args.len() != 3 {
            return Err(PolicyError::at_line(
                no,
                "agent.auto-sign takes a cert, a key and an optional working directory",
            ));
        }
        let cert = expand_home(args[0]);
        if !cert.is_file() {
            return Err(PolicyError::at_line(no, "agent.auto-sign cert is not a file"));
        }
        let key = expand_home(args[1]);
        if !key.is_file() {
            return Err(PolicyError::at_line(no, "agent.auto-sign key is not a file"));
        }
        let work_dir = if args.len() == 3 {
            let dir = expand_home(args[2]);
            if !dir.is_dir() {
                return Err(PolicyError::at_line(
                    no,
                    "agent.auto-sign working directory is not a directory",
                ));
            }
            WorkDir::Provided(dir)
        } else {
            let tmp = tempfile::Builder::new()
                .prefix("websocks-agent-auto-sign")
                .tempdir()
                .map_err(PolicyError::Io)?;
            WorkDir::Ephemeral(tmp)
        };
        self.cfg.auto_sign = Some(AutoSign { cert, key, work_dir });
        Ok(())
    }

    fn server_line(&mut self, line: &str, no: usize) -> Result<()> {
        let caps = SCHEME_PATTERN
            .captures(line)
            .ok_or_else(|| PolicyError::at_line(no, format!("unknown protocol: {}", line)))?;
        let use_ssl = &caps[1] == "websockss";
        let use_kcp = caps.get(2).is_some();
        let rest = &line[caps.get(0).map(|m| m.end()).unwrap_or(0)..];

        // an optional helper program follows the address
        let (host_port, program) = match rest.split_once(' ') {
            Some((hp, prog)) => (hp, Some(prog.trim().to_string())),
            None => (rest, None),
        };

        let mut program = program;
        let mut local_port = 0u16;
        if let Some(p) = program.as_mut() {
            *p = p.replace('~', &home_dir_string());
            local_port = rand::thread_rng().gen_range(LOCAL_PORT_RANGE);
            *p = p.replace("$LOCAL_PORT", &local_port.to_string());
        }

        // split at the LAST colon; bracketed IPv6 literals are not
        // supported here
        let (host, port_str) = host_port.rsplit_once(':').ok_or_else(|| {
            PolicyError::at_line(no, format!("invalid address:port for proxy.server.list: {}", line))
        })?;
        if host.is_empty() {
            return Err(PolicyError::at_line(no, format!("invalid host: {}", line)));
        }
        let port: u32 = port_str
            .parse()
            .map_err(|_| PolicyError::at_line(no, format!("invalid port: {}", line)))?;
        if port == 0 || port > 65535 {
            return Err(PolicyError::at_line(no, format!("invalid port: {}", line)));
        }
        let port = port as u16;

        if let Some(p) = program.as_mut() {
            *p = p.replace("$SERVER_IP", host);
            *p = p.replace("$SERVER_PORT", port_str);
            info!(command = %p, "running helper program");
            self.collab.process_runner.spawn(p)?;
        }

        // by-name entries keep the hostname so it can be re-resolved
        let resolved_by_name = program.is_none() && host.parse::<std::net::Ipv4Addr>().is_err();
        let addr = if program.is_some() {
            std::net::SocketAddrV4::new(std::net::Ipv4Addr::LOCALHOST, local_port)
        } else if let Ok(ip) = host.parse::<std::net::Ipv4Addr>() {
            std::net::SocketAddrV4::new(ip, port)
        } else {
            std::net::SocketAddrV4::new(self.collab.resolver.resolve_v4(host)?, port)
        };

        let mut kcp_fds = MuxFdsMap::new();
        if use_kcp {
            for lp in distinct_loops(&*self.collab.loops) {
                let fds = self.collab.mux.kcp_client_fds(lp, std::net::SocketAddr::V4(addr))?;
                kcp_fds.insert(lp, fds);
            }
        }

        let group = self.cfg.get_or_create_group(
            self.current_alias.as_deref(),
            &*self.collab.server_groups,
            &self.collab.loops,
        );
        let handle = if resolved_by_name {
            group.add_named(host_port, host, addr, 10)
        } else {
            group.add(host_port, addr, 10)
        };
        // the config line text wins over the derived address text, and the
        // transport data rides on the handle (for helper-program entries
        // host/port stay the remote values while addr is the local tunnel)
        handle.host = host.to_string();
        handle.port = port;
        handle.use_ssl = use_ssl;
        handle.use_kcp = use_kcp;
        handle.kcp_fds = kcp_fds;
        Ok(())
    }

    fn domain_line(&mut self, line: &str, no: usize) -> Result<()> {
        let rule = compile_rule(line, no, &*self.collab.http)?;
        self.cfg.domain_list(self.current_alias.as_deref()).push(rule);
        Ok(())
    }

    fn resolve_line(&mut self, line: &str, no: usize) -> Result<()> {
        let rule = compile_rule(line, no, &*self.collab.http)?;
        self.cfg
            .proxy_resolve_list(self.current_alias.as_deref())
            .push(rule);
        Ok(())
    }

    fn no_proxy_line(&mut self, line: &str, no: usize) -> Result<()> {
        let rule = compile_rule(line, no, &*self.collab.http)?;
        self.cfg.no_proxy_list(self.current_alias.as_deref()).push(rule);
        Ok(())
    }

    fn https_relay_line(&mut self, line: &str, no: usize) -> Result<()> {
        let rule = compile_rule(line, no, &*self.collab.http)?;
        self.cfg.https_relay_domains.push(rule);
        Ok(())
    }

    fn proxy_https_relay_line(&mut self, line: &str, no: usize) -> Result<()> {
        let rule = compile_rule(line, no, &*self.collab.http)?;
        self.cfg.proxy_https_relay_domains.push(rule);
        Ok(())
    }

    fn cert_key_line(&mut self, line: &str, _no: usize) -> Result<()> {
        let files: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if !files.is_empty() {
            self.cfg.https_relay_cert_key_files.push(files);
        }
        Ok(())
    }
}

/// Match `<token>` or `<token> <alias>`; alias tokens must not contain
/// whitespace.
fn section_start(line: &str, token: &str, no: usize) -> Result<Option<Option<String>>> {
    if line == token {
        return Ok(Some(None));
    }
    if let Some(rest) = line.strip_prefix(token) {
        if rest.starts_with(char::is_whitespace) {
            let alias = rest.trim();
            if alias.split_whitespace().count() > 1 {
                return Err(PolicyError::at_line(no, "symbol cannot contain spaces"));
            }
            return Ok(Some(Some(alias.to_string())));
        }
    }
    Ok(None)
}

/// Is this line one of the seven list-start tokens?
fn is_list_start(line: &str) -> bool {
    const ALIASED: [&str; 4] = [
        "proxy.server.list.start",
        "proxy.domain.list.start",
        "proxy.resolve.list.start",
        "no-proxy.domain.list.start",
    ];
    const GLOBAL: [&str; 3] = [
        "https-relay.domain.list.start",
        "agent.https-relay.cert-key.list.start",
        "proxy.https-relay.domain.list.start",
    ];
    ALIASED
        .iter()
        .any(|t| line == *t || line.strip_prefix(t).is_some_and(|r| r.starts_with(char::is_whitespace)))
        || GLOBAL.contains(&line)
}

/// Extract the value of a `key SP value` directive.
fn directive<'l>(line: &'l str, key: &str) -> Option<&'l str> {
    let rest = line.strip_prefix(key)?;
    if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

fn parse_listen_port(value: &str, no: usize, key: &str) -> Result<u16> {
    let port: u32 = value
        .parse()
        .map_err(|_| PolicyError::at_line(no, format!("invalid {}, expecting an integer", key)))?;
    if port == 0 || port > 65535 {
        return Err(PolicyError::at_line(
            no,
            format!("invalid {}, port number out of range", key),
        ));
    }
    Ok(port as u16)
}

fn parse_on_off(value: &str, no: usize, key: &str) -> Result<bool> {
    match value {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(PolicyError::at_line(
            no,
            format!("invalid value for {}: {}", key, other),
        )),
    }
}
