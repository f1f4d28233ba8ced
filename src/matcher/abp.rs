//! Minimal hostname-centric Adblock-Plus filter interpreter.
//!
//! The config references a filter list (base64-encoded, newlines already
//! stripped and lines concatenated); the decoded payload is the usual
//! newline-delimited ABP syntax. Only hostname queries are evaluated, so
//! URL-path-only rules are interpreted against the host and may deviate
//! from full ABP conformance.

use regex::Regex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{PolicyError, Result};

/// One compiled ABP rule, a predicate over hostnames.
#[derive(Debug, Clone)]
pub enum AbpRule {
    /// `||host^`: the query host equals `host` or has it as a dot-suffix.
    Domain(String),
    /// `|scheme://host...`: the query host equals the rule's host part.
    HostEq(String),
    /// A rule containing shell-glob `*`/`^`, compiled to a regex. `^`
    /// matches a separator (`/ ? : = &`) or end-of-host.
    Glob(Regex),
    /// Plain text: substring match on the host.
    Substring(String),
}

impl AbpRule {
    fn matches(&self, host: &str) -> bool {
        match self {
            AbpRule::Domain(d) => {
                host == d || (host.len() > d.len() && host.ends_with(d.as_str()) && {
                    let boundary = host.len() - d.len() - 1;
                    host.as_bytes()[boundary] == b'.'
                })
            }
            AbpRule::HostEq(h) => host == h,
            AbpRule::Glob(r) => r.is_match(host),
            AbpRule::Substring(s) => host.contains(s.as_str()),
        }
    }
}

/// A compiled Adblock-Plus filter list.
///
/// A query host matches when any include rule matches and no exception
/// rule matches. Rule order is preserved but not significant: evaluation
/// is a disjunction over includes minus the exception veto.
#[derive(Debug, Clone, Default)]
pub struct AbpFilter {
    includes: Vec<AbpRule>,
    exceptions: Vec<AbpRule>,
}

impl AbpFilter {
    /// Decode and compile a base64-encoded filter list.
    pub fn from_base64(content: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(content.trim())
            .map_err(|e| PolicyError::Validation(format!("invalid base64 in abp source: {}", e)))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| PolicyError::Validation(format!("abp source is not utf-8: {}", e)))?;
        Self::from_text(&text)
    }

    /// Compile an already-decoded, newline-delimited filter list.
    pub fn from_text(text: &str) -> Result<Self> {
        let mut filter = AbpFilter::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('!') || line.starts_with('[') {
                continue; // comments and section headers
            }
            if let Some(rest) = line.strip_prefix("@@") {
                filter.exceptions.push(compile_rule(rest)?);
            } else {
                filter.includes.push(compile_rule(line)?);
            }
        }
        Ok(filter)
    }

    /// Evaluate the filter against a hostname.
    ///
    /// Hosts and rules are compared case-insensitively, matching what
    /// mainstream ABP clients answer for host-only queries.
    pub fn matches(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        if !self.includes.iter().any(|r| r.matches(&host)) {
            return false;
        }
        !self.exceptions.iter().any(|r| r.matches(&host))
    }

    /// Number of include rules.
    pub fn include_count(&self) -> usize {
        self.includes.len()
    }

    /// Number of exception rules.
    pub fn exception_count(&self) -> usize {
        self.exceptions.len()
    }
}

/// Compile one filter line into a predicate.
fn compile_rule(rule: &str) -> Result<AbpRule> {
    let rule = rule.to_ascii_lowercase();

    if let Some(rest) = rule.strip_prefix("||") {
        let host = rest.strip_suffix('^').unwrap_or(rest);
        if host.contains('*') || host.contains('^') {
            return glob_rule(host);
        }
        return Ok(AbpRule::Domain(host.to_string()));
    }

    if let Some(rest) = rule.strip_prefix('|') {
        // |scheme://host[:port][/path] — anchored URL rule; hostname-only
        // evaluation keeps the host part.
        let host = match rest.split_once("://") {
            Some((_, tail)) => tail,
            None => rest,
        };
        let host = host.split(['/', '?']).next().unwrap_or("");
        let host = host.split(':').next().unwrap_or("");
        return Ok(AbpRule::HostEq(host.to_string()));
    }

    if rule.contains('*') || rule.contains('^') {
        return glob_rule(&rule);
    }

    Ok(AbpRule::Substring(rule))
}

/// Translate a glob rule (`*` wildcard, `^` separator) into a regex.
fn glob_rule(rule: &str) -> Result<AbpRule> {
    let mut pattern = String::with_capacity(rule.len() + 8);
    for c in rule.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '^' => pattern.push_str("(?:[/?:=&]|$)"),
            c => pattern.push_str(&regex::escape(&c.to_string())),
        }
    }
    Ok(AbpRule::Glob(Regex::new(&pattern)?))
}
