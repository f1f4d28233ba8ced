mod abp;

pub use abp::{AbpFilter, AbpRule};

use regex::Regex;

/// A compiled domain-matching rule.
///
/// The set of variants is fixed by the config grammar, so this is a closed
/// enum with a single `matches` function rather than an open trait.
/// Matchers are value objects; they own no mutable state and are built once
/// at parse time.
#[derive(Debug, Clone)]
pub enum DomainRule {
    /// Matches `host == s` or `host` ending with `".{s}"`.
    /// Case-sensitive, pure ASCII; no Punycode normalization.
    Suffix(String),
    /// Matches when the regex finds a match anywhere in the host. The
    /// `regex` crate dialect applies; patterns are unanchored unless the
    /// rule itself carries `^`/`$`.
    Pattern(Regex),
    /// Matches the destination port, host-independent.
    Port(u16),
    /// Matches against a compiled Adblock-Plus filter list.
    Abp(AbpFilter),
}

impl DomainRule {
    /// Check the rule against a destination `(host, port)`.
    pub fn matches(&self, host: &str, port: u16) -> bool {
        match self {
            DomainRule::Suffix(s) => {
                host == s || (host.len() > s.len() && host.ends_with(s.as_str()) && {
                    let boundary = host.len() - s.len() - 1;
                    host.as_bytes()[boundary] == b'.'
                })
            }
            DomainRule::Pattern(r) => r.is_match(host),
            DomainRule::Port(p) => *p == port,
            DomainRule::Abp(a) => a.matches(host),
        }
    }
}
