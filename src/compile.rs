//! Rule-list builder: turns one raw config line into exactly one
//! [`DomainRule`] by lexical inspection of its first characters.

use regex::Regex;

use crate::error::{PolicyError, Result};
use crate::loader::{load_abp_source, HttpFetch};
use crate::matcher::{AbpFilter, DomainRule};

/// Compile a trimmed, non-empty, non-comment list line.
///
/// | Prefix | Form | Result |
/// |---|---|---|
/// | `:` | `:<port>` | `Port` |
/// | `/…/` | `/<regex>/` | `Pattern` |
/// | `[…]` | `[<file or http(s) url>]` | `Abp` |
/// | otherwise | hostname or IP | `Suffix` |
pub fn compile_rule(line: &str, line_no: usize, http: &dyn HttpFetch) -> Result<DomainRule> {
    if let Some(port_str) = line.strip_prefix(':') {
        let port: u32 = port_str
            .parse()
            .map_err(|_| PolicyError::at_line(line_no, format!("invalid port rule: {}", port_str)))?;
        if port == 0 || port > 65535 {
            return Err(PolicyError::at_line(
                line_no,
                format!("invalid port rule, out of range: {}", port_str),
            ));
        }
        return Ok(DomainRule::Port(port as u16));
    }

    if line.len() >= 2 && line.starts_with('/') && line.ends_with('/') {
        let pattern = &line[1..line.len() - 1];
        let regex = Regex::new(pattern)
            .map_err(|e| PolicyError::at_line(line_no, format!("invalid regexp rule: {}", e)))?;
        return Ok(DomainRule::Pattern(regex));
    }

    if line.starts_with('[') && line.ends_with(']') {
        let reference = line[1..line.len() - 1].trim();
        let content = load_abp_source(reference, http)?;
        let filter = AbpFilter::from_base64(&content)
            .map_err(|e| PolicyError::at_line(line_no, format!("invalid abp rule: {}", e)))?;
        return Ok(DomainRule::Abp(filter));
    }

    Ok(DomainRule::Suffix(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::NilHttpFetch;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use std::io::Write;

    fn compile(line: &str) -> Result<DomainRule> {
        compile_rule(line, 1, &NilHttpFetch)
    }

    #[test]
    fn test_port_rule() {
        let rule = compile(":22").unwrap();
        assert!(matches!(rule, DomainRule::Port(22)));
    }

    #[test]
    fn test_port_rule_out_of_range() {
        assert!(compile(":0").is_err());
        assert!(compile(":65536").is_err());
        assert!(compile(":x").is_err());
    }

    #[test]
    fn test_pattern_rule() {
        let rule = compile(r"/.*google\.com.*/").unwrap();
        assert!(rule.matches("maps.google.com", 443));
        assert!(!rule.matches("example.com", 443));
    }

    #[test]
    fn test_pattern_rule_invalid_regex() {
        let err = compile("/(/").unwrap_err();
        assert!(matches!(err, PolicyError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_suffix_fallback() {
        let rule = compile("youtube.com").unwrap();
        assert!(matches!(rule, DomainRule::Suffix(ref s) if s == "youtube.com"));
    }

    #[test]
    fn test_ip_literal_is_suffix_rule() {
        // IP rules use the same exact/suffix comparison as hostnames.
        let rule = compile("216.58.200.46").unwrap();
        assert!(rule.matches("216.58.200.46", 443));
        assert!(!rule.matches("216.58.200.461", 443));
    }

    #[test]
    fn test_abp_rule_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.b64");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{}", BASE64.encode("||tracker.example^\n")).unwrap();
        drop(f);

        let rule = compile(&format!("[{}]", path.display())).unwrap();
        assert!(rule.matches("ads.tracker.example", 443));
        assert!(!rule.matches("example.com", 443));
    }

    #[test]
    fn test_abp_rule_missing_file() {
        assert!(compile("[/nonexistent/rules.b64]").is_err());
    }
}
