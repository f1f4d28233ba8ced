//! Cross-field validation, run once after parsing.
//!
//! The checks span the whole file, so they cannot live in the line-level
//! parser: list blocks may appear in any order and several constraints
//! couple flags with lists declared elsewhere. Any failure aborts startup
//! with a message naming the offending directive or invariant.

use std::collections::BTreeSet;
use std::fs;

use tracing::info;

use crate::config::Config;
use crate::error::{PolicyError, Result};
use crate::parser::Collaborators;
use crate::types::ProxyRelay;

pub(crate) fn validate(cfg: &mut Config, collab: &Collaborators) -> Result<()> {
    // required credentials
    if cfg.user.is_none() || cfg.pass.is_none() {
        return Err(PolicyError::Validation(
            "proxy.server.auth not present".to_string(),
        ));
    }

    // merge per-group domain lists into the proxied https-relay list
    if cfg.proxy_https_relay_domain_merge {
        let merged: Vec<_> = cfg
            .domains()
            .iter()
            .flat_map(|(_, rules)| rules.iter().cloned())
            .collect();
        cfg.proxy_https_relay_domains.extend(merged);
    }

    // resolve queued cert-key path lists, or verify the relay switches are
    // all off when there is nothing to terminate TLS with
    if !cfg.https_relay_cert_key_files.is_empty() {
        let queued = std::mem::take(&mut cfg.https_relay_cert_key_files);
        for (idx, files) in queued.iter().enumerate() {
            let (key, certs) = files
                .split_last()
                .expect("cert-key lines are never empty");
            let name = format!("agent.https-relay.cert-key.{}", idx);
            let cert_key = collab.cert_keys.read_file(&name, certs, key)?;
            cfg.https_relay_cert_keys.push(cert_key);
        }
    } else if cfg.auto_sign.is_none() {
        if !cfg.https_relay_domains.is_empty() {
            return Err(PolicyError::Validation(
                "agent.https-relay.cert-key.list is empty and auto-sign is disabled, but https-relay.domain.list is not empty".to_string(),
            ));
        }
        if cfg.direct_relay {
            return Err(PolicyError::Validation(
                "agent.https-relay.cert-key.list is empty and auto-sign is disabled, but agent.direct-relay is enabled".to_string(),
            ));
        }
        if cfg.proxy_relay == ProxyRelay::On {
            return Err(PolicyError::Validation(
                "agent.https-relay.cert-key.list is empty and auto-sign is disabled, but agent.proxy-relay is enabled".to_string(),
            ));
        }
    }

    // the https-relay lists require the direct-relay switch
    if !cfg.direct_relay {
        if !cfg.https_relay_domains.is_empty() {
            return Err(PolicyError::Validation(
                "agent.direct-relay is disabled, but https-relay.domain.list is not empty".to_string(),
            ));
        }
        if !cfg.proxy_https_relay_domains.is_empty() || cfg.proxy_https_relay_domain_merge {
            return Err(PolicyError::Validation(
                "agent.direct-relay is disabled, but proxy.https-relay.domain.list is not empty".to_string(),
            ));
        }
    }

    // every alias used by a matcher list must name a server group
    for (alias, _) in cfg.domains() {
        if cfg.group(alias).is_none() {
            return Err(PolicyError::Validation(format!(
                "{} is defined in domain list, but not in server list",
                alias
            )));
        }
    }
    for (alias, _) in cfg.proxy_resolves() {
        if cfg.group(alias).is_none() {
            return Err(PolicyError::Validation(format!(
                "{} is defined in resolve list, but not in server list",
                alias
            )));
        }
    }
    for (alias, _) in cfg.no_proxy_domains() {
        if cfg.group(alias).is_none() {
            return Err(PolicyError::Validation(format!(
                "{} is defined in no-proxy list, but not in server list",
                alias
            )));
        }
    }

    // pac serving needs a client-facing listener
    if cfg.pac_port != 0 && cfg.socks5_port == 0 && cfg.http_connect_port == 0 {
        return Err(PolicyError::Validation(
            "pac server is defined, but neither socks5-server nor http-connect-server is defined".to_string(),
        ));
    }

    if cfg.ss_port != 0 && cfg.ss_password.is_empty() {
        return Err(PolicyError::Validation(
            "ss is enabled by agent.ss.listen, but agent.ss.password is not set".to_string(),
        ));
    }

    // pick up previously signed cert-key pairs from the working directory
    if let Some(auto_sign) = &cfg.auto_sign {
        let dir = auto_sign.work_dir.path();
        let entries = fs::read_dir(dir).map_err(|e| {
            PolicyError::Validation(format!("cannot list files under {}: {}", dir.display(), e))
        })?;

        let mut crt = BTreeSet::new();
        let mut key = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(PolicyError::Io)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(domain) = name.strip_suffix(".crt") {
                crt.insert(domain.to_string());
            } else if let Some(domain) = name.strip_suffix(".key") {
                key.insert(domain.to_string());
            }
        }

        for domain in crt.intersection(&key) {
            let crt_path = dir.join(format!("{}.crt", domain)).display().to_string();
            let key_path = dir.join(format!("{}.key", domain)).display().to_string();
            let name = format!("agent.auto-sign.{}", domain);
            info!(domain = %domain, "loading auto-signed cert-key pair");
            let cert_key = collab.cert_keys.read_file(&name, &[crt_path], &key_path)?;
            cfg.https_relay_cert_keys.push(cert_key);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;

    fn parse(text: &str) -> Result<Config> {
        parse_str(text, &Collaborators::offline())
    }

    #[test]
    fn test_missing_auth_rejected() {
        let err = parse("agent.listen 11080\n").unwrap_err();
        assert!(matches!(err, PolicyError::Validation(_)));
        assert!(err.to_string().contains("proxy.server.auth"));
    }

    #[test]
    fn test_domain_alias_must_have_server_group() {
        let err = parse(concat!(
            "proxy.server.auth a:b\n",
            "proxy.domain.list.start ghost\n",
            "youtube.com\n",
            "proxy.domain.list.end\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("ghost"));
        assert!(err.to_string().contains("domain list"));
    }

    #[test]
    fn test_resolve_alias_must_have_server_group() {
        let err = parse(concat!(
            "proxy.server.auth a:b\n",
            "proxy.resolve.list.start ghost\n",
            "youtube.com\n",
            "proxy.resolve.list.end\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("resolve list"));
    }

    #[test]
    fn test_pac_requires_client_listener() {
        let err = parse(concat!(
            "proxy.server.auth a:b\n",
            "agent.gateway.pac.listen 20080\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("pac server"));

        parse(concat!(
            "proxy.server.auth a:b\n",
            "agent.listen 11080\n",
            "agent.gateway.pac.listen 20080\n",
        ))
        .unwrap();
    }

    #[test]
    fn test_ss_requires_password() {
        let err = parse(concat!(
            "proxy.server.auth a:b\n",
            "agent.ss.listen 8388\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("agent.ss.password"));

        parse(concat!(
            "proxy.server.auth a:b\n",
            "agent.ss.listen 8388\n",
            "agent.ss.password sEcr3t\n",
        ))
        .unwrap();
    }

    #[test]
    fn test_relay_domains_require_direct_relay() {
        let err = parse(concat!(
            "proxy.server.auth a:b\n",
            "agent.https-relay.cert-key.list.start\n",
            "relay.crt relay.key\n",
            "agent.https-relay.cert-key.list.end\n",
            "https-relay.domain.list.start\n",
            "youtube.com\n",
            "https-relay.domain.list.end\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("agent.direct-relay is disabled"));
    }

    #[test]
    fn test_relay_domains_require_cert_keys() {
        let err = parse(concat!(
            "proxy.server.auth a:b\n",
            "agent.direct-relay on\n",
            "https-relay.domain.list.start\n",
            "youtube.com\n",
            "https-relay.domain.list.end\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("cert-key.list is empty"));
    }

    #[test]
    fn test_direct_relay_requires_cert_keys() {
        let err = parse(concat!(
            "proxy.server.auth a:b\n",
            "agent.direct-relay on\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("agent.direct-relay is enabled"));
    }

    #[test]
    fn test_proxy_relay_on_requires_cert_keys() {
        let err = parse(concat!(
            "proxy.server.auth a:b\n",
            "agent.proxy-relay on\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("agent.proxy-relay is enabled"));
    }

    #[test]
    fn test_merge_requires_direct_relay() {
        let err = parse(concat!(
            "proxy.server.auth a:b\n",
            "agent.https-relay.cert-key.list.start\n",
            "relay.crt relay.key\n",
            "agent.https-relay.cert-key.list.end\n",
            "proxy.https-relay.domain.merge on\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("proxy.https-relay.domain.list"));
    }

    #[test]
    fn test_merge_appends_group_domains() {
        let cfg = parse(concat!(
            "proxy.server.auth a:b\n",
            "agent.direct-relay on\n",
            "proxy.https-relay.domain.merge on\n",
            "agent.https-relay.cert-key.list.start\n",
            "relay.crt relay.key\n",
            "agent.https-relay.cert-key.list.end\n",
            "proxy.server.list.start\n",
            "websocks://127.0.0.1:18686\n",
            "proxy.server.list.end\n",
            "proxy.https-relay.domain.list.start\n",
            "pre-existing.com\n",
            "proxy.https-relay.domain.list.end\n",
            "proxy.domain.list.start\n",
            "youtube.com\n",
            "netflix.com\n",
            "proxy.domain.list.end\n",
        ))
        .unwrap();
        // pre-merge contents first, then every per-group domain list
        let merged = cfg.proxy_https_relay_domains();
        assert_eq!(merged.len(), 3);
        assert!(merged[0].matches("pre-existing.com", 443));
        assert!(merged[1].matches("youtube.com", 443));
        assert!(merged[2].matches("netflix.com", 443));
    }

    #[test]
    fn test_auto_sign_work_dir_pairs_loaded() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let ca_crt = dir.path().join("ca.pem");
        let ca_key = dir.path().join("ca-key.pem");
        fs::File::create(&ca_crt).unwrap().write_all(b"ca").unwrap();
        fs::File::create(&ca_key).unwrap().write_all(b"ck").unwrap();

        let work = tempfile::tempdir().unwrap();
        for name in ["youtube.com.crt", "youtube.com.key", "orphan.crt", "readme.txt"] {
            fs::File::create(work.path().join(name)).unwrap();
        }

        let cfg = parse(&format!(
            concat!(
                "proxy.server.auth a:b\n",
                "agent.auto-sign {} {} {}\n",
                "agent.direct-relay on\n",
            ),
            ca_crt.display(),
            ca_key.display(),
            work.path().display(),
        ))
        .unwrap();

        // only the complete youtube.com pair is registered
        assert_eq!(cfg.https_relay_cert_keys().len(), 1);
        assert_eq!(cfg.https_relay_cert_keys()[0].name(), "agent.auto-sign.youtube.com");
    }
}
