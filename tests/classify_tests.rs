//! End-to-end tests: complete config strings in, classify decisions out.

use websocks_policy::{
    parse_str, Collaborators, Decision, PolicyError, PolicyEngine, DEFAULT_ALIAS,
};

fn engine(text: &str) -> PolicyEngine {
    PolicyEngine::new(parse_str(text, &Collaborators::offline()).unwrap())
}

const AUTH_AND_SERVER: &str = concat!(
    "proxy.server.auth alice:pasSw0rD\n",
    "proxy.server.list.start\n",
    "websocks://127.0.0.1:18686\n",
    "proxy.server.list.end\n",
);

#[test]
fn scenario_domain_list_routes_suffix_match() {
    let engine = engine(&format!(
        "{}{}",
        AUTH_AND_SERVER,
        concat!(
            "proxy.domain.list.start\n",
            "youtube.com\n",
            "proxy.domain.list.end\n",
        )
    ));

    assert_eq!(
        engine.classify("www.youtube.com", 443),
        Decision::Proxy {
            group: DEFAULT_ALIAS.to_string(),
            resolve_at_upstream: false,
            https_relay: false,
        }
    );
    assert_eq!(engine.classify("example.com", 443), Decision::Direct);
}

#[test]
fn scenario_resolve_list_sets_upstream_resolution() {
    let engine = engine(&format!(
        "{}{}",
        AUTH_AND_SERVER,
        concat!(
            "proxy.domain.list.start\n",
            "/.*google\\.com.*/\n",
            "proxy.domain.list.end\n",
            "proxy.resolve.list.start\n",
            "/.*google\\.com.*/\n",
            "proxy.resolve.list.end\n",
        )
    ));

    assert_eq!(
        engine.classify("maps.google.com", 80),
        Decision::Proxy {
            group: DEFAULT_ALIAS.to_string(),
            resolve_at_upstream: true,
            https_relay: false,
        }
    );
}

#[test]
fn scenario_direct_relay_claims_https_relay_domains() {
    let engine = engine(&format!(
        "{}{}",
        AUTH_AND_SERVER,
        concat!(
            "agent.direct-relay on\n",
            "agent.https-relay.cert-key.list.start\n",
            "relay.crt relay.key\n",
            "agent.https-relay.cert-key.list.end\n",
            "https-relay.domain.list.start\n",
            "youtube.com\n",
            "https-relay.domain.list.end\n",
        )
    ));

    assert!(matches!(
        engine.classify("youtube.com", 443),
        Decision::HttpsRelay { .. }
    ));
}

#[test]
fn scenario_relay_domains_without_direct_relay_fail_validation() {
    let err = parse_str(
        &format!(
            "{}{}",
            AUTH_AND_SERVER,
            concat!(
                "agent.direct-relay off\n",
                "agent.https-relay.cert-key.list.start\n",
                "relay.crt relay.key\n",
                "agent.https-relay.cert-key.list.end\n",
                "https-relay.domain.list.start\n",
                "youtube.com\n",
                "https-relay.domain.list.end\n",
            )
        ),
        &Collaborators::offline(),
    )
    .unwrap_err();
    assert!(matches!(err, PolicyError::Validation(_)));
}

#[test]
fn scenario_non_default_group_wins_over_default() {
    let engine = engine(concat!(
        "proxy.server.auth alice:pasSw0rD\n",
        "proxy.server.list.start A\n",
        "websocks://127.0.0.1:18686\n",
        "proxy.server.list.end\n",
        "proxy.server.list.start\n",
        "websocks://127.0.0.1:18687\n",
        "proxy.server.list.end\n",
        "proxy.domain.list.start\n",
        "foo.com\n",
        "proxy.domain.list.end\n",
        "proxy.domain.list.start A\n",
        "foo.com\n",
        "proxy.domain.list.end\n",
    ));

    match engine.classify("foo.com", 443) {
        Decision::Proxy { group, .. } => assert_eq!(group, "A"),
        other => panic!("expected Proxy via group A, got {:?}", other),
    }
}

#[test]
fn scenario_port_rule() {
    let engine = engine(&format!(
        "{}{}",
        AUTH_AND_SERVER,
        concat!(
            "proxy.domain.list.start\n",
            ":22\n",
            "proxy.domain.list.end\n",
        )
    ));

    assert!(matches!(
        engine.classify("anything", 22),
        Decision::Proxy { .. }
    ));
    assert_eq!(engine.classify("anything", 80), Decision::Direct);
}

#[test]
fn scenario_missing_auth_fails_validation() {
    let err = parse_str(
        concat!(
            "proxy.server.list.start\n",
            "websocks://127.0.0.1:18686\n",
            "proxy.server.list.end\n",
        ),
        &Collaborators::offline(),
    )
    .unwrap_err();
    assert!(matches!(err, PolicyError::Validation(_)));
}

// ── properties ──

#[test]
fn property_matcher_aliases_exist_in_groups() {
    let cfg = parse_str(
        concat!(
            "proxy.server.auth a:b\n",
            "proxy.server.list.start A\n",
            "websocks://127.0.0.1:18686\n",
            "proxy.server.list.end\n",
            "proxy.domain.list.start A\n",
            "youtube.com\n",
            "proxy.domain.list.end\n",
            "proxy.resolve.list.start A\n",
            "youtube.com\n",
            "proxy.resolve.list.end\n",
            "no-proxy.domain.list.start A\n",
            "intranet.local\n",
            "no-proxy.domain.list.end\n",
        ),
        &Collaborators::offline(),
    )
    .unwrap();

    for (alias, _) in cfg
        .domains()
        .into_iter()
        .chain(cfg.proxy_resolves())
        .chain(cfg.no_proxy_domains())
    {
        assert!(cfg.group(alias).is_some(), "alias {} has no server group", alias);
    }
}

#[test]
fn property_default_iterates_last() {
    let cfg = parse_str(
        concat!(
            "proxy.server.auth a:b\n",
            "proxy.server.list.start\n",
            "websocks://127.0.0.1:18686\n",
            "proxy.server.list.end\n",
            "proxy.server.list.start A\n",
            "websocks://127.0.0.1:18687\n",
            "proxy.server.list.end\n",
            "proxy.server.list.start B\n",
            "websocks://127.0.0.1:18688\n",
            "proxy.server.list.end\n",
            // DEFAULT declared first in every list
            "proxy.domain.list.start\n",
            "one.com\n",
            "proxy.domain.list.end\n",
            "proxy.domain.list.start A\n",
            "two.com\n",
            "proxy.domain.list.end\n",
            "proxy.domain.list.start B\n",
            "three.com\n",
            "proxy.domain.list.end\n",
            "no-proxy.domain.list.start\n",
            "x.com\n",
            "no-proxy.domain.list.end\n",
            "no-proxy.domain.list.start B\n",
            "y.com\n",
            "no-proxy.domain.list.end\n",
        ),
        &Collaborators::offline(),
    )
    .unwrap();

    let domain_order: Vec<&str> = cfg.domains().iter().map(|(a, _)| *a).collect();
    assert_eq!(domain_order, vec!["A", "B", DEFAULT_ALIAS]);

    let no_proxy_order: Vec<&str> = cfg.no_proxy_domains().iter().map(|(a, _)| *a).collect();
    assert_eq!(no_proxy_order, vec!["B", DEFAULT_ALIAS]);
}

#[test]
fn property_server_ports_in_range() {
    let cfg = parse_str(
        concat!(
            "proxy.server.auth a:b\n",
            "proxy.server.list.start\n",
            "websocks://127.0.0.1:1\n",
            "websockss://127.0.0.1:65535\n",
            "proxy.server.list.end\n",
        ),
        &Collaborators::offline(),
    )
    .unwrap();

    for (_, group) in cfg.groups() {
        for entry in group.entries() {
            assert!(entry.port >= 1);
        }
    }
}

#[test]
fn property_merge_concatenates_in_iteration_order() {
    let cfg = parse_str(
        concat!(
            "proxy.server.auth a:b\n",
            "agent.direct-relay on\n",
            "proxy.https-relay.domain.merge on\n",
            "agent.https-relay.cert-key.list.start\n",
            "relay.crt relay.key\n",
            "agent.https-relay.cert-key.list.end\n",
            "proxy.server.list.start\n",
            "websocks://127.0.0.1:18686\n",
            "proxy.server.list.end\n",
            "proxy.server.list.start A\n",
            "websocks://127.0.0.1:18687\n",
            "proxy.server.list.end\n",
            "proxy.https-relay.domain.list.start\n",
            "seed.com\n",
            "proxy.https-relay.domain.list.end\n",
            "proxy.domain.list.start\n",
            "default-domain.com\n",
            "proxy.domain.list.end\n",
            "proxy.domain.list.start A\n",
            "a-domain.com\n",
            "proxy.domain.list.end\n",
        ),
        &Collaborators::offline(),
    )
    .unwrap();

    // pre-merge contents, then the per-group lists with DEFAULT last
    let merged = cfg.proxy_https_relay_domains();
    assert_eq!(merged.len(), 3);
    assert!(merged[0].matches("seed.com", 443));
    assert!(merged[1].matches("a-domain.com", 443));
    assert!(merged[2].matches("default-domain.com", 443));
}

#[test]
fn https_relay_decision_reuses_domain_group() {
    let engine = engine(concat!(
        "proxy.server.auth alice:pasSw0rD\n",
        "agent.direct-relay on\n",
        "agent.https-relay.cert-key.list.start\n",
        "relay.crt relay.key\n",
        "agent.https-relay.cert-key.list.end\n",
        "proxy.server.list.start A\n",
        "websocks://127.0.0.1:18686\n",
        "proxy.server.list.end\n",
        "proxy.domain.list.start A\n",
        "youtube.com\n",
        "proxy.domain.list.end\n",
        "https-relay.domain.list.start\n",
        "youtube.com\n",
        "https-relay.domain.list.end\n",
    ));

    assert_eq!(
        engine.classify("youtube.com", 443),
        Decision::HttpsRelay {
            group: "A".to_string()
        }
    );
}

#[test]
fn proxy_relay_auto_resolves_at_query_time() {
    // proxy-relay left at auto: with relay domains configured the
    // proxied flows matching the global list carry the https_relay bit
    let engine = engine(concat!(
        "proxy.server.auth alice:pasSw0rD\n",
        "agent.direct-relay on\n",
        "agent.https-relay.cert-key.list.start\n",
        "relay.crt relay.key\n",
        "agent.https-relay.cert-key.list.end\n",
        "proxy.server.list.start\n",
        "websocks://127.0.0.1:18686\n",
        "proxy.server.list.end\n",
        "proxy.domain.list.start\n",
        "video.example\n",
        "proxy.domain.list.end\n",
        "https-relay.domain.list.start\n",
        "tls.example\n",
        "https-relay.domain.list.end\n",
        "proxy.https-relay.domain.list.start\n",
        "video.example\n",
        "proxy.https-relay.domain.list.end\n",
    ));

    assert_eq!(
        engine.classify("video.example", 443),
        Decision::Proxy {
            group: DEFAULT_ALIAS.to_string(),
            resolve_at_upstream: false,
            https_relay: true,
        }
    );
}
