//! Configuration and routing-policy core for a WebSocks proxy agent.
//!
//! The agent accepts SOCKS5 / HTTP-CONNECT / Shadowsocks / DNS traffic
//! locally and forwards selected flows through remote WebSocks servers.
//! This crate is the policy half of that: it parses the agent's
//! line-oriented configuration into an immutable model, compiles the
//! domain-matching rules (suffix, regex, port, Adblock-Plus filter
//! lists), validates cross-section consistency, and answers the one
//! question the dispatcher asks per connection: what do we do with
//! `(host, port)`?
//!
//! # Example
//!
//! ```rust
//! use websocks_policy::{parse_str, Collaborators, Decision, PolicyEngine};
//!
//! let config_text = "
//! agent.listen 11080
//! proxy.server.auth alice:pasSw0rD
//! proxy.server.list.start
//! websocks://127.0.0.1:18686
//! proxy.server.list.end
//! proxy.domain.list.start
//! youtube.com
//! :22
//! proxy.domain.list.end
//! ";
//!
//! let config = parse_str(config_text, &Collaborators::offline()).unwrap();
//! let engine = PolicyEngine::new(config);
//!
//! match engine.classify("www.youtube.com", 443) {
//!     Decision::Proxy { group, .. } => assert_eq!(group, "DEFAULT"),
//!     other => panic!("unexpected decision: {:?}", other),
//! }
//! assert_eq!(engine.classify("example.com", 443), Decision::Direct);
//! ```
//!
//! # Rule Syntax
//!
//! Each list line builds exactly one rule:
//!
//! | Form | Rule |
//! |------|------|
//! | `youtube.com` | exact host or dot-suffix match |
//! | `/.*google\.com.*/` | regex over the host (`regex` crate dialect) |
//! | `:22` | destination-port match |
//! | `[~/block.b64]` / `[https://…]` | base64 Adblock-Plus filter list |
//!
//! # Concurrency
//!
//! `parse_str`/`parse_file` run once, synchronously, on the startup path
//! and block on DNS, HTTP and helper-process spawn through the
//! [`Collaborators`] seams. The resulting [`PolicyEngine`] is immutable;
//! `classify` takes no lock and may be called from any thread.

pub mod certkey;
pub mod compile;
pub mod config;
pub mod error;
pub mod group;
pub mod loader;
pub mod matcher;
pub mod parser;
pub mod policy;
pub mod process;
pub mod resolver;
pub mod transport;
pub mod types;

mod validate;

// Re-export commonly used items
pub use certkey::{CertKey, CertKeyStore, FsCertKeyStore, NilCertKeyStore};
pub use config::Config;
pub use error::{PolicyError, Result};
pub use group::{
    AgentServerGroupFactory, CheckProtocol, HealthCheckConfig, Selection, ServerEntry,
    ServerGroup, ServerGroupFactory,
};
pub use loader::{expand_home, HttpFetch, NilHttpFetch, UreqHttpClient};
pub use matcher::{AbpFilter, DomainRule};
pub use parser::{parse_file, parse_str, Collaborators};
pub use policy::{Decision, PolicyEngine};
pub use process::{NilProcessRunner, ProcessRunner, StdProcessRunner};
pub use resolver::{NilResolver, Resolver, StaticResolver, SystemResolver};
pub use transport::{LoopGroup, LoopToken, MuxFactory, RoundRobinLoops};
pub use types::{ProxyRelay, DEFAULT_ALIAS};
