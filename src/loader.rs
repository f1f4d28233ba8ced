//! Startup resource loading.
//!
//! Everything here is blocking by design: config resources (ABP lists,
//! cert files) are loaded once while the agent starts, before the event
//! loops exist. Remote fetches go through the [`HttpFetch`] seam so tests
//! can run without a network.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::error::{PolicyError, Result};

/// Timeout applied to remote ABP list fetches.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Expand a leading `~` to the current user's home directory.
///
/// Paths without the prefix are returned untouched; if the home directory
/// cannot be determined the `~` is kept literally.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Home directory as a string for helper-program template substitution;
/// falls back to a literal `~` when the home directory is unknown.
pub fn home_dir_string() -> String {
    dirs::home_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~".to_string())
}

/// Read a local file as text, with `~` expansion.
pub fn read_text(path: &str) -> Result<String> {
    let expanded = expand_home(path);
    fs::read_to_string(&expanded).map_err(|e| PolicyError::Resource {
        path: expanded.display().to_string(),
        message: e.to_string(),
    })
}

/// Blocking HTTP(S) GET used for remote ABP filter lists.
pub trait HttpFetch: Send + Sync {
    /// Fetch the URL; only a 200 response with a non-empty body is
    /// accepted.
    fn get(&self, url: &str) -> Result<String>;
}

/// Production fetcher backed by a blocking `ureq` agent.
pub struct UreqHttpClient {
    agent: ureq::Agent,
}

impl UreqHttpClient {
    pub fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(FETCH_TIMEOUT))
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetch for UreqHttpClient {
    fn get(&self, url: &str) -> Result<String> {
        let mut response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| PolicyError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(PolicyError::Network {
                url: url.to_string(),
                message: format!("response status not 200: {}", status),
            });
        }
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| PolicyError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        if body.is_empty() {
            return Err(PolicyError::Network {
                url: url.to_string(),
                message: "no response body".to_string(),
            });
        }
        Ok(body)
    }
}

/// Fetcher that refuses every request. Used by offline collaborator sets.
pub struct NilHttpFetch;

impl HttpFetch for NilHttpFetch {
    fn get(&self, url: &str) -> Result<String> {
        Err(PolicyError::Network {
            url: url.to_string(),
            message: "network disabled".to_string(),
        })
    }
}

/// Load the raw content of an ABP reference: a local file path or an
/// `http(s)://` URL. The result has its lines trimmed and concatenated,
/// yielding the base64 payload the interpreter expects.
pub fn load_abp_source(reference: &str, http: &dyn HttpFetch) -> Result<String> {
    let content = if reference.contains("://") {
        if !reference.starts_with("http://") && !reference.starts_with("https://") {
            return Err(PolicyError::Resource {
                path: reference.to_string(),
                message: "unknown protocol in abp reference".to_string(),
            });
        }
        info!(url = reference, "fetching abp filter list");
        http.get(reference)?
    } else {
        read_text(reference)?
    };
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect())
}
