use thiserror::Error;

/// Policy engine error types.
///
/// Any failure during parsing or validation is fatal for startup: the agent
/// entry point receives exactly one of these and decides whether to exit or
/// retry with another file. No partial config is ever published.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("resource error: {path}: {message}")]
    Resource { path: String, message: String },

    #[error("network error: {url}: {message}")]
    Network { url: String, message: String },

    #[error("resolve error: {0}")]
    Resolve(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl PolicyError {
    /// Build a `Parse` error carrying the 1-based line number.
    pub fn at_line(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PolicyError>;
