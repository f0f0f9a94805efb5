use thiserror::Error;

/// Failures inside the dataset fallback chain.
///
/// Cloneable so a single in-flight refresh can hand the same outcome to every waiter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error("upstream unavailable at {url}: {reason}")]
    UpstreamUnavailable { url: String, reason: String },

    #[error("invalid MRMS payload from {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("no MRMS dataset could be resolved: {0}")]
    ResolutionExhausted(String),
}

impl ResolveError {
    pub fn upstream(url: &str, reason: impl ToString) -> Self {
        Self::UpstreamUnavailable {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(url: &str, reason: impl ToString) -> Self {
        Self::Parse {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HandlerFault {
    #[error("tile url template {0:?} is missing a {{z}}, {{x}} or {{y}} placeholder")]
    InvalidTileTemplate(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DisplayError {
    #[error("failed to fetch radar tiles: {0}")]
    FetchFailed(String),

    #[error("failed to initialize map: {0}")]
    MapInitFailed(String),
}
