use thiserror::Error;

/// Failure of a fetch cycle. No variant ever carries a partial room list.
#[derive(Debug, Error)]
pub enum FindError {
    /// No credential bundle has been published yet; retry shortly.
    #[error("no credentials published yet, retry shortly")]
    CredentialAbsent,
    /// Network failure or timeout talking to the booking platform.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    /// Upstream answered with a non-2xx status (expired sessions land here).
    #[error("upstream returned status {0}")]
    UpstreamStatus(u16),
    /// Malformed timestamp or unexpected JSON shape.
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl FindError {
    pub fn parse(context: &str, err: impl std::fmt::Display) -> Self {
        FindError::Parse(format!("{context}: {err}"))
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            FindError::CredentialAbsent => "credential_absent",
            FindError::UpstreamUnavailable(_) => "upstream_unavailable",
            FindError::UpstreamStatus(_) => "upstream_status",
            FindError::Parse(_) => "parse",
            FindError::InvalidQuery(_) => "invalid_query",
        }
    }
}

impl From<reqwest::Error> for FindError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => FindError::UpstreamStatus(status.as_u16()),
            None => FindError::UpstreamUnavailable(e.to_string()),
        }
    }
}
