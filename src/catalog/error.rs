use thiserror::Error;

/// Errors surfaced by catalog clients.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Credentials were rejected or are missing. Never retried.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Client must authenticate before calling the catalog")]
    NotAuthenticated,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// HTTP 429. `retry_after_secs` comes from the `Retry-After` header.
    #[error("Rate limited by catalog (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Catalog returned HTTP {status} for {url}")]
    ApiStatus { status: u16, url: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected catalog response: {0}")]
    Decode(String),

    #[error("Archive extraction failed: {0}")]
    Archive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    /// Map a non-success HTTP status to an error. Returns `None` for 2xx.
    pub fn from_status(status: u16, url: &str, retry_after: Option<&str>) -> Option<Self> {
        match status {
            200..=299 => None,
            401 | 403 => Some(Self::Authentication(format!(
                "HTTP {} from {}",
                status, url
            ))),
            429 => Some(Self::RateLimited {
                retry_after_secs: retry_after.and_then(|v| v.trim().parse().ok()),
            }),
            _ => Some(Self::ApiStatus {
                status,
                url: url.to_string(),
            }),
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::NotAuthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_statuses_are_not_errors() {
        assert!(CatalogError::from_status(200, "u", None).is_none());
        assert!(CatalogError::from_status(204, "u", None).is_none());
    }

    #[test]
    fn test_auth_statuses() {
        for status in [401, 403] {
            let err = CatalogError::from_status(status, "u", None).unwrap();
            assert!(err.is_authentication());
        }
    }

    #[test]
    fn test_rate_limit_reads_retry_after() {
        match CatalogError::from_status(429, "u", Some(" 120 ")) {
            Some(CatalogError::RateLimited { retry_after_secs }) => {
                assert_eq!(retry_after_secs, Some(120))
            }
            other => panic!("unexpected: {:?}", other),
        }
        // HTTP-date form is not parsed; caller falls back to its default.
        match CatalogError::from_status(429, "u", Some("Wed, 21 Oct 2015 07:28:00 GMT")) {
            Some(CatalogError::RateLimited { retry_after_secs }) => assert_eq!(retry_after_secs, None),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_other_statuses() {
        let err = CatalogError::from_status(503, "https://x/y", None).unwrap();
        assert!(matches!(err, CatalogError::ApiStatus { status: 503, .. }));
        assert!(!err.is_authentication());
    }
}
