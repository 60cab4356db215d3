use thiserror::Error;

/// Failure of a single request against radicle-httpd.
///
/// Returned as a value from every transport call, never raised as a panic.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Could not reach the service at all (DNS, refused connection, TLS, ...)
    #[error("httpd unreachable at {url}: {message}")]
    Network { url: String, message: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// The service answered with a non-2xx status
    #[error("httpd answered {status} for {url}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    /// The body was not the JSON shape the endpoint declares
    #[error("unexpected response body from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("invalid httpd url '{0}'")]
    InvalidUrl(String),
}

impl TransportError {
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let url = url.to_string();
        if err.is_timeout() {
            TransportError::Timeout { url }
        } else if err.is_decode() {
            TransportError::Decode {
                url,
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            TransportError::Status {
                status: status.as_u16(),
                url,
                body: String::new(),
            }
        } else if err.is_builder() {
            TransportError::InvalidUrl(url)
        } else {
            TransportError::Network {
                url,
                message: err.to_string(),
            }
        }
    }
}

/// Errors surfaced by the patch store.
///
/// `Clone` because a fetch-all outcome is shared between every caller that
/// joined the same in-flight request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Unable to resolve the repository id of the open workspace")]
    NoRepository,

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// One of the per-status list requests failed; nothing was applied
    #[error("fetching {status} patches failed: {source}")]
    PartialFetch {
        status: &'static str,
        source: TransportError,
    },

    /// The store was reset while the fetch was in flight; its result was dropped
    #[error("patch fetch was superseded by a store reset")]
    Superseded,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Rejection of `rad cob show` output that does not fit the patch schema.
#[derive(Error, Debug, PartialEq)]
pub enum CobError {
    #[error("cob output is not valid JSON: {0}")]
    Json(String),

    #[error("patch {0} has no revisions")]
    NoRevisions(String),

    #[error("revision {revision} is malformed: {reason}")]
    Revision { revision: String, reason: String },

    #[error("merge by {author} references unknown revision {revision}")]
    DanglingMerge { author: String, revision: String },

    #[error("unknown patch status '{0}'")]
    UnknownStatus(String),
}

impl From<serde_json::Error> for CobError {
    fn from(e: serde_json::Error) -> Self {
        CobError::Json(e.to_string())
    }
}
