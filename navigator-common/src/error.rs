//! Error taxonomy: four kinds (Transport, Protocol, Upstream, Invariant),
//! plus the wire error codes that accompany a `ConnectionAck{accepted:
//! false}` or an `ErrorMessage`.

use thiserror::Error;

/// Wire error codes sent on a rejected handshake or a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    DuplicateCluster,
    UnsupportedCapability,
    UpstreamUnavailable,
    NotFound,
    InvalidRequest,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DuplicateCluster => "DUPLICATE_CLUSTER",
            ErrorCode::UnsupportedCapability => "UNSUPPORTED_CAPABILITY",
            ErrorCode::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum NavigatorError {
    /// Stream broken, deadline exceeded, message too large. Recovery is
    /// session teardown + reconnect; this variant never escapes a session
    /// boundary unhandled.
    #[error("transport error: {0}")]
    Transport(String),

    /// Handshake order violated, duplicate RequestID, unknown reply ID,
    /// duplicate ClusterID at handshake.
    #[error("protocol error ({code}): {message}")]
    Protocol { code: ErrorCode, message: String },

    /// Kubernetes API, Envoy admin port, or metrics provider failed for one
    /// correlated request; other flows are unaffected.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A request/session lookup failed cleanly (not found, overloaded,
    /// cancelled, timed out) rather than from infrastructure failure.
    #[error("{0}")]
    Request(#[from] RequestError),

    /// Internal assertion violated (e.g. a correlator resolver fired
    /// twice). Logged at error level and never kills the process.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl NavigatorError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        NavigatorError::Protocol {
            code: ErrorCode::InvalidRequest,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        NavigatorError::Protocol {
            code: ErrorCode::NotFound,
            message: message.into(),
        }
    }

    pub fn duplicate_cluster(cluster_id: &str) -> Self {
        NavigatorError::Protocol {
            code: ErrorCode::DuplicateCluster,
            message: format!("cluster {cluster_id} already has an active session"),
        }
    }

    pub fn unsupported_capability(message: impl Into<String>) -> Self {
        NavigatorError::Protocol {
            code: ErrorCode::UnsupportedCapability,
            message: message.into(),
        }
    }

    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        NavigatorError::Protocol {
            code: ErrorCode::UpstreamUnavailable,
            message: message.into(),
        }
    }

    /// Best-effort mapping to a wire code; variants without a natural code
    /// (Transport/Invariant) surface as INVALID_REQUEST since they should
    /// never reach a client as a typed reply in the first place.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            NavigatorError::Protocol { code, .. } => *code,
            NavigatorError::Upstream(_) => ErrorCode::UpstreamUnavailable,
            NavigatorError::Request(RequestError::Disconnected) => ErrorCode::UpstreamUnavailable,
            NavigatorError::Request(RequestError::Timeout) => ErrorCode::UpstreamUnavailable,
            NavigatorError::Request(RequestError::Overloaded) => ErrorCode::UpstreamUnavailable,
            NavigatorError::Request(RequestError::Canceled) => ErrorCode::InvalidRequest,
            NavigatorError::Transport(_) | NavigatorError::Invariant(_) => {
                ErrorCode::InvalidRequest
            }
        }
    }
}

/// Outcomes of `RequestCorrelator::issue` and
/// `ConnectionRegistry::send_to_cluster`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("cluster disconnected")]
    Disconnected,
    #[error("request timed out")]
    Timeout,
    #[error("request canceled")]
    Canceled,
    #[error("too many pending requests for this session")]
    Overloaded,
}
