//! Proxy-wide error type.
//!
//! Every fallible operation in the proxy returns a typed `ProxyError` or
//! propagates one with `?`. The HTTP surface maps variants to status codes
//! per the error handling policy: transient backend errors, unresolved
//! mappings, semantic backend errors, admission rejection/timeout,
//! persistence unavailability, and fatal startup errors.

use thiserror::Error;

pub type ProxyResult<T> = Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Connection reset or a non-timeout 502/503/504 talking to a backend instance.
    #[error("transient backend error: {0}")]
    TransientBackend(String),

    /// An outbound backend call (or the admission acquire) exceeded its
    /// deadline end-to-end. Surfaced to the client as 504, distinct from
    /// the 502 used for other transient backend errors.
    #[error("backend call timed out: {0}")]
    Timeout(String),

    /// A collection name could not be resolved to a UUID on the target instance.
    #[error("mapping unresolved for {collection} on {instance}")]
    MappingUnresolved { collection: String, instance: String },

    /// The backend returned a non-2xx status that is not one of the
    /// idempotence-tolerant classes (404 on DELETE, 409 on CREATE).
    #[error("backend returned semantic error {status}: {body}")]
    BackendSemantic { status: u16, body: String },

    /// The admission semaphore could not be acquired before `request_timeout`.
    #[error("admission timed out")]
    AdmissionTimeout,

    /// The admission queue was full.
    #[error("admission queue full")]
    AdmissionRejected,

    /// No healthy backend instance was available to serve the request.
    #[error("no healthy instance available")]
    NoHealthyInstance,

    /// The persistence store could not be reached.
    #[error("persistence store unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Startup-fatal: schema init or port bind failure. Process must exit nonzero.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ProxyError {
    /// HTTP status code a foreground request should surface for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::TransientBackend(_) => 502,
            ProxyError::Timeout(_) => 504,
            ProxyError::MappingUnresolved { .. } => 404,
            ProxyError::BackendSemantic { status, .. } => *status,
            ProxyError::AdmissionTimeout => 503,
            ProxyError::AdmissionRejected => 503,
            ProxyError::NoHealthyInstance => 503,
            ProxyError::PersistenceUnavailable(_) => 503,
            ProxyError::Fatal(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::TransientBackend(_) => "TRANSIENT_BACKEND",
            ProxyError::Timeout(_) => "TIMEOUT",
            ProxyError::MappingUnresolved { .. } => "MAPPING_UNRESOLVED",
            ProxyError::BackendSemantic { .. } => "BACKEND_SEMANTIC",
            ProxyError::AdmissionTimeout => "ADMISSION_TIMEOUT",
            ProxyError::AdmissionRejected => "ADMISSION_REJECTED",
            ProxyError::NoHealthyInstance => "NO_HEALTHY_INSTANCE",
            ProxyError::PersistenceUnavailable(_) => "PERSISTENCE_UNAVAILABLE",
            ProxyError::Fatal(_) => "FATAL",
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProxyError::Timeout(e.to_string())
        } else {
            ProxyError::TransientBackend(e.to_string())
        }
    }
}

impl From<tokio_postgres::Error> for ProxyError {
    fn from(e: tokio_postgres::Error) -> Self {
        ProxyError::PersistenceUnavailable(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for ProxyError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        ProxyError::PersistenceUnavailable(e.to_string())
    }
}
