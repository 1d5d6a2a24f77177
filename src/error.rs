//! Error types for the Birst administration client.

use crate::soap::StatusResult;
use thiserror::Error;

/// Message used whenever the tenant has no usable Birst setup.
pub const NOT_CONFIGURED: &str = "Birst has not been configured for this environment";

/// Fault messages the Birst login operation uses to reject credentials.
///
/// These are treated as "no token" rather than as protocol faults.
const LOGIN_FAILURE_EXACT: &str = "Validation failure";
const LOGIN_FAILURE_PREFIXES: [&str; 2] = [
    // unknown user
    "Login: Failed web service login request for user",
    // known user, wrong password
    "Login: Failed web services login attempt for user",
];

/// Birst client errors.
#[derive(Error, Debug)]
pub enum BirstError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("{} {}", .0.status_code, .0.message)]
    JobFailed(StatusResult),

    #[error("SOAP fault: {0}")]
    Fault(SoapFault),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl BirstError {
    /// The configuration error raised for a tenant without Birst settings.
    pub fn not_configured() -> Self {
        Self::Config(NOT_CONFIGURED.to_string())
    }

    /// The job status carried by a [`BirstError::JobFailed`].
    pub fn job_status(&self) -> Option<&StatusResult> {
        match self {
            Self::JobFailed(status) => Some(status),
            _ => None,
        }
    }
}

impl From<quick_xml::Error> for BirstError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Xml(e.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BirstError>;

/// A SOAP fault returned by the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapFault {
    /// `faultcode`, e.g. `soap:Server`
    pub code: String,
    /// `faultstring`
    pub message: String,
}

impl SoapFault {
    /// Create a new fault.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether this fault is one of the known credential rejections of `Login`.
    pub fn is_login_failure(&self) -> bool {
        self.message == LOGIN_FAILURE_EXACT
            || LOGIN_FAILURE_PREFIXES
                .iter()
                .any(|prefix| self.message.starts_with(prefix))
    }
}

impl std::fmt::Display for SoapFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
