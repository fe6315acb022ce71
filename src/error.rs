use std::time::Duration;

use crate::api::Problem;

/// Boxed error of an external collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type returned by every protocol operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while talking to an ACME provider.
///
/// Every failure path in the workflow ends in one of these variants; nothing is only logged.
/// Use [`Error::is_retryable()`] to decide whether repeating the operation can help.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connectivity or TLS failure, or a 5xx reply without a problem document.
    #[error("transport failure: {0}")]
    Transport(#[source] BoxError),

    /// The CA replied with a body or status that does not fit the protocol.
    #[error("unexpected response: {0}")]
    Protocol(String),

    /// Structured rejection from the CA.
    #[error("CA rejected request (HTTP {status}): {problem}")]
    Ca {
        /// HTTP status code of the reply.
        status: u16,

        /// The decoded problem document, including per-identifier subproblems.
        problem: Problem,

        /// `Retry-After` hint sent alongside the problem, if any.
        retry_after: Option<Duration>,
    },

    /// A poll loop reached its deadline before the resource reached a terminal status.
    #[error("timed out waiting for {what} at {url}")]
    ValidationTimeout { what: &'static str, url: String },

    /// Caught before any request was sent.
    #[error("local validation failed: {0}")]
    LocalValidation(String),

    /// The CA marked the authorization for `identifier` as failed.
    #[error("authorization for {identifier} is invalid{}", fmt_problem(.problem))]
    AuthorizationInvalid {
        identifier: String,
        problem: Option<Problem>,
    },

    /// The CA moved the order to `invalid`.
    #[error("order {url} is invalid{}", fmt_problem(.problem))]
    OrderInvalid { url: String, problem: Option<Problem> },

    /// The challenge solver could not provision the proof.
    #[error("challenge solver failed for {identifier}: {source}")]
    Solver {
        identifier: String,
        #[source]
        source: BoxError,
    },
}

fn fmt_problem(problem: &Option<Problem>) -> String {
    match problem {
        Some(problem) => format!(": {problem}"),
        None => String::new(),
    }
}

impl Error {
    pub(crate) fn transport<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Transport(err.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub(crate) fn local(msg: impl Into<String>) -> Self {
        Error::LocalValidation(msg.into())
    }

    /// Returns true if repeating the operation later may succeed.
    ///
    /// Transport failures, poll timeouts, 5xx replies and `rateLimited` problems are retryable.
    /// Everything else needs a change on the caller's side first.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) | Error::ValidationTimeout { .. } => true,
            Error::Ca {
                status, problem, ..
            } => *status >= 500 || problem.is_rate_limited(),
            _ => false,
        }
    }

    /// The CA's `Retry-After` hint, when the failure carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Ca { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// The problem document attached to this error, if any.
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            Error::Ca { problem, .. } => Some(problem),
            Error::AuthorizationInvalid { problem, .. } | Error::OrderInvalid { problem, .. } => {
                problem.as_ref()
            }
            _ => None,
        }
    }

    /// The identifier this failure is scoped to, if it is scoped to one.
    ///
    /// For CA problems this is the identifier of the first subproblem that names one.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Error::AuthorizationInvalid { identifier, .. } | Error::Solver { identifier, .. } => {
                Some(identifier)
            }
            Error::Ca { problem, .. } | Error::OrderInvalid {
                problem: Some(problem),
                ..
            } => problem.failed_identifiers().next(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(format!("malformed JSON: {err}"))
    }
}
