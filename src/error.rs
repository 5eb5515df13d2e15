use thiserror::Error;

/// Errors produced while automating the storefront.
///
/// The taxonomy distinguishes failures that abort a whole run
/// ([`CartError::MissingCredentials`], [`CartError::LoginFlow`],
/// [`CartError::Verification`]), failures that abort the remainder of a
/// batch ([`CartError::SessionExpired`]), failures terminal for a single
/// item ([`CartError::Transport`], [`CartError::Rejected`]) and failures
/// terminal only for the reconciliation step
/// ([`CartError::PanelNotFound`], [`CartError::ParseExhausted`],
/// [`CartError::UnrecognizedShape`]).
#[derive(Debug, Error)]
pub enum CartError {
    /// No username/password configured. Fatal, never retried.
    #[error("no store credentials configured")]
    MissingCredentials,

    /// A step of the login redirect chain did not produce the expected
    /// markup or redirect.
    #[error("login flow failed: {0}")]
    LoginFlow(String),

    /// Login appeared to succeed but the post-login read-back yielded no
    /// cart identifier.
    #[error("session verification failed: {0}")]
    Verification(String),

    /// A remote call signalled an expired or invalid session (HTTP 401/403
    /// or missing auth markers). The cached session must be discarded and
    /// the current batch aborted.
    #[error("session expired")]
    SessionExpired,

    /// Network-level failure (connect error, timeout, malformed response).
    /// Eligible for exactly one retry.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote accepted the call but rejected the operation. The message
    /// is surfaced verbatim. Never retried.
    #[error("rejected by store: {0}")]
    Rejected(String),

    /// The cart panel could not be located after dismiss-and-retry cycles.
    #[error("could not locate the cart panel")]
    PanelNotFound,

    /// Every cart parsing strategy came up empty on a non-empty panel.
    #[error("cart parsing exhausted: {0}")]
    ParseExhausted(String),

    /// A structured response matched none of the known cart shapes. Carries
    /// a truncated snippet of the body for remote diagnosis.
    #[error("unrecognized cart response shape: {0}")]
    UnrecognizedShape(String),

    /// Browser-level failure: launch, tab, navigation or script evaluation.
    #[error("browser error: {0}")]
    Browser(String),

    /// The run was cancelled by the caller. Clean early termination, not a
    /// real error; partial results are preserved upstream.
    #[error("cancelled")]
    Cancelled,
}

impl CartError {
    /// Transport-level failures are the only class eligible for retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, CartError::Transport(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CartError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CartError::Transport("timeout".into()).is_transient());
        assert!(!CartError::Rejected("out of stock".into()).is_transient());
        assert!(!CartError::SessionExpired.is_transient());
    }

    #[test]
    fn test_rejection_message_surfaced_verbatim() {
        let err = CartError::Rejected("item limit exceeded".into());
        assert_eq!(err.to_string(), "rejected by store: item limit exceeded");
    }
}
