//! Error types for the member portal.
//!
//! Every fallible operation in this crate returns [`PortalError`]. The variants
//! follow the portal's failure taxonomy, so the page that triggered an action
//! can decide how to present the failure without inspecting transport details.
//!
//! # Error Categories
//!
//! - **Session** ([`PortalError::AuthRequired`]): the member must log in again
//! - **User input** ([`PortalError::ValidationFailed`],
//!   [`PortalError::TokenizationFailed`]): shown inline, the form is kept
//! - **Backend** ([`PortalError::Unavailable`], [`PortalError::MalformedResponse`]):
//!   shown as a generic message, the member may retry by hand
//! - **Local state** ([`PortalError::InvalidTransition`],
//!   [`PortalError::SubmissionInProgress`]): the action is not legal right now
//!
//! # Examples
//!
//! ```
//! use member_portal::error::{PortalError, Result};
//!
//! fn require_email(email: &str) -> Result<()> {
//!     if !email.contains('@') {
//!         return Err(PortalError::ValidationFailed("Enter a valid email address".to_owned()));
//!     }
//!     Ok(())
//! }
//!
//! let err = require_email("nobody").unwrap_err();
//! assert_eq!(err.user_message(), "Enter a valid email address");
//! ```

use thiserror::Error;

/// Result type alias for portal operations.
pub type Result<T> = std::result::Result<T, PortalError>;

/// Message shown for failures the member cannot fix by editing the form.
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";

/// Errors that can occur in the member portal.
///
/// The error messages are user-facing where the variant is user-correctable.
/// Use [`PortalError::user_message`] to get the text a form should display.
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum PortalError {
    /// The session is missing, expired or rejected by the backend.
    ///
    /// Raised when the backend answers `401` or `403`, or when a protected
    /// page is opened without a stored session.
    ///
    /// # Recovery
    ///
    /// Clear the stored session and send the member to the login page.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// The backend (or local validation) rejected the submitted input.
    ///
    /// The message comes verbatim from the backend's error body when one is
    /// available.
    ///
    /// # Recovery
    ///
    /// Show the message next to the form and let the member correct it.
    #[error("{0}")]
    ValidationFailed(String),

    /// The payment widget or tokenization service rejected the card data.
    ///
    /// # Recovery
    ///
    /// Keep the subscribe form open with its fields intact and show the reason.
    #[error("payment details rejected: {0}")]
    TokenizationFailed(String),

    /// The backend could not be reached or failed internally.
    ///
    /// Common causes include:
    /// - Connection refused or DNS failure
    /// - Request timeout
    /// - `5xx` responses
    ///
    /// # Recovery
    ///
    /// Show [`GENERIC_FAILURE_MESSAGE`]. There is no automatic retry.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The backend answered successfully but the body did not match the
    /// expected shape.
    #[error("unexpected response from server: {0}")]
    MalformedResponse(String),

    /// The requested dashboard action is not legal in the current view mode.
    ///
    /// # Examples
    ///
    /// ```
    /// use member_portal::error::PortalError;
    ///
    /// let err = PortalError::InvalidTransition("a subscription already exists".to_owned());
    /// assert!(err.to_string().contains("not allowed"));
    /// ```
    #[error("action not allowed: {0}")]
    InvalidTransition(String),

    /// A subscribe, update or cancel request is already in flight.
    #[error("a request is already being processed")]
    SubmissionInProgress,

    /// A plan code failed validation.
    ///
    /// Plan codes must be 1-64 characters of ASCII letters, digits, hyphens
    /// and underscores.
    #[error("Invalid plan code: {0}")]
    InvalidPlanCode(String),

    /// A subscription identifier failed validation.
    #[error("Invalid subscription id: {0}")]
    InvalidSubscriptionId(String),

    /// Configuration could not be parsed or is out of bounds.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The persisted session could not be read or written.
    #[error("Session storage error: {0}")]
    SessionStore(String),
}

impl PortalError {
    /// Returns the text a form or banner should display for this error.
    ///
    /// User-correctable errors are shown verbatim; backend failures collapse
    /// into [`GENERIC_FAILURE_MESSAGE`].
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::ValidationFailed(msg) | Self::TokenizationFailed(msg) => msg.clone(),
            Self::AuthRequired(_) => "Your session has expired. Please log in again.".to_owned(),
            Self::Unavailable(_) | Self::MalformedResponse(_) => {
                GENERIC_FAILURE_MESSAGE.to_owned()
            }
            Self::InvalidTransition(_)
            | Self::SubmissionInProgress
            | Self::InvalidPlanCode(_)
            | Self::InvalidSubscriptionId(_)
            | Self::ConfigError(_)
            | Self::SessionStore(_) => self.to_string(),
        }
    }

    /// Returns true when the caller must force a re-login.
    #[must_use]
    pub const fn is_auth_required(&self) -> bool {
        matches!(self, Self::AuthRequired(_))
    }
}

impl From<reqwest::Error> for PortalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}
