//! Backend API abstraction.
//!
//! [`SubscriptionApi`] covers the authenticated plan and subscription calls,
//! [`AuthApi`] the account calls made before a session exists. Both are
//! implemented over HTTP by [`HttpApiClient`]; the dashboard controller only
//! depends on the traits.
//!
//! # Examples
//!
//! ```rust,no_run
//! use member_portal::{
//!     api::{HttpApiClient, SubscriptionApi},
//!     config::ApiConfig,
//!     session::Session,
//! };
//!
//! # async fn example() -> member_portal::Result<()> {
//! let session = Session::new("tok_123", serde_json::Value::Null)?;
//! let client = HttpApiClient::new(&ApiConfig::default())?.with_session(session);
//!
//! for plan in client.list_plans().await? {
//!     println!("{}", plan.selector_label());
//! }
//! # Ok(())
//! # }
//! ```

#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    error::{PortalError, Result},
    models::{Plan, PlanCode, Subscription, SubscriptionId},
    payment::PaymentToken,
    session::Session,
};

pub mod http;

pub use http::HttpApiClient;

/// Authenticated plan and subscription operations.
///
/// Implementations attach the member's bearer token to every call and map
/// failures onto [`PortalError::AuthRequired`],
/// [`PortalError::ValidationFailed`] and [`PortalError::Unavailable`]. No call
/// is retried.
pub trait SubscriptionApi: Send + Sync {
    /// Lists every plan on offer, in backend order.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or a plan is malformed.
    fn list_plans(&self) -> impl Future<Output = Result<Vec<Plan>>> + Send;

    /// Returns the member's current live subscription, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the body is malformed.
    fn get_subscription(&self) -> impl Future<Output = Result<Option<Subscription>>> + Send;

    /// Subscribes the member to `plan_code`, paying with a single-use token.
    ///
    /// Any success status means the subscription exists. The created document
    /// is returned when the reply carries one; `None` otherwise.
    ///
    /// # Errors
    ///
    /// Returns error if the backend rejects the subscription or is unreachable.
    fn create_subscription(
        &self,
        plan_code: &PlanCode,
        token: &PaymentToken,
    ) -> impl Future<Output = Result<Option<Subscription>>> + Send;

    /// Moves subscription `id` to `plan_code`.
    ///
    /// A success reply the client cannot read reports the submitted plan.
    ///
    /// # Errors
    ///
    /// Returns error if the backend rejects the change or is unreachable.
    fn update_subscription(
        &self,
        id: &SubscriptionId,
        plan_code: &PlanCode,
    ) -> impl Future<Output = Result<PlanChange>> + Send;

    /// Cancels subscription `id`.
    ///
    /// # Errors
    ///
    /// Returns error if the backend rejects the cancellation or is unreachable.
    fn cancel_subscription(&self, id: &SubscriptionId) -> impl Future<Output = Result<()>> + Send;
}

/// Account operations that do not need a session.
pub trait AuthApi: Send + Sync {
    /// Registers a new account.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::ValidationFailed`] for missing fields or a
    /// rejected signup, [`PortalError::Unavailable`] on transport failure.
    fn signup(&self, request: &SignupRequest) -> impl Future<Output = Result<()>> + Send;

    /// Exchanges credentials for a session.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::ValidationFailed`] with the backend's text when
    /// the credentials are rejected.
    fn login(&self, request: &LoginRequest) -> impl Future<Output = Result<Session>> + Send;
}

/// Outcome of a plan change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanChange {
    /// Plan the subscription now points at.
    pub new_plan: PlanCode,
}

/// Signup form.
#[derive(Clone, Serialize)]
pub struct SignupRequest {
    /// Full name.
    pub fullname: String,
    /// Login email.
    pub email: String,
    /// Chosen password.
    pub password: String,
}

impl SignupRequest {
    /// Checks the form before it is sent.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::ValidationFailed`] if a field is blank or the
    /// email has no `@`.
    pub fn validate(&self) -> Result<()> {
        if self.fullname.trim().is_empty()
            || self.email.trim().is_empty()
            || self.password.is_empty()
        {
            return Err(PortalError::ValidationFailed("All fields are required".to_owned()));
        }
        validate_email(&self.email)
    }
}

impl fmt::Debug for SignupRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignupRequest")
            .field("fullname", &self.fullname)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Login form.
#[derive(Clone, Serialize)]
pub struct LoginRequest {
    /// Login email.
    pub email: String,
    /// Password.
    pub password: String,
}

impl LoginRequest {
    /// Checks the form before it is sent.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::ValidationFailed`] if a field is blank or the
    /// email has no `@`.
    pub fn validate(&self) -> Result<()> {
        if self.email.trim().is_empty() || self.password.is_empty() {
            return Err(PortalError::ValidationFailed(
                "Email and password are required".to_owned(),
            ));
        }
        validate_email(&self.email)
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

fn validate_email(email: &str) -> Result<()> {
    match email.trim().split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(PortalError::ValidationFailed("Enter a valid email address".to_owned())),
    }
}

/// Body of `POST /subscribe`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubscribeBody<'a> {
    pub(crate) plan_code: &'a str,
    pub(crate) token: &'a str,
}

/// Body of `PUT /subscriptions/:id`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdatePlanBody<'a> {
    pub(crate) plan_code: &'a str,
}

/// Success body of `PUT /subscriptions/:id`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum UpdateResponse {
    /// `{ "newPlan": "pro" }`
    NewPlan {
        #[serde(rename = "newPlan")]
        new_plan: PlanCode,
    },
    /// The updated subscription document.
    Subscription(Box<Subscription>),
}

impl From<UpdateResponse> for PlanChange {
    fn from(response: UpdateResponse) -> Self {
        match response {
            UpdateResponse::NewPlan { new_plan } => Self { new_plan },
            UpdateResponse::Subscription(sub) => Self { new_plan: sub.plan_code().clone() },
        }
    }
}

/// Success body of `POST /login`.
#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub(crate) token: String,
    #[serde(default)]
    pub(crate) user: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_signup_requires_all_fields() {
        let request = SignupRequest {
            fullname: String::new(),
            email: "ada@example.com".to_owned(),
            password: "secret".to_owned(),
        };
        let err = request.validate().unwrap_err();
        assert_eq!(err.user_message(), "All fields are required");
    }

    #[test]
    fn test_signup_rejects_bad_email() {
        let request = SignupRequest {
            fullname: "Ada".to_owned(),
            email: "ada.example.com".to_owned(),
            password: "secret".to_owned(),
        };
        assert!(matches!(request.validate(), Err(PortalError::ValidationFailed(_))));
    }

    #[test]
    fn test_login_validation() {
        let ok = LoginRequest { email: "ada@example.com".to_owned(), password: "pw".to_owned() };
        assert!(ok.validate().is_ok());

        let blank = LoginRequest { email: "ada@example.com".to_owned(), password: String::new() };
        assert!(blank.validate().is_err());

        let no_domain = LoginRequest { email: "ada@".to_owned(), password: "pw".to_owned() };
        assert!(no_domain.validate().is_err());
    }

    #[test]
    fn test_requests_redact_passwords() {
        let request = LoginRequest { email: "a@b.c".to_owned(), password: "hunter2".to_owned() };
        assert!(!format!("{request:?}").contains("hunter2"));

        let request = SignupRequest {
            fullname: "A".to_owned(),
            email: "a@b.c".to_owned(),
            password: "hunter2".to_owned(),
        };
        assert!(!format!("{request:?}").contains("hunter2"));
    }

    #[test]
    fn test_subscribe_body_wire_names() {
        let body = SubscribeBody { plan_code: "basic", token: "tok_1" };
        assert_eq!(serde_json::to_value(&body).unwrap(), json!({ "planCode": "basic", "token": "tok_1" }));
    }

    #[test]
    fn test_update_response_new_plan() {
        let response: UpdateResponse = serde_json::from_value(json!({ "newPlan": "pro" })).unwrap();
        assert_eq!(PlanChange::from(response).new_plan.as_str(), "pro");
    }

    #[test]
    fn test_update_response_subscription() {
        let response: UpdateResponse = serde_json::from_value(json!({
            "id": "sub_1",
            "plan": { "code": "pro" },
            "state": "active"
        }))
        .unwrap();
        assert_eq!(PlanChange::from(response).new_plan.as_str(), "pro");
    }
}
