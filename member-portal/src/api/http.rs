//! HTTP implementation of the backend API.
//!
//! One shared [`reqwest::Client`] per [`HttpApiClient`] provides connection
//! pooling. Every request carries a fresh `X-Request-Id` which is recorded on
//! the tracing span, so a failing call can be matched with backend logs.

use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    AuthApi, LoginRequest, LoginResponse, PlanChange, SignupRequest, SubscribeBody,
    SubscriptionApi, UpdatePlanBody, UpdateResponse,
};
use crate::{
    config::{ApiConfig, CancelStyle},
    error::{PortalError, Result},
    models::{Plan, PlanCode, Subscription, SubscriptionId, SubscriptionsPayload},
    payment::PaymentToken,
    session::Session,
};

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Longest backend error text passed through to the member.
const MAX_ERROR_MESSAGE_LEN: usize = 300;

/// Whether a call carries the member's bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Auth {
    Bearer,
    Anonymous,
}

/// Backend API client over HTTP/JSON.
///
/// Created without a session for signup and login; attach a session with
/// [`HttpApiClient::with_session`] before using [`SubscriptionApi`].
///
/// # Examples
///
/// ```
/// use member_portal::{api::HttpApiClient, config::ApiConfig};
///
/// let client = HttpApiClient::new(&ApiConfig::default())?;
/// assert_eq!(client.base_url(), "http://localhost:3000");
/// # Ok::<(), member_portal::PortalError>(())
/// ```
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    client: Client,
    base_url: String,
    cancel_style: CancelStyle,
    session: Option<Session>,
}

impl HttpApiClient {
    /// Creates a client from API configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::ConfigError`] if the configuration is invalid or
    /// the HTTP client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| PortalError::ConfigError(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            cancel_style: config.cancel_style,
            session: None,
        })
    }

    /// Attaches the member session used for bearer authentication.
    #[must_use]
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    /// Returns the base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn bearer(&self) -> Result<&str> {
        self.session
            .as_ref()
            .map(Session::token)
            .ok_or_else(|| PortalError::AuthRequired("no session attached to client".to_owned()))
    }

    /// Method and path used to cancel a subscription.
    pub(crate) fn cancel_route(&self, id: &SubscriptionId) -> (Method, String) {
        match self.cancel_style {
            CancelStyle::PutCancel => (Method::PUT, format!("/subscriptions/{id}/cancel")),
            CancelStyle::Delete => (Method::DELETE, format!("/subscriptions/{id}")),
        }
    }

    /// Sends one request and returns the raw success body.
    #[instrument(
        skip(self, body, fallback),
        fields(request_id = tracing::field::Empty)
    )]
    async fn send<B>(
        &self,
        method: Method,
        path: &str,
        auth: Auth,
        body: Option<&B>,
        fallback: &str,
    ) -> Result<Vec<u8>>
    where
        B: Serialize + Sync + ?Sized,
    {
        let request_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("request_id", request_id.as_str());

        let mut request = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header(REQUEST_ID_HEADER, &request_id);
        if auth == Auth::Bearer {
            request = request.bearer_auth(self.bearer()?);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            warn!(error = %e, "request could not be completed");
            PortalError::from(e)
        })?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if status.is_success() {
            debug!(status = status.as_u16(), "request succeeded");
            return Ok(bytes.to_vec());
        }

        let err = classify_failure(status, &bytes, auth, fallback);
        warn!(status = status.as_u16(), error = %err, "request rejected");
        Err(err)
    }
}

/// Decodes a JSON success body.
fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| PortalError::MalformedResponse(e.to_string()))
}

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(u8::is_ascii_whitespace)
}

/// Maps a non-success response onto the portal error taxonomy.
pub(crate) fn classify_failure(
    status: StatusCode,
    body: &[u8],
    auth: Auth,
    fallback: &str,
) -> PortalError {
    match status.as_u16() {
        401 | 403 if auth == Auth::Bearer => PortalError::AuthRequired(
            error_message(body).unwrap_or_else(|| format!("server returned status {status}")),
        ),
        400..=499 => {
            PortalError::ValidationFailed(error_message(body).unwrap_or_else(|| fallback.to_owned()))
        }
        _ => PortalError::Unavailable(format!("server returned status {status}")),
    }
}

/// Extracts a human-readable message from an error body.
///
/// Looks for `message`, then `error` (string or `{ message }`), then falls
/// back to the body text. HTML pages are ignored.
pub(crate) fn error_message(body: &[u8]) -> Option<String> {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        let field = value
            .get("message")
            .and_then(serde_json::Value::as_str)
            .or_else(|| {
                value.get("error").and_then(|error| {
                    error.as_str().or_else(|| {
                        error.get("message").and_then(serde_json::Value::as_str)
                    })
                })
            })
            .or_else(|| value.as_str());
        return field.map(str::trim).filter(|msg| !msg.is_empty()).map(truncate);
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() || text.starts_with('<') {
        return None;
    }
    Some(truncate(text))
}

fn truncate(message: &str) -> String {
    message.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
}

impl SubscriptionApi for HttpApiClient {
    async fn list_plans(&self) -> Result<Vec<Plan>> {
        let body = self
            .send(Method::GET, "/plans", Auth::Bearer, None::<&()>, "Failed to fetch plans")
            .await?;
        let plans: Vec<Plan> = decode(&body)?;
        for plan in &plans {
            plan.validate()?;
        }
        debug!(count = plans.len(), "fetched plans");
        Ok(plans)
    }

    async fn get_subscription(&self) -> Result<Option<Subscription>> {
        let body = self
            .send(
                Method::GET,
                "/subscriptions",
                Auth::Bearer,
                None::<&()>,
                "Failed to fetch subscriptions",
            )
            .await?;
        if is_blank(&body) {
            return Ok(None);
        }
        let payload: Option<SubscriptionsPayload> = decode(&body)?;
        Ok(payload.and_then(SubscriptionsPayload::into_current))
    }

    async fn create_subscription(
        &self,
        plan_code: &PlanCode,
        token: &PaymentToken,
    ) -> Result<Option<Subscription>> {
        info!(plan_code = %plan_code, "creating subscription");
        let body = SubscribeBody { plan_code: plan_code.as_str(), token: token.expose() };
        let response = self
            .send(
                Method::POST,
                "/subscribe",
                Auth::Bearer,
                Some(&body),
                "An error occurred during subscription",
            )
            .await?;
        if is_blank(&response) {
            return Ok(None);
        }
        match decode::<Subscription>(&response) {
            Ok(created) => Ok(Some(created)),
            Err(e) => {
                warn!(error = %e, "subscription created but response body was not recognised");
                Ok(None)
            },
        }
    }

    async fn update_subscription(
        &self,
        id: &SubscriptionId,
        plan_code: &PlanCode,
    ) -> Result<PlanChange> {
        info!(subscription_id = %id, plan_code = %plan_code, "updating subscription");
        let body = UpdatePlanBody { plan_code: plan_code.as_str() };
        let response = self
            .send(
                Method::PUT,
                &format!("/subscriptions/{id}"),
                Auth::Bearer,
                Some(&body),
                "Update failed",
            )
            .await?;
        if is_blank(&response) {
            return Ok(PlanChange { new_plan: plan_code.clone() });
        }
        match decode::<UpdateResponse>(&response) {
            Ok(change) => Ok(PlanChange::from(change)),
            Err(e) => {
                warn!(error = %e, "plan updated but response body was not recognised");
                Ok(PlanChange { new_plan: plan_code.clone() })
            },
        }
    }

    async fn cancel_subscription(&self, id: &SubscriptionId) -> Result<()> {
        info!(subscription_id = %id, "canceling subscription");
        let (method, path) = self.cancel_route(id);
        self.send(method, &path, Auth::Bearer, None::<&()>, "Cancellation failed").await?;
        Ok(())
    }
}

impl AuthApi for HttpApiClient {
    async fn signup(&self, request: &SignupRequest) -> Result<()> {
        request.validate()?;
        self.send(Method::POST, "/signup", Auth::Anonymous, Some(request), "Signup failed")
            .await?;
        info!("account created");
        Ok(())
    }

    async fn login(&self, request: &LoginRequest) -> Result<Session> {
        request.validate()?;
        let body = self
            .send(Method::POST, "/login", Auth::Anonymous, Some(request), "Failed to log in")
            .await?;
        let response: LoginResponse = decode(&body)?;
        Session::new(response.token, response.user).map_err(|_| {
            PortalError::MalformedResponse("login response carried an empty token".to_owned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpApiClient {
        HttpApiClient::new(&ApiConfig::default()).unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = ApiConfig { base_url: "https://api.example.com/".to_owned(), ..ApiConfig::default() };
        let client = HttpApiClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "https://api.example.com");
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = ApiConfig { timeout_secs: 0, ..ApiConfig::default() };
        assert!(matches!(HttpApiClient::new(&config), Err(PortalError::ConfigError(_))));
    }

    #[test]
    fn test_cancel_route_styles() {
        let id = SubscriptionId::new("sub_1").unwrap();
        assert_eq!(client().cancel_route(&id), (Method::PUT, "/subscriptions/sub_1/cancel".to_owned()));

        let config = ApiConfig { cancel_style: CancelStyle::Delete, ..ApiConfig::default() };
        let client = HttpApiClient::new(&config).unwrap();
        assert_eq!(client.cancel_route(&id), (Method::DELETE, "/subscriptions/sub_1".to_owned()));
    }

    #[tokio::test]
    async fn test_missing_session_is_auth_required() {
        let err = client().list_plans().await.unwrap_err();
        assert!(err.is_auth_required());
    }

    #[tokio::test]
    async fn test_signup_validates_before_sending() {
        let request = SignupRequest {
            fullname: "Ada".to_owned(),
            email: String::new(),
            password: "pw".to_owned(),
        };
        let err = client().signup(&request).await.unwrap_err();
        assert_eq!(err.user_message(), "All fields are required");
    }

    #[test]
    fn test_classify_unauthorized() {
        let err = classify_failure(StatusCode::UNAUTHORIZED, b"", Auth::Bearer, "x");
        assert!(err.is_auth_required());

        let err = classify_failure(StatusCode::FORBIDDEN, br#"{"message":"token expired"}"#, Auth::Bearer, "x");
        assert!(matches!(err, PortalError::AuthRequired(msg) if msg == "token expired"));
    }

    #[test]
    fn test_classify_login_rejection_is_validation() {
        let err = classify_failure(
            StatusCode::UNAUTHORIZED,
            b"Invalid email or password",
            Auth::Anonymous,
            "Failed to log in",
        );
        assert!(matches!(err, PortalError::ValidationFailed(msg) if msg == "Invalid email or password"));
    }

    #[test]
    fn test_classify_client_error_uses_body_message() {
        let err = classify_failure(
            StatusCode::UNPROCESSABLE_ENTITY,
            br#"{"message":"Plan is not available"}"#,
            Auth::Bearer,
            "An error occurred during subscription",
        );
        assert_eq!(err.user_message(), "Plan is not available");
    }

    #[test]
    fn test_classify_client_error_falls_back() {
        let err = classify_failure(StatusCode::BAD_REQUEST, b"{}", Auth::Bearer, "Update failed");
        assert_eq!(err.user_message(), "Update failed");
    }

    #[test]
    fn test_classify_server_error_is_unavailable() {
        let err = classify_failure(
            StatusCode::BAD_GATEWAY,
            br#"{"message":"upstream timeout"}"#,
            Auth::Bearer,
            "x",
        );
        assert!(matches!(err, PortalError::Unavailable(_)));
    }

    #[test]
    fn test_error_message_variants() {
        assert_eq!(error_message(br#"{"error":"Card declined"}"#).as_deref(), Some("Card declined"));
        assert_eq!(
            error_message(br#"{"error":{"message":"nested"}}"#).as_deref(),
            Some("nested")
        );
        assert_eq!(error_message(br#""plain json string""#).as_deref(), Some("plain json string"));
        assert_eq!(error_message(b"  plain text \n").as_deref(), Some("plain text"));
        assert_eq!(error_message(b"<html><body>502</body></html>"), None);
        assert_eq!(error_message(b""), None);
        assert_eq!(error_message(br#"{"message":"   "}"#), None);
    }

    #[test]
    fn test_error_message_truncated() {
        let long = "x".repeat(1000);
        assert_eq!(error_message(long.as_bytes()).unwrap().len(), MAX_ERROR_MESSAGE_LEN);
    }
}
