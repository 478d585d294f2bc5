//! Hosted tokenization widget.
//!
//! Captured card details live inside the widget's shared state and are sent
//! straight to the tokenization endpoint together with the billing fields and
//! the publishable key. The backend only ever receives the returned token id.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{BillingInfo, CardDetails, CardWidget, PaymentToken, WidgetMount};
use crate::{
    config::PaymentConfig,
    error::{PortalError, Result},
};

#[derive(Debug, Default)]
struct WidgetState {
    container: Option<String>,
    card: Option<CardDetails>,
}

/// [`CardWidget`] backed by a hosted tokenization service.
///
/// # Examples
///
/// ```
/// use member_portal::{
///     config::PaymentConfig,
///     payment::{CardWidget, HostedCardWidget},
/// };
///
/// let mut widget = HostedCardWidget::new(&PaymentConfig::default())?;
/// let mount = widget.mount("card-element")?;
/// assert!(widget.is_mounted());
/// drop(mount);
/// assert!(!widget.is_mounted());
/// # Ok::<(), member_portal::PortalError>(())
/// ```
#[derive(Debug, Clone)]
pub struct HostedCardWidget {
    client: Client,
    public_key: String,
    tokenize_url: String,
    state: Arc<Mutex<WidgetState>>,
}

impl HostedCardWidget {
    /// Creates an unmounted widget.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::ConfigError`] if the tokenization endpoint or
    /// timeouts are invalid, or the HTTP client cannot be built.
    pub fn new(config: &PaymentConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| PortalError::ConfigError(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            public_key: config.public_key.trim().to_owned(),
            tokenize_url: config.tokenize_url.clone(),
            state: Arc::new(Mutex::new(WidgetState::default())),
        })
    }

    /// Feeds card input into the mounted widget.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::TokenizationFailed`] if the widget is not
    /// mounted or the card fails the widget's own checks.
    pub fn enter_card(&self, card: CardDetails) -> Result<()> {
        let mut state = self.lock();
        if state.container.is_none() {
            return Err(PortalError::TokenizationFailed("card widget is not mounted".to_owned()));
        }
        card.validate()?;
        debug!(last_four = card.last_four(), "card captured");
        state.card = Some(card);
        Ok(())
    }

    /// Whether card input has been captured since mounting.
    #[must_use]
    pub fn has_card(&self) -> bool {
        self.lock().card.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, WidgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CardWidget for HostedCardWidget {
    fn mount(&mut self, container: &str) -> Result<WidgetMount> {
        let mut state = self.lock();
        if let Some(current) = &state.container {
            return Err(PortalError::InvalidTransition(format!(
                "card widget is already mounted in '{current}'"
            )));
        }
        state.container = Some(container.to_owned());
        drop(state);
        debug!(container, "card widget mounted");

        let shared = Arc::clone(&self.state);
        Ok(WidgetMount::new(container, move || {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            state.container = None;
            state.card = None;
        }))
    }

    fn is_mounted(&self) -> bool {
        self.lock().container.is_some()
    }

    #[instrument(skip_all, fields(url = %self.tokenize_url))]
    async fn tokenize(&self, billing: &BillingInfo) -> Result<PaymentToken> {
        let card = {
            let state = self.lock();
            if state.container.is_none() {
                return Err(PortalError::TokenizationFailed(
                    "card widget is not mounted".to_owned(),
                ));
            }
            state.card.clone().ok_or_else(|| {
                PortalError::TokenizationFailed("Enter your card details".to_owned())
            })?
        };
        if self.public_key.is_empty() {
            return Err(PortalError::TokenizationFailed(
                "payment widget is not configured with a public key".to_owned(),
            ));
        }

        let mut form: Vec<(&str, &str)> = vec![
            ("key", self.public_key.as_str()),
            ("first_name", billing.first_name.as_str()),
            ("last_name", billing.last_name.as_str()),
            ("address1", billing.address1.as_str()),
            ("city", billing.city.as_str()),
            ("state", billing.state.as_str()),
            ("country", billing.country.as_str()),
            ("postal_code", billing.postal_code.as_str()),
        ];
        form.extend(card.form_fields());

        let response =
            self.client.post(&self.tokenize_url).form(&form).send().await.map_err(|e| {
                warn!(error = %e, "tokenization request failed");
                PortalError::Unavailable(format!("tokenization service unreachable: {e}"))
            })?;
        let status = response.status();
        let body = response.bytes().await?;

        let token = parse_token_response(status, &body)?;
        info!("card tokenized");
        Ok(token)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    error: Option<TokenError>,
}

#[derive(Debug, Deserialize)]
struct TokenError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Interprets a tokenization service reply.
///
/// The service may report a rejection with a 2xx status, so the body's
/// `error` object takes precedence over the status code.
pub(crate) fn parse_token_response(status: StatusCode, body: &[u8]) -> Result<PaymentToken> {
    let parsed: Option<TokenResponse> = serde_json::from_slice(body).ok();

    if let Some(TokenResponse { error: Some(error), .. }) = &parsed {
        let reason = error
            .message
            .as_deref()
            .or(error.code.as_deref())
            .unwrap_or("Failed to tokenize payment information");
        return Err(PortalError::TokenizationFailed(reason.to_owned()));
    }
    if status.is_server_error() {
        return Err(PortalError::Unavailable(format!("tokenization service returned {status}")));
    }
    if !status.is_success() {
        return Err(PortalError::TokenizationFailed(format!(
            "tokenization service returned {status}"
        )));
    }
    match parsed.and_then(|r| r.id) {
        Some(id) => PaymentToken::new(id),
        None => Err(PortalError::MalformedResponse(
            "tokenization response has no token id".to_owned(),
        )),
    }
}
