//! Payment tokenization adapter.
//!
//! Card data is captured by a [`CardWidget`] and never leaves it: the rest of
//! the portal only ever sees the single-use [`PaymentToken`] the widget trades
//! it for. A widget is attached to a container with [`CardWidget::mount`]; the
//! returned [`WidgetMount`] detaches it again when dropped, so every way out
//! of the subscribe form releases the widget.
//!
//! # Examples
//!
//! ```rust,no_run
//! use member_portal::{
//!     config::PaymentConfig,
//!     payment::{BillingInfo, CardDetails, CardWidget, HostedCardWidget},
//! };
//!
//! # async fn example() -> member_portal::Result<()> {
//! let mut widget = HostedCardWidget::new(&PaymentConfig::default())?;
//! let mount = widget.mount("card-element")?;
//! widget.enter_card(CardDetails::new("4111111111111111", "12", "2030", "123"))?;
//!
//! let billing = BillingInfo {
//!     first_name: "Ada".into(),
//!     last_name: "Lovelace".into(),
//!     address1: "12 St James's Square".into(),
//!     city: "London".into(),
//!     state: "LDN".into(),
//!     country: "GB".into(),
//!     postal_code: "SW1Y 4JH".into(),
//! };
//! let token = widget.tokenize(&billing).await?;
//! drop(mount);
//! # let _ = token;
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
use zeroize::Zeroize;

use crate::error::{PortalError, Result};

pub mod hosted;

pub use hosted::HostedCardWidget;

/// Container the subscribe form mounts the card widget into.
pub const CARD_CONTAINER: &str = "card-element";

/// Card-entry widget that exchanges card data for a payment token.
pub trait CardWidget: Send + Sync {
    /// Attaches the widget to `container`.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::InvalidTransition`] if the widget is already
    /// mounted.
    fn mount(&mut self, container: &str) -> Result<WidgetMount>;

    /// Whether the widget is currently attached.
    fn is_mounted(&self) -> bool;

    /// Combines the captured card with `billing` and obtains a token.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::TokenizationFailed`] when the widget is not
    /// mounted, holds no card, or the tokenization service rejects the input,
    /// and [`PortalError::Unavailable`] when the service cannot be reached.
    fn tokenize(&self, billing: &BillingInfo) -> impl Future<Output = Result<PaymentToken>> + Send;
}

/// Handle for a mounted widget.
///
/// Dropping the handle runs the widget's detach routine exactly once.
pub struct WidgetMount {
    container: String,
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl WidgetMount {
    /// Creates a handle that calls `detach` when released.
    pub fn new(container: impl Into<String>, detach: impl FnOnce() + Send + 'static) -> Self {
        Self { container: container.into(), detach: Some(Box::new(detach)) }
    }

    /// Container the widget is attached to.
    #[must_use]
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Detaches the widget now.
    pub fn release(mut self) {
        self.run_detach();
    }

    fn run_detach(&mut self) {
        if let Some(detach) = self.detach.take() {
            tracing::debug!(container = %self.container, "card widget detached");
            detach();
        }
    }
}

impl Drop for WidgetMount {
    fn drop(&mut self) {
        self.run_detach();
    }
}

impl fmt::Debug for WidgetMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetMount")
            .field("container", &self.container)
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// Billing fields collected next to the card widget.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingInfo {
    /// Cardholder first name.
    pub first_name: String,
    /// Cardholder last name.
    pub last_name: String,
    /// Street address.
    pub address1: String,
    /// City.
    pub city: String,
    /// State or province.
    pub state: String,
    /// Country code (e.g. `US`).
    pub country: String,
    /// Postal code.
    pub postal_code: String,
}

impl BillingInfo {
    /// Checks every field is filled in.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::ValidationFailed`] naming the first blank field.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("First name", &self.first_name),
            ("Last name", &self.last_name),
            ("Address", &self.address1),
            ("City", &self.city),
            ("State", &self.state),
            ("Postal code", &self.postal_code),
            ("Country", &self.country),
        ];
        match fields.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((label, _)) => Err(PortalError::ValidationFailed(format!("{label} is required"))),
            None => Ok(()),
        }
    }
}

/// Raw card details as typed into the widget.
///
/// Sensitive fields are zeroized on drop and never printed.
#[derive(Clone)]
pub struct CardDetails {
    number: String,
    month: String,
    year: String,
    cvv: String,
}

impl CardDetails {
    /// Captures card input. Spaces and dashes in the number are dropped.
    pub fn new(
        number: impl Into<String>,
        month: impl Into<String>,
        year: impl Into<String>,
        cvv: impl Into<String>,
    ) -> Self {
        let number: String =
            number.into().chars().filter(|c| !matches!(c, ' ' | '-')).collect();
        Self { number, month: month.into(), year: year.into(), cvv: cvv.into() }
    }

    /// Performs the widget's own checks before anything is sent.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::TokenizationFailed`] for a malformed number,
    /// failed checksum, bad expiry or CVV.
    pub fn validate(&self) -> Result<()> {
        let digits_only = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

        if !digits_only(&self.number) || !(12..=19).contains(&self.number.len()) {
            return Err(PortalError::TokenizationFailed("card number is invalid".to_owned()));
        }
        if !luhn_valid(&self.number) {
            return Err(PortalError::TokenizationFailed("card number is invalid".to_owned()));
        }
        let month_ok = digits_only(&self.month)
            && self.month.parse::<u8>().is_ok_and(|m| (1..=12).contains(&m));
        if !month_ok {
            return Err(PortalError::TokenizationFailed("expiry month is invalid".to_owned()));
        }
        if !digits_only(&self.year) || !matches!(self.year.len(), 2 | 4) {
            return Err(PortalError::TokenizationFailed("expiry year is invalid".to_owned()));
        }
        if !digits_only(&self.cvv) || !matches!(self.cvv.len(), 3 | 4) {
            return Err(PortalError::TokenizationFailed("security code is invalid".to_owned()));
        }
        Ok(())
    }

    /// Last four digits of the card number.
    #[must_use]
    pub fn last_four(&self) -> &str {
        let len = self.number.len();
        &self.number[len.saturating_sub(4)..]
    }

    pub(crate) fn form_fields(&self) -> [(&'static str, &str); 4] {
        [
            ("number", self.number.as_str()),
            ("month", self.month.as_str()),
            ("year", self.year.as_str()),
            ("cvv", self.cvv.as_str()),
        ]
    }
}

fn luhn_valid(number: &str) -> bool {
    let sum: u32 = number
        .chars()
        .rev()
        .filter_map(|c| c.to_digit(10))
        .enumerate()
        .map(|(i, d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

impl Drop for CardDetails {
    fn drop(&mut self) {
        self.number.zeroize();
        self.month.zeroize();
        self.year.zeroize();
        self.cvv.zeroize();
    }
}

impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardDetails")
            .field("number", &format_args!("****{}", self.last_four()))
            .finish_non_exhaustive()
    }
}

/// Single-use opaque payment reference.
#[derive(Clone, PartialEq, Eq)]
pub struct PaymentToken(String);

impl PaymentToken {
    /// Wraps a token id issued by the tokenization service.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::TokenizationFailed`] if the id is blank.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(PortalError::TokenizationFailed(
                "tokenization service returned an empty token".to_owned(),
            ));
        }
        Ok(Self(id))
    }

    /// Returns the token id for the subscribe request.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Drop for PaymentToken {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for PaymentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PaymentToken([REDACTED])")
    }
}
