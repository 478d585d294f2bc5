//! Plan and subscription data models.
//!
//! These mirror the backend's JSON documents. Identifiers are validated
//! newtypes so a malformed code or id is rejected when a response is decoded
//! rather than when it is later sent back in a URL.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{PortalError, Result};

/// Maximum identifier length accepted from the backend.
const MAX_ID_LEN: usize = 64;

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Unique code of a billing plan (e.g. `basic`, `pro-annual`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlanCode(String);

impl PlanCode {
    /// Creates a plan code after validation.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::InvalidPlanCode`] if the code is empty, longer
    /// than 64 characters, or contains characters other than ASCII letters,
    /// digits, hyphens and underscores.
    ///
    /// # Examples
    ///
    /// ```
    /// use member_portal::models::PlanCode;
    ///
    /// assert!(PlanCode::new("basic").is_ok());
    /// assert!(PlanCode::new("gold plan").is_err());
    /// ```
    pub fn new<S: Into<String>>(code: S) -> Result<Self> {
        let code = code.into();
        if code.is_empty() {
            return Err(PortalError::InvalidPlanCode("plan code cannot be empty".into()));
        }
        if code.len() > MAX_ID_LEN {
            return Err(PortalError::InvalidPlanCode(
                "plan code must be 64 characters or less".into(),
            ));
        }
        if !code.chars().all(is_id_char) {
            return Err(PortalError::InvalidPlanCode(format!(
                "'{code}' can only contain alphanumeric characters, hyphens, and underscores"
            )));
        }
        Ok(Self(code))
    }

    /// Returns the inner string reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PlanCode {
    type Error = PortalError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PlanCode> for String {
    fn from(code: PlanCode) -> Self {
        code.0
    }
}

impl fmt::Display for PlanCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend identifier of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Creates a subscription id after validation.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::InvalidSubscriptionId`] under the same rules as
    /// [`PlanCode::new`]. The id ends up in a URL path, so anything else is
    /// rejected.
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(PortalError::InvalidSubscriptionId(
                "subscription id cannot be empty".into(),
            ));
        }
        if id.len() > MAX_ID_LEN {
            return Err(PortalError::InvalidSubscriptionId(
                "subscription id must be 64 characters or less".into(),
            ));
        }
        if !id.chars().all(is_id_char) {
            return Err(PortalError::InvalidSubscriptionId(format!(
                "'{id}' can only contain alphanumeric characters, hyphens, and underscores"
            )));
        }
        Ok(Self(id))
    }

    /// Returns the inner string reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SubscriptionId {
    type Error = PortalError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SubscriptionId> for String {
    fn from(id: SubscriptionId) -> Self {
        id.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Billing plan offered to members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Unique plan code.
    pub code: PlanCode,
    /// Display name.
    pub name: String,
    /// Interval unit, e.g. `month`.
    pub interval: String,
    /// Number of interval units per billing period.
    pub interval_length: u32,
    /// Price per billing period.
    pub cost: Decimal,
}

impl Plan {
    /// Checks the invariants the backend is expected to uphold.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::MalformedResponse`] if the interval length is
    /// zero or the cost is negative.
    pub fn validate(&self) -> Result<()> {
        if self.interval_length == 0 {
            return Err(PortalError::MalformedResponse(format!(
                "plan '{}' has a zero interval length",
                self.code
            )));
        }
        if self.cost.is_sign_negative() && !self.cost.is_zero() {
            return Err(PortalError::MalformedResponse(format!(
                "plan '{}' has a negative cost",
                self.code
            )));
        }
        Ok(())
    }

    /// Label used in plan selectors.
    ///
    /// ```
    /// use member_portal::models::{Plan, PlanCode};
    /// use rust_decimal::Decimal;
    ///
    /// let plan = Plan {
    ///     code: PlanCode::new("basic").unwrap(),
    ///     name: "Basic".to_owned(),
    ///     interval: "month".to_owned(),
    ///     interval_length: 1,
    ///     cost: Decimal::new(10, 0),
    /// };
    /// assert_eq!(plan.selector_label(), "Basic - $10 every 1 month");
    /// ```
    #[must_use]
    pub fn selector_label(&self) -> String {
        format!(
            "{} - ${} every {} {}",
            self.name,
            self.cost.normalize(),
            self.interval_length,
            self.interval
        )
    }

    /// Label used in the subscription summary.
    #[must_use]
    pub fn summary_label(&self) -> String {
        format!(
            "{} - ${} / {} {}",
            self.name,
            self.cost.normalize(),
            self.interval_length,
            self.interval
        )
    }
}

/// Lifecycle state reported by the billing provider.
///
/// Unknown provider states are kept verbatim in [`SubscriptionState::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubscriptionState {
    /// Paid and renewing.
    Active,
    /// Will not renew; may still run until the period end.
    Canceled,
    /// Ended.
    Expired,
    /// Starts at a future date.
    Future,
    /// Billing suspended.
    Paused,
    /// Payment failed, in dunning.
    PastDue,
    /// Any other provider-defined state.
    Other(String),
}

impl SubscriptionState {
    /// Returns the wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
            Self::Future => "future",
            Self::Paused => "paused",
            Self::PastDue => "past_due",
            Self::Other(state) => state,
        }
    }

    /// Whether the subscription still occupies the member's single slot.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !matches!(self, Self::Canceled | Self::Expired)
    }
}

impl From<String> for SubscriptionState {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "active" => Self::Active,
            "canceled" | "cancelled" => Self::Canceled,
            "expired" => Self::Expired,
            "future" => Self::Future,
            "paused" => Self::Paused,
            "past_due" => Self::PastDue,
            _ => Self::Other(value),
        }
    }
}

impl From<SubscriptionState> for String {
    fn from(state: SubscriptionState) -> Self {
        state.as_str().to_owned()
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plan reference embedded in a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRef {
    /// Referenced plan code.
    pub code: PlanCode,
}

/// A member's subscription as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Backend identifier.
    pub id: SubscriptionId,
    /// Plan the subscription is bound to.
    pub plan: PlanRef,
    /// Legacy flat plan code, preferred over `plan.code` when present.
    #[serde(default, rename = "plan_code", skip_serializing_if = "Option::is_none")]
    pub plan_code: Option<PlanCode>,
    /// Lifecycle state.
    pub state: SubscriptionState,
    /// End of the current billing period.
    #[serde(default)]
    pub current_period_ends_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Returns the effective plan code.
    #[must_use]
    pub fn plan_code(&self) -> &PlanCode {
        self.plan_code.as_ref().unwrap_or(&self.plan.code)
    }
}

/// Body of `GET /subscriptions`.
///
/// The backend answers with nothing, one subscription, or a list depending on
/// its version.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SubscriptionsPayload {
    /// List form.
    Many(Vec<Subscription>),
    /// Single-object form.
    One(Box<Subscription>),
}

impl SubscriptionsPayload {
    /// Reduces the payload to the member's current subscription.
    ///
    /// The first live entry wins; failing that, the first entry is reported
    /// as-is so an ended subscription still shows with its state.
    #[must_use]
    pub fn into_current(self) -> Option<Subscription> {
        match self {
            Self::One(sub) => Some(*sub),
            Self::Many(subs) => {
                let live = subs.iter().position(|sub| sub.state.is_live());
                subs.into_iter().nth(live.unwrap_or(0))
            },
        }
    }
}

/// Finds a plan by code.
#[must_use]
pub fn find_plan<'a>(plans: &'a [Plan], code: &PlanCode) -> Option<&'a Plan> {
    plans.iter().find(|plan| &plan.code == code)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn basic_plan() -> Plan {
        Plan {
            code: PlanCode::new("basic").unwrap(),
            name: "Basic".to_owned(),
            interval: "month".to_owned(),
            interval_length: 1,
            cost: Decimal::new(10, 0),
        }
    }

    #[test]
    fn test_plan_code_valid() {
        assert_eq!(PlanCode::new("pro-annual_2").unwrap().as_str(), "pro-annual_2");
    }

    #[test]
    fn test_plan_code_empty() {
        let err = PlanCode::new("").unwrap_err();
        assert!(matches!(err, PortalError::InvalidPlanCode(_)));
    }

    #[test]
    fn test_plan_code_too_long() {
        assert!(PlanCode::new("a".repeat(65)).is_err());
        assert!(PlanCode::new("a".repeat(64)).is_ok());
    }

    #[test]
    fn test_subscription_id_rejects_path_chars() {
        assert!(SubscriptionId::new("sub_1").is_ok());
        assert!(SubscriptionId::new("../admin").is_err());
        assert!(SubscriptionId::new("sub/1").is_err());
    }

    #[test]
    fn test_plan_deserialize_camel_case() {
        let plan: Plan = serde_json::from_value(json!({
            "code": "basic",
            "name": "Basic",
            "interval": "month",
            "intervalLength": 1,
            "cost": 10
        }))
        .unwrap();
        assert_eq!(plan, basic_plan());
    }

    #[test]
    fn test_plan_deserialize_fractional_cost() {
        let plan: Plan = serde_json::from_value(json!({
            "code": "pro",
            "name": "Pro",
            "interval": "month",
            "intervalLength": 3,
            "cost": "29.99"
        }))
        .unwrap();
        assert_eq!(plan.cost, Decimal::new(2999, 2));
        assert_eq!(plan.summary_label(), "Pro - $29.99 / 3 month");
    }

    #[test]
    fn test_plan_rejects_invalid_code() {
        let result: std::result::Result<Plan, _> = serde_json::from_value(json!({
            "code": "bad code",
            "name": "Bad",
            "interval": "month",
            "intervalLength": 1,
            "cost": 1
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_plan_validate() {
        assert!(basic_plan().validate().is_ok());

        let mut zero = basic_plan();
        zero.interval_length = 0;
        assert!(matches!(zero.validate(), Err(PortalError::MalformedResponse(_))));

        let mut negative = basic_plan();
        negative.cost = Decimal::new(-1, 0);
        assert!(negative.validate().is_err());

        let mut free = basic_plan();
        free.cost = Decimal::ZERO;
        assert!(free.validate().is_ok());
    }

    #[test]
    fn test_plan_labels() {
        let plan = basic_plan();
        assert_eq!(plan.selector_label(), "Basic - $10 every 1 month");
        assert_eq!(plan.summary_label(), "Basic - $10 / 1 month");
    }

    #[test]
    fn test_subscription_deserialize() {
        let sub: Subscription = serde_json::from_value(json!({
            "id": "sub_1",
            "plan": { "code": "basic" },
            "state": "active",
            "currentPeriodEndsAt": "2026-11-18T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(sub.id.as_str(), "sub_1");
        assert_eq!(sub.plan_code().as_str(), "basic");
        assert_eq!(sub.state, SubscriptionState::Active);
        assert!(sub.current_period_ends_at.is_some());
    }

    #[test]
    fn test_subscription_legacy_plan_code_wins() {
        let sub: Subscription = serde_json::from_value(json!({
            "id": "sub_1",
            "plan": { "code": "basic" },
            "plan_code": "pro",
            "state": "active"
        }))
        .unwrap();
        assert_eq!(sub.plan_code().as_str(), "pro");
        assert!(sub.current_period_ends_at.is_none());
    }

    #[test]
    fn test_subscription_state_provider_defined() {
        let state = SubscriptionState::from("in_trial".to_owned());
        assert_eq!(state, SubscriptionState::Other("in_trial".to_owned()));
        assert_eq!(state.to_string(), "in_trial");
        assert!(state.is_live());
        assert!(!SubscriptionState::from("cancelled".to_owned()).is_live());
    }

    #[test]
    fn test_payload_single_object() {
        let payload: Option<SubscriptionsPayload> = serde_json::from_value(json!({
            "id": "sub_1",
            "plan": { "code": "basic" },
            "state": "active"
        }))
        .unwrap();
        let current = payload.and_then(SubscriptionsPayload::into_current).unwrap();
        assert_eq!(current.id.as_str(), "sub_1");
    }

    #[test]
    fn test_payload_list_skips_ended() {
        let payload: SubscriptionsPayload = serde_json::from_value(json!([
            { "id": "sub_old", "plan": { "code": "basic" }, "state": "expired" },
            { "id": "sub_new", "plan": { "code": "pro" }, "state": "active" }
        ]))
        .unwrap();
        assert_eq!(payload.into_current().unwrap().id.as_str(), "sub_new");
    }

    #[test]
    fn test_payload_null_and_empty() {
        let payload: Option<SubscriptionsPayload> = serde_json::from_value(json!(null)).unwrap();
        assert!(payload.is_none());

        let payload: SubscriptionsPayload = serde_json::from_value(json!([])).unwrap();
        assert!(payload.into_current().is_none());
    }

    #[test]
    fn test_payload_only_ended_reports_first() {
        let payload: SubscriptionsPayload = serde_json::from_value(json!({
            "id": "sub_1", "plan": { "code": "basic" }, "state": "canceled"
        }))
        .unwrap();
        let current = payload.into_current().unwrap();
        assert_eq!(current.state, SubscriptionState::Canceled);

        let payload: SubscriptionsPayload = serde_json::from_value(json!([
            { "id": "sub_a", "plan": { "code": "basic" }, "state": "expired" },
            { "id": "sub_b", "plan": { "code": "pro" }, "state": "canceled" }
        ]))
        .unwrap();
        assert_eq!(payload.into_current().unwrap().id.as_str(), "sub_a");
    }

    #[test]
    fn test_find_plan() {
        let plans = vec![basic_plan()];
        assert!(find_plan(&plans, &PlanCode::new("basic").unwrap()).is_some());
        assert!(find_plan(&plans, &PlanCode::new("pro").unwrap()).is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn test_valid_plan_codes_accepted(code in "[a-zA-Z0-9_-]{1,64}") {
            let parsed = PlanCode::new(code.clone()).unwrap();
            prop_assert_eq!(parsed.as_str(), code.as_str());
        }

        #[test]
        fn test_codes_with_other_chars_rejected(
            prefix in "[a-z]{0,10}",
            bad in "[ /.?#%@!]",
            suffix in "[a-z]{0,10}",
        ) {
            let code = format!("{prefix}{bad}{suffix}");
            prop_assert!(PlanCode::new(code).is_err());
        }

        #[test]
        fn test_selector_label_mentions_interval(
            length in 1u32..=36,
            cents in 0i64..1_000_000,
        ) {
            let mut plan = basic_plan();
            plan.interval_length = length;
            plan.cost = Decimal::new(cents, 2);
            let label = plan.selector_label();
            let expected_suffix = format!("every {length} month");
            prop_assert!(label.starts_with("Basic - $"));
            prop_assert!(label.ends_with(&expected_suffix));
        }
    }
}
