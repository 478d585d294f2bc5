//! In-memory fakes of the backend and the card widget.
//!
//! Available to this crate's tests and, with the `test-support` feature, to
//! integration tests and downstream crates.

#![allow(clippy::expect_used, reason = "fixtures are built from literal, known-valid identifiers")]

use std::{
    future::pending,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use rust_decimal::Decimal;

use crate::{
    api::{PlanChange, SubscriptionApi},
    error::{PortalError, Result},
    models::{Plan, PlanCode, PlanRef, Subscription, SubscriptionId, SubscriptionState},
    payment::{BillingInfo, CardWidget, PaymentToken, WidgetMount},
};

/// Monthly plan costing `cost` dollars.
///
/// # Panics
///
/// Panics if `code` is not a valid plan code.
#[must_use]
pub fn plan(code: &str, name: &str, cost: i64) -> Plan {
    Plan {
        code: PlanCode::new(code).expect("valid plan code"),
        name: name.to_owned(),
        interval: "month".to_owned(),
        interval_length: 1,
        cost: Decimal::new(cost, 0),
    }
}

/// Active subscription `id` on plan `code`.
///
/// # Panics
///
/// Panics if `id` or `code` is invalid.
#[must_use]
pub fn subscription(id: &str, code: &str) -> Subscription {
    Subscription {
        id: SubscriptionId::new(id).expect("valid subscription id"),
        plan: PlanRef { code: PlanCode::new(code).expect("valid plan code") },
        plan_code: None,
        state: SubscriptionState::Active,
        current_period_ends_at: None,
    }
}

/// Fully filled billing form.
#[must_use]
pub fn billing() -> BillingInfo {
    BillingInfo {
        first_name: "Ada".to_owned(),
        last_name: "Lovelace".to_owned(),
        address1: "1 Analytical Way".to_owned(),
        city: "London".to_owned(),
        state: "LDN".to_owned(),
        country: "GB".to_owned(),
        postal_code: "N1 9GU".to_owned(),
    }
}

/// Backend operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// [`SubscriptionApi::list_plans`]
    ListPlans,
    /// [`SubscriptionApi::get_subscription`]
    GetSubscription,
    /// [`SubscriptionApi::create_subscription`]
    Create,
    /// [`SubscriptionApi::update_subscription`]
    Update,
    /// [`SubscriptionApi::cancel_subscription`]
    Cancel,
}

/// Call recorded by [`FakeApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs, reason = "fields mirror the call arguments")]
pub enum Call {
    ListPlans,
    GetSubscription,
    Create { plan: String, token: String },
    Update { id: String, plan: String },
    Cancel { id: String },
}

#[derive(Debug, Default)]
struct ApiState {
    plans: Vec<Plan>,
    subscription: Option<Subscription>,
    calls: Vec<Call>,
    failures: Vec<(Op, PortalError)>,
    hang: Option<Op>,
    bare_create: bool,
}

/// Backend fake that keeps one subscription and records every call.
///
/// Clones share state, so a test can keep a handle after giving one to the
/// controller.
#[derive(Debug, Clone, Default)]
pub struct FakeApi {
    state: Arc<Mutex<ApiState>>,
}

impl FakeApi {
    /// Backend offering `plans` with an optional existing subscription.
    #[must_use]
    pub fn new(plans: Vec<Plan>, subscription: Option<Subscription>) -> Self {
        let api = Self::default();
        {
            let mut state = api.lock();
            state.plans = plans;
            state.subscription = subscription;
        }
        api
    }

    /// Makes the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: Op, error: PortalError) {
        self.lock().failures.push((op, error));
    }

    /// Makes every call of `op` wait forever.
    pub fn hang(&self, op: Op) {
        self.lock().hang = Some(op);
    }

    /// Acknowledges creates without returning the subscription document.
    pub fn acknowledge_without_body(&self) {
        self.lock().bare_create = true;
    }

    /// Calls made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> MutexGuard<'_, ApiState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, op: Op, call: Call) -> Result<bool> {
        let mut state = self.lock();
        state.calls.push(call);
        if let Some(pos) = state.failures.iter().position(|(o, _)| *o == op) {
            return Err(state.failures.remove(pos).1);
        }
        Ok(state.hang == Some(op))
    }

    async fn begin(&self, op: Op, call: Call) -> Result<()> {
        if self.enter(op, call)? {
            pending::<()>().await;
        }
        Ok(())
    }
}

impl SubscriptionApi for FakeApi {
    async fn list_plans(&self) -> Result<Vec<Plan>> {
        self.begin(Op::ListPlans, Call::ListPlans).await?;
        Ok(self.lock().plans.clone())
    }

    async fn get_subscription(&self) -> Result<Option<Subscription>> {
        self.begin(Op::GetSubscription, Call::GetSubscription).await?;
        Ok(self.lock().subscription.clone())
    }

    async fn create_subscription(
        &self,
        plan_code: &PlanCode,
        token: &PaymentToken,
    ) -> Result<Option<Subscription>> {
        let call = Call::Create { plan: plan_code.to_string(), token: token.expose().to_owned() };
        self.begin(Op::Create, call).await?;
        let created = subscription("sub_1", plan_code.as_str());
        let mut state = self.lock();
        state.subscription = Some(created.clone());
        Ok((!state.bare_create).then_some(created))
    }

    async fn update_subscription(
        &self,
        id: &SubscriptionId,
        plan_code: &PlanCode,
    ) -> Result<PlanChange> {
        let call = Call::Update { id: id.to_string(), plan: plan_code.to_string() };
        self.begin(Op::Update, call).await?;
        if let Some(sub) = self.lock().subscription.as_mut() {
            sub.plan = PlanRef { code: plan_code.clone() };
        }
        Ok(PlanChange { new_plan: plan_code.clone() })
    }

    async fn cancel_subscription(&self, id: &SubscriptionId) -> Result<()> {
        self.begin(Op::Cancel, Call::Cancel { id: id.to_string() }).await?;
        self.lock().subscription = None;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct WidgetState {
    mounted: bool,
    mounts: usize,
    detaches: usize,
    issued: usize,
    reject: Option<String>,
}

/// Card widget fake that issues `tok_<n>` tokens.
#[derive(Debug, Clone, Default)]
pub struct FakeWidget {
    state: Arc<Mutex<WidgetState>>,
}

impl FakeWidget {
    /// Makes every tokenization fail with `reason`.
    pub fn reject_with(&self, reason: &str) {
        self.lock().reject = Some(reason.to_owned());
    }

    /// Number of times the widget was mounted.
    #[must_use]
    pub fn mounts(&self) -> usize {
        self.lock().mounts
    }

    /// Number of times the widget was detached.
    #[must_use]
    pub fn detaches(&self) -> usize {
        self.lock().detaches
    }

    fn lock(&self) -> MutexGuard<'_, WidgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CardWidget for FakeWidget {
    fn mount(&mut self, container: &str) -> Result<WidgetMount> {
        {
            let mut state = self.lock();
            if state.mounted {
                return Err(PortalError::InvalidTransition("already mounted".to_owned()));
            }
            state.mounted = true;
            state.mounts += 1;
        }
        let shared = Arc::clone(&self.state);
        Ok(WidgetMount::new(container, move || {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            state.mounted = false;
            state.detaches += 1;
        }))
    }

    fn is_mounted(&self) -> bool {
        self.lock().mounted
    }

    async fn tokenize(&self, _billing: &BillingInfo) -> Result<PaymentToken> {
        let mut state = self.lock();
        if !state.mounted {
            return Err(PortalError::TokenizationFailed("card widget is not mounted".to_owned()));
        }
        if let Some(reason) = &state.reject {
            return Err(PortalError::TokenizationFailed(reason.clone()));
        }
        state.issued += 1;
        PaymentToken::new(format!("tok_{}", state.issued))
    }
}
