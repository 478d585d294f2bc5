//! Subscription view-state controller.
//!
//! [`DashboardController`] owns the member's plans, the cached subscription
//! and the open form, and moves between [`ViewMode`]s:
//!
//! ```text
//!            begin_subscribe               begin_update
//!   Idle ───────────────────► Subscribe   Idle ──────────► Update(id)
//!    ▲                            │         ▲                  │
//!    └── success / dismiss ───────┘         └─ success/dismiss ┘
//!
//!   any mode ── cancel_subscription (confirmed) ──► Idle
//! ```
//!
//! A failed submit leaves the mode and the entered fields untouched and puts
//! the error on the form. After every committed mutation the subscription is
//! refetched from the backend; the controller never patches it locally.
//!
//! At most one live subscription exists per member, so the subscribe form can
//! only be opened while none is cached. When the refetch after a committed
//! mutation fails, the subscription is unknown: no form can be opened until
//! [`DashboardController::refresh`] succeeds.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tracing::{debug, info, instrument, warn};

use crate::{
    api::SubscriptionApi,
    error::{PortalError, Result},
    models::{Plan, PlanCode, Subscription, SubscriptionId, find_plan},
    payment::{BillingInfo, CARD_CONTAINER, CardWidget, WidgetMount},
};

/// Confirmation prompt shown before cancelling.
pub const CANCEL_PROMPT: &str = "Are you sure you want to cancel your subscription?";

/// Notice shown after a plan change.
pub const PLAN_UPDATED_NOTICE: &str = "Plan updated successfully!";

/// Notice shown after a cancellation.
pub const SUBSCRIPTION_CANCELED_NOTICE: &str = "Subscription canceled.";

/// UI mode of the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewMode {
    /// Showing the subscription summary.
    Idle,
    /// Subscribe form open with the card widget mounted.
    ShowSubscribeForm,
    /// Plan change form open for the given subscription.
    ShowUpdateForm(SubscriptionId),
}

/// Open subscribe form.
///
/// Holds the card widget's mount, so discarding the form detaches the widget.
#[derive(Debug)]
pub struct SubscribeForm {
    plan: PlanCode,
    billing: BillingInfo,
    error: Option<String>,
    mount: WidgetMount,
}

impl SubscribeForm {
    /// Selected plan.
    #[must_use]
    pub const fn plan(&self) -> &PlanCode {
        &self.plan
    }

    /// Billing fields entered so far.
    #[must_use]
    pub const fn billing(&self) -> &BillingInfo {
        &self.billing
    }

    /// Error from the last submit, if it failed.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Container the card widget is mounted in.
    #[must_use]
    pub fn card_container(&self) -> &str {
        self.mount.container()
    }
}

/// Open plan change form.
#[derive(Debug, Clone)]
pub struct UpdateForm {
    subscription_id: SubscriptionId,
    plan: PlanCode,
    error: Option<String>,
}

impl UpdateForm {
    /// Subscription being changed.
    #[must_use]
    pub const fn subscription_id(&self) -> &SubscriptionId {
        &self.subscription_id
    }

    /// Selected plan.
    #[must_use]
    pub const fn plan(&self) -> &PlanCode {
        &self.plan
    }

    /// Error from the last submit, if it failed.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[derive(Debug)]
enum OpenForm {
    Subscribe(SubscribeForm),
    Update(UpdateForm),
}

/// Shared view of whether a mutation is in flight.
///
/// Clones observe the same flag, so a renderer can disable the submit control
/// while the controller is mutably borrowed by a pending submit.
#[derive(Debug, Clone, Default)]
pub struct SubmitIndicator(Arc<AtomicBool>);

impl SubmitIndicator {
    /// Whether a mutation is in flight.
    #[must_use]
    pub fn is_submitting(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn acquire(&self) -> Result<SubmitGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PortalError::SubmissionInProgress)?;
        Ok(SubmitGuard(Arc::clone(&self.0)))
    }
}

/// Clears the in-flight flag when dropped, including when the submitting
/// future is dropped mid-request.
#[derive(Debug)]
struct SubmitGuard(Arc<AtomicBool>);

impl Drop for SubmitGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Dashboard state machine over a backend and a card widget.
#[derive(Debug)]
pub struct DashboardController<A, W> {
    api: A,
    widget: W,
    plans: Vec<Plan>,
    subscription: Option<Subscription>,
    form: Option<OpenForm>,
    notice: Option<String>,
    error: Option<String>,
    stale: bool,
    submitting: SubmitIndicator,
}

impl<A: SubscriptionApi, W: CardWidget> DashboardController<A, W> {
    /// Fetches plans and the current subscription concurrently.
    ///
    /// # Errors
    ///
    /// Returns the first failure of either request; no controller is built
    /// from partial data.
    #[instrument(skip_all)]
    pub async fn load(api: A, widget: W) -> Result<Self> {
        let (plans, subscription) = tokio::try_join!(api.list_plans(), api.get_subscription())?;
        info!(
            plans = plans.len(),
            subscribed = subscription.is_some(),
            "dashboard loaded"
        );
        Ok(Self {
            api,
            widget,
            plans,
            subscription,
            form: None,
            notice: None,
            error: None,
            stale: false,
            submitting: SubmitIndicator::default(),
        })
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> ViewMode {
        match &self.form {
            None => ViewMode::Idle,
            Some(OpenForm::Subscribe(_)) => ViewMode::ShowSubscribeForm,
            Some(OpenForm::Update(form)) => ViewMode::ShowUpdateForm(form.subscription_id.clone()),
        }
    }

    /// Plans on offer, in backend order.
    #[must_use]
    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    /// Backend-confirmed subscription, if any.
    #[must_use]
    pub const fn subscription(&self) -> Option<&Subscription> {
        self.subscription.as_ref()
    }

    /// Plan of the current subscription, when it is one of the loaded plans.
    #[must_use]
    pub fn current_plan(&self) -> Option<&Plan> {
        self.subscription.as_ref().and_then(|sub| find_plan(&self.plans, sub.plan_code()))
    }

    /// Open subscribe form.
    #[must_use]
    pub fn subscribe_form(&self) -> Option<&SubscribeForm> {
        match &self.form {
            Some(OpenForm::Subscribe(form)) => Some(form),
            _ => None,
        }
    }

    /// Open plan change form.
    #[must_use]
    pub fn update_form(&self) -> Option<&UpdateForm> {
        match &self.form {
            Some(OpenForm::Update(form)) => Some(form),
            _ => None,
        }
    }

    /// Success notice from the last completed action.
    #[must_use]
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// Page-level error.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether the backend state is unknown after a failed refetch.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        self.stale
    }

    /// Whether a mutation is in flight.
    #[must_use]
    pub fn is_submitting(&self) -> bool {
        self.submitting.is_submitting()
    }

    /// Handle that keeps reporting the in-flight state while a submit holds
    /// the controller.
    #[must_use]
    pub fn submit_indicator(&self) -> SubmitIndicator {
        self.submitting.clone()
    }

    /// Backend used by the controller.
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// Card widget used by the subscribe form.
    pub const fn widget(&self) -> &W {
        &self.widget
    }

    /// `(code, label)` for every plan, in order.
    #[must_use]
    pub fn plan_options(&self) -> Vec<(PlanCode, String)> {
        self.plans.iter().map(|plan| (plan.code.clone(), plan.selector_label())).collect()
    }

    /// Opens the subscribe form with the first plan selected and mounts the
    /// card widget.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::InvalidTransition`] if a form is open, the
    /// subscription is unknown, the member already has a subscription or no
    /// plans are offered.
    pub fn begin_subscribe(&mut self) -> Result<()> {
        self.ensure_idle()?;
        if self.subscription.is_some() {
            return Err(PortalError::InvalidTransition(
                "member already has an active subscription".to_owned(),
            ));
        }
        let plan = self
            .plans
            .first()
            .map(|plan| plan.code.clone())
            .ok_or_else(|| PortalError::InvalidTransition("no plans are available".to_owned()))?;
        let mount = self.widget.mount(CARD_CONTAINER)?;

        debug!(plan = %plan, "subscribe form opened");
        self.notice = None;
        self.form = Some(OpenForm::Subscribe(SubscribeForm {
            plan,
            billing: BillingInfo::default(),
            error: None,
            mount,
        }));
        Ok(())
    }

    /// Opens the plan change form pre-filled with the current plan.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::InvalidTransition`] if a form is open, the
    /// subscription is unknown or there is none.
    pub fn begin_update(&mut self) -> Result<()> {
        self.ensure_idle()?;
        let sub = self.subscription.as_ref().ok_or_else(|| {
            PortalError::InvalidTransition("there is no subscription to update".to_owned())
        })?;

        debug!(subscription = %sub.id, "update form opened");
        self.form = Some(OpenForm::Update(UpdateForm {
            subscription_id: sub.id.clone(),
            plan: sub.plan_code().clone(),
            error: None,
        }));
        self.notice = None;
        Ok(())
    }

    /// Selects a plan in the open form.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::InvalidPlanCode`] if `code` is not a loaded plan
    /// and [`PortalError::InvalidTransition`] if no form is open.
    pub fn select_plan(&mut self, code: &PlanCode) -> Result<()> {
        if find_plan(&self.plans, code).is_none() {
            return Err(PortalError::InvalidPlanCode(format!("{code} is not offered")));
        }
        match &mut self.form {
            Some(OpenForm::Subscribe(form)) => form.plan = code.clone(),
            Some(OpenForm::Update(form)) => form.plan = code.clone(),
            None => return Err(PortalError::InvalidTransition("no form is open".to_owned())),
        }
        Ok(())
    }

    /// Billing fields of the open subscribe form.
    pub fn billing_mut(&mut self) -> Option<&mut BillingInfo> {
        match &mut self.form {
            Some(OpenForm::Subscribe(form)) => Some(&mut form.billing),
            _ => None,
        }
    }

    /// Discards the open form, unmounting the card widget.
    pub fn dismiss_form(&mut self) {
        if self.form.take().is_some() {
            debug!("form dismissed");
        }
    }

    /// Tokenizes the card, subscribes and refetches.
    ///
    /// # Errors
    ///
    /// On validation, tokenization or API failure the form stays open with
    /// its fields and the error; the error is also returned. A failed refetch
    /// after the subscription was created closes the form and is reported as
    /// the page error.
    #[instrument(skip_all)]
    pub async fn submit_subscribe(&mut self) -> Result<()> {
        let _guard = self.submitting.acquire()?;
        let (plan, billing) = match &mut self.form {
            Some(OpenForm::Subscribe(form)) => {
                form.error = None;
                (form.plan.clone(), form.billing.clone())
            },
            _ => {
                return Err(PortalError::InvalidTransition(
                    "subscribe form is not open".to_owned(),
                ));
            },
        };

        match self.create(&plan, &billing).await {
            Ok(Some(created)) => {
                info!(subscription = %created.id, plan = %plan, "subscription created");
            },
            Ok(None) => info!(plan = %plan, "subscription created"),
            Err(e) => {
                self.fail_form(&e);
                return Err(e);
            },
        }
        self.reconcile(None).await
    }

    async fn create(&self, plan: &PlanCode, billing: &BillingInfo) -> Result<Option<Subscription>> {
        billing.validate()?;
        let token = self.widget.tokenize(billing).await?;
        self.api.create_subscription(plan, &token).await
    }

    /// Changes the subscription's plan and refetches.
    ///
    /// # Errors
    ///
    /// On failure the form stays open with the error, which is also returned.
    #[instrument(skip_all)]
    pub async fn submit_update(&mut self) -> Result<()> {
        let _guard = self.submitting.acquire()?;
        let (id, plan) = match &mut self.form {
            Some(OpenForm::Update(form)) => {
                form.error = None;
                (form.subscription_id.clone(), form.plan.clone())
            },
            _ => {
                return Err(PortalError::InvalidTransition("update form is not open".to_owned()));
            },
        };

        match self.api.update_subscription(&id, &plan).await {
            Ok(change) => {
                info!(subscription = %id, new_plan = %change.new_plan, "plan updated");
                self.reconcile(Some(PLAN_UPDATED_NOTICE)).await
            },
            Err(e) => {
                self.fail_form(&e);
                Err(e)
            },
        }
    }

    /// Cancels the subscription once `confirm` accepts [`CANCEL_PROMPT`].
    ///
    /// Returns `Ok(false)` without contacting the backend when the member
    /// declines.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::InvalidTransition`] without a subscription. A
    /// backend failure is returned and shown as the page error; the mode is
    /// left as it was.
    #[instrument(skip_all)]
    pub async fn cancel_subscription<F>(&mut self, confirm: F) -> Result<bool>
    where
        F: FnOnce(&str) -> bool,
    {
        let id = self
            .subscription
            .as_ref()
            .map(|sub| sub.id.clone())
            .ok_or_else(|| {
                PortalError::InvalidTransition("there is no subscription to cancel".to_owned())
            })?;
        let _guard = self.submitting.acquire()?;
        if !confirm(CANCEL_PROMPT) {
            debug!("cancellation declined");
            return Ok(false);
        }

        if let Err(e) = self.api.cancel_subscription(&id).await {
            warn!(subscription = %id, error = %e, "cancellation failed");
            self.error = Some(e.user_message());
            return Err(e);
        }
        info!(subscription = %id, "subscription canceled");
        self.reconcile(Some(SUBSCRIPTION_CANCELED_NOTICE)).await?;
        Ok(true)
    }

    /// Refetches the subscription without changing the mode.
    ///
    /// A successful refetch clears the unknown state and its page error.
    ///
    /// # Errors
    ///
    /// Returns the fetch error; cached state is kept.
    pub async fn refresh(&mut self) -> Result<()> {
        self.subscription = self.api.get_subscription().await?;
        if self.stale {
            debug!("subscription state recovered");
            self.stale = false;
            self.error = None;
        }
        Ok(())
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.form.is_some() {
            return Err(PortalError::InvalidTransition("another form is already open".to_owned()));
        }
        if self.stale {
            return Err(PortalError::InvalidTransition(
                "subscription status is unknown; refresh first".to_owned(),
            ));
        }
        Ok(())
    }

    fn fail_form(&mut self, err: &PortalError) {
        warn!(error = %err, "form submission failed");
        let message = Some(err.user_message());
        match &mut self.form {
            Some(OpenForm::Subscribe(form)) => form.error = message,
            Some(OpenForm::Update(form)) => form.error = message,
            None => self.error = message,
        }
    }

    /// Closes the form and adopts the backend's view of the subscription.
    async fn reconcile(&mut self, notice: Option<&str>) -> Result<()> {
        self.form = None;
        match self.api.get_subscription().await {
            Ok(subscription) => {
                self.subscription = subscription;
                self.stale = false;
                self.error = None;
                self.notice = notice.map(str::to_owned);
                Ok(())
            },
            Err(e) => {
                warn!(error = %e, "refetch after mutation failed");
                self.subscription = None;
                self.stale = true;
                self.error = Some(e.user_message());
                Err(e)
            },
        }
    }
}
