//! Plain-text rendering of portal pages.
//!
//! Each function returns the whole page as a `String` so the front end can
//! print it as-is.

use crate::{
    api::SubscriptionApi,
    controller::{DashboardController, SubscribeForm, UpdateForm},
    error::PortalError,
    models::{Plan, PlanCode, Subscription, find_plan},
    payment::CardWidget,
    session::Session,
    shell::PageState,
};

/// Placeholder shown while the dashboard loads.
pub const LOADING_TEXT: &str = "Loading...";

/// Public landing page.
#[must_use]
pub fn landing() -> String {
    [
        "Welcome to the Member Portal",
        "This is the public landing page.",
        "",
        "  login   Log In",
        "  signup  Sign Up",
    ]
    .join("\n")
}

/// Placeholder for a page that has no content yet.
#[must_use]
pub const fn placeholder(state: PageState) -> &'static str {
    match state {
        PageState::Loading => LOADING_TEXT,
        PageState::Redirecting => "Redirecting to login...",
        PageState::Failed => "Something went wrong.",
        PageState::Ready => "",
    }
}

/// Full-page error shown when the dashboard cannot load.
#[must_use]
pub fn load_failed(err: &PortalError) -> String {
    format!("Member Dashboard\n\nError: {}", err.user_message())
}

/// Label for `code`, falling back to the raw code for unknown plans.
#[must_use]
pub fn plan_label(plans: &[Plan], code: &PlanCode) -> String {
    find_plan(plans, code).map_or_else(|| code.to_string(), Plan::summary_label)
}

/// Member dashboard, including whichever form is open.
#[must_use]
pub fn dashboard<A, W>(controller: &DashboardController<A, W>, session: Option<&Session>) -> String
where
    A: SubscriptionApi,
    W: CardWidget,
{
    let mut lines = vec!["Member Dashboard".to_owned()];
    if let Some(name) = session.and_then(Session::display_name) {
        lines.push(format!("Logged in as {name}"));
    }
    if let Some(error) = controller.error() {
        lines.push(format!("Error: {error}"));
    }
    if let Some(notice) = controller.notice() {
        lines.push(notice.to_owned());
    }
    lines.push(String::new());

    match controller.subscription() {
        Some(sub) => lines.extend(subscription_details(controller.plans(), sub)),
        None if controller.is_stale() => {
            lines.push("Subscription status unavailable".to_owned());
            lines.push("Your last change was saved but could not be confirmed.".to_owned());
            lines.push("  [Refresh]".to_owned());
        },
        None => {
            lines.push("No Active Subscription".to_owned());
            lines.push("You are not currently subscribed to any plan.".to_owned());
            if controller.subscribe_form().is_none() {
                lines.push("  [Add Subscription]".to_owned());
            }
        },
    }

    let submitting = controller.is_submitting();
    if let Some(form) = controller.subscribe_form() {
        lines.push(String::new());
        lines.extend(subscribe_form(controller.plans(), form, submitting));
    }
    if let Some(form) = controller.update_form() {
        lines.push(String::new());
        lines.extend(update_form(controller.plans(), form, submitting));
    }
    lines.join("\n")
}

fn subscription_details(plans: &[Plan], sub: &Subscription) -> Vec<String> {
    let ends = sub
        .current_period_ends_at
        .map_or_else(|| "unknown".to_owned(), |at| at.format("%Y-%m-%d").to_string());
    vec![
        "Active Subscription".to_owned(),
        format!("  Plan: {}", plan_label(plans, sub.plan_code())),
        format!("  Status: {}", sub.state),
        format!("  Renews/Ends: {ends}"),
        "  [Details] [Update] [Cancel Subscription]".to_owned(),
    ]
}

fn plan_selector(plans: &[Plan], selected: &PlanCode) -> Vec<String> {
    plans
        .iter()
        .map(|plan| {
            let mark = if &plan.code == selected { "(*)" } else { "( )" };
            format!("    {mark} {}  [{}]", plan.selector_label(), plan.code)
        })
        .collect()
}

fn subscribe_form(plans: &[Plan], form: &SubscribeForm, submitting: bool) -> Vec<String> {
    let billing = form.billing();
    let mut lines = vec!["Subscribe".to_owned(), "  Select Plan:".to_owned()];
    lines.extend(plan_selector(plans, form.plan()));
    lines.extend([
        format!("  Card: secure entry in #{}", form.card_container()),
        format!("  First Name: {}", billing.first_name),
        format!("  Last Name: {}", billing.last_name),
        format!("  Address: {}", billing.address1),
        format!("  City: {}", billing.city),
        format!("  State: {}", billing.state),
        format!("  Postal Code: {}", billing.postal_code),
        format!("  Country: {}", billing.country),
    ]);
    if let Some(error) = form.error() {
        lines.push(format!("  Error: {error}"));
    }
    let submit = if submitting { "[Processing...]" } else { "[Subscribe]" };
    lines.push(format!("  {submit} [Cancel]"));
    lines
}

fn update_form(plans: &[Plan], form: &UpdateForm, submitting: bool) -> Vec<String> {
    let mut lines = vec!["Update Plan".to_owned()];
    lines.extend(plan_selector(plans, form.plan()));
    if let Some(error) = form.error() {
        lines.push(format!("  Error: {error}"));
    }
    let submit = if submitting { "[Saving...]" } else { "[Save]" };
    lines.push(format!("  {submit} [Cancel]"));
    lines
}

/// Plans on offer.
#[must_use]
pub fn plan_list(plans: &[Plan]) -> String {
    let mut lines = vec!["Available Plans".to_owned()];
    if plans.is_empty() {
        lines.push("  No plans are available.".to_owned());
    }
    lines.extend(plans.iter().map(|plan| format!("  {}  {}", plan.code, plan.selector_label())));
    lines.join("\n")
}

/// Details page for the current subscription.
#[must_use]
pub fn plan_details(plans: &[Plan], subscription: Option<&Subscription>) -> String {
    let mut lines = vec![
        "Plan Details".to_owned(),
        "Here is the information about your current subscription.".to_owned(),
        String::new(),
    ];
    match subscription {
        Some(sub) => lines.extend(subscription_details(plans, sub).into_iter().take(4)),
        None => lines.push("No Active Subscription".to_owned()),
    }
    lines.join("\n")
}
