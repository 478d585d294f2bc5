//! Page shell: routing, the unauthenticated guard and account flows.
//!
//! [`PortalShell`] owns the [`SessionContext`] for the lifetime of the app and
//! hands the session to whatever needs it. Protected routes resolve to
//! [`Route::Login`] without a session, and an [`PortalError::AuthRequired`]
//! while loading the dashboard clears the stale session before redirecting.

use std::{fmt, str::FromStr};

use tracing::{info, instrument, warn};

use crate::{
    api::{AuthApi, LoginRequest, SignupRequest, SubscriptionApi},
    controller::DashboardController,
    error::{PortalError, Result},
    payment::CardWidget,
    session::{Session, SessionContext, SessionStore},
};

/// Pages of the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Public landing page.
    Landing,
    /// Account registration.
    Signup,
    /// Credential entry.
    Login,
    /// Member dashboard.
    Dashboard,
    /// Current plan details.
    PlanDetails,
}

impl Route {
    /// All routes, in navigation order.
    pub const ALL: [Self; 5] =
        [Self::Landing, Self::Signup, Self::Login, Self::Dashboard, Self::PlanDetails];

    /// Whether the route needs a session.
    #[must_use]
    pub const fn requires_session(self) -> bool {
        matches!(self, Self::Dashboard | Self::PlanDetails)
    }

    /// URL path of the route.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Landing => "/",
            Self::Signup => "/signup",
            Self::Login => "/login",
            Self::Dashboard => "/dashboard",
            Self::PlanDetails => "/plan-details",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl FromStr for Route {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self> {
        let path = s.trim();
        let path = if path.len() > 1 { path.trim_end_matches('/') } else { path };
        Self::ALL
            .into_iter()
            .find(|route| route.path() == path)
            .ok_or_else(|| PortalError::ValidationFailed(format!("Unknown page: {s}")))
    }
}

/// Render state of the dashboard page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Initial requests are still in flight.
    Loading,
    /// Leaving for the login page.
    Redirecting,
    /// Initial load failed; nothing but the error is shown.
    Failed,
    /// Data loaded.
    Ready,
}

/// Outcome of opening the dashboard.
#[derive(Debug)]
pub enum DashboardPage<A, W> {
    /// No usable session.
    RedirectToLogin,
    /// Initial load failed.
    Failed(PortalError),
    /// Loaded controller.
    Ready(Box<DashboardController<A, W>>),
}

impl<A, W> DashboardPage<A, W> {
    /// Render state of this outcome.
    #[must_use]
    pub const fn state(&self) -> PageState {
        match self {
            Self::RedirectToLogin => PageState::Redirecting,
            Self::Failed(_) => PageState::Failed,
            Self::Ready(_) => PageState::Ready,
        }
    }
}

/// Application shell over a session store.
#[derive(Debug)]
pub struct PortalShell<S: SessionStore> {
    session: SessionContext<S>,
}

impl<S: SessionStore> PortalShell<S> {
    /// Wraps an initialised session context.
    pub const fn new(session: SessionContext<S>) -> Self {
        Self { session }
    }

    /// Session context.
    pub const fn session(&self) -> &SessionContext<S> {
        &self.session
    }

    /// Route to show for a navigation to `route`.
    #[must_use]
    pub const fn resolve(&self, route: Route) -> Route {
        if route.requires_session() && !self.session.is_authenticated() {
            Route::Login
        } else {
            route
        }
    }

    /// Loads the dashboard for the current session.
    ///
    /// `api_factory` builds the backend client from the session; `widget` is
    /// handed to the controller for the subscribe form.
    #[instrument(skip_all)]
    pub async fn open_dashboard<A, W, F>(&mut self, api_factory: F, widget: W) -> DashboardPage<A, W>
    where
        A: SubscriptionApi,
        W: CardWidget,
        F: FnOnce(&Session) -> Result<A>,
    {
        let Some(session) = self.session.session() else {
            info!("no session, redirecting to login");
            return DashboardPage::RedirectToLogin;
        };
        let api = match api_factory(session) {
            Ok(api) => api,
            Err(e) => return DashboardPage::Failed(e),
        };

        match DashboardController::load(api, widget).await {
            Ok(controller) => DashboardPage::Ready(Box::new(controller)),
            Err(e) if e.is_auth_required() => {
                warn!(error = %e, "session rejected, redirecting to login");
                self.end_session();
                DashboardPage::RedirectToLogin
            },
            Err(e) => {
                warn!(error = %e, "dashboard failed to load");
                DashboardPage::Failed(e)
            },
        }
    }

    /// Redirect to follow after `err`, clearing the session when it was
    /// rejected.
    pub fn handle_error(&mut self, err: &PortalError) -> Option<Route> {
        if err.is_auth_required() {
            self.end_session();
            Some(Route::Login)
        } else {
            None
        }
    }

    /// Registers an account and returns the login route.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::ValidationFailed`] for an incomplete form or a
    /// rejected signup.
    #[instrument(skip_all, fields(email = %request.email))]
    pub async fn signup<Api: AuthApi>(&self, api: &Api, request: &SignupRequest) -> Result<Route> {
        request.validate()?;
        api.signup(request).await?;
        Ok(Route::Login)
    }

    /// Logs in, persists the session and returns the dashboard route.
    ///
    /// # Errors
    ///
    /// Returns the backend's rejection, or [`PortalError::SessionStore`] if the
    /// session cannot be saved.
    #[instrument(skip_all, fields(email = %request.email))]
    pub async fn login<Api: AuthApi>(&mut self, api: &Api, request: &LoginRequest) -> Result<Route> {
        request.validate()?;
        let session = api.login(request).await?;
        self.session.login(session)?;
        Ok(Route::Dashboard)
    }

    /// Clears the session and returns the landing route.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::SessionStore`] if the store cannot be cleared.
    pub fn logout(&mut self) -> Result<Route> {
        self.session.logout()?;
        Ok(Route::Landing)
    }

    fn end_session(&mut self) {
        if let Err(e) = self.session.logout() {
            warn!(error = %e, "failed to clear session");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        session::MemorySessionStore,
        testing::{FakeApi, FakeWidget, Op, plan},
    };

    struct FakeAuth {
        reject_login: Option<String>,
    }

    impl AuthApi for FakeAuth {
        async fn signup(&self, _request: &SignupRequest) -> Result<()> {
            Ok(())
        }

        async fn login(&self, request: &LoginRequest) -> Result<Session> {
            match &self.reject_login {
                Some(message) => Err(PortalError::ValidationFailed(message.clone())),
                None => Session::new("tok_abc", json!({ "email": request.email })),
            }
        }
    }

    fn shell(logged_in: bool) -> PortalShell<MemorySessionStore> {
        let mut context = SessionContext::init(MemorySessionStore::new()).unwrap();
        if logged_in {
            context.login(Session::new("tok_abc", json!({})).unwrap()).unwrap();
        }
        PortalShell::new(context)
    }

    fn login_request() -> LoginRequest {
        LoginRequest { email: "ada@example.com".to_owned(), password: "pw".to_owned() }
    }

    #[test]
    fn test_route_paths_round_trip() {
        for route in Route::ALL {
            assert_eq!(route.path().parse::<Route>().unwrap(), route);
        }
        assert_eq!("/dashboard/".parse::<Route>().unwrap(), Route::Dashboard);
        assert!("/admin".parse::<Route>().is_err());
    }

    #[test]
    fn test_resolve_guards_protected_routes() {
        let anonymous = shell(false);
        assert_eq!(anonymous.resolve(Route::Dashboard), Route::Login);
        assert_eq!(anonymous.resolve(Route::PlanDetails), Route::Login);
        assert_eq!(anonymous.resolve(Route::Signup), Route::Signup);

        let member = shell(true);
        assert_eq!(member.resolve(Route::Dashboard), Route::Dashboard);
    }

    #[tokio::test]
    async fn test_open_dashboard_without_session_redirects() {
        let mut shell = shell(false);
        let mut built = false;
        let page = shell
            .open_dashboard(
                |_| {
                    built = true;
                    Ok(FakeApi::default())
                },
                FakeWidget::default(),
            )
            .await;
        assert!(matches!(page, DashboardPage::RedirectToLogin));
        assert!(!built);
    }

    #[tokio::test]
    async fn test_open_dashboard_ready() {
        let mut shell = shell(true);
        let api = FakeApi::new(vec![plan("basic", "Basic", 10)], None);
        let page = shell.open_dashboard(|_| Ok(api.clone()), FakeWidget::default()).await;
        assert_eq!(page.state(), PageState::Ready);
    }

    #[tokio::test]
    async fn test_open_dashboard_failure_is_full_page() {
        let mut shell = shell(true);
        let api = FakeApi::new(vec![plan("basic", "Basic", 10)], None);
        api.fail_next(Op::ListPlans, PortalError::Unavailable("down".to_owned()));
        let page = shell.open_dashboard(|_| Ok(api.clone()), FakeWidget::default()).await;
        assert_eq!(page.state(), PageState::Failed);
        assert!(shell.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_open_dashboard_auth_failure_clears_session() {
        let mut shell = shell(true);
        let api = FakeApi::new(Vec::new(), None);
        api.fail_next(Op::GetSubscription, PortalError::AuthRequired("expired".to_owned()));
        let page = shell.open_dashboard(|_| Ok(api.clone()), FakeWidget::default()).await;
        assert!(matches!(page, DashboardPage::RedirectToLogin));
        assert!(!shell.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_login_persists_session() {
        let mut shell = shell(false);
        let auth = FakeAuth { reject_login: None };
        let route = shell.login(&auth, &login_request()).await.unwrap();
        assert_eq!(route, Route::Dashboard);
        assert!(shell.session().is_authenticated());
        assert!(shell.session().store().get("token").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_login_rejection_shown_verbatim() {
        let mut shell = shell(false);
        let auth = FakeAuth { reject_login: Some("Invalid credentials".to_owned()) };
        let err = shell.login(&auth, &login_request()).await.unwrap_err();
        assert_eq!(err.user_message(), "Invalid credentials");
        assert!(!shell.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_signup_routes_to_login() {
        let shell = shell(false);
        let auth = FakeAuth { reject_login: None };
        let request = SignupRequest {
            fullname: "Ada Lovelace".to_owned(),
            email: "ada@example.com".to_owned(),
            password: "pw".to_owned(),
        };
        assert_eq!(shell.signup(&auth, &request).await.unwrap(), Route::Login);
    }

    #[test]
    fn test_logout_clears_store() {
        let mut shell = shell(true);
        assert_eq!(shell.logout().unwrap(), Route::Landing);
        assert!(!shell.session().is_authenticated());
        assert!(shell.session().store().get("token").unwrap().is_none());
        assert_eq!(shell.resolve(Route::Dashboard), Route::Login);
    }

    #[test]
    fn test_handle_error_redirects_on_auth() {
        let mut shell = shell(true);
        assert_eq!(shell.handle_error(&PortalError::Unavailable("x".to_owned())), None);
        assert!(shell.session().is_authenticated());
        let route = shell.handle_error(&PortalError::AuthRequired("x".to_owned()));
        assert_eq!(route, Some(Route::Login));
        assert!(!shell.session().is_authenticated());
    }
}
