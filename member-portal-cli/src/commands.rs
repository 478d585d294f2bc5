//! Command implementations.

use std::{
    io::{self, IsTerminal, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use member_portal::{
    PortalError,
    api::{HttpApiClient, LoginRequest, SignupRequest},
    config::PortalConfig,
    controller::DashboardController,
    models::PlanCode,
    payment::{BillingInfo, CardDetails, HostedCardWidget},
    render,
    session::{FileSessionStore, SessionContext},
    shell::{DashboardPage, PageState, PortalShell, Route},
};
use tracing::debug;

use crate::cli::{Commands, SubscribeArgs};

const APP_DIR: &str = "member-portal";
const CONFIG_FILE: &str = "config.toml";
const SESSION_FILE: &str = "session.json";

type Dashboard = DashboardController<HttpApiClient, HostedCardWidget>;

fn app_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .context("cannot determine the configuration directory; pass --config")
}

/// Loaded configuration and session shell.
pub struct App {
    config: PortalConfig,
    shell: PortalShell<FileSessionStore>,
}

impl App {
    /// Loads configuration and the persisted session.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => app_dir()?.join(CONFIG_FILE),
        };
        let config = PortalConfig::load(&path)
            .and_then(PortalConfig::apply_env)
            .with_context(|| format!("loading configuration from {}", path.display()))?;

        let session_path = match &config.session.path {
            Some(path) => path.clone(),
            None => app_dir()?.join(SESSION_FILE),
        };
        debug!(config = %path.display(), session = %session_path.display(), "configuration loaded");

        let context = SessionContext::init(FileSessionStore::new(session_path))?;
        Ok(Self { config, shell: PortalShell::new(context) })
    }

    /// Runs one command.
    pub async fn run(mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Open { page } => self.open(&page).await,
            Commands::Signup { fullname, email, password } => {
                self.signup(SignupRequest { fullname, email, password }).await
            },
            Commands::Login { email, password } => self.login(LoginRequest { email, password }).await,
            Commands::Logout => self.logout(),
            Commands::Plans => self.plans().await,
            Commands::Dashboard => self.show_dashboard().await,
            Commands::Details => self.show_details().await,
            Commands::Subscribe(args) => self.subscribe(args).await,
            Commands::Update { plan } => self.update(&plan).await,
            Commands::Cancel { yes } => self.cancel(yes).await,
        }
    }

    async fn open(&mut self, page: &str) -> Result<()> {
        let route: Route = page.parse().map_err(|e: PortalError| anyhow!(e.user_message()))?;
        let resolved = self.shell.resolve(route);
        if resolved != route {
            eprintln!("{} requires login; showing {resolved}", route);
        }
        match resolved {
            Route::Landing => println!("{}", render::landing()),
            Route::Signup => {
                println!("Sign Up\nRun `member-portal signup --fullname <name> --email <email>`.");
            },
            Route::Login => println!("Log In\nRun `member-portal login --email <email>`."),
            Route::Dashboard => return self.show_dashboard().await,
            Route::PlanDetails => return self.show_details().await,
        }
        Ok(())
    }

    async fn signup(&mut self, request: SignupRequest) -> Result<()> {
        let api = HttpApiClient::new(&self.config.api)?;
        let route = self.shell.signup(&api, &request).await.map_err(|e| self.fail(e))?;
        println!("Account created. Continue at {route}: member-portal login --email {}", request.email);
        Ok(())
    }

    async fn login(&mut self, request: LoginRequest) -> Result<()> {
        let api = HttpApiClient::new(&self.config.api)?;
        self.shell.login(&api, &request).await.map_err(|e| self.fail(e))?;
        self.show_dashboard().await
    }

    fn logout(&mut self) -> Result<()> {
        let route = self.shell.logout()?;
        println!("Logged out.\n");
        debug!(%route, "returned to landing page");
        println!("{}", render::landing());
        Ok(())
    }

    async fn plans(&mut self) -> Result<()> {
        let controller = self.dashboard().await?;
        println!("{}", render::plan_list(controller.plans()));
        Ok(())
    }

    async fn show_dashboard(&mut self) -> Result<()> {
        let controller = self.dashboard().await?;
        self.print_dashboard(&controller);
        Ok(())
    }

    async fn show_details(&mut self) -> Result<()> {
        let controller = self.dashboard().await?;
        println!("{}", render::plan_details(controller.plans(), controller.subscription()));
        Ok(())
    }

    async fn subscribe(&mut self, args: SubscribeArgs) -> Result<()> {
        let mut controller = self.dashboard().await?;
        controller.begin_subscribe().map_err(|e| self.fail(e))?;
        if let Some(plan) = args.plan {
            let code = PlanCode::new(plan).map_err(|e| self.fail(e))?;
            controller.select_plan(&code).map_err(|e| self.fail(e))?;
        }
        if let Some(billing) = controller.billing_mut() {
            *billing = BillingInfo {
                first_name: args.first_name,
                last_name: args.last_name,
                address1: args.address,
                city: args.city,
                state: args.state,
                country: args.country,
                postal_code: args.postal_code,
            };
        }
        let card = CardDetails::new(args.card_number, args.exp_month, args.exp_year, args.cvv);
        controller.widget().enter_card(card).map_err(|e| self.fail(e))?;

        let outcome = controller.submit_subscribe().await;
        self.print_dashboard(&controller);
        outcome.map_err(|e| self.fail(e))
    }

    async fn update(&mut self, plan: &str) -> Result<()> {
        let mut controller = self.dashboard().await?;
        let code = PlanCode::new(plan).map_err(|e| self.fail(e))?;
        controller.begin_update().map_err(|e| self.fail(e))?;
        controller.select_plan(&code).map_err(|e| self.fail(e))?;

        let outcome = controller.submit_update().await;
        self.print_dashboard(&controller);
        outcome.map_err(|e| self.fail(e))
    }

    async fn cancel(&mut self, assume_yes: bool) -> Result<()> {
        let mut controller = self.dashboard().await?;
        let outcome = controller
            .cancel_subscription(|prompt| assume_yes || confirm_on_stdin(prompt))
            .await;
        match outcome {
            Ok(false) => {
                println!("Subscription kept.");
                Ok(())
            },
            Ok(true) => {
                self.print_dashboard(&controller);
                Ok(())
            },
            Err(e) => {
                self.print_dashboard(&controller);
                Err(self.fail(e))
            },
        }
    }

    /// Loads the dashboard, or explains why it cannot be shown.
    async fn dashboard(&mut self) -> Result<Box<Dashboard>> {
        if io::stderr().is_terminal() {
            eprintln!("{}", render::placeholder(PageState::Loading));
        }
        let api_config = self.config.api.clone();
        let widget = HostedCardWidget::new(&self.config.payment)?;
        let page = self
            .shell
            .open_dashboard(
                move |session| Ok(HttpApiClient::new(&api_config)?.with_session(session.clone())),
                widget,
            )
            .await;

        match page {
            DashboardPage::Ready(controller) => Ok(controller),
            DashboardPage::RedirectToLogin => {
                bail!("You are not logged in. Run `member-portal login --email <email>`.")
            },
            DashboardPage::Failed(e) => {
                println!("{}", render::load_failed(&e));
                Err(anyhow!(e.user_message()))
            },
        }
    }

    fn print_dashboard(&self, controller: &Dashboard) {
        println!("{}", render::dashboard(controller, self.shell.session().session()));
    }

    /// Converts a portal error into the message shown to the member, clearing
    /// the session when it was rejected.
    fn fail(&mut self, err: PortalError) -> anyhow::Error {
        match self.shell.handle_error(&err) {
            Some(route) => anyhow!("{} (continue at {route})", err.user_message()),
            None => anyhow!(err.user_message()),
        }
    }
}

fn confirm_on_stdin(prompt: &str) -> bool {
    eprint!("{prompt} [y/N] ");
    let _ = io::stderr().flush();
    let mut answer = String::new();
    io::stdin().read_line(&mut answer).is_ok()
        && matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
