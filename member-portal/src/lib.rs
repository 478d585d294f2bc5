//! Member Portal: subscription self-service for members
//!
//! A library for the member side of a subscription business: account signup
//! and login, browsing plans, and subscribing, changing plan or cancelling
//! against a backend HTTP API. Card details are exchanged for a single-use
//! token by a hosted tokenization widget, so they never reach the backend.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │ PortalShell          routing, session guard      │
//! │   └─ SessionContext  token + profile, persisted  │
//! ├──────────────────────────────────────────────────┤
//! │ DashboardController  Idle / Subscribe / Update   │
//! │   ├─ SubscriptionApi ──► backend (HTTP/JSON)     │
//! │   └─ CardWidget      ──► tokenization service    │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! The controller is generic over [`api::SubscriptionApi`] and
//! [`payment::CardWidget`]; [`api::HttpApiClient`] and
//! [`payment::HostedCardWidget`] are the production implementations.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use member_portal::{
//!     api::HttpApiClient,
//!     config::PortalConfig,
//!     payment::HostedCardWidget,
//!     render,
//!     session::{FileSessionStore, SessionContext},
//!     shell::{DashboardPage, PortalShell},
//! };
//!
//! # async fn example() -> member_portal::Result<()> {
//! let config = PortalConfig::default();
//! let store = FileSessionStore::new("/tmp/member-portal-session.json");
//! let mut shell = PortalShell::new(SessionContext::init(store)?);
//!
//! let widget = HostedCardWidget::new(&config.payment)?;
//! let page = shell
//!     .open_dashboard(
//!         |session| Ok(HttpApiClient::new(&config.api)?.with_session(session.clone())),
//!         widget,
//!     )
//!     .await;
//!
//! match page {
//!     DashboardPage::Ready(controller) => {
//!         println!("{}", render::dashboard(&*controller, shell.session().session()));
//!     }
//!     DashboardPage::Failed(e) => println!("{}", render::load_failed(&e)),
//!     DashboardPage::RedirectToLogin => println!("Please log in."),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Every operation returns [`Result<T, PortalError>`](error::Result).
//! [`PortalError::user_message`] gives the text to show next to a form, and
//! [`PortalError::is_auth_required`] tells the caller to send the member back
//! to the login page. Nothing is retried automatically.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from reqwest and tokio"
)]

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod models;
pub mod payment;
pub mod render;
pub mod session;
pub mod shell;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::{PortalError, Result};
