//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Member Portal - manage your subscription from the terminal
#[derive(Parser, Debug)]
#[command(name = "member-portal")]
#[command(about = "Manage your membership subscription", long_about = None)]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show a page by path (`/`, `/signup`, `/login`, `/dashboard`, `/plan-details`)
    Open {
        /// Page path
        #[arg(default_value = "/")]
        page: String,
    },

    /// Create an account
    Signup {
        /// Full name
        #[arg(long)]
        fullname: String,

        /// Login email
        #[arg(long)]
        email: String,

        /// Password
        #[arg(long, env = "MEMBER_PORTAL_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Log in and store the session
    Login {
        /// Login email
        #[arg(long)]
        email: String,

        /// Password
        #[arg(long, env = "MEMBER_PORTAL_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Clear the stored session
    Logout,

    /// List available plans
    Plans,

    /// Show the member dashboard
    Dashboard,

    /// Show details of the current plan
    Details,

    /// Subscribe to a plan
    Subscribe(SubscribeArgs),

    /// Move the subscription to another plan
    Update {
        /// Plan code to switch to
        #[arg(long)]
        plan: String,
    },

    /// Cancel the subscription
    Cancel {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Billing and card details for `subscribe`.
#[derive(Args, Debug)]
pub struct SubscribeArgs {
    /// Plan code (defaults to the first plan offered)
    #[arg(long)]
    pub plan: Option<String>,

    /// Cardholder first name
    #[arg(long)]
    pub first_name: String,

    /// Cardholder last name
    #[arg(long)]
    pub last_name: String,

    /// Street address
    #[arg(long)]
    pub address: String,

    /// City
    #[arg(long)]
    pub city: String,

    /// State or province
    #[arg(long)]
    pub state: String,

    /// Postal code
    #[arg(long)]
    pub postal_code: String,

    /// Country code
    #[arg(long, default_value = "US")]
    pub country: String,

    /// Card number
    #[arg(long, env = "MEMBER_PORTAL_CARD_NUMBER", hide_env_values = true)]
    pub card_number: String,

    /// Expiry month (1-12)
    #[arg(long)]
    pub exp_month: String,

    /// Expiry year
    #[arg(long)]
    pub exp_year: String,

    /// Card security code
    #[arg(long, env = "MEMBER_PORTAL_CVV", hide_env_values = true)]
    pub cvv: String,
}
