//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Default access token lifetime for manual logins (1 hour)
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

#[derive(Debug, Parser)]
#[command(
    name = "authkeep",
    version,
    about = "Keep a client session logged in",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Show the current session.
    Status,
    /// Print the provider login URL.
    Authorize,
    /// Finish an OAuth login from the redirect URL.
    Callback {
        /// Full URL the provider redirected to
        url: String,
    },
    /// Store a session from tokens entered at the prompt.
    Login(LoginArgs),
    /// Exchange the refresh token now.
    Refresh,
    /// Forget the session.
    Logout,
    /// Keep the session fresh until interrupted.
    Watch {
        /// Also write logs to this file
        #[arg(long, env = "AUTHKEEP_LOG_FILE")]
        log_file: Option<PathBuf>,
    },
}

#[derive(Debug, Args, PartialEq, Eq)]
pub struct LoginArgs {
    #[arg(long)]
    pub email: String,
    /// User id (defaults to the email address)
    #[arg(long)]
    pub id: Option<String>,
    #[arg(long, default_value = "")]
    pub name: String,
    /// Access token lifetime in seconds
    #[arg(long, default_value_t = DEFAULT_EXPIRES_IN_SECS)]
    pub expires_in: i64,
}

impl LoginArgs {
    pub fn user_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| self.email.clone())
    }
}
