//! authkeep - keep a client session logged in from the command line.
//!
//! Thin front end over `authkeep-core`: each command opens the configured
//! session store, performs one operation, and exits. `watch` mounts a
//! session provider and keeps the access token fresh until interrupted.

mod args;

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use authkeep_core::auth::{OAuthClient, OAuthConfig};
use authkeep_core::utils::{format_remaining, format_timestamp, mask_token};
use authkeep_core::{
    open_store, AuthState, Config, ContextError, RefreshSchedule, SessionManager,
    SessionProvider, TokenClient, User,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use args::{Cli, Command, LoginArgs};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr; with a log file they are also written there through a
/// non-blocking writer whose guard must outlive the program.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
            let name = path
                .file_name()
                .context("Log file path has no file name")?;
            let appender = tracing_appender::rolling::never(dir.unwrap_or(Path::new(".")), name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

/// Open the configured store and build a session manager over it
fn open_session(config: &Config) -> Result<(Arc<SessionManager>, TokenClient)> {
    let store = open_store(config)?;
    let client = TokenClient::from_config(config).context("Failed to build HTTP client")?;
    let manager = SessionManager::new(store, Arc::new(client.clone()))
        .with_refresh_buffer(config.refresh_buffer());
    Ok((Arc::new(manager), client))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let command = Cli::parse().command;

    let log_file = match &command {
        Command::Watch { log_file } => log_file.as_deref(),
        _ => None,
    };
    let _log_guard = init_tracing(log_file)?;

    let config = Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        Config::default()
    });

    match command {
        Command::Status => status(&config),
        Command::Authorize => authorize(&config),
        Command::Callback { url } => callback(&config, &url).await,
        Command::Login(login_args) => login(&config, login_args),
        Command::Refresh => refresh(&config).await,
        Command::Logout => logout(&config),
        Command::Watch { .. } => watch(&config).await,
    }
}

fn print_state(state: &AuthState) {
    let Some(user) = state.user.as_ref().filter(|_| state.is_authenticated) else {
        println!("Not logged in");
        return;
    };
    println!("Logged in as {} <{}>", user.display_name(), user.email);

    if let Some(tokens) = &state.tokens {
        println!("  Access token:  {}", mask_token(&tokens.access_token));
        println!(
            "  Expires:       {} ({})",
            format_timestamp(&tokens.expires_at),
            format_remaining(tokens.time_until_expiry())
        );
    }
}

fn status(config: &Config) -> Result<()> {
    let (manager, _) = open_session(config)?;
    let state = manager.state();
    print_state(&state);
    if state.is_authenticated && manager.needs_refresh() {
        println!("  Refresh due:   yes");
    }
    Ok(())
}

fn authorize(config: &Config) -> Result<()> {
    let (manager, client) = open_session(config)?;
    let oauth = OAuthClient::new(
        OAuthConfig::from_config(config)?,
        manager.storage().clone(),
        client,
    );
    println!("Open this URL to log in:\n\n{}\n", oauth.authorize_url()?);
    println!("Then run: authkeep callback '<redirect URL>'");
    Ok(())
}

async fn callback(config: &Config, url: &str) -> Result<()> {
    let (manager, client) = open_session(config)?;
    let oauth = OAuthClient::new(
        OAuthConfig::from_config(config)?,
        manager.storage().clone(),
        client,
    );

    let response = oauth.complete(url).await.context("OAuth login failed")?;
    let tokens = response.tokens;
    let refresh_token = tokens
        .refresh_token
        .context("Code exchange returned no refresh token")?;

    let state = manager.login(
        &tokens.access_token,
        &refresh_token,
        tokens.expires_in,
        response.user,
    );
    print_state(&state);
    Ok(())
}

fn login(config: &Config, login_args: LoginArgs) -> Result<()> {
    let access_token = rpassword::prompt_password("Access token: ")?;
    let refresh_token = rpassword::prompt_password("Refresh token: ")?;
    if access_token.trim().is_empty() || refresh_token.trim().is_empty() {
        anyhow::bail!("Access and refresh tokens are required");
    }

    let (manager, _) = open_session(config)?;
    let user = User {
        id: login_args.user_id(),
        email: login_args.email,
        name: login_args.name,
        picture: None,
        verified_email: false,
    };
    let state = manager.login(
        access_token.trim(),
        refresh_token.trim(),
        login_args.expires_in,
        user,
    );
    print_state(&state);
    Ok(())
}

async fn refresh(config: &Config) -> Result<()> {
    let (manager, _) = open_session(config)?;
    if manager.refresh_tokens().await {
        print_state(&manager.state());
        Ok(())
    } else {
        anyhow::bail!("Refresh failed - you are logged out")
    }
}

fn logout(config: &Config) -> Result<()> {
    let (manager, _) = open_session(config)?;
    manager.logout();
    println!("Logged out");
    Ok(())
}

async fn watch(config: &Config) -> Result<()> {
    let (manager, _) = open_session(config)?;
    let schedule = RefreshSchedule::from_config(config);
    let provider = SessionProvider::mount(manager, schedule);
    let mut context = provider.context();

    info!(?schedule, "Watching session");
    print_state(&context.state()?);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            changed = context.changed() => match changed {
                Ok(state) => print_state(&state),
                Err(ContextError::Inactive) => break,
            },
        }
    }

    provider.unmount().await;
    Ok(())
}
