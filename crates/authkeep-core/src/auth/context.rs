//! Mount point for the session in a front end.
//!
//! A `SessionProvider` is created once when the application starts and
//! unmounted when it shuts down. Views get a cloneable `SessionContext` from
//! it. Once the provider is gone every context call fails with
//! `ContextError::Inactive`.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use crate::models::{Tokens, User};

use super::{AuthState, RefreshLoop, RefreshSchedule, SessionManager};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("Session context used outside a mounted SessionProvider")]
    Inactive,
}

/// Owns the session for the lifetime of the application.
pub struct SessionProvider {
    manager: Arc<SessionManager>,
    mounted: watch::Sender<bool>,
    refresher: Option<RefreshLoop>,
}

impl SessionProvider {
    /// Restore the persisted session and start the refresh loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mount(manager: Arc<SessionManager>, schedule: RefreshSchedule) -> Self {
        let state = manager.restore();
        debug!(authenticated = state.is_authenticated, "Session provider mounted");

        let refresher = RefreshLoop::spawn(Arc::clone(&manager), schedule);
        let (mounted, _) = watch::channel(true);

        Self {
            manager,
            mounted,
            refresher: Some(refresher),
        }
    }

    pub fn context(&self) -> SessionContext {
        SessionContext {
            manager: Arc::clone(&self.manager),
            state_rx: self.manager.subscribe(),
            mounted: self.mounted.subscribe(),
        }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Stop the refresh loop and invalidate every context
    pub async fn unmount(mut self) {
        self.mounted.send_replace(false);
        if let Some(refresher) = self.refresher.take() {
            refresher.shutdown().await;
        }
        debug!("Session provider unmounted");
    }
}

impl Drop for SessionProvider {
    fn drop(&mut self) {
        // RefreshLoop aborts its task on drop
        self.mounted.send_replace(false);
    }
}

/// View-side handle to the session.
#[derive(Clone)]
pub struct SessionContext {
    manager: Arc<SessionManager>,
    state_rx: watch::Receiver<AuthState>,
    mounted: watch::Receiver<bool>,
}

impl SessionContext {
    fn session(&self) -> Result<&SessionManager, ContextError> {
        if *self.mounted.borrow() {
            Ok(&self.manager)
        } else {
            Err(ContextError::Inactive)
        }
    }

    pub fn state(&self) -> Result<AuthState, ContextError> {
        Ok(self.session()?.state())
    }

    pub fn is_authenticated(&self) -> Result<bool, ContextError> {
        Ok(self.session()?.is_authenticated())
    }

    pub fn user(&self) -> Result<Option<User>, ContextError> {
        Ok(self.session()?.user())
    }

    pub fn tokens(&self) -> Result<Option<Tokens>, ContextError> {
        Ok(self.session()?.tokens())
    }

    pub fn login(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in_secs: i64,
        user: User,
    ) -> Result<AuthState, ContextError> {
        Ok(self
            .session()?
            .login(access_token, refresh_token, expires_in_secs, user))
    }

    pub fn logout(&self) -> Result<(), ContextError> {
        self.session()?.logout();
        Ok(())
    }

    pub async fn refresh_tokens(&self) -> Result<bool, ContextError> {
        Ok(self.session()?.refresh_tokens().await)
    }

    /// Wait for the next state change and return the new state.
    ///
    /// Fails once the provider is unmounted, including while waiting.
    pub async fn changed(&mut self) -> Result<AuthState, ContextError> {
        self.session()?;

        let changed = tokio::select! {
            res = self.state_rx.changed() => res.is_ok(),
            _ = async {
                let _ = self.mounted.wait_for(|mounted| !*mounted).await;
            } => false,
        };
        if !changed {
            return Err(ContextError::Inactive);
        }

        self.session()?;
        Ok(self.state_rx.borrow_and_update().clone())
    }
}
