//! Background task that keeps the access token fresh.
//!
//! The loop parks while the session is unauthenticated. Once a session
//! exists it checks immediately, then follows the configured schedule until
//! the session ends or the loop is shut down.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{Config, RefreshMode};

use super::{AuthState, SessionManager};

/// Interval between expiry checks in polling mode (5 minutes)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Minimum gap between two deadline-triggered refreshes
const MIN_DEADLINE_SPACING: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshSchedule {
    /// Check `needs_refresh` on a fixed interval
    Poll { interval: Duration },
    /// Sleep until the current token's refresh instant, then refresh
    Deadline,
}

impl Default for RefreshSchedule {
    fn default() -> Self {
        RefreshSchedule::Poll {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl RefreshSchedule {
    pub fn from_config(config: &Config) -> Self {
        match config.refresh_mode {
            RefreshMode::Poll => RefreshSchedule::Poll {
                interval: config.poll_interval(),
            },
            RefreshMode::Deadline => RefreshSchedule::Deadline,
        }
    }
}

/// Handle to a running refresh loop. Dropping it stops the loop.
pub struct RefreshLoop {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RefreshLoop {
    /// Spawn the loop on the current Tokio runtime
    pub fn spawn(manager: Arc<SessionManager>, schedule: RefreshSchedule) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run(manager, schedule, shutdown_rx));
        debug!(?schedule, "Refresh loop started");

        Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop the loop and wait for it to exit
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Refresh loop exited abnormally");
                }
            }
        }
        debug!("Refresh loop stopped");
    }
}

impl Drop for RefreshLoop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// How a per-session phase ended
enum PhaseEnd {
    /// Session ended; park until the next login
    SessionEnded,
    /// Loop shut down or manager gone
    Stop,
}

async fn run(
    manager: Arc<SessionManager>,
    schedule: RefreshSchedule,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut state_rx = manager.subscribe();

    loop {
        // Park until a session exists
        loop {
            let authenticated = state_rx.borrow_and_update().is_authenticated;
            if authenticated {
                break;
            }
            tokio::select! {
                _ = &mut shutdown => return,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        debug!("Session active, refresh checks running");
        let end = match schedule {
            RefreshSchedule::Poll { interval } => {
                poll_phase(&manager, interval, &mut state_rx, &mut shutdown).await
            }
            RefreshSchedule::Deadline => {
                deadline_phase(&manager, &mut state_rx, &mut shutdown).await
            }
        };

        match end {
            PhaseEnd::SessionEnded => debug!("Session ended, refresh checks paused"),
            PhaseEnd::Stop => return,
        }
    }
}

/// Whether a state change ended the session, or `None` if the manager is gone
fn session_ended(
    changed: Result<(), watch::error::RecvError>,
    state_rx: &mut watch::Receiver<AuthState>,
) -> Option<bool> {
    changed.ok()?;
    Some(!state_rx.borrow_and_update().is_authenticated)
}

async fn poll_phase(
    manager: &SessionManager,
    interval: Duration,
    state_rx: &mut watch::Receiver<AuthState>,
    shutdown: &mut oneshot::Receiver<()>,
) -> PhaseEnd {
    // First tick completes immediately
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut *shutdown => return PhaseEnd::Stop,
            changed = state_rx.changed() => match session_ended(changed, state_rx) {
                None => return PhaseEnd::Stop,
                Some(true) => return PhaseEnd::SessionEnded,
                Some(false) => {}
            },
            _ = ticker.tick() => {
                if manager.needs_refresh() {
                    info!("Access token near expiry, refreshing");
                    if !manager.refresh_tokens().await {
                        warn!("Background refresh failed");
                    }
                }
            }
        }
    }
}

async fn deadline_phase(
    manager: &SessionManager,
    state_rx: &mut watch::Receiver<AuthState>,
    shutdown: &mut oneshot::Receiver<()>,
) -> PhaseEnd {
    let mut earliest = Instant::now();

    loop {
        let wait = manager
            .refresh_due_at()
            .and_then(|due| (due - Utc::now()).to_std().ok())
            .unwrap_or(Duration::ZERO);
        let deadline = (Instant::now() + wait).max(earliest);
        debug!(wait_secs = wait.as_secs(), "Next refresh scheduled");

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        tokio::select! {
            _ = &mut *shutdown => return PhaseEnd::Stop,
            changed = state_rx.changed() => match session_ended(changed, state_rx) {
                None => return PhaseEnd::Stop,
                Some(true) => return PhaseEnd::SessionEnded,
                // New tokens, re-arm against their expiry
                Some(false) => {}
            },
            _ = &mut sleep => {
                info!("Refresh deadline reached, refreshing");
                if !manager.refresh_tokens().await {
                    warn!("Scheduled refresh failed");
                }
                earliest = Instant::now() + MIN_DEADLINE_SPACING;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TokenExchange;
    use crate::storage::MemoryStore;
    use crate::test_support::{sample_user, CountingExchange};

    fn setup(expires_in: i64) -> (Arc<CountingExchange>, Arc<SessionManager>) {
        let exchange = Arc::new(CountingExchange::new(expires_in));
        let manager = Arc::new(SessionManager::new(
            Arc::new(MemoryStore::new()),
            exchange.clone() as Arc<dyn TokenExchange>,
        ));
        (exchange, manager)
    }

    #[test]
    fn test_schedule_from_config() {
        let mut config = Config::default();
        assert_eq!(
            RefreshSchedule::from_config(&config),
            RefreshSchedule::Poll {
                interval: Duration::from_secs(300)
            }
        );

        config.refresh_mode = RefreshMode::Deadline;
        assert_eq!(RefreshSchedule::from_config(&config), RefreshSchedule::Deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_checks_immediately_then_every_interval() {
        // Tokens always land inside the refresh window
        let (exchange, manager) = setup(60);
        let refresher = RefreshLoop::spawn(Arc::clone(&manager), RefreshSchedule::default());

        manager.login("access", "refresh", 60, sample_user());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(exchange.calls(), 1);
        assert_eq!(manager.tokens().unwrap().access_token, "access-1");

        tokio::time::sleep(Duration::from_secs(297)).await;
        assert_eq!(exchange.calls(), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(exchange.calls(), 2);

        refresher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_skips_fresh_tokens() {
        let (exchange, manager) = setup(3600);
        let refresher = RefreshLoop::spawn(Arc::clone(&manager), RefreshSchedule::default());

        manager.login("access", "refresh", 3600, sample_user());
        tokio::time::sleep(Duration::from_secs(601)).await;
        assert_eq!(exchange.calls(), 0);
        assert!(manager.is_authenticated());

        refresher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_stops_after_logout_and_resumes_on_login() {
        let (exchange, manager) = setup(60);
        let refresher = RefreshLoop::spawn(Arc::clone(&manager), RefreshSchedule::default());

        manager.login("access", "refresh", 60, sample_user());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(exchange.calls(), 1);

        manager.logout();
        tokio::time::sleep(Duration::from_secs(900)).await;
        assert_eq!(exchange.calls(), 1);

        // Logging in again checks immediately
        manager.login("access", "refresh", 60, sample_user());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(exchange.calls(), 2);

        refresher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_refreshes_at_due_instant() {
        let (exchange, manager) = setup(3600);
        let refresher = RefreshLoop::spawn(Arc::clone(&manager), RefreshSchedule::Deadline);

        // Due 10 minutes from now: 15 minute lifetime minus 5 minute buffer
        manager.login("access", "refresh", 900, sample_user());
        tokio::time::sleep(Duration::from_secs(590)).await;
        assert_eq!(exchange.calls(), 0);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(exchange.calls(), 1);
        assert_eq!(manager.tokens().unwrap().access_token, "access-1");

        refresher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_loop() {
        let (exchange, manager) = setup(60);
        let refresher = RefreshLoop::spawn(Arc::clone(&manager), RefreshSchedule::default());
        assert!(refresher.is_running());
        refresher.shutdown().await;

        manager.login("access", "refresh", 60, sample_user());
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(exchange.calls(), 0);
    }
}
