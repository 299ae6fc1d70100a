//! Reconnection Supervisor
//!
//! Owns the retry policy so sessions stay declarative about *when* they
//! died, not whether another attempt is reasonable. Capped exponential
//! backoff, a bounded (or unbounded) attempt budget, and two guards before
//! every attempt: skip when another trigger already reconnected the
//! session, abort when it has been marked auth-failed. Shutdown is a watch
//! signal observed between attempts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::application::session::frames::DisconnectClass;
use crate::domain::errors::SessionError;

/// Something the supervisor can drive reconnection for.
#[async_trait]
pub trait Reconnectable: Send + Sync {
    async fn reconnect(&self) -> Result<(), SessionError>;

    fn is_connected(&self) -> bool;

    fn auth_failed(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Capped exponential delay sequence. Delays never decrease and never
/// exceed the configured ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        let current = policy.initial;
        Backoff { policy, current }
    }

    /// The delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self
            .current
            .mul_f64(self.policy.multiplier)
            .min(self.policy.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.policy.initial;
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Connected,
    AuthFailed,
    Cancelled,
    Exhausted,
}

pub struct ReconnectionSupervisor<S: Reconnectable> {
    session: S,
    policy: BackoffPolicy,
    /// None reconnects indefinitely (public feed); Some bounds the budget
    /// per disconnect (private feed).
    max_attempts: Option<u32>,
    /// In-flight flag with its own lock, distinct from the session's
    /// connection lock: read and write loops can report the same failure,
    /// only one retry loop may run.
    in_flight: Arc<Mutex<bool>>,
    shutdown: watch::Receiver<bool>,
}

impl<S: Reconnectable> ReconnectionSupervisor<S> {
    pub fn new(
        session: S,
        policy: BackoffPolicy,
        max_attempts: Option<u32>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        ReconnectionSupervisor {
            session,
            policy,
            max_attempts,
            in_flight: Arc::new(Mutex::new(false)),
            shutdown,
        }
    }

    /// Consume disconnect classes until shutdown. An initial attempt is
    /// made when the session starts out disconnected, so a failed first
    /// connect at boot is retried like any other outage.
    pub async fn run(self, mut disconnects: mpsc::UnboundedReceiver<DisconnectClass>) {
        if !self.session.is_connected() && !self.session.auth_failed() {
            self.reconnect_with_backoff().await;
        }
        loop {
            let class = tokio::select! {
                class = disconnects.recv() => match class {
                    Some(class) => class,
                    None => break,
                },
                _ = wait_for_shutdown(self.shutdown.clone()) => break,
            };
            match class {
                DisconnectClass::AuthFailure => {
                    error!("authentication failed; waiting for new credentials, not reconnecting");
                }
                DisconnectClass::Stale | DisconnectClass::Retryable => {
                    self.reconnect_with_backoff().await;
                }
            }
        }
        debug!("supervisor stopped");
    }

    async fn reconnect_with_backoff(&self) {
        {
            let mut flag = self.in_flight.lock().await;
            if *flag {
                debug!("reconnection already in flight");
                return;
            }
            *flag = true;
        }
        let outcome = self.attempt_loop().await;
        *self.in_flight.lock().await = false;
        match outcome {
            Outcome::Connected => {}
            Outcome::AuthFailed => {
                error!("reconnection aborted: session marked auth-failed");
            }
            Outcome::Cancelled => debug!("reconnection cancelled by shutdown"),
            Outcome::Exhausted => {
                error!(
                    max_attempts = ?self.max_attempts,
                    "reconnection attempts exhausted; session stays down"
                );
            }
        }
    }

    async fn attempt_loop(&self) -> Outcome {
        let mut backoff = Backoff::new(self.policy.clone());
        let mut shutdown = self.shutdown.clone();
        let mut attempts: u32 = 0;
        loop {
            if *shutdown.borrow() {
                return Outcome::Cancelled;
            }
            if let Some(max) = self.max_attempts {
                if attempts >= max {
                    return Outcome::Exhausted;
                }
            }
            let delay = backoff.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Outcome::Cancelled;
                    }
                }
            }
            // another trigger may have brought the session back while we slept
            if self.session.is_connected() {
                return Outcome::Connected;
            }
            if self.session.auth_failed() {
                return Outcome::AuthFailed;
            }
            attempts += 1;
            match self.session.reconnect().await {
                Ok(()) => {
                    info!(attempts, "reconnected");
                    return Outcome::Connected;
                }
                Err(SessionError::AlreadyConnected) => return Outcome::Connected,
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "reconnection attempt failed");
                }
            }
        }
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
