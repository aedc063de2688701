//! Shared credential lifecycle.
//!
//! A [`CredentialStore`] holds the single account bearer token used by every
//! request. Reads are lock-free snapshots of a `watch` channel; a login
//! replaces the whole [`Credential`] at once, so readers see either the old or
//! the new token and never anything in between.
//!
//! Renewal runs in a [`Renewal`] task owned by the caller. A failed renewal
//! moves the store to [`CredentialState::Terminated`] and ends the task with
//! the error: the relay is expected to shut down rather than keep serving
//! with a token that is about to expire.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::account::AccountClient;
use crate::error::{Error, Result};
use crate::utils::token_prefix;

/// Shortest accepted renewal period.
pub const MIN_RENEW_PERIOD: Duration = Duration::from_secs(1);

/// Bearer token obtained from the account service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    /// Opaque bearer value, empty until the first successful login.
    pub access_token: String,
    /// When the token was obtained.
    pub obtained_at: Option<DateTime<Utc>>,
}

/// Lifecycle of a [`CredentialStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Unauthenticated,
    Authenticated,
    /// A renewal failed. There is no way back from this state.
    Terminated,
}

/// Consistent view of the store at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub credential: Credential,
    pub state: CredentialState,
}

/// Account credentials the store logs in with.
#[derive(Clone)]
pub struct Account {
    pub user: String,
    pub pass: String,
}

impl Account {
    pub fn new(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            pass: pass.into(),
        }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .finish()
    }
}

struct Inner {
    client: AccountClient,
    account: Account,
    tx: watch::Sender<StoreSnapshot>,
}

/// Process-wide holder of the account bearer token.
///
/// Clones are handles to the same store.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<Inner>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("account", &self.inner.account)
            .field("state", &self.state())
            .finish()
    }
}

impl CredentialStore {
    /// Create an unauthenticated store. `account` is used by renewals.
    pub fn new(client: AccountClient, account: Account) -> Self {
        let (tx, _rx) = watch::channel(StoreSnapshot {
            credential: Credential::default(),
            state: CredentialState::Unauthenticated,
        });
        Self {
            inner: Arc::new(Inner {
                client,
                account,
                tx,
            }),
        }
    }

    /// Log in and replace the stored credential.
    ///
    /// Empty `user` or `pass` fail with [`Error::Auth`] without contacting the
    /// account service. On failure the stored credential is left untouched.
    pub async fn login(&self, user: &str, pass: &str) -> Result<bool> {
        if user.is_empty() || pass.is_empty() {
            return Err(Error::Auth("no credentials provided".to_string()));
        }

        let token = self.inner.client.login(user, pass).await?;
        info!("Logged in, token {}...", token_prefix(&token));

        let credential = Credential {
            access_token: token,
            obtained_at: Some(Utc::now()),
        };
        self.inner.tx.send_modify(|snapshot| {
            snapshot.credential = credential;
            if snapshot.state == CredentialState::Unauthenticated {
                snapshot.state = CredentialState::Authenticated;
            }
        });
        Ok(true)
    }

    /// Log in with the account the store was created with.
    pub async fn login_account(&self) -> Result<bool> {
        let account = &self.inner.account;
        self.login(&account.user, &account.pass).await
    }

    /// Last stored token, empty if never authenticated.
    pub fn current_token(&self) -> String {
        self.inner.tx.borrow().credential.access_token.clone()
    }

    /// Last stored credential.
    pub fn credential(&self) -> Credential {
        self.inner.tx.borrow().credential.clone()
    }

    pub fn state(&self) -> CredentialState {
        self.inner.tx.borrow().state
    }

    /// Token and state read together.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.tx.borrow().clone()
    }

    /// Watch every replacement of the stored credential.
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.inner.tx.subscribe()
    }

    fn terminate(&self) {
        self.inner.tx.send_modify(|snapshot| {
            snapshot.state = CredentialState::Terminated;
        });
    }

    /// Renew the token every `period`, first renewal one period from now.
    ///
    /// Periods shorter than [`MIN_RENEW_PERIOD`] are raised to it.
    pub fn start_auto_renew(&self, period: Duration) -> Renewal {
        let period = if period < MIN_RENEW_PERIOD {
            warn!("Renewal period {:?} too short, using {:?}", period, MIN_RENEW_PERIOD);
            MIN_RENEW_PERIOD
        } else {
            period
        };
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.start_renewal(interval)
    }

    /// Renew the token on every tick of `clock`.
    pub fn start_renewal<C: RenewClock>(&self, mut clock: C) -> Renewal {
        let store = self.clone();
        let handle = tokio::spawn(async move {
            while clock.tick().await {
                match store.login_account().await {
                    Ok(_) => info!("Token refreshed"),
                    Err(e) => {
                        store.terminate();
                        error!("Token renewal failed, giving up: {}", e);
                        return Err(e);
                    }
                }
            }
            Ok(())
        });
        Renewal {
            handle: Some(handle),
        }
    }
}

/// Source of renewal ticks.
#[async_trait]
pub trait RenewClock: Send + 'static {
    /// Wait for the next tick. `false` ends the renewal loop.
    async fn tick(&mut self) -> bool;
}

#[async_trait]
impl RenewClock for Interval {
    async fn tick(&mut self) -> bool {
        Interval::tick(self).await;
        true
    }
}

/// Manual clock: one renewal per message, stops when all senders are gone.
#[async_trait]
impl RenewClock for mpsc::Receiver<()> {
    async fn tick(&mut self) -> bool {
        self.recv().await.is_some()
    }
}

/// Handle to a running renewal task. Dropping it stops the task.
#[derive(Debug)]
pub struct Renewal {
    handle: Option<JoinHandle<Result<()>>>,
}

impl Renewal {
    /// Stop renewing.
    pub fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Wait for the task to end.
    ///
    /// Only returns early if renewal failed or the clock stopped, so callers
    /// usually race this against their main work and treat `Err` as fatal.
    ///
    /// Dropping the returned future drops the handle, which stops the task.
    pub async fn wait(mut self) -> Result<()> {
        match self.handle.as_mut() {
            Some(handle) => handle
                .await
                .map_err(|e| Error::Other(format!("Renewal task failed: {}", e)))?,
            None => Ok(()),
        }
    }
}

impl Drop for Renewal {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
