//! Single-flight coordination for credential renewal.
//!
//! This module provides [`RenewalCoordinator`], the serialization point for
//! token renewal. Renewal tokens are frequently single-use, so N requests
//! failing authorization at the same time must not race each other to the
//! renewal endpoint: exactly one caller performs the renewal while every
//! other caller waits for that shared outcome.
//!
//! The coordinator owns a [`RenewalState`] that is `Idle` or `InFlight` with
//! an ordered queue of waiters. The first caller to arrive at `Idle` becomes
//! the leader and runs the renewal operation exactly once; callers arriving
//! during flight register a waiter and receive the leader's outcome (the
//! same token, or the same error) without ever invoking the operation
//! themselves. State always returns to `Idle` once the outcome is delivered,
//! so a later authorization failure starts a fresh cycle.

use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::AuthError;
use crate::store::Secret;

/// Outcome shared between the leader and all waiters of one renewal cycle.
pub type RenewalOutcome = Result<Secret, AuthError>;

type Waiter = oneshot::Sender<RenewalOutcome>;

/// State of the renewal cycle. Process-local, never persisted.
enum RenewalState {
    /// No renewal is running; the next caller becomes the leader.
    Idle,
    /// A renewal is running; queued waiters receive its outcome in
    /// arrival order.
    InFlight(Vec<Waiter>),
}

/// Serializes credential renewal so at most one renewal operation is in
/// flight per session.
///
/// The lock guarding the state is held only to transition it, never across
/// an await point.
pub struct RenewalCoordinator {
    state: Mutex<RenewalState>,
}

impl RenewalCoordinator {
    /// Create a coordinator in the `Idle` state.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RenewalState::Idle),
        }
    }

    /// True while a renewal operation is outstanding.
    pub fn is_in_flight(&self) -> bool {
        matches!(*self.state.lock(), RenewalState::InFlight(_))
    }

    /// Obtain the next valid access token, renewing at most once.
    ///
    /// If no renewal is in flight, `perform_renewal` is invoked exactly once
    /// and its outcome is delivered to this caller and to every caller that
    /// arrives while it runs. If a renewal is already in flight,
    /// `perform_renewal` is dropped unused and this caller awaits the
    /// in-flight outcome.
    ///
    /// If the leading caller is cancelled mid-renewal, queued waiters fail
    /// with [`AuthError::RenewalAbandoned`] and the state resets to `Idle`,
    /// so an abandoned request never blocks future renewal cycles.
    pub async fn request<F, Fut>(&self, perform_renewal: F) -> RenewalOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RenewalOutcome>,
    {
        let waiter = {
            let mut state = self.state.lock();
            match &mut *state {
                RenewalState::Idle => {
                    *state = RenewalState::InFlight(Vec::new());
                    None
                }
                RenewalState::InFlight(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
            }
        };

        if let Some(rx) = waiter {
            tracing::debug!("renewal already in flight, awaiting shared outcome");
            // A dropped sender means the leader was cancelled before settling.
            return rx.await.unwrap_or(Err(AuthError::RenewalAbandoned));
        }

        tracing::info!("starting credential renewal");
        let guard = ResetGuard { state: &self.state };
        let outcome = perform_renewal().await;
        let waiters = guard.disarm();

        match &outcome {
            Ok(_) => tracing::info!(waiters = waiters.len(), "credential renewal succeeded"),
            Err(e) => tracing::warn!(waiters = waiters.len(), error = %e, "credential renewal failed"),
        }

        for tx in waiters {
            // A waiter that stopped listening is its caller's concern.
            let _ = tx.send(outcome.clone());
        }

        outcome
    }
}

impl Default for RenewalCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RenewalCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalCoordinator")
            .field("in_flight", &self.is_in_flight())
            .finish()
    }
}

/// Resets the coordinator to `Idle` when the leader's future is dropped
/// before the renewal settles, failing any queued waiters.
struct ResetGuard<'a> {
    state: &'a Mutex<RenewalState>,
}

impl<'a> ResetGuard<'a> {
    /// Take the queued waiters and return the state to `Idle`, defusing
    /// the drop behavior.
    fn disarm(self) -> Vec<Waiter> {
        let waiters = take_waiters(self.state);
        std::mem::forget(self);
        waiters
    }
}

impl Drop for ResetGuard<'_> {
    fn drop(&mut self) {
        tracing::warn!("renewal leader dropped mid-flight, resetting coordinator");
        for tx in take_waiters(self.state) {
            let _ = tx.send(Err(AuthError::RenewalAbandoned));
        }
    }
}

fn take_waiters(state: &Mutex<RenewalState>) -> Vec<Waiter> {
    match std::mem::replace(&mut *state.lock(), RenewalState::Idle) {
        RenewalState::InFlight(waiters) => waiters,
        RenewalState::Idle => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_single_caller_gets_token() {
        let coordinator = RenewalCoordinator::new();
        let token = coordinator
            .request(|| async { Ok(Secret::new("T1")) })
            .await
            .unwrap();
        assert_eq!(token.expose(), "T1");
        assert!(!coordinator.is_in_flight());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_renewal() {
        let coordinator = Arc::new(RenewalCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        // Leader blocks inside the renewal until released.
        let leader = {
            let coordinator = coordinator.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                coordinator
                    .request(move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release_rx.await.unwrap();
                        Ok(Secret::new("T2"))
                    })
                    .await
            })
        };

        settle().await;
        assert!(coordinator.is_in_flight());

        // Followers arrive during flight; their operation must never run.
        let mut followers = Vec::new();
        for _ in 0..3 {
            let coordinator = coordinator.clone();
            let calls = calls.clone();
            followers.push(tokio::spawn(async move {
                coordinator
                    .request(move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        panic!("follower must not perform a renewal");
                    })
                    .await
            }));
        }

        settle().await;
        release_tx.send(()).unwrap();

        let leader_token = leader.await.unwrap().unwrap();
        assert_eq!(leader_token.expose(), "T2");
        for follower in followers {
            let token = follower.await.unwrap().unwrap();
            assert_eq!(token.expose(), "T2");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_in_flight());
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_state_resets() {
        let coordinator = Arc::new(RenewalCoordinator::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .request(move || async move {
                        release_rx.await.unwrap();
                        Err(AuthError::RenewalFailed {
                            status: Some(400),
                            message: "invalid_grant".into(),
                        })
                    })
                    .await
            })
        };

        settle().await;
        let follower = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .request(|| async { panic!("must not run") })
                    .await
            })
        };

        settle().await;
        release_tx.send(()).unwrap();

        assert!(matches!(
            leader.await.unwrap(),
            Err(AuthError::RenewalFailed { .. })
        ));
        assert!(matches!(
            follower.await.unwrap(),
            Err(AuthError::RenewalFailed { .. })
        ));

        // A fresh cycle starts from Idle after failure.
        assert!(!coordinator.is_in_flight());
        let token = coordinator
            .request(|| async { Ok(Secret::new("T3")) })
            .await
            .unwrap();
        assert_eq!(token.expose(), "T3");
    }

    #[tokio::test]
    async fn test_abandoned_leader_releases_waiters_and_resets() {
        let coordinator = Arc::new(RenewalCoordinator::new());

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .request(|| async {
                        std::future::pending::<()>().await;
                        unreachable!()
                    })
                    .await
            })
        };

        settle().await;
        assert!(coordinator.is_in_flight());

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .request(|| async { panic!("must not run") })
                    .await
            })
        };

        settle().await;
        leader.abort();
        settle().await;

        assert!(matches!(
            waiter.await.unwrap(),
            Err(AuthError::RenewalAbandoned)
        ));
        assert!(!coordinator.is_in_flight());

        // The next cycle proceeds normally.
        let token = coordinator
            .request(|| async { Ok(Secret::new("T4")) })
            .await
            .unwrap();
        assert_eq!(token.expose(), "T4");
    }

    #[tokio::test]
    async fn test_sequential_cycles_each_perform() {
        let coordinator = RenewalCoordinator::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let _ = coordinator
                .request(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Secret::new("T"))
                })
                .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
