//! Request Correlator: turns the one-way "send a request over the stream"
//! operation into a typed awaitable, keyed by `RequestID`.
//!
//! Waiters are delivered through a `oneshot` channel rather than relying on
//! sender-drop semantics, so `cancel_all` can hand a waiter an explicit
//! `RequestError::Disconnected` instead of a bare channel-closed error that
//! would be indistinguishable from a bug.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use navigator_common::ids::{ClusterId, RequestId};
use navigator_common::{DEFAULT_EXPIRY_HORIZON, RequestError};
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;

struct PendingRequest<R> {
    cluster_id: ClusterId,
    deadline: Instant,
    resolver: oneshot::Sender<Result<R, RequestError>>,
}

/// Manager-side bookkeeping mapping an in-flight `RequestID` to its waiter.
/// Generic over the reply payload type so the Manager can run one
/// correlator instance per message kind (proxy-config replies, metrics
/// replies) without duplicating this logic.
pub struct RequestCorrelator<R> {
    pending: Mutex<HashMap<RequestId, PendingRequest<R>>>,
}

impl<R: Send + 'static> Default for RequestCorrelator<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Send + 'static> RequestCorrelator<R> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a waiter for `request_id`, then awaits either: the matching
    /// `deliver`, the caller's `cancel` token firing, or `timeout` elapsing.
    /// Exactly one of those three resolves the waiter; a `RequestID` has at
    /// most one waiter and is resolved exactly once.
    ///
    /// Rejects with `RequestError::Overloaded` before registering if
    /// `cluster_id` already has `max_pending` entries in flight.
    pub async fn issue(
        &self,
        cluster_id: ClusterId,
        request_id: RequestId,
        timeout: Duration,
        max_pending: usize,
        cancel: CancellationToken,
    ) -> Result<R, RequestError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            let in_flight = pending.values().filter(|entry| entry.cluster_id == cluster_id).count();
            if in_flight >= max_pending {
                return Err(RequestError::Overloaded);
            }
            pending.insert(
                request_id.clone(),
                PendingRequest {
                    cluster_id,
                    deadline: Instant::now() + timeout,
                    resolver: tx,
                },
            );
            navigator_common::metrics::set_pending_requests(pending.len());
        }

        let result = tokio::select! {
            reply = rx => reply.unwrap_or(Err(RequestError::Disconnected)),
            _ = tokio::time::sleep(timeout) => Err(RequestError::Timeout),
            _ = cancel.cancelled() => Err(RequestError::Canceled),
        };

        // Whichever branch won, the entry (if still present; `deliver`
        // already removed it on the reply path) must not linger.
        let mut pending = self.pending.lock().await;
        pending.remove(&request_id);
        navigator_common::metrics::set_pending_requests(pending.len());
        drop(pending);
        result
    }

    /// Routes a reply to its waiter. Unknown `RequestID`s are dropped with a
    /// warning (never fatal): the waiter may have already timed out or the
    /// reply may be a duplicate from a retried Edge.
    pub async fn deliver(&self, request_id: &RequestId, reply: R) {
        let pending = {
            let mut pending = self.pending.lock().await;
            let entry = pending.remove(request_id);
            navigator_common::metrics::set_pending_requests(pending.len());
            entry
        };
        match pending {
            Some(entry) => {
                let _ = entry.resolver.send(Ok(reply));
            }
            None => {
                tracing::warn!(%request_id, "reply for unknown or already-resolved request");
            }
        }
    }

    /// Resolves every pending waiter belonging to `cluster_id` with
    /// `RequestError::Disconnected`, called on session teardown. Must
    /// complete quickly; since it only sends on already-allocated oneshot
    /// channels, it is O(n) with no I/O.
    pub async fn cancel_all(&self, cluster_id: &ClusterId) {
        let mut pending = self.pending.lock().await;
        let ids: Vec<RequestId> = pending
            .iter()
            .filter(|(_, entry)| &entry.cluster_id == cluster_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            if let Some(entry) = pending.remove(&id) {
                let _ = entry.resolver.send(Err(RequestError::Disconnected));
            }
        }
        navigator_common::metrics::set_pending_requests(pending.len());
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Background defense-in-depth sweep: removes entries whose
    /// deadline passed more than `horizon` ago. A correctly functioning
    /// `issue` call always removes its own entry when its `select!` settles,
    /// so this should normally find nothing; it exists to catch a resolver
    /// that leaked (e.g. task aborted without running its cleanup).
    pub async fn sweep_expired(&self, horizon: Duration) {
        let now = Instant::now();
        let mut pending = self.pending.lock().await;
        pending.retain(|id, entry| {
            let expired = now.duration_since(entry.deadline) > horizon;
            if expired {
                tracing::warn!(%id, "correlator swept a leaked pending request");
            }
            !expired
        });
        navigator_common::metrics::set_pending_requests(pending.len());
    }
}

/// Spawns the periodic expiry sweep; returns a handle the caller should
/// abort on shutdown.
pub fn spawn_expiry_sweep<R: Send + 'static>(
    correlator: Arc<RequestCorrelator<R>>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            correlator.sweep_expired(DEFAULT_EXPIRY_HORIZON).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issue_then_deliver_returns_the_delivered_value_unmodified() {
        let correlator: RequestCorrelator<String> = RequestCorrelator::new();
        let id = RequestId::generate();
        let correlator = Arc::new(correlator);
        let issuer = {
            let correlator = correlator.clone();
            let id = id.clone();
            tokio::spawn(async move {
                correlator
                    .issue(
                        ClusterId::from("prod-eu"),
                        id,
                        Duration::from_secs(5),
                        16,
                        CancellationToken::new(),
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;
        correlator.deliver(&id, "reply-payload".to_string()).await;
        let result = issuer.await.unwrap();
        assert_eq!(result.unwrap(), "reply-payload");
    }

    #[tokio::test]
    async fn unresolved_request_times_out() {
        let correlator: RequestCorrelator<()> = RequestCorrelator::new();
        let result = correlator
            .issue(
                ClusterId::from("prod-eu"),
                RequestId::generate(),
                Duration::from_millis(20),
                16,
                CancellationToken::new(),
            )
            .await;
        assert_eq!(result.unwrap_err(), RequestError::Timeout);
    }

    #[tokio::test]
    async fn cancellation_resolves_before_timeout() {
        let correlator: RequestCorrelator<()> = RequestCorrelator::new();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel2.cancel();
        });
        let result = correlator
            .issue(
                ClusterId::from("prod-eu"),
                RequestId::generate(),
                Duration::from_secs(5),
                16,
                cancel,
            )
            .await;
        assert_eq!(result.unwrap_err(), RequestError::Canceled);
    }

    #[tokio::test]
    async fn cancel_all_resolves_every_waiter_for_that_cluster_only() {
        let correlator: Arc<RequestCorrelator<()>> = Arc::new(RequestCorrelator::new());
        let prod_eu = ClusterId::from("prod-eu");
        let prod_us = ClusterId::from("prod-us");

        let eu_waiter = {
            let correlator = correlator.clone();
            let prod_eu = prod_eu.clone();
            tokio::spawn(async move {
                correlator
                    .issue(
                        prod_eu,
                        RequestId::generate(),
                        Duration::from_secs(5),
                        16,
                        CancellationToken::new(),
                    )
                    .await
            })
        };
        let us_waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .issue(
                        prod_us,
                        RequestId::generate(),
                        Duration::from_secs(5),
                        16,
                        CancellationToken::new(),
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;

        correlator.cancel_all(&prod_eu).await;
        let eu_result = eu_waiter.await.unwrap();
        assert_eq!(eu_result.unwrap_err(), RequestError::Disconnected);

        assert_eq!(correlator.pending_count().await, 1);
        correlator.cancel_all(&ClusterId::from("prod-us")).await;
        assert_eq!(us_waiter.await.unwrap().unwrap_err(), RequestError::Disconnected);
    }

    #[tokio::test]
    async fn delivering_to_unknown_request_id_is_not_fatal() {
        let correlator: RequestCorrelator<()> = RequestCorrelator::new();
        correlator.deliver(&RequestId::generate(), ()).await;
    }

    #[tokio::test]
    async fn a_cluster_at_its_pending_cap_is_rejected_with_overloaded() {
        let correlator: Arc<RequestCorrelator<()>> = Arc::new(RequestCorrelator::new());
        let cluster_id = ClusterId::from("prod-eu");

        let mut holders = Vec::new();
        for _ in 0..2 {
            let correlator = correlator.clone();
            let cluster_id = cluster_id.clone();
            holders.push(tokio::spawn(async move {
                correlator
                    .issue(cluster_id, RequestId::generate(), Duration::from_secs(5), 2, CancellationToken::new())
                    .await
            }));
        }
        tokio::task::yield_now().await;

        let result = correlator
            .issue(cluster_id.clone(), RequestId::generate(), Duration::from_secs(5), 2, CancellationToken::new())
            .await;
        assert_eq!(result.unwrap_err(), RequestError::Overloaded);

        correlator.cancel_all(&cluster_id).await;
        for holder in holders {
            holder.await.unwrap().unwrap_err();
        }
    }
}
