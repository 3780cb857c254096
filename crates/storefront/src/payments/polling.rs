//! Status polling for pending payments.
//!
//! Card payments that come back `in_process` and every PIX charge settle
//! asynchronously. A [`PaymentWatch`] owns a spawned task that checks the
//! payment on a fixed interval until it is approved, rejected or cancelled,
//! or until the deadline passes. Dropping the watch aborts the task.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use versos_core::PaymentStatus;

use super::{PaymentGateway, rejection_message};

/// How a watched payment ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollOutcome {
    Approved { payment_id: String },
    Rejected { payment_id: String, reason: String },
    /// The deadline passed without a terminal status. The payment may still
    /// settle later.
    TimedOut { payment_id: String },
}

impl PollOutcome {
    #[must_use]
    pub fn payment_id(&self) -> &str {
        match self {
            Self::Approved { payment_id }
            | Self::Rejected { payment_id, .. }
            | Self::TimedOut { payment_id } => payment_id,
        }
    }
}

/// Poll `payment_id` every `interval` until it settles or `timeout` elapses.
///
/// The first check happens one interval after the call. Errors from
/// individual checks are logged and polling continues.
pub async fn poll_until_settled<G: PaymentGateway>(
    gateway: &G,
    payment_id: &str,
    interval: Duration,
    timeout: Duration,
) -> PollOutcome {
    let start = Instant::now();
    let deadline = start + timeout;
    let mut ticker = tokio::time::interval_at(start + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let polling = async {
        loop {
            ticker.tick().await;

            let report = match gateway.check_payment_status(payment_id).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(payment_id, error = %e, "Payment status check failed; will retry");
                    continue;
                }
            };

            debug!(payment_id, status = ?report.status, "Polled payment status");

            match report.status {
                PaymentStatus::Approved => {
                    return PollOutcome::Approved {
                        payment_id: payment_id.to_string(),
                    };
                }
                ref status if status.is_failure() => {
                    return PollOutcome::Rejected {
                        payment_id: payment_id.to_string(),
                        reason: rejection_message(report.status_detail.as_deref()),
                    };
                }
                _ => {}
            }
        }
    };

    tokio::time::timeout_at(deadline, polling)
        .await
        .unwrap_or_else(|_| {
            info!(payment_id, "Payment polling timed out");
            PollOutcome::TimedOut {
                payment_id: payment_id.to_string(),
            }
        })
}

/// Handle to a background poll task.
pub struct PaymentWatch {
    payment_id: String,
    handle: Option<JoinHandle<()>>,
}

impl PaymentWatch {
    /// Spawn a poll task that hands its outcome to `on_settled`.
    pub fn spawn<G, F, Fut>(
        gateway: Arc<G>,
        payment_id: String,
        interval: Duration,
        timeout: Duration,
        on_settled: F,
    ) -> Self
    where
        G: PaymentGateway,
        F: FnOnce(PollOutcome) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = payment_id.clone();
        let handle = tokio::spawn(async move {
            let outcome = poll_until_settled(gateway.as_ref(), &id, interval, timeout).await;
            on_settled(outcome).await;
        });

        Self {
            payment_id,
            handle: Some(handle),
        }
    }

    #[must_use]
    pub fn payment_id(&self) -> &str {
        &self.payment_id
    }

    /// Whether the task has finished (settled, timed out or aborted).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Release the handle without aborting the task.
    ///
    /// Used from the task's own completion callback, which must not cancel
    /// itself.
    pub fn detach(mut self) {
        self.handle = None;
    }
}

impl Drop for PaymentWatch {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                debug!(payment_id = %self.payment_id, "Stopping payment watch");
            }
            handle.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;
    use crate::payments::fake::FakeGateway;

    const INTERVAL: Duration = Duration::from_secs(3);
    const TIMEOUT: Duration = Duration::from_secs(600);

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_approved_through_transient_errors() {
        let gateway = FakeGateway::with_statuses([
            Some(PaymentStatus::InProcess),
            None,
            Some(PaymentStatus::Approved),
        ]);

        let start = Instant::now();
        let outcome = poll_until_settled(&gateway, "123", INTERVAL, TIMEOUT).await;

        assert_eq!(
            outcome,
            PollOutcome::Approved {
                payment_id: "123".into()
            }
        );
        assert_eq!(FakeGateway::calls(&gateway.status_calls), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_rejection() {
        let gateway = FakeGateway::with_statuses([
            Some(PaymentStatus::Pending),
            Some(PaymentStatus::Cancelled),
            Some(PaymentStatus::Approved),
        ]);

        let outcome = poll_until_settled(&gateway, "9", INTERVAL, TIMEOUT).await;

        assert!(matches!(outcome, PollOutcome::Rejected { .. }));
        assert_eq!(FakeGateway::calls(&gateway.status_calls), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_deadline() {
        let gateway = FakeGateway::default();

        let start = Instant::now();
        let outcome = poll_until_settled(&gateway, "7", INTERVAL, TIMEOUT).await;

        assert_eq!(
            outcome,
            PollOutcome::TimedOut {
                payment_id: "7".into()
            }
        );
        assert_eq!(start.elapsed(), TIMEOUT);
        let calls = FakeGateway::calls(&gateway.status_calls);
        assert!((199..=200).contains(&calls), "unexpected call count {calls}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_reports_outcome() {
        let gateway = Arc::new(FakeGateway::with_statuses([Some(PaymentStatus::Approved)]));
        let (tx, rx) = oneshot::channel();

        let watch = PaymentWatch::spawn(gateway, "55".into(), INTERVAL, TIMEOUT, |outcome| async move {
            let _ = tx.send(outcome);
        });
        assert_eq!(watch.payment_id(), "55");

        let outcome = rx.await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Approved {
                payment_id: "55".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_watch_stops_polling() {
        let gateway = Arc::new(FakeGateway::default());
        let (tx, rx) = oneshot::channel::<PollOutcome>();

        let watch = PaymentWatch::spawn(
            Arc::clone(&gateway),
            "66".into(),
            INTERVAL,
            TIMEOUT,
            |outcome| async move {
                let _ = tx.send(outcome);
            },
        );
        tokio::time::sleep(Duration::from_secs(4)).await;
        drop(watch);
        let calls_at_drop = FakeGateway::calls(&gateway.status_calls);

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(FakeGateway::calls(&gateway.status_calls), calls_at_drop);
        assert!(rx.await.is_err());
    }
}
