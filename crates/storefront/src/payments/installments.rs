//! Debounced, last-writer-wins installment lookups.
//!
//! Every call to [`InstallmentLookup::lookup`] takes a sequence token from a
//! monotonically increasing counter. After the debounce delay, and again when
//! the gateway answers, the token is compared with the newest one issued; a
//! lookup that has been overtaken reports [`LookupResult::Superseded`] and
//! leaves the current options alone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{Installment, InstallmentQuery, PaymentError, PaymentGateway};

/// The installment options currently offered and the chosen plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallmentSelection {
    pub payment_method_id: Option<String>,
    pub options: Vec<Installment>,
    /// Installment count; always one of `options` when options exist.
    pub selected: Option<u32>,
}

impl InstallmentSelection {
    /// The selected plan, if any.
    #[must_use]
    pub fn selected_plan(&self) -> Option<&Installment> {
        let quantity = self.selected?;
        self.options.iter().find(|o| o.quantity == quantity)
    }
}

/// Outcome of one lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    Applied(InstallmentSelection),
    /// A newer lookup was issued; this result was discarded.
    Superseded,
}

/// Per-shopper installment state.
pub struct InstallmentLookup {
    sequence: AtomicU64,
    debounce: Duration,
    current: Mutex<InstallmentSelection>,
}

impl InstallmentLookup {
    #[must_use]
    pub fn new(debounce: Duration) -> Self {
        Self {
            sequence: AtomicU64::new(0),
            debounce,
            current: Mutex::new(InstallmentSelection::default()),
        }
    }

    fn is_latest(&self, token: u64) -> bool {
        self.sequence.load(Ordering::SeqCst) == token
    }

    /// Look up plans for `query`, resolving the card network from the BIN
    /// when no payment method id is given.
    ///
    /// # Errors
    ///
    /// Returns the gateway error for the newest lookup. Errors from
    /// superseded lookups are swallowed.
    #[instrument(skip(self, gateway, query), fields(amount = %query.amount))]
    pub async fn lookup<G: PaymentGateway>(
        &self,
        gateway: &G,
        mut query: InstallmentQuery,
    ) -> Result<LookupResult, PaymentError> {
        let token = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.debounce.is_zero() {
            tokio::time::sleep(self.debounce).await;
        }
        if !self.is_latest(token) {
            debug!(token, "Installment lookup debounced away");
            return Ok(LookupResult::Superseded);
        }

        let fetched = async {
            if query.method_id().is_none()
                && let Some(bin) = query.normalized_bin()
            {
                query.payment_method_id = gateway.detect_payment_method_id(&bin).await?;
            }
            let options = if query.is_resolvable() {
                gateway.get_installments(&query).await?
            } else {
                Vec::new()
            };
            Ok::<_, PaymentError>(options)
        }
        .await;

        let mut current = self.current.lock().await;
        if !self.is_latest(token) {
            debug!(token, "Discarding stale installment result");
            return Ok(LookupResult::Superseded);
        }

        let options = fetched?;
        let selected = reconcile_selection(current.selected, &options);
        *current = InstallmentSelection {
            payment_method_id: query.payment_method_id,
            options,
            selected,
        };

        Ok(LookupResult::Applied(current.clone()))
    }

    /// Choose a plan. Returns `false` when `quantity` is not on offer.
    pub async fn select(&self, quantity: u32) -> bool {
        let mut current = self.current.lock().await;
        if current.options.iter().any(|o| o.quantity == quantity) {
            current.selected = Some(quantity);
            true
        } else {
            false
        }
    }

    pub async fn current(&self) -> InstallmentSelection {
        self.current.lock().await.clone()
    }

    /// Forget the offered plans and invalidate in-flight lookups.
    pub async fn reset(&self) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().await = InstallmentSelection::default();
    }
}

/// Keep the previous choice when still offered, otherwise pick the first plan.
fn reconcile_selection(previous: Option<u32>, options: &[Installment]) -> Option<u32> {
    previous
        .filter(|q| options.iter().any(|o| o.quantity == *q))
        .or_else(|| options.first().map(|o| o.quantity))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use versos_core::Price;

    use super::*;
    use crate::payments::fake::FakeGateway;

    fn query(bin: &str) -> InstallmentQuery {
        InstallmentQuery {
            amount: Price::from_cents(1500),
            payment_method_id: None,
            bin: Some(bin.to_string()),
        }
    }

    fn quantities(selection: &InstallmentSelection) -> Vec<u32> {
        selection.options.iter().map(|o| o.quantity).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_resolves_method_and_selects_first() {
        let gateway = FakeGateway::default();
        let lookup = InstallmentLookup::new(Duration::from_millis(400));

        let result = lookup.lookup(&gateway, query("411111")).await.unwrap();
        let LookupResult::Applied(selection) = result else {
            panic!("expected applied result");
        };
        assert_eq!(selection.payment_method_id.as_deref(), Some("visa"));
        assert_eq!(quantities(&selection), vec![1, 2, 3]);
        assert_eq!(selection.selected, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_calls_only_run_the_last() {
        let gateway = Arc::new(FakeGateway::default());
        let lookup = Arc::new(InstallmentLookup::new(Duration::from_millis(400)));

        let first = {
            let (gateway, lookup) = (Arc::clone(&gateway), Arc::clone(&lookup));
            tokio::spawn(async move { lookup.lookup(gateway.as_ref(), query("411111")).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = {
            let (gateway, lookup) = (Arc::clone(&gateway), Arc::clone(&lookup));
            tokio::spawn(async move { lookup.lookup(gateway.as_ref(), query("555555")).await })
        };

        assert_eq!(first.await.unwrap().unwrap(), LookupResult::Superseded);
        assert!(matches!(
            second.await.unwrap().unwrap(),
            LookupResult::Applied(_)
        ));
        assert_eq!(FakeGateway::calls(&gateway.installment_calls), 1);
        assert_eq!(quantities(&lookup.current().await), vec![1, 6, 12]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_older_result_never_overwrites_newer() {
        let gateway = Arc::new(FakeGateway {
            slow_bins: vec!["411111".to_string()],
            slow_delay: Duration::from_secs(1),
            ..FakeGateway::default()
        });
        let lookup = Arc::new(InstallmentLookup::new(Duration::from_millis(400)));

        // R1 passes the debounce and then waits on a slow gateway.
        let r1 = {
            let (gateway, lookup) = (Arc::clone(&gateway), Arc::clone(&lookup));
            tokio::spawn(async move { lookup.lookup(gateway.as_ref(), query("411111")).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;

        // R2 is issued later and resolves first.
        let r2 = {
            let (gateway, lookup) = (Arc::clone(&gateway), Arc::clone(&lookup));
            tokio::spawn(async move { lookup.lookup(gateway.as_ref(), query("555555")).await })
        };

        assert!(matches!(r2.await.unwrap().unwrap(), LookupResult::Applied(_)));
        assert_eq!(r1.await.unwrap().unwrap(), LookupResult::Superseded);

        let current = lookup.current().await;
        assert_eq!(current.payment_method_id.as_deref(), Some("master"));
        assert_eq!(quantities(&current), vec![1, 6, 12]);
        assert_eq!(FakeGateway::calls(&gateway.installment_calls), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_kept_when_still_offered() {
        let gateway = FakeGateway::default();
        let lookup = InstallmentLookup::new(Duration::ZERO);

        lookup.lookup(&gateway, query("555555")).await.unwrap();
        assert!(lookup.select(6).await);
        assert!(!lookup.select(5).await);

        // Same network again: 6 is still offered.
        lookup.lookup(&gateway, query("555566")).await.unwrap();
        assert_eq!(lookup.current().await.selected, Some(6));

        // Visa offers 1, 2 and 3: selection falls back to the first plan.
        lookup.lookup(&gateway, query("411111")).await.unwrap();
        let current = lookup.current().await;
        assert_eq!(current.selected, Some(1));
        assert_eq!(current.selected_plan().unwrap().quantity, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_bin_yields_empty_options_without_request() {
        let gateway = FakeGateway::default();
        let lookup = InstallmentLookup::new(Duration::ZERO);

        let result = lookup.lookup(&gateway, query("4111")).await.unwrap();
        assert_eq!(
            result,
            LookupResult::Applied(InstallmentSelection::default())
        );
        assert_eq!(FakeGateway::calls(&gateway.installment_calls), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_discards_in_flight_lookup() {
        let gateway = Arc::new(FakeGateway::default());
        let lookup = Arc::new(InstallmentLookup::new(Duration::from_millis(400)));

        let pending = {
            let (gateway, lookup) = (Arc::clone(&gateway), Arc::clone(&lookup));
            tokio::spawn(async move { lookup.lookup(gateway.as_ref(), query("411111")).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        lookup.reset().await;

        assert_eq!(pending.await.unwrap().unwrap(), LookupResult::Superseded);
        assert!(lookup.current().await.options.is_empty());
    }

    #[test]
    fn test_reconcile_selection_on_empty_options() {
        assert_eq!(reconcile_selection(Some(3), &[]), None);
    }
}
