//! In-memory payment gateway for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rust_decimal::Decimal;

use versos_core::{PaymentStatus, UserId};

use super::{
    CardData, CardPayment, CardToken, Installment, InstallmentQuery, PaymentData, PaymentError,
    PaymentGateway, PaymentOutcome, PaymentStatusReport, PixCharge,
};

/// Scripted gateway.
///
/// BINs starting with `4` resolve to `visa` with plans 1, 2 and 3; anything
/// else resolves to `master` with plans 1, 6 and 12. Lookups for a BIN listed
/// in `slow_bins` take `slow_delay` to resolve.
pub struct FakeGateway {
    pub card_outcome: Mutex<PaymentOutcome>,
    /// Answers for successive status checks. `None` is a transient error.
    /// When exhausted, the payment reports `in_process`.
    pub statuses: Mutex<VecDeque<Option<PaymentStatus>>>,
    pub slow_bins: Vec<String>,
    pub slow_delay: Duration,
    pub fail_payments: bool,
    pub installment_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub payment_calls: AtomicUsize,
    pub token_calls: AtomicUsize,
    /// Idempotency keys of submitted payments, in order.
    pub idempotency_keys: Mutex<Vec<String>>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            card_outcome: Mutex::new(PaymentOutcome::Approved {
                payment_id: "pay-1".to_string(),
            }),
            statuses: Mutex::new(VecDeque::new()),
            slow_bins: Vec::new(),
            slow_delay: Duration::ZERO,
            fail_payments: false,
            installment_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            payment_calls: AtomicUsize::new(0),
            token_calls: AtomicUsize::new(0),
            idempotency_keys: Mutex::new(Vec::new()),
        }
    }
}

impl FakeGateway {
    pub fn with_card_outcome(outcome: PaymentOutcome) -> Self {
        Self {
            card_outcome: Mutex::new(outcome),
            ..Self::default()
        }
    }

    pub fn with_statuses(statuses: impl IntoIterator<Item = Option<PaymentStatus>>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        self.idempotency_keys.lock().unwrap().clone()
    }

    fn record(&self, data: &PaymentData) {
        self.payment_calls.fetch_add(1, Ordering::SeqCst);
        self.idempotency_keys
            .lock()
            .unwrap()
            .push(data.idempotency_key.clone());
    }

    fn plan(quantity: u32) -> Installment {
        Installment {
            quantity,
            installment_amount: Decimal::from(10),
            total_amount: Decimal::from(10 * quantity),
            rate: Decimal::ZERO,
            message: None,
        }
    }
}

impl PaymentGateway for FakeGateway {
    async fn detect_payment_method_id(&self, bin: &str) -> Result<Option<String>, PaymentError> {
        Ok(super::normalize_bin(bin).map(|b| {
            if b.starts_with('4') {
                "visa".to_string()
            } else {
                "master".to_string()
            }
        }))
    }

    async fn get_installments(
        &self,
        query: &InstallmentQuery,
    ) -> Result<Vec<Installment>, PaymentError> {
        if !query.is_resolvable() {
            return Ok(Vec::new());
        }
        self.installment_calls.fetch_add(1, Ordering::SeqCst);

        let bin = query.normalized_bin();
        if bin.as_ref().is_some_and(|b| self.slow_bins.contains(b)) {
            tokio::time::sleep(self.slow_delay).await;
        }

        let quantities: &[u32] = if query.method_id() == Some("visa") {
            &[1, 2, 3]
        } else {
            &[1, 6, 12]
        };
        Ok(quantities.iter().copied().map(Self::plan).collect())
    }

    async fn create_card_token(&self, card: &CardData) -> Result<CardToken, PaymentError> {
        card.validate()?;
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CardToken {
            id: "tok-1".to_string(),
            first_six_digits: None,
            last_four_digits: None,
        })
    }

    async fn create_card_payment(
        &self,
        _token: &CardToken,
        payment: &CardPayment,
        _user_id: UserId,
    ) -> Result<PaymentOutcome, PaymentError> {
        self.record(&payment.data);
        if self.fail_payments {
            return Err(PaymentError::Api {
                status: 500,
                message: "internal error".to_string(),
            });
        }
        Ok(self.card_outcome.lock().unwrap().clone())
    }

    async fn create_pix_payment(
        &self,
        payment: &PaymentData,
        _user_id: UserId,
    ) -> Result<PixCharge, PaymentError> {
        self.record(payment);
        Ok(PixCharge {
            payment_id: "pix-1".to_string(),
            qr_code: "00020126".to_string(),
            qr_code_base64: "iVBORw0KGgo=".to_string(),
        })
    }

    async fn check_payment_status(
        &self,
        payment_id: &str,
    ) -> Result<PaymentStatusReport, PaymentError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.statuses.lock().unwrap().pop_front();
        match next {
            Some(None) => Err(PaymentError::Api {
                status: 503,
                message: "unavailable".to_string(),
            }),
            Some(Some(status)) => Ok(PaymentStatusReport {
                payment_id: payment_id.to_string(),
                status,
                status_detail: None,
            }),
            None => Ok(PaymentStatusReport {
                payment_id: payment_id.to_string(),
                status: PaymentStatus::InProcess,
                status_detail: None,
            }),
        }
    }
}
