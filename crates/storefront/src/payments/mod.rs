//! Payment processor integration.
//!
//! # Architecture
//!
//! - [`PaymentGateway`] is the seam the checkout flow talks to
//! - [`MercadoPagoClient`] implements it over the Mercado Pago REST API
//! - [`InstallmentLookup`] debounces installment lookups and keeps only the
//!   newest result
//! - [`PaymentWatch`] polls a pending payment until it settles or times out
//!
//! Card data never reaches the database: it is exchanged for a single-use
//! token and only the token is sent with the payment.

mod installments;
mod mercado_pago;
mod polling;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod fake;

pub use installments::{InstallmentLookup, InstallmentSelection, LookupResult};
pub use mercado_pago::MercadoPagoClient;
pub use polling::{PaymentWatch, PollOutcome};

use std::fmt;
use std::future::Future;

use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use versos_core::{Email, PaymentStatus, Price, UserId};

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur when talking to the payment processor.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The processor answered with a non-success status.
    #[error("payment API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The response parsed but is missing required data.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limited by the processor.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// The request was rejected before being sent.
    #[error("invalid payment request: {0}")]
    InvalidRequest(String),
}

// =============================================================================
// Card data and tokens
// =============================================================================

/// Payer identification document (CPF/CNPJ).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identification {
    #[serde(rename = "type")]
    pub kind: String,
    pub number: String,
}

/// Raw card details as entered by the shopper.
pub struct CardData {
    pub number: SecretString,
    pub security_code: SecretString,
    pub expiration_month: u32,
    pub expiration_year: u32,
    pub holder_name: String,
    pub identification: Option<Identification>,
}

impl fmt::Debug for CardData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardData")
            .field("number", &"[REDACTED]")
            .field("security_code", &"[REDACTED]")
            .field("expiration_month", &self.expiration_month)
            .field("expiration_year", &self.expiration_year)
            .field("holder_name", &self.holder_name)
            .finish_non_exhaustive()
    }
}

impl CardData {
    /// Check the fields that can be validated locally.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::InvalidRequest` naming the first bad field.
    pub fn validate(&self) -> Result<(), PaymentError> {
        use secrecy::ExposeSecret;

        let digits = self.number.expose_secret().chars().filter(char::is_ascii_digit).count();
        if !(13..=19).contains(&digits) {
            return Err(PaymentError::InvalidRequest("card number".to_string()));
        }
        let cvv = self.security_code.expose_secret();
        if !(3..=4).contains(&cvv.len()) || !cvv.chars().all(|c| c.is_ascii_digit()) {
            return Err(PaymentError::InvalidRequest("security code".to_string()));
        }
        if !(1..=12).contains(&self.expiration_month) {
            return Err(PaymentError::InvalidRequest("expiration month".to_string()));
        }
        if self.holder_name.trim().is_empty() {
            return Err(PaymentError::InvalidRequest("cardholder name".to_string()));
        }
        Ok(())
    }
}

/// Single-use card token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CardToken {
    pub id: String,
    #[serde(default)]
    pub first_six_digits: Option<String>,
    #[serde(default)]
    pub last_four_digits: Option<String>,
}

// =============================================================================
// Payments
// =============================================================================

/// Who is paying.
#[derive(Debug, Clone)]
pub struct Payer {
    pub email: Email,
    pub first_name: Option<String>,
    pub identification: Option<Identification>,
}

/// Fields shared by card and PIX payments.
#[derive(Debug, Clone)]
pub struct PaymentData {
    pub amount: Price,
    pub description: String,
    pub payer: Payer,
    /// Sent as `X-Idempotency-Key`; resubmissions with the same key are
    /// deduplicated by the processor.
    pub idempotency_key: String,
}

/// A card payment request.
#[derive(Debug, Clone)]
pub struct CardPayment {
    pub data: PaymentData,
    pub installments: u32,
    pub payment_method_id: String,
    pub issuer_id: Option<String>,
}

/// Result of submitting a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Approved { payment_id: String },
    Rejected { payment_id: String, reason: String },
    /// Any other status; the payment must be polled.
    Pending { payment_id: String },
}

impl PaymentOutcome {
    /// Classify a processor status.
    #[must_use]
    pub fn from_status(payment_id: String, status: &PaymentStatus, detail: Option<&str>) -> Self {
        match status {
            PaymentStatus::Approved => Self::Approved { payment_id },
            s if s.is_failure() => Self::Rejected {
                payment_id,
                reason: rejection_message(detail),
            },
            _ => Self::Pending { payment_id },
        }
    }

    #[must_use]
    pub fn payment_id(&self) -> &str {
        match self {
            Self::Approved { payment_id }
            | Self::Rejected { payment_id, .. }
            | Self::Pending { payment_id } => payment_id,
        }
    }
}

/// A PIX charge awaiting payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PixCharge {
    pub payment_id: String,
    /// Copy-and-paste code.
    pub qr_code: String,
    /// PNG image of the QR code, base64 encoded.
    pub qr_code_base64: String,
}

/// Snapshot of a payment's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentStatusReport {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub status_detail: Option<String>,
}

/// User-facing message for a rejection `status_detail`.
#[must_use]
pub fn rejection_message(detail: Option<&str>) -> String {
    let message = match detail.unwrap_or_default() {
        "cc_rejected_insufficient_amount" => "Saldo insuficiente no cartão.",
        "cc_rejected_bad_filled_security_code" => "Código de segurança inválido.",
        "cc_rejected_bad_filled_date" => "Data de validade inválida.",
        "cc_rejected_bad_filled_card_number" => "Número do cartão inválido.",
        "cc_rejected_bad_filled_other" => "Confira os dados do cartão.",
        "cc_rejected_call_for_authorize" => "Autorize o pagamento junto ao banco emissor.",
        "cc_rejected_card_disabled" => "Cartão desabilitado. Entre em contato com o emissor.",
        "cc_rejected_duplicated_payment" => "Pagamento duplicado. Verifique seus pedidos.",
        "cc_rejected_high_risk" => "Pagamento recusado por análise de risco.",
        "cc_rejected_max_attempts" => "Limite de tentativas atingido. Use outro cartão.",
        "expired" => "O prazo para pagamento expirou.",
        _ => "Pagamento recusado. Tente outro meio de pagamento.",
    };
    message.to_string()
}

// =============================================================================
// Installments
// =============================================================================

/// Parameters of an installment lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallmentQuery {
    pub amount: Price,
    pub payment_method_id: Option<String>,
    pub bin: Option<String>,
}

impl InstallmentQuery {
    /// The first six digits of the card number, if that many were entered.
    #[must_use]
    pub fn normalized_bin(&self) -> Option<String> {
        self.bin.as_deref().and_then(normalize_bin)
    }

    #[must_use]
    pub fn method_id(&self) -> Option<&str> {
        self.payment_method_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Whether a lookup can be made: positive amount plus a method id or BIN.
    #[must_use]
    pub fn is_resolvable(&self) -> bool {
        self.amount.is_positive() && (self.method_id().is_some() || self.normalized_bin().is_some())
    }
}

/// Extract a 6-digit BIN from partial card input.
#[must_use]
pub fn normalize_bin(input: &str) -> Option<String> {
    let digits: String = input.chars().filter(char::is_ascii_digit).take(6).collect();
    (digits.len() == 6).then_some(digits)
}

/// One installment plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Installment {
    pub quantity: u32,
    pub installment_amount: Decimal,
    pub total_amount: Decimal,
    /// Interest rate in percent; zero for interest-free plans.
    pub rate: Decimal,
    pub message: Option<String>,
}

// =============================================================================
// Gateway
// =============================================================================

/// Operations the checkout needs from a payment processor.
pub trait PaymentGateway: Send + Sync + 'static {
    /// Resolve the card network for a 6-digit BIN.
    fn detect_payment_method_id(
        &self,
        bin: &str,
    ) -> impl Future<Output = Result<Option<String>, PaymentError>> + Send;

    /// Installment plans for an amount. Empty without a request when the
    /// query is not resolvable.
    fn get_installments(
        &self,
        query: &InstallmentQuery,
    ) -> impl Future<Output = Result<Vec<Installment>, PaymentError>> + Send;

    /// Exchange card details for a single-use token.
    fn create_card_token(
        &self,
        card: &CardData,
    ) -> impl Future<Output = Result<CardToken, PaymentError>> + Send;

    fn create_card_payment(
        &self,
        token: &CardToken,
        payment: &CardPayment,
        user_id: UserId,
    ) -> impl Future<Output = Result<PaymentOutcome, PaymentError>> + Send;

    fn create_pix_payment(
        &self,
        payment: &PaymentData,
        user_id: UserId,
    ) -> impl Future<Output = Result<PixCharge, PaymentError>> + Send;

    fn check_payment_status(
        &self,
        payment_id: &str,
    ) -> impl Future<Output = Result<PaymentStatusReport, PaymentError>> + Send;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_status() {
        let approved = PaymentOutcome::from_status("1".into(), &PaymentStatus::Approved, None);
        assert_eq!(
            approved,
            PaymentOutcome::Approved {
                payment_id: "1".into()
            }
        );

        let rejected = PaymentOutcome::from_status(
            "2".into(),
            &PaymentStatus::Rejected,
            Some("cc_rejected_insufficient_amount"),
        );
        assert_eq!(
            rejected,
            PaymentOutcome::Rejected {
                payment_id: "2".into(),
                reason: "Saldo insuficiente no cartão.".into()
            }
        );

        let cancelled = PaymentOutcome::from_status("3".into(), &PaymentStatus::Cancelled, None);
        assert!(matches!(cancelled, PaymentOutcome::Rejected { .. }));

        for status in [
            PaymentStatus::InProcess,
            PaymentStatus::Pending,
            PaymentStatus::Authorized,
            PaymentStatus::Other,
        ] {
            let outcome = PaymentOutcome::from_status("4".into(), &status, None);
            assert_eq!(
                outcome,
                PaymentOutcome::Pending {
                    payment_id: "4".into()
                }
            );
        }
    }

    #[test]
    fn test_rejection_message_fallback() {
        assert_eq!(
            rejection_message(Some("something_new")),
            "Pagamento recusado. Tente outro meio de pagamento."
        );
        assert_eq!(
            rejection_message(None),
            "Pagamento recusado. Tente outro meio de pagamento."
        );
    }

    #[test]
    fn test_installment_query_resolvable() {
        let amount = Price::from_cents(1500);
        let by_bin = InstallmentQuery {
            amount,
            payment_method_id: None,
            bin: Some("4111 11".into()),
        };
        assert!(by_bin.is_resolvable());
        assert_eq!(by_bin.normalized_bin().as_deref(), Some("411111"));

        let short_bin = InstallmentQuery {
            amount,
            payment_method_id: None,
            bin: Some("4111".into()),
        };
        assert!(!short_bin.is_resolvable());

        let by_method = InstallmentQuery {
            amount,
            payment_method_id: Some("visa".into()),
            bin: None,
        };
        assert!(by_method.is_resolvable());

        let zero = InstallmentQuery {
            amount: Price::ZERO,
            payment_method_id: Some("visa".into()),
            bin: None,
        };
        assert!(!zero.is_resolvable());
    }

    #[test]
    fn test_card_data_debug_redacts() {
        let card = CardData {
            number: SecretString::from("4111111111111111".to_string()),
            security_code: SecretString::from("123".to_string()),
            expiration_month: 11,
            expiration_year: 2030,
            holder_name: "APRO".into(),
            identification: None,
        };
        let debug = format!("{card:?}");
        assert!(!debug.contains("4111111111111111"));
        assert!(!debug.contains("123\""));
        assert!(card.validate().is_ok());
    }

    #[test]
    fn test_card_data_validate_rejects_bad_cvv() {
        let card = CardData {
            number: SecretString::from("4111111111111111".to_string()),
            security_code: SecretString::from("12a".to_string()),
            expiration_month: 11,
            expiration_year: 2030,
            holder_name: "APRO".into(),
            identification: None,
        };
        assert!(matches!(
            card.validate(),
            Err(PaymentError::InvalidRequest(_))
        ));
    }
}
