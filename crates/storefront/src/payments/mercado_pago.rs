//! Mercado Pago REST client.
//!
//! Endpoints used:
//! - `GET  /v1/payment_methods/search` (BIN to card network)
//! - `GET  /v1/payment_methods/installments`
//! - `POST /v1/card_tokens`
//! - `POST /v1/payments`
//! - `GET  /v1/payments/{id}`

use std::sync::Arc;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, error, instrument};
use url::Url;
use uuid::Uuid;

use versos_core::{PaymentStatus, UserId};

use super::{
    CardData, CardPayment, CardToken, Identification, Installment, InstallmentQuery, PaymentData,
    PaymentError, PaymentGateway, PaymentOutcome, PaymentStatusReport, PixCharge,
};
use crate::config::MercadoPagoConfig;

const PIX_METHOD_ID: &str = "pix";

// =============================================================================
// MercadoPagoClient
// =============================================================================

/// Client for the Mercado Pago payments API.
#[derive(Clone)]
pub struct MercadoPagoClient {
    inner: Arc<MercadoPagoClientInner>,
}

struct MercadoPagoClientInner {
    client: reqwest::Client,
    api_base: Url,
    access_token: SecretString,
    public_key: String,
    notification_url: Option<String>,
    statement_descriptor: String,
}

impl MercadoPagoClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::Http` if the HTTP client cannot be built.
    pub fn new(config: &MercadoPagoConfig) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("versos-storefront/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            inner: Arc::new(MercadoPagoClientInner {
                client,
                api_base: config.api_base.clone(),
                access_token: config.access_token.clone(),
                public_key: config.public_key.clone(),
                notification_url: config.notification_url.clone(),
                statement_descriptor: config.statement_descriptor.clone(),
            }),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, PaymentError> {
        self.inner
            .api_base
            .join(path)
            .map_err(|e| PaymentError::InvalidRequest(format!("bad endpoint {path}: {e}")))
    }

    fn endpoint_with_query(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, PaymentError> {
        let mut url = self.endpoint(path)?;
        url.query_pairs_mut().extend_pairs(params);
        Ok(url)
    }

    /// Send a request and decode the JSON body.
    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PaymentError> {
        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(PaymentError::RateLimited(retry_after));
        }

        let body = response.text().await?;

        if !status.is_success() {
            error!(
                status = %status,
                body = %body.chars().take(500).collect::<String>(),
                "Mercado Pago returned non-success status"
            );
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| body.chars().take(200).collect());
            return Err(PaymentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            error!(
                error = %e,
                body = %body.chars().take(500).collect::<String>(),
                "Failed to parse Mercado Pago response"
            );
            PaymentError::Parse(e)
        })
    }

    async fn create_payment(
        &self,
        body: &CreatePaymentBody<'_>,
        idempotency_key: &str,
    ) -> Result<PaymentBody, PaymentError> {
        let request = self
            .inner
            .client
            .post(self.endpoint("/v1/payments")?)
            .bearer_auth(self.inner.access_token.expose_secret())
            .header("X-Idempotency-Key", idempotency_key)
            .json(body);

        self.execute(request).await
    }

    fn payment_body<'a>(
        &'a self,
        data: &'a PaymentData,
        payment_method_id: &'a str,
        user_id: UserId,
    ) -> CreatePaymentBody<'a> {
        CreatePaymentBody {
            transaction_amount: data.amount.amount(),
            description: &data.description,
            payment_method_id,
            token: None,
            installments: None,
            issuer_id: None,
            payer: PayerBody {
                email: data.payer.email.as_str(),
                first_name: data.payer.first_name.as_deref(),
                identification: data.payer.identification.as_ref(),
            },
            external_reference: format!("user-{user_id}-{}", Uuid::new_v4()),
            notification_url: self.inner.notification_url.as_deref(),
            statement_descriptor: &self.inner.statement_descriptor,
            metadata: Metadata {
                user_id: user_id.as_i32(),
            },
        }
    }
}

impl PaymentGateway for MercadoPagoClient {
    #[instrument(skip(self))]
    async fn detect_payment_method_id(&self, bin: &str) -> Result<Option<String>, PaymentError> {
        let Some(bin) = super::normalize_bin(bin) else {
            return Ok(None);
        };

        let url = self.endpoint_with_query(
            "/v1/payment_methods/search",
            &[
                ("public_key", self.inner.public_key.as_str()),
                ("bins", bin.as_str()),
                ("marketplace", "NONE"),
                ("status", "active"),
            ],
        )?;
        let request = self.inner.client.get(url);

        let found: MethodSearchBody = self.execute(request).await?;
        let method = found
            .results
            .into_iter()
            .find(|m| m.payment_type_id.as_deref() != Some("ticket"))
            .map(|m| m.id);

        debug!(?method, "Resolved payment method for BIN");
        Ok(method)
    }

    #[instrument(skip(self), fields(amount = %query.amount))]
    async fn get_installments(
        &self,
        query: &InstallmentQuery,
    ) -> Result<Vec<Installment>, PaymentError> {
        if !query.is_resolvable() {
            return Ok(Vec::new());
        }

        let amount = query.amount.amount().to_string();
        let bin = query.normalized_bin();
        let mut params = vec![
            ("public_key", self.inner.public_key.as_str()),
            ("amount", amount.as_str()),
        ];
        if let Some(method) = query.method_id() {
            params.push(("payment_method_id", method));
        }
        if let Some(bin) = bin.as_deref() {
            params.push(("bin", bin));
        }

        let url = self.endpoint_with_query("/v1/payment_methods/installments", &params)?;
        let request = self.inner.client.get(url);

        let plans: Vec<InstallmentPlanBody> = self.execute(request).await?;
        Ok(into_installments(plans))
    }

    #[instrument(skip(self, card))]
    async fn create_card_token(&self, card: &CardData) -> Result<CardToken, PaymentError> {
        card.validate()?;

        let digits: String = card
            .number
            .expose_secret()
            .chars()
            .filter(char::is_ascii_digit)
            .collect();

        let body = CardTokenBody {
            card_number: &digits,
            security_code: card.security_code.expose_secret(),
            expiration_month: card.expiration_month,
            expiration_year: card.expiration_year,
            cardholder: CardholderBody {
                name: card.holder_name.trim(),
                identification: card.identification.as_ref(),
            },
        };

        let url = self.endpoint_with_query(
            "/v1/card_tokens",
            &[("public_key", self.inner.public_key.as_str())],
        )?;
        let request = self.inner.client.post(url).json(&body);

        self.execute(request).await
    }

    #[instrument(skip(self, token, payment), fields(user_id = %user_id))]
    async fn create_card_payment(
        &self,
        token: &CardToken,
        payment: &CardPayment,
        user_id: UserId,
    ) -> Result<PaymentOutcome, PaymentError> {
        if !payment.data.amount.is_positive() {
            return Err(PaymentError::InvalidRequest("amount must be positive".to_string()));
        }

        let mut body = self.payment_body(&payment.data, &payment.payment_method_id, user_id);
        body.token = Some(&token.id);
        body.installments = Some(payment.installments.max(1));
        body.issuer_id = payment.issuer_id.as_deref();

        let created = self
            .create_payment(&body, &payment.data.idempotency_key)
            .await?;
        debug!(payment_id = %created.id, status = ?created.status, "Card payment created");

        Ok(PaymentOutcome::from_status(
            created.id,
            &created.status,
            created.status_detail.as_deref(),
        ))
    }

    #[instrument(skip(self, payment), fields(user_id = %user_id))]
    async fn create_pix_payment(
        &self,
        payment: &PaymentData,
        user_id: UserId,
    ) -> Result<PixCharge, PaymentError> {
        if !payment.amount.is_positive() {
            return Err(PaymentError::InvalidRequest("amount must be positive".to_string()));
        }

        let body = self.payment_body(payment, PIX_METHOD_ID, user_id);
        let created = self
            .create_payment(&body, &payment.idempotency_key)
            .await?;

        let data = created
            .point_of_interaction
            .and_then(|p| p.transaction_data)
            .ok_or_else(|| {
                PaymentError::InvalidResponse("PIX payment without transaction data".to_string())
            })?;

        match (data.qr_code, data.qr_code_base64) {
            (Some(qr_code), Some(qr_code_base64)) => Ok(PixCharge {
                payment_id: created.id,
                qr_code,
                qr_code_base64,
            }),
            _ => Err(PaymentError::InvalidResponse(
                "PIX payment without QR code".to_string(),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn check_payment_status(
        &self,
        payment_id: &str,
    ) -> Result<PaymentStatusReport, PaymentError> {
        if payment_id.is_empty() || !payment_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PaymentError::InvalidRequest(format!(
                "malformed payment id: {payment_id}"
            )));
        }

        let request = self
            .inner
            .client
            .get(self.endpoint(&format!("/v1/payments/{payment_id}"))?)
            .bearer_auth(self.inner.access_token.expose_secret());

        let payment: PaymentBody = self.execute(request).await?;

        Ok(PaymentStatusReport {
            payment_id: payment.id,
            status: payment.status,
            status_detail: payment.status_detail,
        })
    }
}

fn into_installments(plans: Vec<InstallmentPlanBody>) -> Vec<Installment> {
    let mut options: Vec<Installment> = plans
        .into_iter()
        .next()
        .map(|plan| plan.payer_costs)
        .unwrap_or_default()
        .into_iter()
        .map(|cost| Installment {
            quantity: cost.installments,
            installment_amount: cost.installment_amount,
            total_amount: cost.total_amount,
            rate: cost.installment_rate,
            message: cost.recommended_message,
        })
        .collect();
    options.sort_by_key(|o| o.quantity);
    options
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Serialize)]
struct CardTokenBody<'a> {
    card_number: &'a str,
    security_code: &'a str,
    expiration_month: u32,
    expiration_year: u32,
    cardholder: CardholderBody<'a>,
}

#[derive(Serialize)]
struct CardholderBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    identification: Option<&'a Identification>,
}

#[derive(Serialize)]
struct CreatePaymentBody<'a> {
    #[serde(with = "rust_decimal::serde::float")]
    transaction_amount: Decimal,
    description: &'a str,
    payment_method_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    installments: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    issuer_id: Option<&'a str>,
    payer: PayerBody<'a>,
    external_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_url: Option<&'a str>,
    statement_descriptor: &'a str,
    metadata: Metadata,
}

#[derive(Serialize)]
struct PayerBody<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    identification: Option<&'a Identification>,
}

#[derive(Serialize)]
struct Metadata {
    user_id: i32,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

#[derive(Deserialize)]
struct PaymentBody {
    #[serde(deserialize_with = "id_as_string")]
    id: String,
    status: PaymentStatus,
    #[serde(default)]
    status_detail: Option<String>,
    #[serde(default)]
    point_of_interaction: Option<PointOfInteraction>,
}

#[derive(Deserialize)]
struct PointOfInteraction {
    #[serde(default)]
    transaction_data: Option<TransactionData>,
}

#[derive(Deserialize)]
struct TransactionData {
    #[serde(default)]
    qr_code: Option<String>,
    #[serde(default)]
    qr_code_base64: Option<String>,
}

#[derive(Deserialize)]
struct MethodSearchBody {
    #[serde(default)]
    results: Vec<MethodBody>,
}

#[derive(Deserialize)]
struct MethodBody {
    id: String,
    #[serde(default)]
    payment_type_id: Option<String>,
}

#[derive(Deserialize)]
struct InstallmentPlanBody {
    #[serde(default)]
    payer_costs: Vec<PayerCostBody>,
}

#[derive(Deserialize)]
struct PayerCostBody {
    installments: u32,
    installment_rate: Decimal,
    installment_amount: Decimal,
    total_amount: Decimal,
    #[serde(default)]
    recommended_message: Option<String>,
}

/// Payment ids arrive as JSON numbers; accept strings too.
fn id_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use versos_core::{Email, Price};

    use super::*;
    use crate::payments::Payer;

    fn client() -> MercadoPagoClient {
        MercadoPagoClient::new(&MercadoPagoConfig {
            api_base: Url::parse("https://api.mercadopago.com").unwrap(),
            access_token: SecretString::from("TEST-token".to_string()),
            public_key: "TEST-public".to_string(),
            notification_url: None,
            statement_descriptor: "VERSOS".to_string(),
            timeout: std::time::Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_payment_body_sends_amount_as_number() {
        let client = client();
        let data = PaymentData {
            amount: Price::new(Decimal::from_str("13.50").unwrap()).unwrap(),
            description: "Versos Musicais".to_string(),
            payer: Payer {
                email: Email::parse("ana@example.com").unwrap(),
                first_name: None,
                identification: Some(Identification {
                    kind: "CPF".to_string(),
                    number: "12345678909".to_string(),
                }),
            },
            idempotency_key: "attempt-1-pix-13.50".to_string(),
        };

        let body = client.payment_body(&data, PIX_METHOD_ID, UserId::new(7));
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["transaction_amount"], serde_json::json!(13.5));
        assert_eq!(json["payment_method_id"], "pix");
        assert_eq!(json["payer"]["identification"]["type"], "CPF");
        assert_eq!(json["metadata"]["user_id"], 7);
        assert!(json.get("token").is_none());
        assert!(json.get("notification_url").is_none());
    }

    #[test]
    fn test_payment_response_parses_numeric_id_and_pix_data() {
        let raw = r#"{
            "id": 1234567890,
            "status": "pending",
            "status_detail": "pending_waiting_transfer",
            "point_of_interaction": {
                "transaction_data": { "qr_code": "000201...", "qr_code_base64": "iVBORw0..." }
            }
        }"#;
        let body: PaymentBody = serde_json::from_str(raw).unwrap();
        assert_eq!(body.id, "1234567890");
        assert_eq!(body.status, PaymentStatus::Pending);
        let data = body.point_of_interaction.unwrap().transaction_data.unwrap();
        assert_eq!(data.qr_code.as_deref(), Some("000201..."));
    }

    #[test]
    fn test_unknown_status_is_other() {
        let raw = r#"{ "id": "abc", "status": "something_new" }"#;
        let body: PaymentBody = serde_json::from_str(raw).unwrap();
        assert_eq!(body.status, PaymentStatus::Other);
    }

    #[test]
    fn test_installments_are_sorted_by_quantity() {
        let raw = r#"[{
            "payment_method_id": "visa",
            "payer_costs": [
                { "installments": 3, "installment_rate": 4.5, "installment_amount": 5.22, "total_amount": 15.67 },
                { "installments": 1, "installment_rate": 0, "installment_amount": 15.0, "total_amount": 15.0,
                  "recommended_message": "1 parcela de R$ 15,00" }
            ]
        }]"#;
        let plans: Vec<InstallmentPlanBody> = serde_json::from_str(raw).unwrap();
        let options = into_installments(plans);

        assert_eq!(options.len(), 2);
        assert_eq!(options[0].quantity, 1);
        assert_eq!(options[0].rate, Decimal::ZERO);
        assert_eq!(options[1].quantity, 3);
        assert_eq!(options[1].total_amount, Decimal::from_str("15.67").unwrap());
    }

    #[test]
    fn test_no_plans_means_no_options() {
        assert!(into_installments(Vec::new()).is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_installment_query_makes_no_request() {
        let client = client();
        let query = InstallmentQuery {
            amount: Price::from_cents(1500),
            payment_method_id: None,
            bin: Some("41".to_string()),
        };
        assert!(client.get_installments(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payment_id_is_rejected_locally() {
        let client = client();
        let err = client.check_payment_status("../v1/users").await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidRequest(_)));
    }
}
