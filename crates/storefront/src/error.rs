//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::checkout::CheckoutError;
use crate::db::RepositoryError;
use crate::payments::PaymentError;
use crate::services::auth::AuthError;

/// Where unauthenticated shoppers are sent.
pub const LOGIN_PATH: &str = "/login";

/// htmx client-side redirect header.
pub const HX_REDIRECT: &str = "hx-redirect";

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Authentication operation failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// A checkout operation was refused or failed.
    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    /// Payment processor call outside a checkout transition failed.
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    /// Session store failure.
    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// User is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Rate limited.
    #[error("Rate limited")]
    RateLimited,

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn payment_status(err: &PaymentError) -> StatusCode {
    match err {
        PaymentError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PaymentError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        PaymentError::Http(_)
        | PaymentError::Api { .. }
        | PaymentError::Parse(_)
        | PaymentError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
    }
}

fn payment_message(err: &PaymentError) -> String {
    match err {
        PaymentError::InvalidRequest(msg) => msg.clone(),
        PaymentError::RateLimited(_) => {
            "Muitas tentativas. Aguarde alguns segundos e tente novamente.".to_string()
        }
        _ => "Não foi possível processar o pagamento. Tente novamente.".to_string(),
    }
}

/// Redirect to the login page, for both full page loads and htmx requests.
fn login_redirect() -> Response {
    (
        StatusCode::SEE_OTHER,
        [("location", LOGIN_PATH), (HX_REDIRECT, LOGIN_PATH)],
        "Faça login para continuar.",
    )
        .into_response()
}

impl AppError {
    /// Whether this error is our fault (captured to Sentry).
    fn is_server_error(&self) -> bool {
        match self {
            Self::Database(_) | Self::Internal(_) | Self::Session(_) => true,
            Self::Checkout(CheckoutError::Backend(_)) => true,
            Self::Payment(err) | Self::Checkout(CheckoutError::Payment(err)) => !matches!(
                err,
                PaymentError::InvalidRequest(_) | PaymentError::RateLimited(_)
            ),
            _ => false,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Database(_) | Self::Internal(_) | Self::Session(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Auth(err) => match err {
                AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                AuthError::UserAlreadyExists => StatusCode::CONFLICT,
                AuthError::WeakPassword(_) | AuthError::InvalidEmail(_) => StatusCode::BAD_REQUEST,
                AuthError::Repository(_) | AuthError::PasswordHash => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Checkout(err) => match err {
                CheckoutError::Validation(_)
                | CheckoutError::Address(_)
                | CheckoutError::Coupon(_)
                | CheckoutError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                CheckoutError::AuthRequired => StatusCode::SEE_OTHER,
                CheckoutError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
                CheckoutError::Payment(err) => payment_status(err),
                CheckoutError::PaymentRejected { .. } => StatusCode::PAYMENT_REQUIRED,
            },
            Self::Payment(err) => payment_status(err),
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Message shown to the shopper. Internal details are never exposed.
    fn public_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Internal(_) | Self::Session(_) => {
                "Erro interno. Tente novamente.".to_string()
            }
            Self::Auth(err) => match err {
                AuthError::InvalidCredentials => "E-mail ou senha inválidos.".to_string(),
                AuthError::UserAlreadyExists => "Já existe uma conta com este e-mail.".to_string(),
                AuthError::WeakPassword(msg) => msg.clone(),
                AuthError::InvalidEmail(_) => "E-mail inválido.".to_string(),
                AuthError::Repository(_) | AuthError::PasswordHash => {
                    "Erro de autenticação.".to_string()
                }
            },
            Self::Checkout(err) => match err {
                CheckoutError::Backend(_) => "Erro interno. Tente novamente.".to_string(),
                CheckoutError::Payment(err) => payment_message(err),
                CheckoutError::InvalidTransition { .. } => {
                    "Esta etapa do checkout não está disponível agora.".to_string()
                }
                other => other.to_string(),
            },
            Self::Payment(err) => payment_message(err),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        if matches!(self, Self::Checkout(CheckoutError::AuthRequired)) {
            return login_redirect();
        }

        (self.status(), self.public_message()).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for shopper actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
mod tests {
    use axum::http::header;
    use versos_core::CheckoutStep;

    use super::*;
    use crate::checkout::CouponError;

    fn get_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("verse-123".to_string());
        assert_eq!(err.to_string(), "Not found: verse-123");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Unauthorized("test".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AppError::RateLimited),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_checkout_error_status_codes() {
        assert_eq!(
            get_status(CheckoutError::Coupon(CouponError::Expired).into()),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            get_status(
                CheckoutError::InvalidTransition {
                    from: CheckoutStep::Cart,
                    to: CheckoutStep::Payment,
                }
                .into()
            ),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            get_status(
                CheckoutError::PaymentRejected {
                    reason: "recusado".to_string()
                }
                .into()
            ),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            get_status(
                CheckoutError::Payment(PaymentError::Api {
                    status: 500,
                    message: "boom".to_string()
                })
                .into()
            ),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            get_status(PaymentError::InvalidRequest("cartão inválido".to_string()).into()),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_auth_required_redirects_to_login() {
        let response = AppError::from(CheckoutError::AuthRequired).into_response();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], LOGIN_PATH);
        assert_eq!(response.headers()[HX_REDIRECT], LOGIN_PATH);
    }
}
