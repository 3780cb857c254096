//! Authentication route handlers.
//!
//! Email and password login. Form posts answer with redirects; failures go
//! back to the login page with an `error` code in the query string.

use axum::{
    Form,
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{info, instrument, warn};

use crate::error::{clear_sentry_user, set_sentry_user};
use crate::middleware::{clear_current_user, set_current_user};
use crate::models::{CurrentUser, User};
use crate::services::auth::{AuthError, AuthService};
use crate::state::AppState;

// =============================================================================
// Form Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    /// Local path to return to after login.
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    pub email: String,
    pub password: String,
    pub password_confirm: String,
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub error: Option<String>,
    pub next: Option<String>,
}

/// Only same-site paths are followed after login.
fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path,
        _ => "/",
    }
}

fn error_message(code: &str) -> &'static str {
    match code {
        "credentials" => "E-mail ou senha inválidos.",
        "email_taken" => "Já existe uma conta com este e-mail.",
        "password_mismatch" => "As senhas não conferem.",
        "weak_password" => "A senha deve ter pelo menos 8 caracteres.",
        "invalid_email" => "E-mail inválido.",
        "session" => "Não foi possível iniciar a sessão. Tente novamente.",
        _ => "Algo deu errado. Tente novamente.",
    }
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// =============================================================================
// Login
// =============================================================================

/// Minimal login page.
pub async fn login_page(Query(query): Query<MessageQuery>) -> Html<String> {
    let error = query
        .error
        .as_deref()
        .map(|code| format!(r#"<p class="error">{}</p>"#, error_message(code)))
        .unwrap_or_default();
    let next = escape_attr(safe_next(query.next.as_deref()));

    Html(format!(
        r#"<!doctype html>
<html lang="pt-BR">
<head><meta charset="utf-8"><title>Entrar | Versos</title></head>
<body>
<h1>Entrar</h1>
{error}
<form method="post" action="/login">
  <input type="hidden" name="next" value="{next}">
  <label>E-mail <input type="email" name="email" required></label>
  <label>Senha <input type="password" name="password" required></label>
  <button type="submit">Entrar</button>
</form>
</body>
</html>"#
    ))
}

async fn start_session(session: &Session, user: &User, next: &str) -> Response {
    let current_user = CurrentUser::from(user);
    if let Err(e) = set_current_user(session, &current_user).await {
        tracing::error!(error = %e, "Failed to store user in session");
        return Redirect::to("/login?error=session").into_response();
    }
    set_sentry_user(&user.id, Some(user.email.as_str()));
    Redirect::to(next).into_response()
}

/// Log in with email and password.
#[instrument(skip_all, fields(email = %form.email))]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<LoginForm>,
) -> Response {
    let auth = AuthService::new(state.pool());
    let next = safe_next(form.next.as_deref());

    match auth.login_with_password(&form.email, &form.password).await {
        Ok(user) => {
            info!(user_id = %user.id, "User logged in");
            start_session(&session, &user, next).await
        }
        Err(AuthError::InvalidCredentials | AuthError::InvalidEmail(_)) => {
            Redirect::to("/login?error=credentials").into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Login failed");
            sentry::capture_error(&e);
            Redirect::to("/login?error=failed").into_response()
        }
    }
}

// =============================================================================
// Registration
// =============================================================================

/// Create an account and log in.
#[instrument(skip_all, fields(email = %form.email))]
pub async fn register(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<RegisterForm>,
) -> Response {
    if form.password != form.password_confirm {
        return Redirect::to("/login?error=password_mismatch").into_response();
    }

    let auth = AuthService::new(state.pool());
    let next = safe_next(form.next.as_deref());

    match auth.register_with_password(&form.email, &form.password).await {
        Ok(user) => {
            info!(user_id = %user.id, "User registered");
            start_session(&session, &user, next).await
        }
        Err(AuthError::UserAlreadyExists) => {
            Redirect::to("/login?error=email_taken").into_response()
        }
        Err(AuthError::WeakPassword(_)) => {
            Redirect::to("/login?error=weak_password").into_response()
        }
        Err(AuthError::InvalidEmail(_)) => {
            Redirect::to("/login?error=invalid_email").into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Registration failed");
            sentry::capture_error(&e);
            Redirect::to("/login?error=failed").into_response()
        }
    }
}

// =============================================================================
// Logout
// =============================================================================

/// Log out. The cart stays with the browser session.
pub async fn logout(session: Session) -> Redirect {
    if let Err(e) = clear_current_user(&session).await {
        warn!(error = %e, "Failed to clear user from session");
    }
    clear_sentry_user();
    Redirect::to("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_next_only_allows_local_paths() {
        assert_eq!(safe_next(Some("/checkout")), "/checkout");
        assert_eq!(safe_next(Some("//evil.example")), "/");
        assert_eq!(safe_next(Some("https://evil.example")), "/");
        assert_eq!(safe_next(None), "/");
    }

    #[test]
    fn test_escape_attr() {
        assert_eq!(escape_attr(r#"/a"b<c>&"#), "/a&quot;b&lt;c&gt;&amp;");
    }
}
