use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{header::SET_COOKIE, request::Parts, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::{cookie::Cookie, CookieJar};
use std::sync::Arc;
use uuid::Uuid;

use super::error::{ApiError, ValidationErrorBuilder};
use super::form::{FormSchema, Payload};
use super::response::{created, message, ok, ApiResult};
use super::validation::{validate_email, validate_optional, validate_password, validate_required};
use crate::auth::{Identity, Role, Session, SessionCodec};
use crate::config::AuthConfig;
use crate::db::{
    begin_write, normalize_attr, now_rfc3339, LoginRequest, LoginResponse, SessionResponse, SignupRequest, User,
    UserResponse,
};
use crate::{AppState, DbPool};

const AUTH_FORM: FormSchema = FormSchema::flat(&[]);

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Emails are stored and compared in this form
fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Extract the session token: `Authorization: Bearer` first, then the cookie
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(auth_header) = headers.get("Authorization").and_then(|h| h.to_str().ok()) {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }

    CookieJar::from_headers(headers)
        .get(cookie_name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Extractor for the verified session of the caller
#[async_trait]
impl FromRequestParts<Arc<AppState>> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers, state.sessions.cookie_name())
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        Ok(state.sessions.decode(&token)?)
    }
}

/// Extractor that only admits managers
pub struct RequireManager(pub Session);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireManager {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;
        if !session.is_manager() {
            return Err(ApiError::forbidden("Manager access required"));
        }
        Ok(RequireManager(session))
    }
}

/// Owner of a record, or a manager
pub fn ensure_owner_or_manager(session: &Session, owner_id: &str) -> Result<(), ApiError> {
    if session.is_manager() || session.user_id == owner_id {
        Ok(())
    } else {
        Err(ApiError::forbidden("You do not have access to this record"))
    }
}

/// Re-issue the session cookie on every successful authenticated request so
/// an active user is not signed out mid-use.
pub async fn refresh_session(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let session = CookieJar::from_headers(request.headers())
        .get(state.sessions.cookie_name())
        .and_then(|c| state.sessions.decode(c.value()).ok());

    let mut response = next.run(request).await;

    let Some(session) = session else {
        return response;
    };
    if !response.status().is_success() || response.headers().contains_key(SET_COOKIE) {
        return response;
    }

    match state.sessions.refresh(&session) {
        Ok(issued) => {
            let cookie = state.sessions.session_cookie(&issued);
            if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
                response.headers_mut().append(SET_COOKIE, value);
            }
        }
        Err(e) => tracing::warn!(user_id = %session.user_id, "Failed to refresh session: {}", e),
    }

    response
}

async fn find_user(db: &DbPool, id: &str) -> Result<Option<User>, ApiError> {
    Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?)
}

/// Issue a session for `user` and build the login body plus its cookie
fn issue(codec: &SessionCodec, user: User) -> Result<(Cookie<'static>, LoginResponse), ApiError> {
    let role: Role = user.role.parse()?;
    let issued = codec.encode(&Identity {
        user_id: user.id.clone(),
        role,
    })?;
    let cookie = codec.session_cookie(&issued);

    Ok((
        cookie,
        LoginResponse {
            token: issued.token,
            user: UserResponse::from(user),
            session: issued.session,
        },
    ))
}

/// Customer self-registration
pub async fn signup(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: Payload,
) -> Result<impl IntoResponse, ApiError> {
    let (req, _): (SignupRequest, _) = payload.into_parts(&AUTH_FORM)?;
    let email = normalize_email(&req.email);

    let mut errors = ValidationErrorBuilder::new();
    errors.check("email", validate_email(&email));
    errors.check("password", validate_password(&req.password));
    errors.check("name", validate_required(&req.name, "Name", 100));
    errors.check("fitness_goal", validate_optional(&req.fitness_goal, "Fitness goal", 100));
    errors.check(
        "preferred_specialty",
        validate_optional(&req.preferred_specialty, "Preferred specialty", 100),
    );
    errors.finish()?;

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let password_hash = hash_password(&req.password).map_err(|e| {
        tracing::error!("Failed to hash password: {}", e);
        ApiError::internal("Failed to create account")
    })?;

    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    let mut tx = begin_write(&state.db).await?;

    sqlx::query(
        r#"
        INSERT INTO users (id, email, password_hash, name, role, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&email)
    .bind(&password_hash)
    .bind(req.name.trim())
    .bind(Role::Customer.as_str())
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO user_preferences (user_id, fitness_goal, preferred_specialty, updated_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(req.fitness_goal.as_deref().map(normalize_attr).filter(|s| !s.is_empty()))
    .bind(req.preferred_specialty.as_deref().map(normalize_attr).filter(|s| !s.is_empty()))
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let user = find_user(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::internal("Account vanished after creation"))?;

    tracing::info!(user_id = %id, "Registered customer {}", email);

    let (cookie, body) = issue(&state.sessions, user)?;
    Ok((jar.add(cookie), created(body)))
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: Payload,
) -> Result<impl IntoResponse, ApiError> {
    let (req, _): (LoginRequest, _) = payload.into_parts(&AUTH_FORM)?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(normalize_email(&req.email))
        .fetch_optional(&state.db)
        .await?;

    let user = match user {
        Some(user) if verify_password(&req.password, &user.password_hash) => user,
        _ => {
            tracing::debug!("Failed login for {}", req.email);
            return Err(ApiError::unauthorized("Invalid email or password"));
        }
    };

    tracing::info!(user_id = %user.id, role = %user.role, "User signed in");

    let (cookie, body) = issue(&state.sessions, user)?;
    Ok((jar.add(cookie), ok(body)))
}

/// Sign-out removes the cookie; there is no server-side session to revoke.
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    (jar.add(state.sessions.removal_cookie()), message("Signed out"))
}

/// The caller's session and account. Pages read identity only from here.
pub async fn session(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> ApiResult<SessionResponse> {
    let user = find_user(&state.db, &session.user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Account no longer exists"))?;

    Ok(ok(SessionResponse {
        user: UserResponse::from(user),
        session,
    }))
}

/// Make sure the configured manager account exists.
///
/// Without a configured password nothing is created; an existing account is
/// left untouched so a changed password in config does not silently reset it.
pub async fn ensure_manager_user(db: &DbPool, config: &AuthConfig) -> anyhow::Result<()> {
    let email = normalize_email(&config.manager_email);

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(db)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let Some(password) = config.manager_password.as_deref().filter(|p| !p.is_empty()) else {
        let managers: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'manager'")
            .fetch_one(db)
            .await?;
        if managers.0 == 0 {
            tracing::warn!(
                "No manager account exists and auth.manager_password is not set; \
                 the manager pages are unreachable"
            );
        }
        return Ok(());
    };

    let password_hash =
        hash_password(password).map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    let now = now_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO users (id, email, password_hash, name, role, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&email)
    .bind(&password_hash)
    .bind(&config.manager_name)
    .bind(Role::Manager.as_str())
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await?;

    tracing::info!("Created manager account {}", email);
    Ok(())
}
