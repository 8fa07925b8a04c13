//! The caller's own recommendation preferences.

use axum::extract::State;
use std::sync::Arc;

use super::error::{ApiError, ValidationErrorBuilder};
use super::form::{FormSchema, Payload};
use super::response::{ok, ApiResult};
use super::validation::validate_optional;
use crate::auth::Session;
use crate::db::{normalize_attr, now_rfc3339, PreferencesRequest, UserPreferences};
use crate::{AppState, DbPool};

const PREFERENCES_FORM: FormSchema = FormSchema::flat(&[]);

/// Stored preferences for `user_id`, or an empty record when none were saved
pub async fn load_preferences(db: &DbPool, user_id: &str) -> Result<UserPreferences, ApiError> {
    let prefs = sqlx::query_as::<_, UserPreferences>(
        "SELECT * FROM user_preferences WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(db)
    .await?;

    Ok(prefs.unwrap_or_else(|| UserPreferences {
        user_id: user_id.to_string(),
        ..UserPreferences::default()
    }))
}

/// Trimmed and lowercased; blank means "no preference"
fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| normalize_attr(&v)).filter(|v| !v.is_empty())
}

pub async fn get_preferences(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> ApiResult<UserPreferences> {
    Ok(ok(load_preferences(&state.db, &session.user_id).await?))
}

/// Replace the caller's preferences. Omitted fields are cleared.
pub async fn update_preferences(
    State(state): State<Arc<AppState>>,
    session: Session,
    payload: Payload,
) -> ApiResult<UserPreferences> {
    let (req, _): (PreferencesRequest, _) = payload.into_parts(&PREFERENCES_FORM)?;

    let mut errors = ValidationErrorBuilder::new();
    errors.check("fitness_goal", validate_optional(&req.fitness_goal, "Fitness goal", 100));
    errors.check(
        "preferred_specialty",
        validate_optional(&req.preferred_specialty, "Preferred specialty", 100),
    );
    errors.finish()?;

    sqlx::query(
        r#"
        INSERT INTO user_preferences (user_id, fitness_goal, preferred_specialty, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            fitness_goal = excluded.fitness_goal,
            preferred_specialty = excluded.preferred_specialty,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&session.user_id)
    .bind(clean(req.fitness_goal))
    .bind(clean(req.preferred_specialty))
    .bind(now_rfc3339())
    .execute(&state.db)
    .await?;

    tracing::debug!(user_id = %session.user_id, "Updated preferences");

    Ok(ok(load_preferences(&state.db, &session.user_id).await?))
}
