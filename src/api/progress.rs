use axum::extract::{Path, Query, State};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::auth::ensure_owner_or_manager;
use super::error::{ApiError, ValidationErrorBuilder};
use super::form::{FormSchema, Payload};
use super::response::{created, message, ok, ApiResult, CreatedResult, Listing, RecordId};
use super::validation::{validate_date, validate_optional};
use crate::auth::Session;
use crate::db::{
    now_rfc3339, today, CreateProgressRequest, ProgressEntry, UpdateProgressRequest,
};
use crate::{AppState, DbPool};

const PROGRESS_FORM: FormSchema = FormSchema::flat(&["weight_kg", "body_fat_pct"]);

#[derive(Debug, Default, Deserialize)]
pub struct ProgressQuery {
    pub id: Option<String>,
    /// Managers only
    pub user_id: Option<String>,
}

fn validate_weight(weight: f64) -> Result<(), String> {
    if !weight.is_finite() || weight <= 0.0 || weight > 700.0 {
        return Err("Weight must be between 0 and 700 kg".to_string());
    }
    Ok(())
}

fn validate_body_fat(pct: Option<f64>) -> Result<(), String> {
    match pct {
        Some(p) if !p.is_finite() || !(0.0..=100.0).contains(&p) => {
            Err("Body fat must be a percentage between 0 and 100".to_string())
        }
        _ => Ok(()),
    }
}

async fn fetch_entry(db: &DbPool, id: &str) -> Result<ProgressEntry, ApiError> {
    sqlx::query_as::<_, ProgressEntry>("SELECT * FROM progress_entries WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Progress entry not found"))
}

async fn fetch_visible(db: &DbPool, session: &Session, id: &str) -> Result<ProgressEntry, ApiError> {
    let entry = fetch_entry(db, id).await?;
    if ensure_owner_or_manager(session, &entry.user_id).is_err() {
        return Err(ApiError::not_found("Progress entry not found"));
    }
    Ok(entry)
}

/// Entries oldest first, so a page can chart them directly
pub async fn list_progress(
    State(state): State<Arc<AppState>>,
    session: Session,
    Query(query): Query<ProgressQuery>,
) -> ApiResult<Listing<ProgressEntry>> {
    if let Some(id) = query.id {
        return Ok(ok(Listing::One(fetch_visible(&state.db, &session, &id).await?)));
    }

    let user_filter = if session.is_manager() {
        query.user_id
    } else {
        Some(session.user_id.clone())
    };

    let entries = sqlx::query_as::<_, ProgressEntry>(
        r#"
        SELECT * FROM progress_entries
        WHERE (?1 IS NULL OR user_id = ?1)
        ORDER BY recorded_on, created_at
        "#,
    )
    .bind(&user_filter)
    .fetch_all(&state.db)
    .await?;

    Ok(ok(Listing::Many(entries)))
}

pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<String>,
) -> ApiResult<ProgressEntry> {
    Ok(ok(fetch_visible(&state.db, &session, &id).await?))
}

/// Record a measurement for the caller
pub async fn create_progress(
    State(state): State<Arc<AppState>>,
    session: Session,
    payload: Payload,
) -> CreatedResult<ProgressEntry> {
    let (req, _): (CreateProgressRequest, _) = payload.into_parts(&PROGRESS_FORM)?;
    let recorded_on = req.recorded_on.unwrap_or_else(|| today().to_string());

    let mut errors = ValidationErrorBuilder::new();
    errors.check("recorded_on", validate_date(&recorded_on));
    errors.check("weight_kg", validate_weight(req.weight_kg));
    errors.check("body_fat_pct", validate_body_fat(req.body_fat_pct));
    errors.check("notes", validate_optional(&req.notes, "Notes", 2000));
    errors.finish()?;

    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO progress_entries (id, user_id, recorded_on, weight_kg, body_fat_pct, notes, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&session.user_id)
    .bind(&recorded_on)
    .bind(req.weight_kg)
    .bind(req.body_fat_pct)
    .bind(&req.notes)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    tracing::debug!(entry_id = %id, user_id = %session.user_id, "Recorded progress");
    Ok(created(fetch_entry(&state.db, &id).await?))
}

/// Only the owner edits their own entries
pub async fn update_progress(
    State(state): State<Arc<AppState>>,
    session: Session,
    RecordId(id): RecordId,
    payload: Payload,
) -> ApiResult<ProgressEntry> {
    let entry = fetch_visible(&state.db, &session, &id).await?;
    if entry.user_id != session.user_id {
        return Err(ApiError::forbidden("Only the owner can edit a progress entry"));
    }
    let (req, _): (UpdateProgressRequest, _) = payload.into_parts(&PROGRESS_FORM)?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref date) = req.recorded_on {
        errors.check("recorded_on", validate_date(date));
    }
    if let Some(weight) = req.weight_kg {
        errors.check("weight_kg", validate_weight(weight));
    }
    errors.check("body_fat_pct", validate_body_fat(req.body_fat_pct));
    errors.check("notes", validate_optional(&req.notes, "Notes", 2000));
    errors.finish()?;

    sqlx::query(
        r#"
        UPDATE progress_entries SET
            recorded_on = COALESCE(?, recorded_on),
            weight_kg = COALESCE(?, weight_kg),
            body_fat_pct = COALESCE(?, body_fat_pct),
            notes = COALESCE(?, notes),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&req.recorded_on)
    .bind(req.weight_kg)
    .bind(req.body_fat_pct)
    .bind(&req.notes)
    .bind(now_rfc3339())
    .bind(&id)
    .execute(&state.db)
    .await?;

    Ok(ok(fetch_entry(&state.db, &id).await?))
}

pub async fn delete_progress(
    State(state): State<Arc<AppState>>,
    session: Session,
    RecordId(id): RecordId,
) -> ApiResult<()> {
    fetch_visible(&state.db, &session, &id).await?;

    sqlx::query("DELETE FROM progress_entries WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    Ok(message("Progress entry deleted"))
}
