use axum::extract::{Path, Query, State};
use std::sync::Arc;
use uuid::Uuid;

use super::auth::RequireManager;
use super::error::{ApiError, ValidationErrorBuilder};
use super::form::{FormSchema, Payload};
use super::response::{created, message, ok, ApiResult, CreatedResult, IdQuery, Listing, RecordId};
use super::validation::{validate_optional, validate_range, validate_required};
use super::{discard_image, save_image};
use crate::db::{now_rfc3339, CreateTrainerRequest, Trainer, UpdateTrainerRequest};
use crate::{AppState, DbPool};

const TRAINER_FORM: FormSchema = FormSchema::flat(&["experience_years"]);

pub(crate) async fn fetch_trainer(db: &DbPool, id: &str) -> Result<Trainer, ApiError> {
    sqlx::query_as::<_, Trainer>("SELECT * FROM trainers WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Trainer not found"))
}

pub async fn list_trainers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IdQuery>,
) -> ApiResult<Listing<Trainer>> {
    if let Some(id) = query.id {
        return Ok(ok(Listing::One(fetch_trainer(&state.db, &id).await?)));
    }

    let trainers = sqlx::query_as::<_, Trainer>("SELECT * FROM trainers ORDER BY name")
        .fetch_all(&state.db)
        .await?;

    Ok(ok(Listing::Many(trainers)))
}

pub async fn get_trainer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Trainer> {
    Ok(ok(fetch_trainer(&state.db, &id).await?))
}

pub async fn create_trainer(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    payload: Payload,
) -> CreatedResult<Trainer> {
    let (req, image): (CreateTrainerRequest, _) = payload.into_parts(&TRAINER_FORM)?;

    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_required(&req.name, "Name", 100));
    errors.check("specialty", validate_required(&req.specialty, "Specialty", 100));
    errors.check(
        "experience_years",
        validate_range(req.experience_years, "Experience", 0, 80),
    );
    errors.check("bio", validate_optional(&req.bio, "Bio", 2000));
    errors.finish()?;

    let image = save_image(&state, image).await?;
    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();

    let inserted = sqlx::query(
        r#"
        INSERT INTO trainers (id, name, specialty, experience_years, bio, image, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(req.name.trim())
    .bind(req.specialty.trim())
    .bind(req.experience_years)
    .bind(&req.bio)
    .bind(&image)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await;

    if let Err(e) = inserted {
        discard_image(&state, image.as_deref()).await;
        return Err(e.into());
    }

    tracing::info!(trainer_id = %id, specialty = %req.specialty.trim(), "Created trainer");
    Ok(created(fetch_trainer(&state.db, &id).await?))
}

pub async fn update_trainer(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    RecordId(id): RecordId,
    payload: Payload,
) -> ApiResult<Trainer> {
    let existing = fetch_trainer(&state.db, &id).await?;
    let (req, image): (UpdateTrainerRequest, _) = payload.into_parts(&TRAINER_FORM)?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref name) = req.name {
        errors.check("name", validate_required(name, "Name", 100));
    }
    if let Some(ref specialty) = req.specialty {
        errors.check("specialty", validate_required(specialty, "Specialty", 100));
    }
    if let Some(years) = req.experience_years {
        errors.check("experience_years", validate_range(years, "Experience", 0, 80));
    }
    errors.check("bio", validate_optional(&req.bio, "Bio", 2000));
    errors.finish()?;

    let image = save_image(&state, image).await?;

    let updated = sqlx::query(
        r#"
        UPDATE trainers SET
            name = COALESCE(?, name),
            specialty = COALESCE(?, specialty),
            experience_years = COALESCE(?, experience_years),
            bio = COALESCE(?, bio),
            image = COALESCE(?, image),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(req.name.as_deref().map(str::trim))
    .bind(req.specialty.as_deref().map(str::trim))
    .bind(req.experience_years)
    .bind(&req.bio)
    .bind(&image)
    .bind(now_rfc3339())
    .bind(&id)
    .execute(&state.db)
    .await;

    if let Err(e) = updated {
        discard_image(&state, image.as_deref()).await;
        return Err(e.into());
    }
    if image.is_some() {
        discard_image(&state, existing.image.as_deref()).await;
    }

    Ok(ok(fetch_trainer(&state.db, &id).await?))
}

/// Delete a trainer along with their assignments and bookings
pub async fn delete_trainer(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    RecordId(id): RecordId,
) -> ApiResult<()> {
    let existing = fetch_trainer(&state.db, &id).await?;

    sqlx::query("DELETE FROM trainers WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    discard_image(&state, existing.image.as_deref()).await;

    tracing::info!(trainer_id = %id, "Deleted trainer");
    Ok(message("Trainer deleted"))
}
