//! Trainer-to-service assignments.
//!
//! An assignment is the bookable unit: a trainer running a service on a
//! schedule for at most `max_capacity` customers. `booked_count` is only ever
//! moved by the booking handlers.

use axum::extract::{Path, Query, State};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::auth::RequireManager;
use super::error::{ApiError, ValidationErrorBuilder};
use super::form::{FormSchema, Payload};
use super::response::{created, message, ok, ApiResult, CreatedResult, Listing, RecordId};
use super::validation::{validate_range, validate_required};
use crate::db::{now_rfc3339, Assignment, CreateAssignmentRequest, UpdateAssignmentRequest};
use crate::{AppState, DbPool};

const ASSIGNMENT_FORM: FormSchema = FormSchema::flat(&["max_capacity"]);

const MAX_CAPACITY: i64 = 500;

#[derive(Debug, Default, Deserialize)]
pub struct AssignmentQuery {
    pub id: Option<String>,
    pub service_id: Option<String>,
    pub trainer_id: Option<String>,
}

pub(crate) async fn fetch_assignment(db: &DbPool, id: &str) -> Result<Assignment, ApiError> {
    sqlx::query_as::<_, Assignment>("SELECT * FROM assignments WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Assignment not found"))
}

/// List assignments, optionally narrowed to a service and/or trainer
pub async fn list_assignments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AssignmentQuery>,
) -> ApiResult<Listing<Assignment>> {
    if let Some(id) = query.id {
        return Ok(ok(Listing::One(fetch_assignment(&state.db, &id).await?)));
    }

    let assignments = sqlx::query_as::<_, Assignment>(
        r#"
        SELECT * FROM assignments
        WHERE (?1 IS NULL OR service_id = ?1)
          AND (?2 IS NULL OR trainer_id = ?2)
        ORDER BY created_at
        "#,
    )
    .bind(&query.service_id)
    .bind(&query.trainer_id)
    .fetch_all(&state.db)
    .await?;

    Ok(ok(Listing::Many(assignments)))
}

pub async fn get_assignment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Assignment> {
    Ok(ok(fetch_assignment(&state.db, &id).await?))
}

pub async fn create_assignment(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    payload: Payload,
) -> CreatedResult<Assignment> {
    let (req, _): (CreateAssignmentRequest, _) = payload.into_parts(&ASSIGNMENT_FORM)?;

    let mut errors = ValidationErrorBuilder::new();
    errors.check("schedule", validate_required(&req.schedule, "Schedule", 200));
    errors.check(
        "max_capacity",
        validate_range(req.max_capacity, "Capacity", 1, MAX_CAPACITY),
    );

    let service: Option<(String,)> = sqlx::query_as("SELECT id FROM services WHERE id = ?")
        .bind(&req.service_id)
        .fetch_optional(&state.db)
        .await?;
    if service.is_none() {
        errors.add("service_id", "Service not found");
    }
    let trainer: Option<(String,)> = sqlx::query_as("SELECT id FROM trainers WHERE id = ?")
        .bind(&req.trainer_id)
        .fetch_optional(&state.db)
        .await?;
    if trainer.is_none() {
        errors.add("trainer_id", "Trainer not found");
    }
    errors.finish()?;

    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO assignments (id, service_id, trainer_id, schedule, max_capacity, booked_count, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&req.service_id)
    .bind(&req.trainer_id)
    .bind(req.schedule.trim())
    .bind(req.max_capacity)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    tracing::info!(
        assignment_id = %id,
        service_id = %req.service_id,
        trainer_id = %req.trainer_id,
        capacity = req.max_capacity,
        "Created assignment"
    );
    Ok(created(fetch_assignment(&state.db, &id).await?))
}

/// Update schedule or capacity. Capacity may not drop below the seats
/// already booked; the comparison happens in the same statement as the write.
pub async fn update_assignment(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    RecordId(id): RecordId,
    payload: Payload,
) -> ApiResult<Assignment> {
    fetch_assignment(&state.db, &id).await?;
    let (req, _): (UpdateAssignmentRequest, _) = payload.into_parts(&ASSIGNMENT_FORM)?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref schedule) = req.schedule {
        errors.check("schedule", validate_required(schedule, "Schedule", 200));
    }
    if let Some(capacity) = req.max_capacity {
        errors.check(
            "max_capacity",
            validate_range(capacity, "Capacity", 1, MAX_CAPACITY),
        );
    }
    errors.finish()?;

    let result = sqlx::query(
        r#"
        UPDATE assignments SET
            schedule = COALESCE(?1, schedule),
            max_capacity = COALESCE(?2, max_capacity),
            updated_at = ?3
        WHERE id = ?4 AND (?2 IS NULL OR booked_count <= ?2)
        "#,
    )
    .bind(req.schedule.as_deref().map(str::trim))
    .bind(req.max_capacity)
    .bind(now_rfc3339())
    .bind(&id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        let current = fetch_assignment(&state.db, &id).await?;
        return Err(ApiError::conflict(format!(
            "Capacity cannot drop below the {} seats already booked",
            current.booked_count
        )));
    }

    Ok(ok(fetch_assignment(&state.db, &id).await?))
}

pub async fn delete_assignment(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    RecordId(id): RecordId,
) -> ApiResult<()> {
    let result = sqlx::query("DELETE FROM assignments WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Assignment not found"));
    }

    tracing::info!(assignment_id = %id, "Deleted assignment");
    Ok(message("Assignment deleted"))
}
