use axum::extract::{Path, Query, State};
use std::sync::Arc;
use uuid::Uuid;

use super::auth::RequireManager;
use super::error::{ApiError, ValidationErrorBuilder};
use super::form::{FormSchema, Payload};
use super::response::{created, message, ok, ApiResult, CreatedResult, IdQuery, Listing, RecordId};
use super::validation::validate_required;
use super::{discard_image, save_image};
use crate::db::{now_rfc3339, CreateServiceRequest, Service, UpdateServiceRequest};
use crate::{AppState, DbPool};

const SERVICE_FORM: FormSchema = FormSchema::flat(&[]);

async fn fetch_service(db: &DbPool, id: &str) -> Result<Service, ApiError> {
    sqlx::query_as::<_, Service>("SELECT * FROM services WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Service not found"))
}

/// List all services, or one with `?id=`
pub async fn list_services(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IdQuery>,
) -> ApiResult<Listing<Service>> {
    if let Some(id) = query.id {
        return Ok(ok(Listing::One(fetch_service(&state.db, &id).await?)));
    }

    let services = sqlx::query_as::<_, Service>("SELECT * FROM services ORDER BY name")
        .fetch_all(&state.db)
        .await?;

    Ok(ok(Listing::Many(services)))
}

pub async fn get_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Service> {
    Ok(ok(fetch_service(&state.db, &id).await?))
}

pub async fn create_service(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    payload: Payload,
) -> CreatedResult<Service> {
    let (req, image): (CreateServiceRequest, _) = payload.into_parts(&SERVICE_FORM)?;

    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_required(&req.name, "Name", 100));
    errors.check("description", validate_required(&req.description, "Description", 2000));
    errors.finish()?;

    let image = save_image(&state, image).await?;
    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();

    let inserted = sqlx::query(
        r#"
        INSERT INTO services (id, name, description, image, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(req.name.trim())
    .bind(req.description.trim())
    .bind(&image)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await;

    if let Err(e) = inserted {
        discard_image(&state, image.as_deref()).await;
        return Err(e.into());
    }

    tracing::info!(service_id = %id, "Created service {}", req.name.trim());
    Ok(created(fetch_service(&state.db, &id).await?))
}

/// Update a service. A new image replaces (and removes) the old one.
pub async fn update_service(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    RecordId(id): RecordId,
    payload: Payload,
) -> ApiResult<Service> {
    let existing = fetch_service(&state.db, &id).await?;
    let (req, image): (UpdateServiceRequest, _) = payload.into_parts(&SERVICE_FORM)?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref name) = req.name {
        errors.check("name", validate_required(name, "Name", 100));
    }
    if let Some(ref description) = req.description {
        errors.check("description", validate_required(description, "Description", 2000));
    }
    errors.finish()?;

    let image = save_image(&state, image).await?;

    let updated = sqlx::query(
        r#"
        UPDATE services SET
            name = COALESCE(?, name),
            description = COALESCE(?, description),
            image = COALESCE(?, image),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(req.name.as_deref().map(str::trim))
    .bind(req.description.as_deref().map(str::trim))
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

    Ok(ok(fetch_service(&state.db, &id).await?))
}

/// Delete a service along with its assignments and their bookings
pub async fn delete_service(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    RecordId(id): RecordId,
) -> ApiResult<()> {
    let existing = fetch_service(&state.db, &id).await?;

    sqlx::query("DELETE FROM services WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    discard_image(&state, existing.image.as_deref()).await;

    tracing::info!(service_id = %id, "Deleted service");
    Ok(message("Service deleted"))
}
