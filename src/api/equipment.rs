use axum::extract::{Path, Query, State};
use std::sync::Arc;
use uuid::Uuid;

use super::auth::RequireManager;
use super::error::{ApiError, ValidationErrorBuilder};
use super::form::{FormSchema, Payload};
use super::response::{created, message, ok, ApiResult, CreatedResult, IdQuery, Listing, RecordId};
use super::validation::{validate_optional, validate_range, validate_required};
use super::{discard_image, save_image};
use crate::db::{
    now_rfc3339, CreateEquipmentRequest, Equipment, EquipmentCondition, UpdateEquipmentRequest,
};
use crate::{AppState, DbPool};

const EQUIPMENT_FORM: FormSchema = FormSchema::flat(&["quantity"]);

async fn fetch_equipment(db: &DbPool, id: &str) -> Result<Equipment, ApiError> {
    sqlx::query_as::<_, Equipment>("SELECT * FROM equipment WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Equipment not found"))
}

/// Parse a condition into its stored form
fn parse_condition(raw: &str, errors: &mut ValidationErrorBuilder) -> Option<String> {
    match raw.parse::<EquipmentCondition>() {
        Ok(condition) => Some(condition.to_string()),
        Err(e) => {
            errors.add("condition", e);
            None
        }
    }
}

pub async fn list_equipment(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IdQuery>,
) -> ApiResult<Listing<Equipment>> {
    if let Some(id) = query.id {
        return Ok(ok(Listing::One(fetch_equipment(&state.db, &id).await?)));
    }

    let items = sqlx::query_as::<_, Equipment>("SELECT * FROM equipment ORDER BY name")
        .fetch_all(&state.db)
        .await?;

    Ok(ok(Listing::Many(items)))
}

pub async fn get_equipment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Equipment> {
    Ok(ok(fetch_equipment(&state.db, &id).await?))
}

pub async fn create_equipment(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    payload: Payload,
) -> CreatedResult<Equipment> {
    let (req, image): (CreateEquipmentRequest, _) = payload.into_parts(&EQUIPMENT_FORM)?;

    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_required(&req.name, "Name", 100));
    errors.check("description", validate_optional(&req.description, "Description", 2000));
    errors.check("quantity", validate_range(req.quantity, "Quantity", 0, 10_000));
    let condition = parse_condition(&req.condition, &mut errors);
    errors.finish()?;

    let image = save_image(&state, image).await?;
    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();

    let inserted = sqlx::query(
        r#"
        INSERT INTO equipment (id, name, description, quantity, condition, image, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(req.name.trim())
    .bind(&req.description)
    .bind(req.quantity)
    .bind(&condition)
    .bind(&image)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await;

    if let Err(e) = inserted {
        discard_image(&state, image.as_deref()).await;
        return Err(e.into());
    }

    tracing::info!(equipment_id = %id, "Added equipment {}", req.name.trim());
    Ok(created(fetch_equipment(&state.db, &id).await?))
}

pub async fn update_equipment(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    RecordId(id): RecordId,
    payload: Payload,
) -> ApiResult<Equipment> {
    let existing = fetch_equipment(&state.db, &id).await?;
    let (req, image): (UpdateEquipmentRequest, _) = payload.into_parts(&EQUIPMENT_FORM)?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref name) = req.name {
        errors.check("name", validate_required(name, "Name", 100));
    }
    errors.check("description", validate_optional(&req.description, "Description", 2000));
    if let Some(quantity) = req.quantity {
        errors.check("quantity", validate_range(quantity, "Quantity", 0, 10_000));
    }
    let condition = req
        .condition
        .as_deref()
        .and_then(|raw| parse_condition(raw, &mut errors));
    errors.finish()?;

    let image = save_image(&state, image).await?;

    let updated = sqlx::query(
        r#"
        UPDATE equipment SET
            name = COALESCE(?, name),
            description = COALESCE(?, description),
            quantity = COALESCE(?, quantity),
            condition = COALESCE(?, condition),
            image = COALESCE(?, image),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(req.name.as_deref().map(str::trim))
    .bind(&req.description)
    .bind(req.quantity)
    .bind(&condition)
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

    Ok(ok(fetch_equipment(&state.db, &id).await?))
}

pub async fn delete_equipment(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    RecordId(id): RecordId,
) -> ApiResult<()> {
    let existing = fetch_equipment(&state.db, &id).await?;

    sqlx::query("DELETE FROM equipment WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    discard_image(&state, existing.image.as_deref()).await;

    Ok(message("Equipment deleted"))
}
