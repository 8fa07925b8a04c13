//! Memberships.
//!
//! A user holds at most one `active` membership; a partial unique index
//! enforces it, so a concurrent double subscribe still ends in a conflict.
//! Memberships past their end date are flipped to `expired` before reads.

use axum::extract::{Path, Query, State};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::auth::{ensure_owner_or_manager, RequireManager};
use super::error::{ApiError, ValidationErrorBuilder};
use super::form::{FormSchema, Payload};
use super::response::{created, message, ok, ApiResult, CreatedResult, Listing, RecordId};
use crate::auth::Session;
use crate::db::{
    now_rfc3339, today, CreateMembershipRequest, Membership, MembershipPlan, MembershipStatus,
    UpdateMembershipRequest,
};
use crate::{AppState, DbPool};

const MEMBERSHIP_FORM: FormSchema = FormSchema::flat(&[]);

#[derive(Debug, Default, Deserialize)]
pub struct MembershipQuery {
    pub id: Option<String>,
    /// Managers only
    pub user_id: Option<String>,
}

/// Mark active memberships whose end date has passed as expired
pub(crate) async fn expire_lapsed(db: &DbPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE memberships SET status = 'expired', updated_at = ? WHERE status = 'active' AND end_date < ?",
    )
    .bind(now_rfc3339())
    .bind(today().to_string())
    .execute(db)
    .await?;

    if result.rows_affected() > 0 {
        tracing::info!(count = result.rows_affected(), "Expired lapsed memberships");
    }
    Ok(result.rows_affected())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.message().contains("UNIQUE constraint failed"))
}

fn already_active() -> ApiError {
    ApiError::conflict("User already has an active membership")
}

async fn fetch_membership(db: &DbPool, id: &str) -> Result<Membership, ApiError> {
    sqlx::query_as::<_, Membership>("SELECT * FROM memberships WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Membership not found"))
}

/// Fetch a membership the caller may see. Others' records read as missing.
async fn fetch_visible(db: &DbPool, session: &Session, id: &str) -> Result<Membership, ApiError> {
    let membership = fetch_membership(db, id).await?;
    if ensure_owner_or_manager(session, &membership.user_id).is_err() {
        return Err(ApiError::not_found("Membership not found"));
    }
    Ok(membership)
}

/// Managers see every membership (optionally one user's); customers their own
pub async fn list_memberships(
    State(state): State<Arc<AppState>>,
    session: Session,
    Query(query): Query<MembershipQuery>,
) -> ApiResult<Listing<Membership>> {
    expire_lapsed(&state.db).await?;

    if let Some(id) = query.id {
        return Ok(ok(Listing::One(fetch_visible(&state.db, &session, &id).await?)));
    }

    let user_filter = if session.is_manager() {
        query.user_id
    } else {
        Some(session.user_id.clone())
    };

    let memberships = sqlx::query_as::<_, Membership>(
        "SELECT * FROM memberships WHERE (?1 IS NULL OR user_id = ?1) ORDER BY created_at DESC",
    )
    .bind(&user_filter)
    .fetch_all(&state.db)
    .await?;

    Ok(ok(Listing::Many(memberships)))
}

pub async fn get_membership(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<String>,
) -> ApiResult<Membership> {
    expire_lapsed(&state.db).await?;
    Ok(ok(fetch_visible(&state.db, &session, &id).await?))
}

/// Subscribe. Customers subscribe themselves; a manager names the user.
pub async fn create_membership(
    State(state): State<Arc<AppState>>,
    session: Session,
    payload: Payload,
) -> CreatedResult<Membership> {
    let (req, _): (CreateMembershipRequest, _) = payload.into_parts(&MEMBERSHIP_FORM)?;

    let mut errors = ValidationErrorBuilder::new();
    let plan = match req.plan.parse::<MembershipPlan>() {
        Ok(plan) => Some(plan),
        Err(e) => {
            errors.add("plan", e);
            None
        }
    };

    let user_id = match (session.is_manager(), req.user_id) {
        (true, Some(user_id)) => user_id,
        (true, None) => {
            errors.add("user_id", "user_id is required when a manager creates a membership");
            String::new()
        }
        (false, Some(user_id)) if user_id != session.user_id => {
            return Err(ApiError::forbidden("Customers can only subscribe themselves"));
        }
        (false, _) => session.user_id.clone(),
    };
    errors.finish()?;
    let Some(plan) = plan else {
        return Err(ApiError::validation_field("plan", "Plan is required"));
    };

    let user: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?")
        .bind(&user_id)
        .fetch_optional(&state.db)
        .await?;
    if user.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    expire_lapsed(&state.db).await?;

    let start = today();
    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO memberships (id, user_id, plan, status, start_date, end_date, price_cents, created_at, updated_at)
        VALUES (?, ?, ?, 'active', ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&user_id)
    .bind(plan.to_string())
    .bind(start.to_string())
    .bind(plan.end_date(start).to_string())
    .bind(plan.price_cents())
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await
    .map_err(|e| if is_unique_violation(&e) { already_active() } else { e.into() })?;

    tracing::info!(membership_id = %id, user_id = %user_id, plan = %plan, "Created membership");
    Ok(created(fetch_membership(&state.db, &id).await?))
}

/// Change plan or status. A plan change re-prices the membership and moves
/// its end date relative to the original start.
pub async fn update_membership(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    RecordId(id): RecordId,
    payload: Payload,
) -> ApiResult<Membership> {
    let existing = fetch_membership(&state.db, &id).await?;
    let (req, _): (UpdateMembershipRequest, _) = payload.into_parts(&MEMBERSHIP_FORM)?;

    let mut errors = ValidationErrorBuilder::new();
    let plan = match req.plan.as_deref().map(str::parse::<MembershipPlan>) {
        Some(Ok(plan)) => Some(plan),
        Some(Err(e)) => {
            errors.add("plan", e);
            None
        }
        None => None,
    };
    let status = match req.status.as_deref().map(str::parse::<MembershipStatus>) {
        Some(Ok(status)) => Some(status),
        Some(Err(e)) => {
            errors.add("status", e);
            None
        }
        None => None,
    };
    errors.finish()?;

    let (end_date, price_cents) = match plan {
        Some(plan) => {
            let start = NaiveDate::parse_from_str(&existing.start_date, "%Y-%m-%d").map_err(|e| {
                tracing::error!(membership_id = %id, "Stored start date is malformed: {}", e);
                ApiError::internal("Membership has an invalid start date")
            })?;
            (
                Some(plan.end_date(start).to_string()),
                Some(plan.price_cents()),
            )
        }
        None => (None, None),
    };

    sqlx::query(
        r#"
        UPDATE memberships SET
            plan = COALESCE(?, plan),
            end_date = COALESCE(?, end_date),
            price_cents = COALESCE(?, price_cents),
            status = COALESCE(?, status),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(plan.map(|p| p.to_string()))
    .bind(&end_date)
    .bind(price_cents)
    .bind(status.map(|s| s.to_string()))
    .bind(now_rfc3339())
    .bind(&id)
    .execute(&state.db)
    .await
    .map_err(|e| if is_unique_violation(&e) { already_active() } else { e.into() })?;

    Ok(ok(fetch_membership(&state.db, &id).await?))
}

pub async fn delete_membership(
    State(state): State<Arc<AppState>>,
    session: Session,
    RecordId(id): RecordId,
) -> ApiResult<()> {
    let membership = fetch_visible(&state.db, &session, &id).await?;

    sqlx::query("DELETE FROM memberships WHERE id = ?")
        .bind(&membership.id)
        .execute(&state.db)
        .await?;

    tracing::info!(membership_id = %id, user_id = %membership.user_id, "Deleted membership");
    Ok(message("Membership deleted"))
}
