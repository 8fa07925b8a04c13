//! Bookings against trainer assignments.
//!
//! Seats are taken and given back with conditional `UPDATE`s on
//! `assignments.booked_count` inside the same transaction that writes the
//! booking row, so two customers racing for the last seat cannot both get
//! it and a failed booking never leaves the count moved.

use axum::extract::{Path, Query, State};
use serde::Deserialize;
use sqlx::SqliteConnection;
use std::sync::Arc;
use uuid::Uuid;

use super::auth::ensure_owner_or_manager;
use super::error::ApiError;
use super::form::{FormSchema, Payload};
use super::response::{created, message, ok, ApiResult, CreatedResult, Listing, RecordId};
use super::validation::require_uuid;
use crate::auth::Session;
use crate::db::{begin_write, now_rfc3339, Booking, BookingStatus, CreateBookingRequest, UpdateBookingRequest};
use crate::{AppState, DbPool};

const BOOKING_FORM: FormSchema = FormSchema::flat(&[]);

#[derive(Debug, Default, Deserialize)]
pub struct BookingQuery {
    pub id: Option<String>,
    pub assignment_id: Option<String>,
    /// Managers only
    pub user_id: Option<String>,
}

/// Take one seat on an assignment, or fail with `capacity_exceeded`
pub(crate) async fn reserve_seat(
    conn: &mut SqliteConnection,
    assignment_id: &str,
) -> Result<(), ApiError> {
    let result = sqlx::query(
        r#"
        UPDATE assignments SET booked_count = booked_count + 1, updated_at = ?
        WHERE id = ? AND booked_count < max_capacity
        "#,
    )
    .bind(now_rfc3339())
    .bind(assignment_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let exists: Option<(i64,)> = sqlx::query_as("SELECT max_capacity FROM assignments WHERE id = ?")
        .bind(assignment_id)
        .fetch_optional(&mut *conn)
        .await?;

    match exists {
        Some((capacity,)) => {
            tracing::info!(assignment_id = %assignment_id, capacity, "Booking refused, assignment is full");
            Err(ApiError::capacity_exceeded(format!(
                "This session is full (capacity {})",
                capacity
            )))
        }
        None => Err(ApiError::not_found("Assignment not found")),
    }
}

/// Give one seat back
pub(crate) async fn release_seat(
    conn: &mut SqliteConnection,
    assignment_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE assignments SET booked_count = booked_count - 1, updated_at = ?
        WHERE id = ? AND booked_count > 0
        "#,
    )
    .bind(now_rfc3339())
    .bind(assignment_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.message().contains("UNIQUE constraint failed"))
}

fn already_booked() -> ApiError {
    ApiError::conflict("You already have a confirmed booking for this session")
}

async fn fetch_booking(db: &DbPool, id: &str) -> Result<Booking, ApiError> {
    sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Booking not found"))
}

async fn fetch_visible(db: &DbPool, session: &Session, id: &str) -> Result<Booking, ApiError> {
    let booking = fetch_booking(db, id).await?;
    if ensure_owner_or_manager(session, &booking.user_id).is_err() {
        return Err(ApiError::not_found("Booking not found"));
    }
    Ok(booking)
}

pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    session: Session,
    Query(query): Query<BookingQuery>,
) -> ApiResult<Listing<Booking>> {
    if let Some(id) = query.id {
        return Ok(ok(Listing::One(fetch_visible(&state.db, &session, &id).await?)));
    }

    let user_filter = if session.is_manager() {
        query.user_id
    } else {
        Some(session.user_id.clone())
    };

    let bookings = sqlx::query_as::<_, Booking>(
        r#"
        SELECT * FROM bookings
        WHERE (?1 IS NULL OR user_id = ?1)
          AND (?2 IS NULL OR assignment_id = ?2)
        ORDER BY created_at DESC
        "#,
    )
    .bind(&user_filter)
    .bind(&query.assignment_id)
    .fetch_all(&state.db)
    .await?;

    Ok(ok(Listing::Many(bookings)))
}

pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<String>,
) -> ApiResult<Booking> {
    Ok(ok(fetch_visible(&state.db, &session, &id).await?))
}

/// Book a seat on an assignment for the caller
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    session: Session,
    payload: Payload,
) -> CreatedResult<Booking> {
    if session.is_manager() {
        return Err(ApiError::forbidden("Only customers can book sessions"));
    }
    let (req, _): (CreateBookingRequest, _) = payload.into_parts(&BOOKING_FORM)?;
    require_uuid(&req.assignment_id, "assignment_id")?;

    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    let mut tx = begin_write(&state.db).await?;

    let duplicate: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM bookings WHERE user_id = ? AND assignment_id = ? AND status = 'confirmed'",
    )
    .bind(&session.user_id)
    .bind(&req.assignment_id)
    .fetch_optional(&mut *tx)
    .await?;
    if duplicate.is_some() {
        return Err(already_booked());
    }

    reserve_seat(&mut tx, &req.assignment_id).await?;

    sqlx::query(
        r#"
        INSERT INTO bookings (id, user_id, assignment_id, status, created_at, updated_at)
        VALUES (?, ?, ?, 'confirmed', ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&session.user_id)
    .bind(&req.assignment_id)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await
    .map_err(|e| if is_unique_violation(&e) { already_booked() } else { e.into() })?;

    tx.commit().await?;

    tracing::info!(
        booking_id = %id,
        user_id = %session.user_id,
        assignment_id = %req.assignment_id,
        "Booked session"
    );
    Ok(created(fetch_booking(&state.db, &id).await?))
}

/// Cancel or re-confirm a booking, moving the seat count with it
pub async fn update_booking(
    State(state): State<Arc<AppState>>,
    session: Session,
    RecordId(id): RecordId,
    payload: Payload,
) -> ApiResult<Booking> {
    let booking = fetch_visible(&state.db, &session, &id).await?;
    let (req, _): (UpdateBookingRequest, _) = payload.into_parts(&BOOKING_FORM)?;
    let status: BookingStatus = req
        .status
        .parse()
        .map_err(|e: String| ApiError::validation_field("status", e))?;

    let mut tx = begin_write(&state.db).await?;

    let moved = sqlx::query("UPDATE bookings SET status = ?, updated_at = ? WHERE id = ? AND status != ?")
        .bind(status.to_string())
        .bind(now_rfc3339())
        .bind(&id)
        .bind(status.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| if is_unique_violation(&e) { already_booked() } else { e.into() })?;

    if moved.rows_affected() == 1 {
        match status {
            BookingStatus::Confirmed => reserve_seat(&mut tx, &booking.assignment_id).await?,
            BookingStatus::Cancelled => release_seat(&mut tx, &booking.assignment_id).await?,
        }
    }

    tx.commit().await?;

    tracing::info!(booking_id = %id, status = %status, "Updated booking");
    Ok(ok(fetch_booking(&state.db, &id).await?))
}

/// Delete a booking; a confirmed one gives its seat back
pub async fn delete_booking(
    State(state): State<Arc<AppState>>,
    session: Session,
    RecordId(id): RecordId,
) -> ApiResult<()> {
    fetch_visible(&state.db, &session, &id).await?;

    let mut tx = begin_write(&state.db).await?;

    let removed: Option<(String, String)> =
        sqlx::query_as("DELETE FROM bookings WHERE id = ? RETURNING assignment_id, status")
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await?;

    let Some((assignment_id, status)) = removed else {
        return Err(ApiError::not_found("Booking not found"));
    };
    if status == BookingStatus::Confirmed.to_string() {
        release_seat(&mut tx, &assignment_id).await?;
    }

    tx.commit().await?;

    tracing::info!(booking_id = %id, "Deleted booking");
    Ok(message("Booking deleted"))
}
