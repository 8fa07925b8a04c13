//! Workout programs and their exercises.

use axum::extract::{Path, Query, State};
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::auth::RequireManager;
use super::error::{ApiError, ValidationErrorBuilder};
use super::form::{FormSchema, Payload, RowSpec};
use super::response::{created, message, ok, ApiResult, CreatedResult, IdQuery, Listing, RecordId};
use super::validation::{validate_optional, validate_range, validate_required};
use super::{discard_image, save_image};
use crate::db::{
    begin_write, now_rfc3339, CreateProgramRequest, Exercise, NewExercise, ProgramWithExercises,
    UpdateExerciseRequest, UpdateProgramRequest, WorkoutProgram,
};
use crate::{AppState, DbPool};

const EXERCISE_NUMERIC: &[&str] = &["sets", "reps", "rest_seconds"];

const EXERCISE_ROWS: RowSpec = RowSpec {
    collection: "exercises",
    numeric: EXERCISE_NUMERIC,
};

const PROGRAM_FORM: FormSchema = FormSchema {
    numeric: &["duration_weeks"],
    rows: &[EXERCISE_ROWS],
};

const EXERCISE_FORM: FormSchema = FormSchema::flat(EXERCISE_NUMERIC);

const LEVELS: &[&str] = &["beginner", "intermediate", "advanced"];

fn exercise_field(index: Option<usize>, attr: &str) -> String {
    match index {
        Some(i) => format!("exercises[{}][{}]", i, attr),
        None => attr.to_string(),
    }
}

fn validate_exercise(
    exercise: &NewExercise,
    index: Option<usize>,
    errors: &mut ValidationErrorBuilder,
) {
    errors.check(
        &exercise_field(index, "name"),
        validate_required(&exercise.name, "Name", 100),
    );
    errors.check(
        &exercise_field(index, "sets"),
        validate_range(exercise.sets, "Sets", 1, 100),
    );
    errors.check(
        &exercise_field(index, "reps"),
        validate_range(exercise.reps, "Reps", 1, 1000),
    );
    if let Some(rest) = exercise.rest_seconds {
        errors.check(
            &exercise_field(index, "rest_seconds"),
            validate_range(rest, "Rest", 0, 3600),
        );
    }
}

/// Errors name the index the row was submitted under, or its array position
fn validate_exercises(exercises: &[NewExercise], errors: &mut ValidationErrorBuilder) {
    for (position, exercise) in exercises.iter().enumerate() {
        validate_exercise(exercise, Some(exercise.index.unwrap_or(position)), errors);
    }
}

fn validate_level(level: &str, errors: &mut ValidationErrorBuilder) {
    if !LEVELS.contains(&level.trim().to_lowercase().as_str()) {
        errors.add("level", format!("Level must be one of: {}", LEVELS.join(", ")));
    }
}

async fn insert_exercises(
    conn: &mut SqliteConnection,
    program_id: &str,
    exercises: &[NewExercise],
    first_position: i64,
) -> Result<(), sqlx::Error> {
    let now = now_rfc3339();
    for (offset, exercise) in exercises.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO exercises (id, program_id, position, name, sets, reps, rest_seconds, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(program_id)
        .bind(first_position + offset as i64)
        .bind(exercise.name.trim())
        .bind(exercise.sets)
        .bind(exercise.reps)
        .bind(exercise.rest_seconds)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn fetch_program(db: &DbPool, id: &str) -> Result<WorkoutProgram, ApiError> {
    sqlx::query_as::<_, WorkoutProgram>("SELECT * FROM workout_programs WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Workout program not found"))
}

async fn fetch_exercises(db: &DbPool, program_id: &str) -> Result<Vec<Exercise>, ApiError> {
    Ok(sqlx::query_as::<_, Exercise>(
        "SELECT * FROM exercises WHERE program_id = ? ORDER BY position",
    )
    .bind(program_id)
    .fetch_all(db)
    .await?)
}

async fn fetch_program_with_exercises(
    db: &DbPool,
    id: &str,
) -> Result<ProgramWithExercises, ApiError> {
    let program = fetch_program(db, id).await?;
    let exercises = fetch_exercises(db, id).await?;
    Ok(ProgramWithExercises { program, exercises })
}

pub(crate) async fn fetch_all_programs(db: &DbPool) -> Result<Vec<ProgramWithExercises>, ApiError> {
    let programs = sqlx::query_as::<_, WorkoutProgram>("SELECT * FROM workout_programs ORDER BY name")
        .fetch_all(db)
        .await?;
    let exercises =
        sqlx::query_as::<_, Exercise>("SELECT * FROM exercises ORDER BY program_id, position")
            .fetch_all(db)
            .await?;

    let mut by_program: HashMap<String, Vec<Exercise>> = HashMap::new();
    for exercise in exercises {
        by_program
            .entry(exercise.program_id.clone())
            .or_default()
            .push(exercise);
    }

    Ok(programs
        .into_iter()
        .map(|program| {
            let exercises = by_program.remove(&program.id).unwrap_or_default();
            ProgramWithExercises { program, exercises }
        })
        .collect())
}

pub async fn list_programs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IdQuery>,
) -> ApiResult<Listing<ProgramWithExercises>> {
    if let Some(id) = query.id {
        return Ok(ok(Listing::One(
            fetch_program_with_exercises(&state.db, &id).await?,
        )));
    }
    Ok(ok(Listing::Many(fetch_all_programs(&state.db).await?)))
}

pub async fn get_program(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<ProgramWithExercises> {
    Ok(ok(fetch_program_with_exercises(&state.db, &id).await?))
}

pub async fn create_program(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    payload: Payload,
) -> CreatedResult<ProgramWithExercises> {
    let (req, image): (CreateProgramRequest, _) = payload.into_parts(&PROGRAM_FORM)?;

    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_required(&req.name, "Name", 100));
    errors.check("goal", validate_required(&req.goal, "Goal", 100));
    errors.check("description", validate_optional(&req.description, "Description", 2000));
    errors.check(
        "duration_weeks",
        validate_range(req.duration_weeks, "Duration", 1, 104),
    );
    validate_level(&req.level, &mut errors);
    validate_exercises(&req.exercises, &mut errors);
    errors.finish()?;

    let image = save_image(&state, image).await?;
    let id = Uuid::new_v4().to_string();

    let result: Result<(), sqlx::Error> = async {
        let now = now_rfc3339();
        let mut tx = begin_write(&state.db).await?;

        sqlx::query(
            r#"
            INSERT INTO workout_programs (id, name, goal, level, duration_weeks, description, image, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(req.name.trim())
        .bind(req.goal.trim())
        .bind(req.level.trim().to_lowercase())
        .bind(req.duration_weeks)
        .bind(&req.description)
        .bind(&image)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        insert_exercises(&mut tx, &id, &req.exercises, 0).await?;
        tx.commit().await
    }
    .await;

    if let Err(e) = result {
        discard_image(&state, image.as_deref()).await;
        return Err(e.into());
    }

    tracing::info!(
        program_id = %id,
        exercises = req.exercises.len(),
        "Created workout program"
    );
    Ok(created(fetch_program_with_exercises(&state.db, &id).await?))
}

/// Update a program. A submitted exercise list replaces the existing one.
pub async fn update_program(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    RecordId(id): RecordId,
    payload: Payload,
) -> ApiResult<ProgramWithExercises> {
    let existing = fetch_program(&state.db, &id).await?;
    let (req, image): (UpdateProgramRequest, _) = payload.into_parts(&PROGRAM_FORM)?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref name) = req.name {
        errors.check("name", validate_required(name, "Name", 100));
    }
    if let Some(ref goal) = req.goal {
        errors.check("goal", validate_required(goal, "Goal", 100));
    }
    if let Some(ref level) = req.level {
        validate_level(level, &mut errors);
    }
    if let Some(weeks) = req.duration_weeks {
        errors.check("duration_weeks", validate_range(weeks, "Duration", 1, 104));
    }
    errors.check("description", validate_optional(&req.description, "Description", 2000));
    if let Some(ref exercises) = req.exercises {
        validate_exercises(exercises, &mut errors);
    }
    errors.finish()?;

    let image = save_image(&state, image).await?;

    let result: Result<(), sqlx::Error> = async {
        let mut tx = begin_write(&state.db).await?;

        sqlx::query(
            r#"
            UPDATE workout_programs SET
                name = COALESCE(?, name),
                goal = COALESCE(?, goal),
                level = COALESCE(?, level),
                duration_weeks = COALESCE(?, duration_weeks),
                description = COALESCE(?, description),
                image = COALESCE(?, image),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(req.name.as_deref().map(str::trim))
        .bind(req.goal.as_deref().map(str::trim))
        .bind(req.level.as_deref().map(|l| l.trim().to_lowercase()))
        .bind(req.duration_weeks)
        .bind(&req.description)
        .bind(&image)
        .bind(now_rfc3339())
        .bind(&id)
        .execute(&mut *tx)
        .await?;

        if let Some(ref exercises) = req.exercises {
            sqlx::query("DELETE FROM exercises WHERE program_id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            insert_exercises(&mut tx, &id, exercises, 0).await?;
        }

        tx.commit().await
    }
    .await;

    if let Err(e) = result {
        discard_image(&state, image.as_deref()).await;
        return Err(e.into());
    }
    if image.is_some() {
        discard_image(&state, existing.image.as_deref()).await;
    }

    Ok(ok(fetch_program_with_exercises(&state.db, &id).await?))
}

pub async fn delete_program(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    RecordId(id): RecordId,
) -> ApiResult<()> {
    let existing = fetch_program(&state.db, &id).await?;

    sqlx::query("DELETE FROM workout_programs WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    discard_image(&state, existing.image.as_deref()).await;

    tracing::info!(program_id = %id, "Deleted workout program");
    Ok(message("Workout program deleted"))
}

// -------------------------------------------------------------------------
// Exercises
// -------------------------------------------------------------------------

async fn fetch_exercise(db: &DbPool, id: &str) -> Result<Exercise, ApiError> {
    sqlx::query_as::<_, Exercise>("SELECT * FROM exercises WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Exercise not found"))
}

pub async fn list_exercises(
    State(state): State<Arc<AppState>>,
    Path(program_id): Path<String>,
) -> ApiResult<Vec<Exercise>> {
    fetch_program(&state.db, &program_id).await?;
    Ok(ok(fetch_exercises(&state.db, &program_id).await?))
}

/// Append one exercise to the end of a program
pub async fn add_exercise(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    Path(program_id): Path<String>,
    payload: Payload,
) -> CreatedResult<Exercise> {
    fetch_program(&state.db, &program_id).await?;
    let (exercise, _): (NewExercise, _) = payload.into_parts(&EXERCISE_FORM)?;

    let mut errors = ValidationErrorBuilder::new();
    validate_exercise(&exercise, None, &mut errors);
    errors.finish()?;

    let mut tx = begin_write(&state.db).await?;
    let (next,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM exercises WHERE program_id = ?",
    )
    .bind(&program_id)
    .fetch_one(&mut *tx)
    .await?;
    insert_exercises(&mut tx, &program_id, std::slice::from_ref(&exercise), next).await?;
    tx.commit().await?;

    let added = sqlx::query_as::<_, Exercise>(
        "SELECT * FROM exercises WHERE program_id = ? AND position = ?",
    )
    .bind(&program_id)
    .bind(next)
    .fetch_one(&state.db)
    .await?;

    Ok(created(added))
}

pub async fn update_exercise(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    Path(id): Path<String>,
    payload: Payload,
) -> ApiResult<Exercise> {
    let existing = fetch_exercise(&state.db, &id).await?;
    let (req, _): (UpdateExerciseRequest, _) = payload.into_parts(&EXERCISE_FORM)?;

    let merged = NewExercise {
        index: None,
        name: req.name.unwrap_or(existing.name),
        sets: req.sets.unwrap_or(existing.sets),
        reps: req.reps.unwrap_or(existing.reps),
        rest_seconds: req.rest_seconds.or(existing.rest_seconds),
    };

    let mut errors = ValidationErrorBuilder::new();
    validate_exercise(&merged, None, &mut errors);
    errors.finish()?;

    sqlx::query("UPDATE exercises SET name = ?, sets = ?, reps = ?, rest_seconds = ? WHERE id = ?")
        .bind(merged.name.trim())
        .bind(merged.sets)
        .bind(merged.reps)
        .bind(merged.rest_seconds)
        .bind(&id)
        .execute(&state.db)
        .await?;

    Ok(ok(fetch_exercise(&state.db, &id).await?))
}

pub async fn delete_exercise(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let result = sqlx::query("DELETE FROM exercises WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Exercise not found"));
    }

    Ok(message("Exercise deleted"))
}
