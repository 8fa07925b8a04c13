//! Diet plans and the meals that make them up.
//!
//! A plan is created or replaced together with its meal list, submitted as
//! a JSON array or as `meals[i][attr]` form rows. Meals keep the order they
//! were submitted in through their `position`.

use axum::extract::{Path, Query, State};
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::auth::RequireManager;
use super::error::{ApiError, ValidationErrorBuilder};
use super::form::{FormSchema, Payload, RowSpec};
use super::response::{created, message, ok, ApiResult, CreatedResult, IdQuery, Listing, RecordId};
use super::validation::{validate_non_negative, validate_optional, validate_range, validate_required};
use super::{discard_image, save_image};
use crate::db::{
    begin_write, now_rfc3339, CreateDietPlanRequest, DietPlan, DietPlanWithMeals, Meal, NewMeal,
    UpdateDietPlanRequest, UpdateMealRequest,
};
use crate::{AppState, DbPool};

const MEAL_NUMERIC: &[&str] = &["calories", "protein", "carbs", "fats"];

const MEAL_ROWS: RowSpec = RowSpec {
    collection: "meals",
    numeric: MEAL_NUMERIC,
};

const DIET_PLAN_FORM: FormSchema = FormSchema {
    numeric: &[],
    rows: &[MEAL_ROWS],
};

const MEAL_FORM: FormSchema = FormSchema::flat(MEAL_NUMERIC);

const MAX_CALORIES: i64 = 10_000;

/// Field name for a meal attribute: `meals[i][attr]` inside a plan, bare otherwise
fn meal_field(index: Option<usize>, attr: &str) -> String {
    match index {
        Some(i) => format!("meals[{}][{}]", i, attr),
        None => attr.to_string(),
    }
}

fn validate_meal(meal: &NewMeal, index: Option<usize>, errors: &mut ValidationErrorBuilder) {
    errors.check(&meal_field(index, "meal"), validate_required(&meal.meal, "Meal", 100));
    errors.check(
        &meal_field(index, "description"),
        validate_optional(&meal.description, "Description", 1000),
    );
    errors.check(
        &meal_field(index, "calories"),
        validate_range(meal.calories, "Calories", 0, MAX_CALORIES),
    );
    errors.check(&meal_field(index, "protein"), validate_non_negative(meal.protein, "Protein"));
    errors.check(&meal_field(index, "carbs"), validate_non_negative(meal.carbs, "Carbs"));
    errors.check(&meal_field(index, "fats"), validate_non_negative(meal.fats, "Fats"));
}

/// Errors name the index the row was submitted under, or its array position
fn validate_meals(meals: &[NewMeal], errors: &mut ValidationErrorBuilder) {
    for (position, meal) in meals.iter().enumerate() {
        validate_meal(meal, Some(meal.index.unwrap_or(position)), errors);
    }
}

/// Insert `meals` in order, numbering positions from `first_position`
async fn insert_meals(
    conn: &mut SqliteConnection,
    plan_id: &str,
    meals: &[NewMeal],
    first_position: i64,
) -> Result<(), sqlx::Error> {
    let now = now_rfc3339();
    for (offset, meal) in meals.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO meals (id, diet_plan_id, position, meal, description, calories, protein, carbs, fats, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(plan_id)
        .bind(first_position + offset as i64)
        .bind(meal.meal.trim())
        .bind(&meal.description)
        .bind(meal.calories)
        .bind(meal.protein)
        .bind(meal.carbs)
        .bind(meal.fats)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn fetch_plan(db: &DbPool, id: &str) -> Result<DietPlan, ApiError> {
    sqlx::query_as::<_, DietPlan>("SELECT * FROM diet_plans WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Diet plan not found"))
}

async fn fetch_meals(db: &DbPool, plan_id: &str) -> Result<Vec<Meal>, ApiError> {
    Ok(sqlx::query_as::<_, Meal>(
        "SELECT * FROM meals WHERE diet_plan_id = ? ORDER BY position",
    )
    .bind(plan_id)
    .fetch_all(db)
    .await?)
}

async fn fetch_plan_with_meals(db: &DbPool, id: &str) -> Result<DietPlanWithMeals, ApiError> {
    let plan = fetch_plan(db, id).await?;
    let meals = fetch_meals(db, id).await?;
    Ok(DietPlanWithMeals { plan, meals })
}

/// Every plan with its meals
pub(crate) async fn fetch_all_plans(db: &DbPool) -> Result<Vec<DietPlanWithMeals>, ApiError> {
    let plans = sqlx::query_as::<_, DietPlan>("SELECT * FROM diet_plans ORDER BY name")
        .fetch_all(db)
        .await?;
    let meals = sqlx::query_as::<_, Meal>("SELECT * FROM meals ORDER BY diet_plan_id, position")
        .fetch_all(db)
        .await?;

    let mut by_plan: HashMap<String, Vec<Meal>> = HashMap::new();
    for meal in meals {
        by_plan.entry(meal.diet_plan_id.clone()).or_default().push(meal);
    }

    Ok(plans
        .into_iter()
        .map(|plan| {
            let meals = by_plan.remove(&plan.id).unwrap_or_default();
            DietPlanWithMeals { plan, meals }
        })
        .collect())
}

pub async fn list_diet_plans(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IdQuery>,
) -> ApiResult<Listing<DietPlanWithMeals>> {
    if let Some(id) = query.id {
        return Ok(ok(Listing::One(fetch_plan_with_meals(&state.db, &id).await?)));
    }
    Ok(ok(Listing::Many(fetch_all_plans(&state.db).await?)))
}

pub async fn get_diet_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<DietPlanWithMeals> {
    Ok(ok(fetch_plan_with_meals(&state.db, &id).await?))
}

/// Create a plan and its meals in one transaction
pub async fn create_diet_plan(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    payload: Payload,
) -> CreatedResult<DietPlanWithMeals> {
    let (req, image): (CreateDietPlanRequest, _) = payload.into_parts(&DIET_PLAN_FORM)?;

    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_required(&req.name, "Name", 100));
    errors.check("goal", validate_required(&req.goal, "Goal", 100));
    errors.check("description", validate_optional(&req.description, "Description", 2000));
    validate_meals(&req.meals, &mut errors);
    errors.finish()?;

    let image = save_image(&state, image).await?;
    let id = Uuid::new_v4().to_string();

    let result: Result<(), sqlx::Error> = async {
        let now = now_rfc3339();
        let mut tx = begin_write(&state.db).await?;

        sqlx::query(
            r#"
            INSERT INTO diet_plans (id, name, goal, description, image, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(req.name.trim())
        .bind(req.goal.trim())
        .bind(&req.description)
        .bind(&image)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        insert_meals(&mut tx, &id, &req.meals, 0).await?;
        tx.commit().await
    }
    .await;

    if let Err(e) = result {
        discard_image(&state, image.as_deref()).await;
        return Err(e.into());
    }

    tracing::info!(diet_plan_id = %id, meals = req.meals.len(), "Created diet plan");
    Ok(created(fetch_plan_with_meals(&state.db, &id).await?))
}

/// Update a plan. A submitted meal list replaces the existing one.
pub async fn update_diet_plan(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    RecordId(id): RecordId,
    payload: Payload,
) -> ApiResult<DietPlanWithMeals> {
    let existing = fetch_plan(&state.db, &id).await?;
    let (req, image): (UpdateDietPlanRequest, _) = payload.into_parts(&DIET_PLAN_FORM)?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref name) = req.name {
        errors.check("name", validate_required(name, "Name", 100));
    }
    if let Some(ref goal) = req.goal {
        errors.check("goal", validate_required(goal, "Goal", 100));
    }
    errors.check("description", validate_optional(&req.description, "Description", 2000));
    if let Some(ref meals) = req.meals {
        validate_meals(meals, &mut errors);
    }
    errors.finish()?;

    let image = save_image(&state, image).await?;

    let result: Result<(), sqlx::Error> = async {
        let mut tx = begin_write(&state.db).await?;

        sqlx::query(
            r#"
            UPDATE diet_plans SET
                name = COALESCE(?, name),
                goal = COALESCE(?, goal),
                description = COALESCE(?, description),
                image = COALESCE(?, image),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(req.name.as_deref().map(str::trim))
        .bind(req.goal.as_deref().map(str::trim))
        .bind(&req.description)
        .bind(&image)
        .bind(now_rfc3339())
        .bind(&id)
        .execute(&mut *tx)
        .await?;

        if let Some(ref meals) = req.meals {
            sqlx::query("DELETE FROM meals WHERE diet_plan_id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            insert_meals(&mut tx, &id, meals, 0).await?;
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

    Ok(ok(fetch_plan_with_meals(&state.db, &id).await?))
}

/// Delete a plan; its meals go with it
pub async fn delete_diet_plan(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    RecordId(id): RecordId,
) -> ApiResult<()> {
    let existing = fetch_plan(&state.db, &id).await?;

    sqlx::query("DELETE FROM diet_plans WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    discard_image(&state, existing.image.as_deref()).await;

    tracing::info!(diet_plan_id = %id, "Deleted diet plan");
    Ok(message("Diet plan deleted"))
}

// -------------------------------------------------------------------------
// Meals
// -------------------------------------------------------------------------

async fn fetch_meal(db: &DbPool, id: &str) -> Result<Meal, ApiError> {
    sqlx::query_as::<_, Meal>("SELECT * FROM meals WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Meal not found"))
}

pub async fn list_meals(
    State(state): State<Arc<AppState>>,
    Path(plan_id): Path<String>,
) -> ApiResult<Vec<Meal>> {
    fetch_plan(&state.db, &plan_id).await?;
    Ok(ok(fetch_meals(&state.db, &plan_id).await?))
}

/// Append one meal to the end of a plan
pub async fn add_meal(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    Path(plan_id): Path<String>,
    payload: Payload,
) -> CreatedResult<Meal> {
    fetch_plan(&state.db, &plan_id).await?;
    let (meal, _): (NewMeal, _) = payload.into_parts(&MEAL_FORM)?;

    let mut errors = ValidationErrorBuilder::new();
    validate_meal(&meal, None, &mut errors);
    errors.finish()?;

    let mut tx = begin_write(&state.db).await?;
    let (next,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM meals WHERE diet_plan_id = ?",
    )
    .bind(&plan_id)
    .fetch_one(&mut *tx)
    .await?;
    insert_meals(&mut tx, &plan_id, std::slice::from_ref(&meal), next).await?;
    tx.commit().await?;

    let added = sqlx::query_as::<_, Meal>(
        "SELECT * FROM meals WHERE diet_plan_id = ? AND position = ?",
    )
    .bind(&plan_id)
    .bind(next)
    .fetch_one(&state.db)
    .await?;

    Ok(created(added))
}

pub async fn update_meal(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    Path(id): Path<String>,
    payload: Payload,
) -> ApiResult<Meal> {
    let existing = fetch_meal(&state.db, &id).await?;
    let (req, _): (UpdateMealRequest, _) = payload.into_parts(&MEAL_FORM)?;

    let merged = NewMeal {
        index: None,
        meal: req.meal.unwrap_or(existing.meal),
        description: req.description.or(existing.description),
        calories: req.calories.unwrap_or(existing.calories),
        protein: req.protein.or(existing.protein),
        carbs: req.carbs.or(existing.carbs),
        fats: req.fats.or(existing.fats),
    };

    let mut errors = ValidationErrorBuilder::new();
    validate_meal(&merged, None, &mut errors);
    errors.finish()?;

    sqlx::query(
        r#"
        UPDATE meals SET meal = ?, description = ?, calories = ?, protein = ?, carbs = ?, fats = ?
        WHERE id = ?
        "#,
    )
    .bind(merged.meal.trim())
    .bind(&merged.description)
    .bind(merged.calories)
    .bind(merged.protein)
    .bind(merged.carbs)
    .bind(merged.fats)
    .bind(&id)
    .execute(&state.db)
    .await?;

    Ok(ok(fetch_meal(&state.db, &id).await?))
}

pub async fn delete_meal(
    State(state): State<Arc<AppState>>,
    RequireManager(_): RequireManager,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let result = sqlx::query("DELETE FROM meals WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Meal not found"));
    }

    Ok(message("Meal deleted"))
}
