//! Preference-based recommendations.
//!
//! This is a filter, not a ranker: a candidate is recommended when its goal
//! (diet plans, programs) or specialty (trainers) equals the user's stored
//! preference, compared trimmed and case-insensitively. Every response has
//! the same shape. When the user stated no preference, or nothing matches,
//! the full candidate list comes back with `recommended: false` and a
//! `reason` telling the two cases apart.

use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::diet_plans::fetch_all_plans;
use super::error::ApiError;
use super::preferences::load_preferences;
use super::programs::fetch_all_programs;
use super::response::{ok, ApiResult};
use crate::auth::Session;
use crate::db::{normalize_attr, DietPlanWithMeals, ProgramWithExercises, Trainer};
use crate::{AppState, DbPool};

#[derive(Debug, Default, Deserialize)]
pub struct RecommendationQuery {
    #[serde(rename = "userId", alias = "user_id")]
    pub user_id: Option<String>,
    #[serde(rename = "serviceId", alias = "service_id")]
    pub service_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Matched,
    NoPreference,
    NoMatches,
}

#[derive(Debug, Serialize)]
pub struct Recommendation<T> {
    pub recommended: bool,
    pub reason: Reason,
    pub items: Vec<T>,
}

/// Keep the candidates whose `attr` equals `preference`, or fall back to all
/// of them in their original order.
pub fn recommend<T>(
    candidates: Vec<T>,
    preference: Option<&str>,
    attr: impl Fn(&T) -> &str,
) -> Recommendation<T> {
    let Some(wanted) = preference.map(normalize_attr).filter(|p| !p.is_empty()) else {
        return Recommendation {
            recommended: false,
            reason: Reason::NoPreference,
            items: candidates,
        };
    };

    let (matched, rest): (Vec<T>, Vec<T>) = candidates
        .into_iter()
        .partition(|c| normalize_attr(attr(c)) == wanted);

    if matched.is_empty() {
        Recommendation {
            recommended: false,
            reason: Reason::NoMatches,
            items: rest,
        }
    } else {
        Recommendation {
            recommended: true,
            reason: Reason::Matched,
            items: matched,
        }
    }
}

/// Whose preferences to use. Customers may only ask about themselves.
async fn target_user(
    db: &DbPool,
    session: &Session,
    requested: Option<String>,
) -> Result<String, ApiError> {
    let user_id = match requested.filter(|id| !id.is_empty()) {
        Some(id) if id != session.user_id && !session.is_manager() => {
            return Err(ApiError::forbidden(
                "Customers can only request their own recommendations",
            ));
        }
        Some(id) => id,
        None => session.user_id.clone(),
    };

    let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?")
        .bind(&user_id)
        .fetch_optional(db)
        .await?;
    if exists.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    Ok(user_id)
}

/// Trainers matching the preferred specialty, limited to those assigned to
/// `serviceId` when one is given
pub async fn recommend_trainers(
    State(state): State<Arc<AppState>>,
    session: Session,
    Query(query): Query<RecommendationQuery>,
) -> ApiResult<Recommendation<Trainer>> {
    let user_id = target_user(&state.db, &session, query.user_id).await?;
    let prefs = load_preferences(&state.db, &user_id).await?;

    let candidates = match query.service_id.filter(|id| !id.is_empty()) {
        Some(service_id) => {
            let service: Option<(String,)> = sqlx::query_as("SELECT id FROM services WHERE id = ?")
                .bind(&service_id)
                .fetch_optional(&state.db)
                .await?;
            if service.is_none() {
                return Err(ApiError::not_found("Service not found"));
            }

            sqlx::query_as::<_, Trainer>(
                r#"
                SELECT DISTINCT t.* FROM trainers t
                JOIN assignments a ON a.trainer_id = t.id
                WHERE a.service_id = ?
                ORDER BY t.name
                "#,
            )
            .bind(&service_id)
            .fetch_all(&state.db)
            .await?
        }
        None => {
            sqlx::query_as::<_, Trainer>("SELECT * FROM trainers ORDER BY name")
                .fetch_all(&state.db)
                .await?
        }
    };

    let result = recommend(candidates, prefs.preferred_specialty.as_deref(), |t| {
        t.specialty.as_str()
    });
    tracing::debug!(user_id = %user_id, reason = ?result.reason, count = result.items.len(), "Trainer recommendations");
    Ok(ok(result))
}

/// Diet plans whose goal is the user's fitness goal
pub async fn recommend_diet_plans(
    State(state): State<Arc<AppState>>,
    session: Session,
    Query(query): Query<RecommendationQuery>,
) -> ApiResult<Recommendation<DietPlanWithMeals>> {
    let user_id = target_user(&state.db, &session, query.user_id).await?;
    let prefs = load_preferences(&state.db, &user_id).await?;

    let candidates = fetch_all_plans(&state.db).await?;
    let result = recommend(candidates, prefs.fitness_goal.as_deref(), |p| p.plan.goal.as_str());
    tracing::debug!(user_id = %user_id, reason = ?result.reason, count = result.items.len(), "Diet plan recommendations");
    Ok(ok(result))
}

/// Workout programs whose goal is the user's fitness goal
pub async fn recommend_programs(
    State(state): State<Arc<AppState>>,
    session: Session,
    Query(query): Query<RecommendationQuery>,
) -> ApiResult<Recommendation<ProgramWithExercises>> {
    let user_id = target_user(&state.db, &session, query.user_id).await?;
    let prefs = load_preferences(&state.db, &user_id).await?;

    let candidates = fetch_all_programs(&state.db).await?;
    let result = recommend(candidates, prefs.fitness_goal.as_deref(), |p| {
        p.program.goal.as_str()
    });
    tracing::debug!(user_id = %user_id, reason = ?result.reason, count = result.items.len(), "Program recommendations");
    Ok(ok(result))
}
