mod assignments;
pub mod auth;
mod bookings;
mod diet_plans;
mod equipment;
pub mod error;
pub mod form;
mod memberships;
mod preferences;
mod programs;
mod progress;
mod recommendations;
pub mod response;
mod services;
mod trainers;
mod validation;

#[cfg(test)]
mod tests;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::uploads::{remove_image, store_image, UPLOADS_ROUTE};
use crate::AppState;
use error::ApiError;
use form::UploadedFile;

/// Room for the text fields that travel with an image
const FORM_OVERHEAD_BYTES: usize = 256 * 1024;

/// Store an uploaded image, returning its public reference
pub(crate) async fn save_image(
    state: &AppState,
    image: Option<UploadedFile>,
) -> Result<Option<String>, ApiError> {
    match image {
        Some(file) => {
            let reference = store_image(
                &state.config.upload_dir(),
                state.config.uploads.max_image_bytes,
                &file,
            )
            .await?;
            Ok(Some(reference))
        }
        None => Ok(None),
    }
}

/// Remove a stored image, if there is one
pub(crate) async fn discard_image(state: &AppState, reference: Option<&str>) {
    if let Some(reference) = reference {
        remove_image(&state.config.upload_dir(), reference).await;
    }
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring invalid CORS origin {}: {}", origin, e);
                None
            }
        })
        .collect();

    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([CONTENT_TYPE, AUTHORIZATION])
            .allow_credentials(true),
    )
}

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public)
    let auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/session", get(auth::session));

    // Catalog reads are public; writes check for a manager in the handler
    let api_routes = Router::new()
        // Preferences
        .route(
            "/preferences",
            get(preferences::get_preferences).put(preferences::update_preferences),
        )
        // Services
        .route(
            "/services",
            get(services::list_services)
                .post(services::create_service)
                .put(services::update_service)
                .delete(services::delete_service),
        )
        .route(
            "/services/:id",
            get(services::get_service)
                .put(services::update_service)
                .delete(services::delete_service),
        )
        // Trainers
        .route(
            "/trainers",
            get(trainers::list_trainers)
                .post(trainers::create_trainer)
                .put(trainers::update_trainer)
                .delete(trainers::delete_trainer),
        )
        .route(
            "/trainers/:id",
            get(trainers::get_trainer)
                .put(trainers::update_trainer)
                .delete(trainers::delete_trainer),
        )
        // Assignments
        .route(
            "/assignments",
            get(assignments::list_assignments)
                .post(assignments::create_assignment)
                .put(assignments::update_assignment)
                .delete(assignments::delete_assignment),
        )
        .route(
            "/assignments/:id",
            get(assignments::get_assignment)
                .put(assignments::update_assignment)
                .delete(assignments::delete_assignment),
        )
        // Diet plans and meals
        .route(
            "/diet-plans",
            get(diet_plans::list_diet_plans)
                .post(diet_plans::create_diet_plan)
                .put(diet_plans::update_diet_plan)
                .delete(diet_plans::delete_diet_plan),
        )
        .route(
            "/diet-plans/:id",
            get(diet_plans::get_diet_plan)
                .put(diet_plans::update_diet_plan)
                .delete(diet_plans::delete_diet_plan),
        )
        .route(
            "/diet-plans/:id/meals",
            get(diet_plans::list_meals).post(diet_plans::add_meal),
        )
        .route(
            "/meals/:id",
            axum::routing::put(diet_plans::update_meal).delete(diet_plans::delete_meal),
        )
        // Workout programs and exercises
        .route(
            "/programs",
            get(programs::list_programs)
                .post(programs::create_program)
                .put(programs::update_program)
                .delete(programs::delete_program),
        )
        .route(
            "/programs/:id",
            get(programs::get_program)
                .put(programs::update_program)
                .delete(programs::delete_program),
        )
        .route(
            "/programs/:id/exercises",
            get(programs::list_exercises).post(programs::add_exercise),
        )
        .route(
            "/exercises/:id",
            axum::routing::put(programs::update_exercise).delete(programs::delete_exercise),
        )
        // Equipment
        .route(
            "/equipment",
            get(equipment::list_equipment)
                .post(equipment::create_equipment)
                .put(equipment::update_equipment)
                .delete(equipment::delete_equipment),
        )
        .route(
            "/equipment/:id",
            get(equipment::get_equipment)
                .put(equipment::update_equipment)
                .delete(equipment::delete_equipment),
        )
        // Memberships
        .route(
            "/memberships",
            get(memberships::list_memberships)
                .post(memberships::create_membership)
                .put(memberships::update_membership)
                .delete(memberships::delete_membership),
        )
        .route(
            "/memberships/:id",
            get(memberships::get_membership)
                .put(memberships::update_membership)
                .delete(memberships::delete_membership),
        )
        // Bookings
        .route(
            "/bookings",
            get(bookings::list_bookings)
                .post(bookings::create_booking)
                .put(bookings::update_booking)
                .delete(bookings::delete_booking),
        )
        .route(
            "/bookings/:id",
            get(bookings::get_booking)
                .put(bookings::update_booking)
                .delete(bookings::delete_booking),
        )
        // Progress
        .route(
            "/progress",
            get(progress::list_progress)
                .post(progress::create_progress)
                .put(progress::update_progress)
                .delete(progress::delete_progress),
        )
        .route(
            "/progress/:id",
            get(progress::get_progress)
                .put(progress::update_progress)
                .delete(progress::delete_progress),
        )
        // Recommendations
        .route(
            "/recommendations/trainers",
            get(recommendations::recommend_trainers),
        )
        .route(
            "/recommendations/diet-plans",
            get(recommendations::recommend_diet_plans),
        )
        .route(
            "/recommendations/programs",
            get(recommendations::recommend_programs),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::refresh_session,
        ))
        .layer(DefaultBodyLimit::max(
            state.config.uploads.max_image_bytes + FORM_OVERHEAD_BYTES,
        ));

    let mut router = Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .nest_service(UPLOADS_ROUTE, ServeDir::new(state.config.upload_dir()))
        .merge(crate::pages::router(state.clone()))
        .fallback_service(crate::pages::shell(&state.config.server.static_dir))
        .layer(TraceLayer::new_for_http());

    if let Some(cors) = cors_layer(&state.config.server.cors_origins) {
        router = router.layer(cors);
    }

    router.with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
