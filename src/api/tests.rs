//! Router-level tests against an in-memory database.

use axum::{
    body::Body,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
        Method, Request, StatusCode,
    },
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use super::create_router;
use crate::auth::{Identity, Role};
use crate::config::Config;
use crate::{AppState, DbPool};

const BOUNDARY: &str = "gymdesk-test-boundary";

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    _dir: TempDir,
}

async fn test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let db = crate::db::init_in_memory().await.unwrap();
    build_app(dir, db)
}

/// An app on a real database file, where connections run in parallel
async fn file_backed_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let db = crate::db::init(dir.path()).await.unwrap();
    build_app(dir, db)
}

fn build_app(dir: TempDir, db: DbPool) -> TestApp {
    let static_dir = dir.path().join("static");
    std::fs::create_dir_all(&static_dir).unwrap();
    std::fs::write(static_dir.join("index.html"), "<html>gymdesk</html>").unwrap();

    let mut config = Config::default();
    config.server.data_dir = dir.path().to_path_buf();
    config.server.static_dir = static_dir;
    config.auth.jwt_secret = Some("router-test-secret".to_string());

    let state = Arc::new(AppState::new(config, db));

    TestApp {
        router: create_router(state.clone()),
        state,
        _dir: dir,
    }
}

impl TestApp {
    /// Insert an account that can only be used through a minted token
    async fn user(&self, role: Role) -> (String, String) {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, name, role) VALUES (?, ?, 'unused', ?, ?)",
        )
        .bind(&id)
        .bind(format!("{}@example.com", id))
        .bind(format!("{} user", role))
        .bind(role.as_str())
        .execute(&self.state.db)
        .await
        .unwrap();

        let token = self
            .state
            .sessions
            .encode(&Identity {
                user_id: id.clone(),
                role,
            })
            .unwrap()
            .token;
        (id, token)
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn send_json(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Value,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn seed_assignment(&self, capacity: i64) -> String {
        let service_id = Uuid::new_v4().to_string();
        let trainer_id = Uuid::new_v4().to_string();
        let assignment_id = Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO services (id, name, description) VALUES (?, ?, 'Strength work')")
            .bind(&service_id)
            .bind(format!("Lifting {}", service_id))
            .execute(&self.state.db)
            .await
            .unwrap();
        sqlx::query("INSERT INTO trainers (id, name, specialty) VALUES (?, 'Sam', 'strength')")
            .bind(&trainer_id)
            .execute(&self.state.db)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO assignments (id, service_id, trainer_id, schedule, max_capacity) VALUES (?, ?, ?, 'Mon 18:00', ?)",
        )
        .bind(&assignment_id)
        .bind(&service_id)
        .bind(&trainer_id)
        .bind(capacity)
        .execute(&self.state.db)
        .await
        .unwrap();

        assignment_id
    }

    async fn send_form(
        &self,
        method: Method,
        uri: &str,
        token: &str,
        form: &str,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn count(&self, sql: &str, id: &str) -> i64 {
        let (count,): (i64,) = sqlx::query_as(sql)
            .bind(id)
            .fetch_one(&self.state.db)
            .await
            .unwrap();
        count
    }

    async fn book(&self, token: &str, assignment_id: &str) -> String {
        let (status, body) = self
            .send_json(
                Method::POST,
                "/api/bookings",
                Some(token),
                json!({"assignment_id": assignment_id}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    async fn booked_count(&self, assignment_id: &str) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT booked_count FROM assignments WHERE id = ?")
            .bind(assignment_id)
            .fetch_one(&self.state.db)
            .await
            .unwrap();
        count
    }
}

fn multipart_body(fields: &[(&str, &str)], image: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((filename, content_type, bytes)) = image {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, filename, content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

#[tokio::test]
async fn test_health() {
    let app = test_app().await;
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_signup_then_session_from_cookie() {
    let app = test_app().await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/auth/signup")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "email": " Alex@Example.com ",
                "password": "squat4life",
                "name": "Alex",
                "fitness_goal": "Weight Loss"
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let set_cookie = response
        .headers()
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(set_cookie.starts_with("session="));
    assert!(set_cookie.contains("HttpOnly"));
    let cookie = set_cookie.split(';').next().unwrap().to_string();

    let request = Request::builder()
        .uri("/api/auth/session")
        .header(COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["email"], "alex@example.com");
    assert_eq!(body["data"]["user"]["role"], "customer");

    // Preferences given at signup are stored normalized
    let request = Request::builder()
        .uri("/api/preferences")
        .header(COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let (_, body) = app.send(request).await;
    assert_eq!(body["data"]["fitness_goal"], "weight loss");

    let (status, body) = app
        .send_json(
            Method::POST,
            "/api/auth/signup",
            None,
            json!({"email": "alex@example.com", "password": "squat4life", "name": "Alex"}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");
}

#[tokio::test]
async fn test_login_rejects_bad_password() {
    let app = test_app().await;
    app.send_json(
        Method::POST,
        "/api/auth/signup",
        None,
        json!({"email": "kim@example.com", "password": "squat4life", "name": "Kim"}),
    )
    .await;

    let (status, body) = app
        .send_json(
            Method::POST,
            "/api/auth/login",
            None,
            json!({"email": "kim@example.com", "password": "wrong-pass1"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, body) = app
        .send_json(
            Method::POST,
            "/api/auth/login",
            None,
            json!({"email": "KIM@example.com", "password": "squat4life"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["token"].as_str().is_some());
}

#[tokio::test]
async fn test_catalog_writes_need_a_manager() {
    let app = test_app().await;
    let (_, customer) = app.user(Role::Customer).await;
    let payload = json!({"name": "Yoga", "description": "Stretch and breathe"});

    let (status, body) = app
        .send_json(Method::POST, "/api/services", None, payload.clone())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, body) = app
        .send_json(Method::POST, "/api/services", Some(&customer), payload)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");

    // Reads stay public
    let (status, body) = app.get("/api/services", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_multipart_service_with_image() {
    let app = test_app().await;
    let (_, manager) = app.user(Role::Manager).await;

    let png: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 1, 2, 3];
    let body = multipart_body(
        &[("name", "Spin Class"), ("description", "High cadence cardio")],
        Some(("bike.png", "image/png", png)),
    );
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/services")
        .header(AUTHORIZATION, format!("Bearer {}", manager))
        .header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let id = body["data"]["id"].as_str().unwrap().to_string();
    let image = body["data"]["image"].as_str().unwrap().to_string();
    assert!(image.starts_with("/uploads/") && image.ends_with(".png"));

    let (status, body) = app.get("/api/services", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["name"], "Spin Class");

    let (_, body) = app.get(&format!("/api/services?id={}", id), None).await;
    assert_eq!(body["data"]["id"], id.as_str());

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri(&image).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let served = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&served[..], png);
}

#[tokio::test]
async fn test_non_image_upload_is_rejected() {
    let app = test_app().await;
    let (_, manager) = app.user(Role::Manager).await;

    let body = multipart_body(
        &[("name", "Boxing"), ("description", "Pads and bags")],
        Some(("notes.txt", "text/plain", b"not an image")),
    );
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/services")
        .header(AUTHORIZATION, format!("Bearer {}", manager))
        .header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"]["details"]["image"].is_array());

    let (_, body) = app.get("/api/services", None).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_booking_stops_at_capacity() {
    let app = test_app().await;
    let assignment = app.seed_assignment(1).await;
    let (_, first) = app.user(Role::Customer).await;
    let (_, second) = app.user(Role::Customer).await;

    let (status, booking) = app
        .send_json(
            Method::POST,
            "/api/bookings",
            Some(&first),
            json!({"assignment_id": assignment}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(app.booked_count(&assignment).await, 1);

    let (status, body) = app
        .send_json(
            Method::POST,
            "/api/bookings",
            Some(&second),
            json!({"assignment_id": assignment}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "capacity_exceeded");
    assert_eq!(app.booked_count(&assignment).await, 1);

    // Cancelling frees the seat for someone else
    let booking_id = booking["data"]["id"].as_str().unwrap();
    let (status, _) = app
        .send_json(
            Method::PUT,
            &format!("/api/bookings/{}", booking_id),
            Some(&first),
            json!({"status": "cancelled"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.booked_count(&assignment).await, 0);

    let (status, _) = app
        .send_json(
            Method::POST,
            "/api/bookings",
            Some(&second),
            json!({"assignment_id": assignment}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(app.booked_count(&assignment).await, 1);
}

#[tokio::test]
async fn test_customers_only_see_their_own_bookings() {
    let app = test_app().await;
    let assignment = app.seed_assignment(5).await;
    let (_, first) = app.user(Role::Customer).await;
    let (_, second) = app.user(Role::Customer).await;
    let (_, manager) = app.user(Role::Manager).await;

    let (_, booking) = app
        .send_json(
            Method::POST,
            "/api/bookings",
            Some(&first),
            json!({"assignment_id": assignment}),
        )
        .await;
    let booking_id = booking["data"]["id"].as_str().unwrap();

    let (_, body) = app.get("/api/bookings", Some(&second)).await;
    assert_eq!(body["data"], json!([]));

    let (status, _) = app
        .get(&format!("/api/bookings/{}", booking_id), Some(&second))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = app.get("/api/bookings", Some(&manager)).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_form_encoded_diet_plan_with_sparse_meals() {
    let app = test_app().await;
    let (_, manager) = app.user(Role::Manager).await;

    let form = "name=Lean+Start&goal=Weight+Loss\
                &meals%5B2%5D%5Bmeal%5D=Salmon+bowl&meals%5B2%5D%5Bcalories%5D=620\
                &meals%5B0%5D%5Bmeal%5D=Oats&meals%5B0%5D%5Bcalories%5D=350&meals%5B0%5D%5Bprotein%5D=12.5";
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/diet-plans")
        .header(AUTHORIZATION, format!("Bearer {}", manager))
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let meals = body["data"]["meals"].as_array().unwrap();
    assert_eq!(meals.len(), 2);
    assert_eq!(meals[0]["meal"], "Oats");
    assert_eq!(meals[0]["calories"], 350);
    assert_eq!(meals[0]["protein"], 12.5);
    assert_eq!(meals[1]["meal"], "Salmon bowl");
    assert_eq!(meals[1]["calories"], 620);
}

#[tokio::test]
async fn test_diet_plan_meal_errors_name_the_row() {
    let app = test_app().await;
    let (_, manager) = app.user(Role::Manager).await;

    let (status, body) = app
        .send_json(
            Method::POST,
            "/api/diet-plans",
            Some(&manager),
            json!({
                "name": "Bulk",
                "goal": "muscle gain",
                "meals": [{"meal": "Rice", "calories": 500}, {"meal": "", "calories": -5}]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"]["details"]["meals[1][meal]"].is_array());
    assert!(body["error"]["details"]["meals[1][calories]"].is_array());

    let (_, body) = app.get("/api/diet-plans", None).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_recommendations_follow_preferences() {
    let app = test_app().await;
    let (_, customer) = app.user(Role::Customer).await;

    for (name, goal) in [("Lean Start", "weight loss"), ("Mass Builder", "muscle gain")] {
        sqlx::query("INSERT INTO diet_plans (id, name, goal) VALUES (?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(name)
            .bind(goal)
            .execute(&app.state.db)
            .await
            .unwrap();
    }

    let (status, body) = app
        .get("/api/recommendations/diet-plans", Some(&customer))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["recommended"], false);
    assert_eq!(body["data"]["reason"], "no_preference");
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 2);

    let (status, _) = app
        .send_json(
            Method::PUT,
            "/api/preferences",
            Some(&customer),
            json!({"fitness_goal": "Weight Loss"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app
        .get("/api/recommendations/diet-plans", Some(&customer))
        .await;
    assert_eq!(body["data"]["recommended"], true);
    assert_eq!(body["data"]["reason"], "matched");
    let items = body["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["name"], "Lean Start");

    let (_, body) = app
        .get("/api/recommendations/programs", Some(&customer))
        .await;
    assert_eq!(body["data"]["reason"], "no_matches");
    assert_eq!(body["data"]["items"], json!([]));
}

#[tokio::test]
async fn test_recommendations_for_another_user() {
    let app = test_app().await;
    let (customer_id, customer) = app.user(Role::Customer).await;
    let (_, other) = app.user(Role::Customer).await;
    let (_, manager) = app.user(Role::Manager).await;

    let uri = format!("/api/recommendations/trainers?userId={}", customer_id);
    let (status, body) = app.get(&uri, Some(&other)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");

    let (status, _) = app.get(&uri, Some(&manager)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.get(&uri, Some(&customer)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .get(
            "/api/recommendations/trainers?serviceId=missing",
            Some(&customer),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

async fn page(app: &TestApp, path: &str, token: Option<&str>) -> axum::response::Response {
    let mut builder = Request::builder().uri(path);
    if let Some(token) = token {
        builder = builder.header(COOKIE, format!("session={}", token));
    }
    app.router
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

fn location(response: &axum::response::Response) -> &str {
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_page_guard_redirects() {
    let app = test_app().await;
    let (_, customer) = app.user(Role::Customer).await;
    let (_, manager) = app.user(Role::Manager).await;

    let response = page(&app, "/manager/dashboard", None).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/");

    let response = page(&app, "/customer/bookings", Some("not-a-token")).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/");

    let response = page(&app, "/manager/dashboard", Some(&customer)).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/customer/dashboard");

    let response = page(&app, "/customer/dashboard", Some(&manager)).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/manager/dashboard");

    // The guard never sets cookies
    assert!(response.headers().get(SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_guarded_pages_serve_the_shell() {
    let app = test_app().await;
    let (_, customer) = app.user(Role::Customer).await;

    let response = page(&app, "/customer/dashboard", Some(&customer)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"<html>gymdesk</html>");

    // Public pages need no session
    let response = page(&app, "/", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_authenticated_requests_refresh_the_cookie() {
    let app = test_app().await;
    let (_, customer) = app.user(Role::Customer).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/preferences")
                .header(COOKIE, format!("session={}", customer))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response
        .headers()
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(set_cookie.starts_with("session="));

    // Bearer-only callers get no cookie
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/preferences")
                .header(AUTHORIZATION, format!("Bearer {}", customer))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.headers().get(SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_logout_expires_the_cookie() {
    let app = test_app().await;
    let (_, customer) = app.user(Role::Customer).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/auth/logout")
                .header(COOKIE, format!("session={}", customer))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookies: Vec<&str> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    assert_eq!(cookies.len(), 1, "{:?}", cookies);
    assert!(cookies[0].starts_with("session=;"));
    assert!(cookies[0].contains("Max-Age=0"));
    assert!(cookies[0].contains("Path=/"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_fill_exactly_to_capacity() {
    let app = file_backed_app().await;
    let assignment = app.seed_assignment(3).await;

    let mut customers = Vec::new();
    for _ in 0..20 {
        customers.push(app.user(Role::Customer).await.1);
    }

    let mut tasks = tokio::task::JoinSet::new();
    for token in customers {
        let router = app.router.clone();
        let body = json!({"assignment_id": assignment}).to_string();
        tasks.spawn(async move {
            let request = Request::builder()
                .method(Method::POST)
                .uri("/api/bookings")
                .header(AUTHORIZATION, format!("Bearer {}", token))
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap();
            let response = router.oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            (status, serde_json::from_slice::<Value>(&bytes).unwrap_or(Value::Null))
        });
    }

    let mut confirmed = 0;
    let mut turned_away = 0;
    while let Some(outcome) = tasks.join_next().await {
        let (status, body) = outcome.unwrap();
        match status {
            StatusCode::CREATED => confirmed += 1,
            StatusCode::CONFLICT => {
                assert_eq!(body["error"]["code"], "capacity_exceeded", "{}", body);
                turned_away += 1;
            }
            other => panic!("unexpected {}: {}", other, body),
        }
    }

    assert_eq!(confirmed, 3);
    assert_eq!(turned_away, 17);
    assert_eq!(app.booked_count(&assignment).await, 3);
    assert_eq!(
        app.count("SELECT COUNT(*) FROM bookings WHERE assignment_id = ?", &assignment)
            .await,
        3
    );
}

#[tokio::test]
async fn test_form_meal_errors_use_the_submitted_index() {
    let app = test_app().await;
    let (_, manager) = app.user(Role::Manager).await;

    let form = "name=Cut&goal=weight+loss\
                &meals%5B0%5D%5Bmeal%5D=Eggs&meals%5B0%5D%5Bcalories%5D=300\
                &meals%5B2%5D%5Bmeal%5D=&meals%5B2%5D%5Bcalories%5D=-5";
    let (status, body) = app
        .send_form(Method::POST, "/api/diet-plans", &manager, form)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", body);

    let details = body["error"]["details"].as_object().unwrap();
    assert!(details.contains_key("meals[2][meal]"), "{:?}", details.keys());
    assert!(details.contains_key("meals[2][calories]"));
    assert!(!details.keys().any(|k| k.starts_with("meals[1]")));
    assert!(!details.keys().any(|k| k.starts_with("meals[0]")));
}

#[tokio::test]
async fn test_program_exercise_rows_create_and_replace() {
    let app = test_app().await;
    let (_, manager) = app.user(Role::Manager).await;

    let form = "name=Starter+Strength&goal=muscle+gain&level=Beginner&duration_weeks=6\
                &exercises%5B1%5D%5Bname%5D=Bench+press&exercises%5B1%5D%5Brest_seconds%5D=90\
                &exercises%5B0%5D%5Bname%5D=Squat&exercises%5B0%5D%5Bsets%5D=5&exercises%5B0%5D%5Breps%5D=5";
    let (status, body) = app
        .send_form(Method::POST, "/api/programs", &manager, form)
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["data"]["level"], "beginner");
    assert_eq!(body["data"]["duration_weeks"], 6);

    let exercises = body["data"]["exercises"].as_array().unwrap();
    assert_eq!(exercises.len(), 2);
    assert_eq!(exercises[0]["name"], "Squat");
    assert_eq!(exercises[0]["sets"], 5);
    assert_eq!(exercises[0]["reps"], 5);
    assert_eq!(exercises[1]["name"], "Bench press");
    assert_eq!(exercises[1]["sets"], 3);
    assert_eq!(exercises[1]["reps"], 10);
    assert_eq!(exercises[1]["rest_seconds"], 90);

    let id = body["data"]["id"].as_str().unwrap().to_string();

    // A bad row is named by the index it was sent under
    let form = "exercises%5B0%5D%5Bname%5D=Row&exercises%5B3%5D%5Bname%5D=&exercises%5B3%5D%5Bsets%5D=0";
    let (status, body) = app
        .send_form(Method::PUT, &format!("/api/programs/{}", id), &manager, form)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"]["details"]["exercises[3][name]"].is_array());
    assert!(body["error"]["details"]["exercises[3][sets]"].is_array());

    // The rejected update left the list alone
    let (_, body) = app.get(&format!("/api/programs/{}", id), None).await;
    assert_eq!(body["data"]["exercises"].as_array().unwrap().len(), 2);

    let (status, body) = app
        .send_json(
            Method::PUT,
            &format!("/api/programs/{}", id),
            Some(&manager),
            json!({"exercises": [{"name": "Deadlift", "sets": 3, "reps": 5}]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["name"], "Starter Strength");
    let exercises = body["data"]["exercises"].as_array().unwrap();
    assert_eq!(exercises.len(), 1);
    assert_eq!(exercises[0]["name"], "Deadlift");
    assert_eq!(exercises[0]["position"], 0);
    assert_eq!(
        app.count("SELECT COUNT(*) FROM exercises WHERE program_id = ?", &id)
            .await,
        1
    );
}

#[tokio::test]
async fn test_capacity_cannot_drop_below_bookings() {
    let app = test_app().await;
    let (_, manager) = app.user(Role::Manager).await;
    let assignment = app.seed_assignment(3).await;
    for _ in 0..2 {
        let (_, customer) = app.user(Role::Customer).await;
        app.book(&customer, &assignment).await;
    }

    let uri = format!("/api/assignments/{}", assignment);
    let (status, body) = app
        .send_json(Method::PUT, &uri, Some(&manager), json!({"max_capacity": 1}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");

    let (_, body) = app.get(&uri, None).await;
    assert_eq!(body["data"]["max_capacity"], 3);

    let (status, body) = app
        .send_json(Method::PUT, &uri, Some(&manager), json!({"max_capacity": 2}))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["max_capacity"], 2);
    assert_eq!(body["data"]["booked_count"], 2);
}

#[tokio::test]
async fn test_deleting_a_booking_releases_the_seat() {
    let app = test_app().await;
    let assignment = app.seed_assignment(1).await;
    let (_, first) = app.user(Role::Customer).await;
    let (_, second) = app.user(Role::Customer).await;

    let booking = app.book(&first, &assignment).await;
    assert_eq!(app.booked_count(&assignment).await, 1);

    // Someone else cannot remove it
    let uri = format!("/api/bookings/{}", booking);
    let (status, _) = app
        .send_json(Method::DELETE, &uri, Some(&second), Value::Null)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.booked_count(&assignment).await, 1);

    let (status, _) = app
        .send_json(Method::DELETE, &uri, Some(&first), Value::Null)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.booked_count(&assignment).await, 0);

    let (status, _) = app.get(&uri, Some(&first)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.book(&second, &assignment).await;
    assert_eq!(app.booked_count(&assignment).await, 1);
}

#[tokio::test]
async fn test_deleting_a_diet_plan_removes_its_meals() {
    let app = test_app().await;
    let (_, manager) = app.user(Role::Manager).await;

    let (status, body) = app
        .send_json(
            Method::POST,
            "/api/diet-plans",
            Some(&manager),
            json!({
                "name": "Maintain",
                "goal": "maintenance",
                "meals": [{"meal": "Oats", "calories": 350}, {"meal": "Stew", "calories": 700}]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let id = body["data"]["id"].as_str().unwrap().to_string();
    let meals_sql = "SELECT COUNT(*) FROM meals WHERE diet_plan_id = ?";
    assert_eq!(app.count(meals_sql, &id).await, 2);

    let (status, _) = app
        .send_json(
            Method::DELETE,
            &format!("/api/diet-plans/{}", id),
            Some(&manager),
            Value::Null,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.count(meals_sql, &id).await, 0);
}

#[tokio::test]
async fn test_deleting_a_service_removes_sessions_and_bookings() {
    let app = test_app().await;
    let (_, manager) = app.user(Role::Manager).await;
    let (_, customer) = app.user(Role::Customer).await;
    let assignment = app.seed_assignment(4).await;
    let booking = app.book(&customer, &assignment).await;

    let (service_id,): (String,) = sqlx::query_as("SELECT service_id FROM assignments WHERE id = ?")
        .bind(&assignment)
        .fetch_one(&app.state.db)
        .await
        .unwrap();

    let (status, _) = app
        .send_json(
            Method::DELETE,
            &format!("/api/services/{}", service_id),
            Some(&manager),
            Value::Null,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        app.count("SELECT COUNT(*) FROM assignments WHERE service_id = ?", &service_id)
            .await,
        0
    );
    assert_eq!(
        app.count("SELECT COUNT(*) FROM bookings WHERE id = ?", &booking)
            .await,
        0
    );

    let (_, body) = app.get("/api/bookings", Some(&customer)).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_second_active_membership_conflicts() {
    let app = test_app().await;
    let (customer_id, customer) = app.user(Role::Customer).await;
    let (_, manager) = app.user(Role::Manager).await;

    let (status, body) = app
        .send_json(
            Method::POST,
            "/api/memberships",
            Some(&customer),
            json!({"plan": "monthly"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["data"]["status"], "active");

    let (status, body) = app
        .send_json(
            Method::POST,
            "/api/memberships",
            Some(&customer),
            json!({"plan": "annual"}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");

    // Same rule when a manager subscribes the customer
    let (status, _) = app
        .send_json(
            Method::POST,
            "/api/memberships",
            Some(&manager),
            json!({"plan": "quarterly", "user_id": customer_id}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    assert_eq!(
        app.count("SELECT COUNT(*) FROM memberships WHERE user_id = ?", &customer_id)
            .await,
        1
    );
}

#[tokio::test]
async fn test_progress_entries_are_scoped_to_their_owner() {
    let app = test_app().await;
    let (_, owner) = app.user(Role::Customer).await;
    let (_, other) = app.user(Role::Customer).await;
    let (_, manager) = app.user(Role::Manager).await;

    let (status, body) = app
        .send_json(
            Method::POST,
            "/api/progress",
            Some(&owner),
            json!({"weight_kg": 82.5, "recorded_on": "2026-03-01"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let uri = format!("/api/progress/{}", body["data"]["id"].as_str().unwrap());

    let (status, _) = app.get(&uri, Some(&other)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, body) = app.get("/api/progress", Some(&other)).await;
    assert_eq!(body["data"], json!([]));

    let (status, _) = app
        .send_json(Method::PUT, &uri, Some(&other), json!({"weight_kg": 60.0}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app
        .send_json(Method::DELETE, &uri, Some(&other), Value::Null)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Managers read every entry but cannot rewrite one
    let (status, _) = app.get(&uri, Some(&manager)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app
        .send_json(Method::PUT, &uri, Some(&manager), json!({"weight_kg": 60.0}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");

    let (status, body) = app
        .send_json(Method::PUT, &uri, Some(&owner), json!({"weight_kg": 81.0}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["weight_kg"], 81.0);
}

#[tokio::test]
async fn test_collection_writes_accept_an_id_query() {
    let app = test_app().await;
    let (_, manager) = app.user(Role::Manager).await;

    let (status, body) = app
        .send_json(
            Method::POST,
            "/api/services",
            Some(&manager),
            json!({"name": "Pilates", "description": "Core work"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .send_json(
            Method::PUT,
            &format!("/api/services?id={}", id),
            Some(&manager),
            json!({"description": "Core and posture"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["description"], "Core and posture");

    let (status, body) = app
        .send_json(Method::DELETE, "/api/services", Some(&manager), Value::Null)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = app
        .send_json(
            Method::DELETE,
            &format!("/api/services?id={}", id),
            Some(&manager),
            Value::Null,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.get("/api/services", None).await;
    assert_eq!(body["data"], json!([]));
}
