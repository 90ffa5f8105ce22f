use std::sync::Arc;

use axum::body::Body;
use axum::extract::Extension;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use measure_backend::billing::{BillingService, DisabledProvider, PgBillingStore};
use measure_backend::router;
use serde_json::{json, Value};
use sqlx::PgPool;
use tower::ServiceExt; // for `oneshot`

fn app(pool: &PgPool) -> Router {
    std::env::set_var("JWT_SECRET", "auth-integration-secret");
    let service = BillingService::new(
        Arc::new(PgBillingStore::new(pool.clone())),
        Arc::new(DisabledProvider),
    );
    router(service).layer(Extension(pool.clone()))
}

fn json_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn register_creates_user_with_usage_row_and_login_sets_cookie(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let app = app(&pool);
    let registration = json!({"email": "reader@example.com", "password": "correct-horse"});

    let response = app
        .clone()
        .oneshot(json_post("/api/auth/register", registration.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let created: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(created["message"], "User created");
    let user_id = created["userId"].as_i64().unwrap() as i32;

    let (name, measurements, exports): (String, i64, i64) = sqlx::query_as(
        "SELECT u.name, s.measurements_this_month, s.exports_this_month
         FROM users u JOIN usage_stats s ON s.user_id = u.id
         WHERE u.id = $1",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(name, "reader");
    assert_eq!((measurements, exports), (0, 0));

    let duplicate = app
        .clone()
        .oneshot(json_post("/api/auth/register", registration))
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);
    let body = hyper::body::to_bytes(duplicate.into_body()).await.unwrap();
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error"], "bad request: Email already registered");

    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = $1")
        .bind("reader@example.com")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(users, 1);

    let login = app
        .clone()
        .oneshot(json_post(
            "/api/auth/login",
            json!({"email": "reader@example.com", "password": "correct-horse"}),
        ))
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::OK);
    let cookie = login
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("auth_token="));
    assert!(cookie.contains("HttpOnly"));

    // the session cookie alone authenticates follow-up requests
    let session = cookie.split(';').next().unwrap().to_string();
    let me = app
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .header(header::COOKIE, session)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(me.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(me.into_body()).await.unwrap();
    let info: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(info["id"], user_id);
    assert_eq!(info["email"], "reader@example.com");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn login_with_wrong_password_is_unauthorized(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let app = app(&pool);

    let response = app
        .clone()
        .oneshot(json_post(
            "/api/auth/register",
            json!({"email": "wrong@example.com", "password": "first-password", "name": "W"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let login = app
        .oneshot(json_post(
            "/api/auth/login",
            json!({"email": "wrong@example.com", "password": "other-password"}),
        ))
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::UNAUTHORIZED);
    assert!(login.headers().get(header::SET_COOKIE).is_none());
}
