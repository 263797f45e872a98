//! Recommendation proxy contract tests
//!
//! The upstream recommender is faked with wiremock; a timeout must map
//! to its own retryable failure class, distinct from other upstream
//! failures.

use applyhub::config::Config;
use applyhub::error::AppError;
use applyhub::models::Role;
use applyhub::recommend::{RecommendClient, RecommendationRequest};
use applyhub::{auth, routes, AppState};
use axum::body::Body;
use sqlx::sqlite::SqlitePoolOptions;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEST_SECRET: &str = "test-secret";

fn recommendation_body() -> serde_json::Value {
    serde_json::json!({
        "recommendations": [
            { "title": "Backend Engineer", "company": "Acme", "link": "https://acme.example/jobs/42" }
        ],
        "total": 1
    })
}

#[tokio::test]
async fn test_recommendations_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/recommendations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(recommendation_body()))
        .mount(&server)
        .await;

    let client = RecommendClient::new(server.uri(), Duration::from_secs(2));
    let response = client
        .recommendations(RecommendationRequest {
            skills: vec!["rust".to_string()],
            desired_job_role: Some("Backend Engineer".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(response.total, 1);
    assert_eq!(response.recommendations[0]["title"], "Backend Engineer");
}

#[tokio::test]
async fn test_recommendations_upstream_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/recommendations"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model unavailable"))
        .mount(&server)
        .await;

    let client = RecommendClient::new(server.uri(), Duration::from_secs(2));
    let err = client
        .recommendations(RecommendationRequest::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Upstream(_)));
    assert!(format!("{}", err).contains("500"));
}

#[tokio::test]
async fn test_recommendations_timeout_is_distinct() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/recommendations"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(recommendation_body())
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = RecommendClient::new(server.uri(), Duration::from_millis(200));
    let err = client
        .recommendations(RecommendationRequest::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::UpstreamTimeout(_)));
}

#[tokio::test]
async fn test_recommendations_malformed_upstream_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/recommendations"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let client = RecommendClient::new(server.uri(), Duration::from_secs(2));
    let err = client
        .recommendations(RecommendationRequest::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Upstream(_)));
}

#[tokio::test]
async fn test_recommendations_route_proxies_for_entitled_subscriber() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/recommendations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(recommendation_body()))
        .mount(&server)
        .await;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let config = Config {
        bind_addr: "127.0.0.1:0".to_string(),
        database_url: "sqlite::memory:".to_string(),
        jwt_secret: TEST_SECRET.to_string(),
        recommender_url: server.uri(),
        recommender_timeout_secs: 2,
        admin_email: None,
        admin_password: None,
    };
    let state = AppState::new(pool, &config);
    let app = routes::router(state.clone());

    let entitled = state
        .store
        .create_account("alice", "alice@example.com", "$argon2id$stub", Role::Subscriber, 5)
        .await
        .unwrap();
    let token = auth::issue_token(&entitled, TEST_SECRET).unwrap();

    let response = app
        .clone()
        .oneshot(
            hyper::Request::builder()
                .method("POST")
                .uri("/api/jobs/recommendations")
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {}", token))
                .body(Body::from(
                    serde_json::json!({ "skills": ["rust"], "desired_job_role": "Backend Engineer" })
                        .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), hyper::StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["total"], 1);

    // An unentitled subscriber is refused before the proxy call
    let broke = state
        .store
        .create_account("bob", "bob@example.com", "$argon2id$stub", Role::Subscriber, 0)
        .await
        .unwrap();
    let broke_token = auth::issue_token(&broke, TEST_SECRET).unwrap();

    let response = app
        .oneshot(
            hyper::Request::builder()
                .method("POST")
                .uri("/api/jobs/recommendations")
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {}", broke_token))
                .body(Body::from(serde_json::json!({ "skills": ["rust"] }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), hyper::StatusCode::FORBIDDEN);
}
