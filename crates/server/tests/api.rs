use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use base64::Engine as _;
use http_body_util::BodyExt;
use sea_orm::Database;
use serde_json::{Value, json};
use tower::ServiceExt;

use engine::{Engine, ExchangeRateCache, NewUser, StaticRateSource, SystemClock};
use migration::MigratorTrait;

async fn test_engine() -> Engine {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();

    let clock = Arc::new(SystemClock);
    let source = StaticRateSource::new(HashMap::from([("usd".to_string(), 1.0 / 25_000.0)]));
    let rates = Arc::new(ExchangeRateCache::new(
        Arc::new(source),
        clock.clone(),
        Duration::from_secs(3600),
    ));
    let engine = Engine::builder()
        .database(db)
        .clock(clock)
        .rates(rates)
        .build()
        .await
        .unwrap();
    engine
        .register(NewUser {
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password: "password123".to_string(),
            name: None,
        })
        .await
        .unwrap();
    engine
}

async fn test_app() -> Router {
    server::app(test_engine().await)
}

fn basic(username: &str, password: &str) -> String {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    format!("Basic {encoded}")
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, basic("alice", "password123"))
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, basic("alice", "password123"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_is_public_and_expenses_need_auth() {
    let app = test_app().await;

    let (status, body) = send(
        &app,
        Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "ok");

    let (status, _) = send(
        &app,
        Request::builder()
            .uri("/expenses")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        Request::builder()
            .uri("/expenses")
            .header(header::AUTHORIZATION, basic("alice", "wrong-password"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn serves_on_a_bound_listener() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let engine = test_engine().await;
    tokio::spawn(async move { server::run_with_listener(engine, listener).await });

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(r#"{"message":"ok"}"#));
}

#[tokio::test]
async fn create_list_and_summarize() {
    let app = test_app().await;

    let (status, body) = send(
        &app,
        post_json(
            "/expenses",
            json!({
                "amount": 50,
                "currency": "VND",
                "kind": "expense",
                "type": "food",
                "date": "2024-01-15",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("<= 0"));

    let (status, created) = send(
        &app,
        post_json(
            "/expenses",
            json!({
                "amount": -500000,
                "currency": "vnd",
                "kind": "expense",
                "type": "Food",
                "date": "2024-01-20",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["type"], "food");
    assert_eq!(created["currency"], "VND");

    let (status, _) = send(
        &app,
        post_json(
            "/expenses",
            json!({
                "amount": 100,
                "currency": "USD",
                "kind": "income",
                "type": "salary",
                "date": "2024-01-15",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, list) = send(
        &app,
        get("/expenses?types=food&types=rent&page=1&page_size=10"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["count"], 1);
    assert_eq!(list["data"].as_array().unwrap().len(), 1);

    let (status, summary) = send(&app, get("/expenses/summary?original_currency=VND")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["currency"], "VND");
    let balance = summary["total_balance"].as_f64().unwrap();
    assert!((balance - 2_000_000.0).abs() < 1e-3);
    assert_eq!(summary["by_currency"].as_object().unwrap().len(), 2);

    let (status, types) = send(&app, get("/expenses/types")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(types, json!(["food", "salary"]));

    let id = created["id"].as_i64().unwrap();
    let (status, _) = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/expenses/{id}"))
            .header(header::AUTHORIZATION, basic("alice", "password123"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, get(&format!("/expenses/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn groups_reject_unknown_granularity() {
    let app = test_app().await;

    let (status, body) = send(&app, get("/expenses/groups?group_by=DECADE")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("DECADE"));

    let (status, body) = send(&app, get("/expenses/groups?group_by=month&page_size=5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
    assert_eq!(body["page"], 1);
}

#[tokio::test]
async fn negative_page_size_returns_every_group() {
    let app = test_app().await;

    for date in ["2024-01-10", "2024-02-10", "2024-03-10"] {
        let (status, _) = send(
            &app,
            post_json(
                "/expenses",
                json!({
                    "amount": -1000,
                    "currency": "VND",
                    "kind": "expense",
                    "type": "food",
                    "date": date,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(&app, get("/expenses/groups?group_by=MONTH&page_size=-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["page_size"], 0);
    assert_eq!(body["groups"].as_array().unwrap().len(), 3);

    let (status, body) = send(&app, get("/expenses?page=-2&page_size=-5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["page"], 1);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn currency_endpoints() {
    let app = test_app().await;

    let (status, body) = send(&app, get("/currency/currencies")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["currencies"], json!(["VND", "USD", "EUR"]));

    let (status, body) = send(&app, get("/currency/exchange-rates")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["base_currency"], "VND");
    assert_eq!(body["rates"]["VND"], 1.0);
    let usd = body["rates"]["USD"].as_f64().unwrap();
    assert!((usd - 25_000.0).abs() < 1e-6);
}

#[tokio::test]
async fn me_returns_the_signed_in_user() {
    let app = test_app().await;

    let (status, body) = send(&app, get("/user/me")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["role"], "user");
    assert!(body.get("password_hash").is_none());

    let (status, _) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/user/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "username": "alice",
                    "email": "other@example.com",
                    "password": "password123",
                })
                    .to_string(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn account_lookup_and_deletion() {
    let app = test_app().await;

    let (status, bob) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/user/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"username": "bob", "email": "bob@example.com", "password": "password456"})
                    .to_string(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let bob_id = bob["id"].as_i64().unwrap();

    let (_, me) = send(&app, get("/user/me")).await;
    let alice_id = me["id"].as_i64().unwrap();

    let (status, body) = send(&app, get(&format!("/user/{alice_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");

    let (status, _) = send(&app, get(&format!("/user/{bob_id}"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let delete = |id: i64| {
        Request::builder()
            .method("DELETE")
            .uri(format!("/user/{id}"))
            .header(header::AUTHORIZATION, basic("alice", "password123"))
            .body(Body::empty())
            .unwrap()
    };
    let (status, _) = send(&app, delete(bob_id)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, delete(alice_id)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, get("/user/me")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
