use std::net::TcpListener;
use std::sync::Arc;

use actix_web::web;
use serde_json::{json, Value};
use user_management::configuration::SessionSettings;
use user_management::memory::{MemoryCache, MemoryStore};
use user_management::session::SessionService;
use user_management::startup::run;

const TEST_KEY_PEM: &str = include_str!("fixtures/signing_key.pem");

pub struct TestApp {
    pub address: String,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub client: reqwest::Client,
}

fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let settings = SessionSettings {
        issuer: "integration-test".to_string(),
        password_hash_cost: 4, // bcrypt minimum cost (bcrypt::MIN_COST is private)
        ..SessionSettings::default()
    };
    let store = Arc::new(
        MemoryStore::new(settings.refresh_token_ttl())
            .with_key_pem(TEST_KEY_PEM)
            .expect("Failed to load test key"),
    );
    let cache = Arc::new(MemoryCache::new());
    let sessions = SessionService::new(
        &settings,
        store.clone(),
        store.clone(),
        store.clone(),
        cache.clone(),
    );

    let server = run(listener, web::Data::new(sessions))
        .expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        store,
        cache,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/auth/{}", self.address, path)
    }

    async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(&self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    async fn signup(&self, email: &str) -> reqwest::Response {
        self.post_json(
            "signup",
            &json!({"username": "John Doe", "email": email, "password": "SecurePass123"}),
        )
        .await
    }

    async fn login(&self, email: &str, password: &str) -> reqwest::Response {
        self.post_json("login", &json!({"email": email, "password": password}))
            .await
    }

    /// Sign up and log in, returning the login response body
    async fn logged_in(&self, email: &str) -> Value {
        assert_eq!(201, self.signup(email).await.status().as_u16());
        let response = self.login(email, "SecurePass123").await;
        assert_eq!(200, response.status().as_u16());
        response.json().await.expect("Failed to parse response")
    }

    async fn logout(&self, access_token: &str) -> reqwest::Response {
        self.client
            .post(&self.url("logout"))
            .header("Authorization", access_token)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    async fn delete_user(&self, access_token: &str) -> reqwest::Response {
        self.client
            .delete(&self.url("delete_user"))
            .header("Authorization", access_token)
            .send()
            .await
            .expect("Failed to execute request.")
    }
}

fn field<'a>(body: &'a Value, name: &str) -> &'a str {
    body.get(name)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing {} in {}", name, body))
}

async fn error_code(response: reqwest::Response) -> String {
    let body: Value = response.json().await.expect("Failed to parse error body");
    field(&body, "code").to_string()
}

// --- Sign-up Tests ---

#[tokio::test]
async fn signup_returns_201_for_valid_data() {
    let app = spawn_app();

    let response = app.signup("john@example.com").await;
    assert_eq!(201, response.status().as_u16());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(field(&body, "email"), "john@example.com");
    assert_eq!(field(&body, "username"), "John Doe");
    assert!(body.get("hashed_password").is_none());
}

#[tokio::test]
async fn signup_returns_400_for_invalid_input() {
    let app = spawn_app();

    let test_cases = vec![
        (json!({"username": "John", "email": "notanemail", "password": "SecurePass123"}), "invalid email"),
        (json!({"username": "John", "email": "user@", "password": "SecurePass123"}), "incomplete email"),
        (json!({"username": "J", "email": "john@example.com", "password": "SecurePass123"}), "short username"),
        (json!({"username": "John", "email": "john@example.com", "password": "short"}), "short password"),
        (json!({"username": "John", "email": "john@example.com"}), "missing password"),
        (json!({}), "missing all fields"),
    ];

    for (body, reason) in test_cases {
        let response = app.post_json("signup", &body).await;
        assert_eq!(400, response.status().as_u16(), "Should reject request: {}", reason);
    }
}

#[tokio::test]
async fn signup_returns_409_for_duplicate_email() {
    let app = spawn_app();

    assert_eq!(201, app.signup("john@example.com").await.status().as_u16());

    let response = app.signup("john@example.com").await;
    assert_eq!(409, response.status().as_u16());
    assert_eq!(error_code(response).await, "DUPLICATE_ENTRY");
}

// --- Login Tests ---

#[tokio::test]
async fn login_returns_token_pair() {
    let app = spawn_app();

    let body = app.logged_in("john@example.com").await;

    assert!(field(&body, "access_token").starts_with("Bearer "));
    assert!(uuid::Uuid::parse_str(field(&body, "refresh_token")).is_ok());
    assert_eq!(field(&body, "email"), "john@example.com");
    assert!(body.get("id").and_then(Value::as_i64).is_some());
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let app = spawn_app();
    app.signup("john@example.com").await;

    let unknown = app.login("nobody@example.com", "SecurePass123").await;
    assert_eq!(401, unknown.status().as_u16());
    let unknown: Value = unknown.json().await.unwrap();

    let wrong = app.login("john@example.com", "WrongPass123").await;
    assert_eq!(401, wrong.status().as_u16());
    let wrong: Value = wrong.json().await.unwrap();

    assert_eq!(field(&unknown, "code"), "INVALID_CREDENTIALS");
    assert_eq!(field(&unknown, "code"), field(&wrong, "code"));
    assert_eq!(field(&unknown, "message"), field(&wrong, "message"));
}

// --- Protected Route Tests ---

#[tokio::test]
async fn protected_routes_reject_missing_or_malformed_header() {
    let app = spawn_app();
    let body = app.logged_in("john@example.com").await;
    let bare = field(&body, "access_token").trim_start_matches("Bearer ").to_string();

    let missing = app
        .client
        .post(&app.url("logout"))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(401, missing.status().as_u16());

    for header in [bare.clone(), format!("Token {}", bare), "Bearer not.a.jwt".to_string()] {
        let response = app.logout(&header).await;
        assert_eq!(401, response.status().as_u16(), "accepted {}", header);
        assert_eq!(error_code(response).await, "UNAUTHORIZED");
    }
}

#[tokio::test]
async fn protected_routes_reject_wrong_method_with_405() {
    let app = spawn_app();

    let get_logout = app
        .client
        .get(&app.url("logout"))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(405, get_logout.status().as_u16());

    let post_delete = app
        .client
        .post(&app.url("delete_user"))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(405, post_delete.status().as_u16());
}

#[tokio::test]
async fn logout_revokes_access_token() {
    let app = spawn_app();
    let body = app.logged_in("john@example.com").await;
    let access_token = field(&body, "access_token");

    let response = app.logout(access_token).await;
    assert_eq!(200, response.status().as_u16());

    let again = app.logout(access_token).await;
    assert_eq!(401, again.status().as_u16());
    assert_eq!(error_code(again).await, "UNAUTHORIZED");
}

#[tokio::test]
async fn authentication_fails_closed_while_revocation_store_is_down() {
    let app = spawn_app();
    let body = app.logged_in("john@example.com").await;
    let access_token = field(&body, "access_token");

    app.cache.set_available(false);
    let response = app.logout(access_token).await;
    assert_eq!(503, response.status().as_u16());

    app.cache.set_available(true);
    let response = app.logout(access_token).await;
    assert_eq!(200, response.status().as_u16());
}

// --- Refresh Tests ---

#[tokio::test]
async fn refresh_rotates_both_tokens() {
    let app = spawn_app();
    let body = app.logged_in("john@example.com").await;
    let user_id = body.get("id").and_then(Value::as_i64).unwrap() as i32;
    let old_access = field(&body, "access_token");
    let old_refresh = field(&body, "refresh_token");

    let response = app
        .post_json(
            "refresh_token",
            &json!({"refresh_token": old_refresh, "access_token": old_access}),
        )
        .await;
    assert_eq!(200, response.status().as_u16());
    let pair: Value = response.json().await.unwrap();
    assert_ne!(field(&pair, "refresh_token"), old_refresh);

    // The old access token is blacklisted immediately
    assert_eq!(401, app.logout(old_access).await.status().as_u16());

    let records = app.store.refresh_records(user_id);
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].refresh_token.map(|t| t.to_string()).as_deref(),
        Some(field(&pair, "refresh_token"))
    );

    assert_eq!(200, app.logout(field(&pair, "access_token")).await.status().as_u16());
}

#[tokio::test]
async fn refresh_replay_is_rejected() {
    let app = spawn_app();
    let body = app.logged_in("john@example.com").await;
    let old_refresh = field(&body, "refresh_token");

    let first = app
        .post_json(
            "refresh_token",
            &json!({"refresh_token": old_refresh, "access_token": field(&body, "access_token")}),
        )
        .await;
    assert_eq!(200, first.status().as_u16());
    let pair: Value = first.json().await.unwrap();

    let replay = app
        .post_json(
            "refresh_token",
            &json!({"refresh_token": old_refresh, "access_token": field(&pair, "access_token")}),
        )
        .await;
    assert_eq!(401, replay.status().as_u16());
    assert_eq!(error_code(replay).await, "UNAUTHORIZED");
}

#[tokio::test]
async fn refresh_after_logout_is_rejected() {
    let app = spawn_app();
    let body = app.logged_in("john@example.com").await;
    let access_token = field(&body, "access_token");

    assert_eq!(200, app.logout(access_token).await.status().as_u16());

    let response = app
        .post_json(
            "refresh_token",
            &json!({"refresh_token": field(&body, "refresh_token"), "access_token": access_token}),
        )
        .await;
    assert_eq!(401, response.status().as_u16());
    assert_eq!(error_code(response).await, "UNAUTHORIZED");
}

#[tokio::test]
async fn refresh_with_expired_record_forces_login() {
    let app = spawn_app();
    let body = app.logged_in("john@example.com").await;
    let user_id = body.get("id").and_then(Value::as_i64).unwrap() as i32;
    app.store.expire_refresh_records(user_id);

    let response = app
        .post_json(
            "refresh_token",
            &json!({
                "refresh_token": field(&body, "refresh_token"),
                "access_token": field(&body, "access_token"),
            }),
        )
        .await;

    assert_eq!(401, response.status().as_u16());
    assert_eq!(error_code(response).await, "REFRESH_TOKEN_EXPIRED");
    assert!(app.store.refresh_records(user_id).is_empty());
}

// --- Delete User Tests ---

#[tokio::test]
async fn delete_user_soft_deletes_and_allows_sign_up_again() {
    let app = spawn_app();
    let body = app.logged_in("john@example.com").await;
    let access_token = field(&body, "access_token");

    let response = app.delete_user(access_token).await;
    assert_eq!(200, response.status().as_u16());

    // Token no longer matches a live user
    assert_eq!(401, app.delete_user(access_token).await.status().as_u16());
    assert_eq!(401, app.login("john@example.com", "SecurePass123").await.status().as_u16());

    assert_eq!(201, app.signup("john@example.com").await.status().as_u16());
    let restored = app.login("john@example.com", "SecurePass123").await;
    assert_eq!(200, restored.status().as_u16());
    let restored: Value = restored.json().await.unwrap();
    assert_eq!(restored.get("id"), body.get("id"));
}
