//! Integration tests for the user-management server

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use actix_web::web;
use user_management::configuration::SessionSettings;
use user_management::memory::{MemoryCache, MemoryStore};
use user_management::session::SessionService;
use user_management::startup::run;

fn spawn_app() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let settings = SessionSettings::default();
    let store = Arc::new(MemoryStore::new(Duration::from_secs(300)));
    let sessions = SessionService::new(
        &settings,
        store.clone(),
        store.clone(),
        store,
        Arc::new(MemoryCache::new()),
    );

    let server = run(listener, web::Data::new(sessions))
        .expect("Failed to create server");

    let _ = tokio::spawn(async move {
        let _ = server.await;
    });

    format!("http://127.0.0.1:{}", port)
}

#[tokio::test]
async fn health_check_works() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/health_check", addr))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    assert_eq!(Some(0), response.content_length());
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/api/v1/auth/nowhere", addr))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(404, response.status().as_u16());
}
