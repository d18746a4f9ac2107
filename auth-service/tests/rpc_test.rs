//! Session Authority RPC surface over real HTTP

use std::sync::Arc;

use auth_service::notifier::LogNotifier;
use auth_service::storage::{UserPatch, UserRepository, UserStorage};
use auth_service::{Config, ServerState, api};
use serde_json::{Value, json};
use shared::models::Role;

const SECRET: &str = "integration-test-secret-0123456789abcdef";

struct TestServer {
    base: String,
    client: reqwest::Client,
    users: Arc<UserStorage>,
    _dir: tempfile::TempDir,
}

async fn spawn_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        jwt_secret: SECRET.to_string(),
        password_pepper: "pepper".to_string(),
        ..Config::default()
    };
    let users = Arc::new(UserStorage::open(config.database_path()).unwrap());
    let state = ServerState::with_repository(config, users.clone(), Arc::new(LogNotifier)).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, api::router(state)).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
        users,
        _dir: dir,
    }
}

impl TestServer {
    async fn post(&self, path: &str, token: Option<&str>, body: Value) -> (u16, Value) {
        let mut req = self.client.post(format!("{}{}", self.base, path)).json(&body);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.unwrap();
        (resp.status().as_u16(), resp.json().await.unwrap())
    }

    async fn get(&self, path: &str, token: Option<&str>) -> (u16, Value) {
        let mut req = self.client.get(format!("{}{}", self.base, path));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.unwrap();
        (resp.status().as_u16(), resp.json().await.unwrap())
    }

    async fn register_and_login(&self, name: &str, email: &str) -> (String, String) {
        let (status, body) = self
            .post(
                "/rpc/auth/register",
                None,
                json!({"name": name, "email": email, "password": "secret123"}),
            )
            .await;
        assert_eq!(status, 200, "{body}");
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = self
            .post("/rpc/auth/login", None, json!({"email": email, "password": "secret123"}))
            .await;
        assert_eq!(status, 200, "{body}");
        (id, body["data"]["token"].as_str().unwrap().to_string())
    }

    async fn promote(&self, id: &str) {
        let patch = UserPatch {
            role: Some(Role::Admin),
            ..UserPatch::default()
        };
        self.users.patch(id, &patch).await.unwrap();
    }
}

#[tokio::test]
async fn test_register_conflict_is_409() {
    let server = spawn_server().await;
    server.register_and_login("Alice", "alice@example.com").await;

    let (status, body) = server
        .post(
            "/rpc/auth/register",
            None,
            json!({"name": "A2", "email": "ALICE@example.com", "password": "secret123"}),
        )
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["code"], 8002);
}

#[tokio::test]
async fn test_login_errors_look_identical() {
    let server = spawn_server().await;
    server.register_and_login("Bob", "bob@example.com").await;

    let (s1, b1) = server
        .post("/rpc/auth/login", None, json!({"email": "bob@example.com", "password": "nope-nope"}))
        .await;
    let (s2, b2) = server
        .post("/rpc/auth/login", None, json!({"email": "ghost@example.com", "password": "secret123"}))
        .await;
    assert_eq!(s1, 401);
    assert_eq!(s1, s2);
    assert_eq!(b1, b2);
}

#[tokio::test]
async fn test_me_requires_bearer() {
    let server = spawn_server().await;
    let (status, body) = server.get("/rpc/auth/me", None).await;
    assert_eq!(status, 401);
    assert_eq!(body["code"], 1001);

    let (id, token) = server.register_and_login("Cleo", "cleo@example.com").await;
    let (status, body) = server.get("/rpc/auth/me", Some(&token)).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["id"], id.as_str());
    assert!(body["data"].get("password_hash").is_none());
}

#[tokio::test]
async fn test_demoted_admin_loses_access() {
    let server = spawn_server().await;
    let (admin_id, admin_token) = server.register_and_login("Root", "root@example.com").await;
    server.promote(&admin_id).await;

    let (status, body) = server.get("/rpc/auth/users?page=1&limit=10", Some(&admin_token)).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["data"]["total"], 1);

    let patch = UserPatch {
        role: Some(Role::Customer),
        ..UserPatch::default()
    };
    server.users.patch(&admin_id, &patch).await.unwrap();

    let (status, body) = server.get("/rpc/auth/users", Some(&admin_token)).await;
    assert_eq!(status, 403);
    assert_eq!(body["code"], 2001);
}

#[tokio::test]
async fn test_admin_can_grant_admin_at_registration() {
    let server = spawn_server().await;
    let (admin_id, admin_token) = server.register_and_login("Root", "root@example.com").await;
    server.promote(&admin_id).await;

    let payload = json!({"name": "Ops", "email": "ops@example.com", "password": "secret123", "role": "admin"});
    let (_, body) = server.post("/rpc/auth/register", None, payload.clone()).await;
    assert_eq!(body["data"]["role"], "customer");

    let payload = json!({"name": "Ops2", "email": "ops2@example.com", "password": "secret123", "role": "admin"});
    let (_, body) = server.post("/rpc/auth/register", Some(&admin_token), payload).await;
    assert_eq!(body["data"]["role"], "admin");
}

#[tokio::test]
async fn test_logout_then_me_fails() {
    let server = spawn_server().await;
    let (_, token) = server.register_and_login("Dan", "dan@example.com").await;

    let (status, _) = server.post("/rpc/auth/logout", Some(&token), json!({})).await;
    assert_eq!(status, 200);

    let (status, body) = server.get("/rpc/auth/me", Some(&token)).await;
    assert_eq!(status, 401);
    assert_eq!(body["code"], 1004);
}

#[tokio::test]
async fn test_malformed_authorization_header() {
    let server = spawn_server().await;
    let resp = server
        .client
        .get(format!("{}/rpc/auth/me", server.base))
        .header("Authorization", "Basic Zm9vOmJhcg==")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
}
