//! Shared harness: a router over a throwaway SQLite file and storage dir.
//! Note: #[allow(dead_code)] because each test file compiles common/ separately.

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
};
use bookshelf::{AppState, config::AppConfig, db};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use std::path::PathBuf;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_SECRET: &str = "integration-test-secret-at-least-32-bytes";
#[allow(dead_code)]
pub const BOUNDARY: &str = "bookshelf-test-boundary";

#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub pool: SqlitePool,
    pub storage_dir: PathBuf,
    _temp_dir: TempDir,
}

/// A signed-up account.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: Uuid,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
}

#[allow(dead_code)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[allow(dead_code)]
impl RawResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

#[allow(dead_code)]
impl TestServer {
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage_dir = temp_dir.path().join("objects");
        std::fs::create_dir_all(&storage_dir).expect("Failed to create storage directory");
        let database_url = format!("sqlite://{}", temp_dir.path().join("bookshelf.db").display());

        let pool = db::connect(&database_url)
            .await
            .expect("Failed to open database");
        db::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let config = AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            storage_dir: storage_dir.to_string_lossy().into_owned(),
            database_url,
            jwt_secret: TEST_SECRET.into(),
            access_token_ttl_secs: 3600,
            refresh_token_ttl_secs: 86_400,
        };
        let state = AppState::initialize(config, pool.clone())
            .await
            .expect("Failed to initialize state");
        let router = bookshelf::app(state.clone());

        Self {
            router,
            state,
            pool,
            storage_dir,
            _temp_dir: temp_dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> RawResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        RawResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn json_request(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(v) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };
        let response = self.send(builder.body(body).unwrap()).await;
        let json = response.json();
        (response.status, json)
    }

    pub async fn sign_up(&self, email: &str) -> TestUser {
        let (status, body) = self
            .json_request(
                "POST",
                "/auth/signup",
                Some(json!({ "email": email, "password": "hunter22", "display_name": "Reader" })),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "signup failed: {body}");
        TestUser {
            id: body["user"]["id"].as_str().unwrap().parse().unwrap(),
            email: body["user"]["email"].as_str().unwrap().to_string(),
            access_token: body["access_token"].as_str().unwrap().to_string(),
            refresh_token: body["refresh_token"].as_str().unwrap().to_string(),
        }
    }

    /// Upload through `POST /api/books`. `author` is omitted when `None`.
    pub async fn upload(
        &self,
        token: &str,
        title: &str,
        author: Option<&str>,
        file_name: &str,
        content: &[u8],
    ) -> RawResponse {
        let mut fields = vec![("title", title)];
        if let Some(author) = author {
            fields.push(("author", author));
        }
        let body = multipart_body(&fields, Some((file_name, "application/pdf", content)));
        let request = Request::builder()
            .method("POST")
            .uri("/api/books")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, multipart_content_type())
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    pub async fn download(&self, token: &str, book_id: &str) -> RawResponse {
        let request = Request::builder()
            .method("GET")
            .uri(format!("/api/books/{}/download", book_id))
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// Number of index rows in the object store for `user_id`.
    pub async fn object_count(&self, user_id: Uuid) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM objects WHERE owner_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    /// Payload files on disk under `books/{user_id}/`.
    pub fn payload_files(&self, user_id: Uuid) -> Vec<PathBuf> {
        let dir = self.storage_dir.join("books").join(user_id.to_string());
        match std::fs::read_dir(&dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[allow(dead_code)]
pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

/// Hand-rolled `multipart/form-data` body.
#[allow(dead_code)]
pub fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content_type, content)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}
