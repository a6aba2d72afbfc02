//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness, no I/O
//! - GET /readyz   -> checks the metadata database and the storage directory

use crate::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn from_result(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self {
                ok: true,
                error: None,
            },
            Err(error) => Self {
                ok: false,
                error: Some(error),
            },
        }
    }
}

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// HTTP 200 when every check passes, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let storage = state.library.storage();

    let mut checks = BTreeMap::new();
    checks.insert(
        "database",
        CheckStatus::from_result(check_database(&storage.db).await),
    );
    checks.insert(
        "storage",
        CheckStatus::from_result(check_disk(&storage.base_path).await),
    );

    let healthy = checks.values().all(|c| c.ok);
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if healthy { "ok" } else { "error" },
        checks,
    };
    (status, Json(body))
}

async fn check_database(db: &sqlx::SqlitePool) -> Result<(), String> {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(db).await {
        Ok(1) => Ok(()),
        Ok(v) => Err(format!("unexpected result: {}", v)),
        Err(e) => Err(format!("error: {}", e)),
    }
}

/// Write, read back and delete a probe file under `base`.
async fn check_disk(base: &Path) -> Result<(), String> {
    let probe = base.join(format!(".readyz-{}", Uuid::new_v4()));
    let result = async {
        fs::write(&probe, b"readyz")
            .await
            .map_err(|e| format!("could not write probe file: {}", e))?;
        let bytes = fs::read(&probe)
            .await
            .map_err(|e| format!("could not read probe file: {}", e))?;
        if bytes != b"readyz" {
            return Err("probe file content mismatch".to_string());
        }
        Ok(())
    }
    .await;
    let _ = fs::remove_file(&probe).await;
    result
}
