//! Route table.
//!
//! ## Structure
//! - **Health**: `GET /healthz`, `GET /readyz`
//! - **Sessions** (no token needed except `/auth/session`)
//!   - `POST /auth/signup`, `POST /auth/login`, `POST /auth/refresh`
//!   - `GET  /auth/session`
//! - **Caller-scoped API** (bearer token required)
//!   - `GET|PATCH /api/profile`
//!   - `GET    /api/roles`
//!   - `POST   /api/admin/roles`, `DELETE /api/admin/roles/{user_id}/{role}`
//!   - `GET|POST /api/books`
//!   - `GET    /api/books/{id}`, `DELETE /api/books/{id}`
//!   - `GET    /api/books/{id}/download`
//!   - `GET    /api/storage/usage`

use crate::{
    AppState,
    constants::MAX_UPLOAD_BODY_BYTES,
    handlers::{
        account_handlers::{
            get_profile, grant_role, list_roles, refresh, revoke_role, session, sign_in, sign_up,
            update_profile,
        },
        book_handlers::{
            delete_book, download_book, get_book, list_books, storage_usage, upload_book,
        },
        health_handlers::{healthz, readyz},
    },
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

/// Build the router with shared state attached.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/auth/signup", post(sign_up))
        .route("/auth/login", post(sign_in))
        .route("/auth/refresh", post(refresh))
        .route("/auth/session", get(session))
        .route("/api/profile", get(get_profile).patch(update_profile))
        .route("/api/roles", get(list_roles))
        .route("/api/admin/roles", post(grant_role))
        .route("/api/admin/roles/{user_id}/{role}", delete(revoke_role))
        .route(
            "/api/books",
            get(list_books)
                .post(upload_book)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BODY_BYTES)),
        )
        .route("/api/books/{id}", get(get_book).delete(delete_book))
        .route("/api/books/{id}/download", get(download_book))
        .route("/api/storage/usage", get(storage_usage))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
