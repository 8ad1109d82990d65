//! Defines routes for the upload, session, signature, auth and task APIs.
//!
//! ## Structure
//! - **Uploads**
//!   - `POST /api/upload/multipart`: `initiate | getPartUrls | complete | abort`
//!   - `GET /api/upload/multipart/{uploadId}`: session state
//!   - `POST /api/upload/presigned-url`: single-shot PUT URL
//!
//! - **Video sessions**
//!   - `POST|GET /api/sessions`
//!   - `GET|PATCH /api/sessions/{sessionId}`
//!   - `PUT /api/sessions/{sessionId}/summary`
//!
//! - **Signatures**: `POST /api/signatures`, `GET /api/signatures/{sessionId}`
//! - **Auth**: `POST /api/auth/login`, `POST /api/auth/logout`, `GET /api/auth/me`
//! - **Tasks** (proxied to the backend)
//!   - `GET|POST /api/tasks`, `GET|PUT|DELETE /api/tasks/{taskId}`
//!   - `GET|POST /api/tasks/{taskId}/assignments`
//!   - `DELETE /api/task-assignments/{assignmentId}`

use crate::{
    handlers::{
        auth_handlers::{login, logout, me},
        health_handlers::{healthz, readyz},
        session_handlers::{create_sessions, get_session, list_sessions, update_session, update_summary},
        signature_handlers::{create_signature, signature_status},
        task_handlers::{
            create_assignment, create_task, delete_assignment, delete_task, get_task,
            list_assignments, list_tasks, update_task,
        },
        upload_handlers::{multipart, presigned_url, upload_status},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{delete, get, post, put},
};

/// Build the router. Handlers receive the shared [`AppState`].
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // uploads
        .route("/api/upload/multipart", post(multipart))
        .route("/api/upload/multipart/{upload_id}", get(upload_status))
        .route("/api/upload/presigned-url", post(presigned_url))
        // video sessions
        .route("/api/sessions", post(create_sessions).get(list_sessions))
        .route(
            "/api/sessions/{session_id}",
            get(get_session).patch(update_session),
        )
        .route("/api/sessions/{session_id}/summary", put(update_summary))
        // signatures
        .route("/api/signatures", post(create_signature))
        .route("/api/signatures/{session_id}", get(signature_status))
        // auth
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        // tasks
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/{task_id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route(
            "/api/tasks/{task_id}/assignments",
            get(list_assignments).post(create_assignment),
        )
        .route(
            "/api/task-assignments/{assignment_id}",
            delete(delete_assignment),
        )
}
