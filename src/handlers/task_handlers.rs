//! Task and task-assignment endpoints, proxied to the backend with the
//! caller's token. Mutations are checked against the verified role first.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{Method, StatusCode},
};
use serde_json::Value;
use std::collections::HashMap;

use crate::{
    errors::AppError,
    services::{auth_service::AuthUser, backend_client::UserRole},
    state::AppState,
};

type Proxied = Result<(StatusCode, Json<Value>), AppError>;

async fn forward(
    state: &AppState,
    user: &AuthUser,
    method: Method,
    path: &str,
    query: &[(&str, String)],
    body: Option<&Value>,
) -> Proxied {
    let (status, value) = state
        .backend
        .forward(method, path, &user.token, query, body)
        .await?;
    Ok((status, Json(value)))
}

fn query_pairs(query: &HashMap<String, String>) -> Vec<(&str, String)> {
    query.iter().map(|(k, v)| (k.as_str(), v.clone())).collect()
}

/// `GET /api/tasks`
pub async fn list_tasks(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<HashMap<String, String>>,
) -> Proxied {
    forward(&state, &user, Method::GET, "/tasks/", &query_pairs(&query), None).await
}

/// `POST /api/tasks`: the creator is always the verified caller.
pub async fn create_task(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<Value>,
) -> Proxied {
    user.require_role(UserRole::Admin)?;
    let query = [("creator_id", user.user_id.clone())];
    forward(&state, &user, Method::POST, "/tasks/", &query, Some(&body)).await
}

/// `GET /api/tasks/{taskId}`
pub async fn get_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> Proxied {
    forward(&state, &user, Method::GET, &format!("/tasks/{}", task_id), &[], None).await
}

/// `PUT /api/tasks/{taskId}`
pub async fn update_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
    Json(body): Json<Value>,
) -> Proxied {
    user.require_role(UserRole::Admin)?;
    let path = format!("/tasks/{}", task_id);
    forward(&state, &user, Method::PUT, &path, &[], Some(&body)).await
}

/// `DELETE /api/tasks/{taskId}`
pub async fn delete_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> Proxied {
    user.require_role(UserRole::Admin)?;
    let path = format!("/tasks/{}", task_id);
    forward(&state, &user, Method::DELETE, &path, &[], None).await
}

/// `GET /api/tasks/{taskId}/assignments`
pub async fn list_assignments(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> Proxied {
    let path = format!("/tasks/{}/assignments", task_id);
    forward(&state, &user, Method::GET, &path, &[], None).await
}

/// `POST /api/tasks/{taskId}/assignments?user_id=`
pub async fn create_assignment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Proxied {
    user.require_role(UserRole::Admin)?;
    let assignee = query
        .get("user_id")
        .filter(|id| !id.is_empty())
        .cloned()
        .ok_or_else(|| AppError::bad_request("user_id is required"))?;
    let path = format!("/tasks/{}/assignments", task_id);
    forward(&state, &user, Method::POST, &path, &[("user_id", assignee)], None).await
}

/// `DELETE /api/task-assignments/{assignmentId}`
pub async fn delete_assignment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(assignment_id): Path<String>,
) -> Proxied {
    user.require_role(UserRole::Admin)?;
    let path = format!("/task-assignments/{}", assignment_id);
    forward(&state, &user, Method::DELETE, &path, &[], None).await
}
