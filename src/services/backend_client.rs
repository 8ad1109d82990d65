//! Client for the remote backend API that owns users, tasks and task
//! assignments. Requests carry the caller's bearer token unchanged.

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend returned {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("backend unreachable: {0}")]
    Http(#[from] reqwest::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    Admin,
    Trainer,
    Reviewer,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Trainer => "TRAINER",
            Self::Reviewer => "REVIEWER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ADMIN" => Some(Self::Admin),
            "TRAINER" => Some(Self::Trainer),
            "REVIEWER" => Some(Self::Reviewer),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// The user as the backend reports it from `/auth/me`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BackendUser {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
}

#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn login(&self, credentials: &LoginRequest) -> BackendResult<TokenResponse> {
        let response = self
            .http
            .post(self.url("/auth/login"))
            .json(credentials)
            .send()
            .await?;
        Ok(checked(response).await?.json().await?)
    }

    /// Resolve the user a token belongs to. The backend verifies the token.
    pub async fn current_user(&self, token: &str) -> BackendResult<BackendUser> {
        let response = self
            .http
            .get(self.url("/auth/me"))
            .bearer_auth(token)
            .send()
            .await?;
        Ok(checked(response).await?.json().await?)
    }

    /// Forward a JSON request and return the backend's status and body.
    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        token: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> BackendResult<(StatusCode, Value)> {
        debug!(%method, path, "forwarding to backend");
        let mut request = self
            .http
            .request(method, self.url(path))
            .bearer_auth(token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = checked(request.send().await?).await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        Ok((status, value))
    }
}

/// Turn non-2xx responses into [`BackendError::Status`], keeping the
/// backend's `detail`/`message` text when there is one.
async fn checked(response: reqwest::Response) -> BackendResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status,
        message: error_message(&text),
    })
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["detail", "message", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}
