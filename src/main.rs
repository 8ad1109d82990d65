use anyhow::Result;
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod client;
mod config;
mod db;
mod errors;
mod extractors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;
mod storage;

use services::{
    auth_service::AuthService,
    backend_client::BackendClient,
    signature_service::{DocumensoClient, SignatureProvider, SignatureService},
    upload_service::UploadService,
    video_service::VideoService,
};
use storage::s3::{S3Config, S3Storage};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate, command) = config::AppConfig::from_env_and_args()?;

    // --- Client mode ---
    if let Some(config::Command::Upload {
        path,
        server,
        token,
        content_type,
    }) = command
    {
        return client::run(&server, token, path, content_type).await;
    }

    tracing::info!("Starting uploadz with config: {:?}", redacted(&cfg));

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);

    // --- Handle migration mode ---
    if migrate {
        db::apply_schema(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize collaborators ---
    let storage = Arc::new(
        S3Storage::new(S3Config {
            bucket: cfg.bucket.clone(),
            region: cfg.region.clone(),
            endpoint: cfg.s3_endpoint.clone(),
            force_path_style: cfg.s3_force_path_style,
        })
        .await,
    );
    let http = reqwest::Client::new();
    let backend = BackendClient::new(http.clone(), &cfg.backend_url);
    let provider = cfg.documenso_api_key.as_ref().map(|key| {
        Arc::new(DocumensoClient::new(http.clone(), &cfg.documenso_url, key))
            as Arc<dyn SignatureProvider>
    });
    if provider.is_none() {
        tracing::warn!("UPLOADZ_DOCUMENSO_API_KEY not set; signature requests are disabled");
    }

    // --- Initialize core services ---
    let videos = VideoService::new(db.clone(), cfg.bucket.clone());
    let uploads = UploadService::new(db.clone(), storage, videos.clone());
    let signatures = SignatureService::new(provider, videos.clone(), cfg.release_form_path.clone());
    let auth = AuthService::new(db.clone(), backend.clone());

    let purged = auth.purge_expired().await?;
    if purged > 0 {
        tracing::info!("Purged {} expired logins", purged);
    }

    let app_state = state::AppState {
        db,
        uploads,
        videos,
        signatures,
        auth,
        backend,
        defaults: state::UserDefaults {
            name: cfg.default_user_name.clone(),
            email: cfg.default_user_email.clone(),
        },
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(app_state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Config as logged at startup, without the API key.
fn redacted(cfg: &config::AppConfig) -> config::AppConfig {
    let mut cfg = cfg.clone();
    if cfg.documenso_api_key.is_some() {
        cfg.documenso_api_key = Some("***".into());
    }
    cfg
}
