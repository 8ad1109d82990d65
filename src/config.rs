use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub bucket: String,
    pub region: String,
    pub s3_endpoint: Option<String>,
    pub s3_force_path_style: bool,
    pub backend_url: String,
    pub documenso_url: String,
    /// Signature requests are refused while this is unset.
    pub documenso_api_key: Option<String>,
    pub release_form_path: Option<PathBuf>,
    pub default_user_name: String,
    pub default_user_email: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Video upload service")]
pub struct Args {
    /// Host to bind to (overrides UPLOADZ_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOADZ_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides UPLOADZ_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket receiving uploads (overrides UPLOADZ_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// S3-compatible endpoint, e.g. MinIO (overrides UPLOADZ_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Backend API base URL (overrides UPLOADZ_BACKEND_URL)
    #[arg(long)]
    pub backend_url: Option<String>,

    /// Release form sent for signature (overrides UPLOADZ_RELEASE_FORM)
    #[arg(long)]
    pub release_form: Option<PathBuf>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Upload a file through a running server
    Upload {
        /// File to upload
        path: PathBuf,

        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        server: String,

        /// Bearer token for an authenticated upload
        #[arg(long, env = "UPLOADZ_TOKEN")]
        token: Option<String>,

        /// MIME type; guessed from the extension when omitted
        #[arg(long)]
        content_type: Option<String>,
    },
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig, the migrate
    /// flag and an optional subcommand.
    pub fn from_env_and_args() -> Result<(Self, bool, Option<Command>)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env_or("UPLOADZ_HOST", "0.0.0.0");
        let env_port = env_parse("UPLOADZ_PORT", 3000u16)?;
        let env_db = env_or("UPLOADZ_DATABASE_URL", "sqlite://./data/uploadz.db");
        let env_bucket = env_or("UPLOADZ_BUCKET", "video-uploads");
        let env_backend = env_or("UPLOADZ_BACKEND_URL", "http://localhost:8000");

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            bucket: args.bucket.unwrap_or(env_bucket),
            region: env_or("UPLOADZ_REGION", "us-east-1"),
            s3_endpoint: args.s3_endpoint.or_else(|| env_opt("UPLOADZ_S3_ENDPOINT")),
            s3_force_path_style: env_parse("UPLOADZ_S3_FORCE_PATH_STYLE", false)?,
            backend_url: args.backend_url.unwrap_or(env_backend),
            documenso_url: env_or("UPLOADZ_DOCUMENSO_URL", "https://app.documenso.com"),
            documenso_api_key: env_opt("UPLOADZ_DOCUMENSO_API_KEY"),
            release_form_path: args
                .release_form
                .or_else(|| env_opt("UPLOADZ_RELEASE_FORM").map(PathBuf::from)),
            default_user_name: env_or("UPLOADZ_DEFAULT_USER_NAME", "Anonymous User"),
            default_user_email: env_or("UPLOADZ_DEFAULT_USER_EMAIL", "anonymous@example.com"),
        };

        Ok((cfg, args.migrate, args.command))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
