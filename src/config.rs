use crate::constants::{
    DEFAULT_ACCESS_TOKEN_TTL_SECS, DEFAULT_REFRESH_TOKEN_TTL_SECS, MIN_JWT_SECRET_LEN,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("jwt_secret", &"<redacted>")
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .finish()
    }
}

/// One-shot maintenance modes selected on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Serve,
    Migrate,
    GrantAdmin(String),
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Personal digital library service")]
pub struct Args {
    /// Host to bind to (overrides BOOKSHELF_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BOOKSHELF_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where book payloads are stored (overrides BOOKSHELF_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides BOOKSHELF_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Grant the admin role to an existing account and exit
    #[arg(long, value_name = "EMAIL", conflicts_with = "migrate")]
    pub grant_admin: Option<String>,
}

impl AppConfig {
    /// Parse `.env`, environment variables and CLI args into AppConfig and the run mode.
    pub fn from_env_and_args() -> Result<(Self, Mode)> {
        dotenvy::dotenv().ok();
        let args = Args::parse();

        let mode = if args.migrate {
            Mode::Migrate
        } else if let Some(email) = args.grant_admin.clone() {
            Mode::GrantAdmin(email)
        } else {
            Mode::Serve
        };

        Ok((Self::from_args(args)?, mode))
    }

    /// Merge parsed CLI args over environment values.
    pub fn from_args(args: Args) -> Result<Self> {
        let env_host = env::var("BOOKSHELF_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("BOOKSHELF_PORT", 3000u16)?;
        let env_storage =
            env::var("BOOKSHELF_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("BOOKSHELF_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/bookshelf.db".into());

        let jwt_secret =
            env::var("BOOKSHELF_JWT_SECRET").context("BOOKSHELF_JWT_SECRET must be set")?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            anyhow::bail!(
                "BOOKSHELF_JWT_SECRET must be at least {} bytes",
                MIN_JWT_SECRET_LEN
            );
        }

        let access_token_ttl_secs = parse_env(
            "BOOKSHELF_ACCESS_TOKEN_TTL_SECS",
            DEFAULT_ACCESS_TOKEN_TTL_SECS,
        )?;
        let refresh_token_ttl_secs = parse_env(
            "BOOKSHELF_REFRESH_TOKEN_TTL_SECS",
            DEFAULT_REFRESH_TOKEN_TTL_SECS,
        )?;

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            jwt_secret,
            access_token_ttl_secs,
            refresh_token_ttl_secs,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
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
