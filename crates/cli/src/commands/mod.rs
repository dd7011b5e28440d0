//! CLI subcommands.

pub mod discount;
pub mod migrate;
pub mod product;

use digital_storefront::db::{PgStore, create_pool};
use secrecy::SecretString;
use thiserror::Error;

/// Errors shared by every command that talks to the database.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Storage error: {0}")]
    Repository(#[from] digital_storefront::db::RepositoryError),

    #[error("Invalid input: {0}")]
    Invalid(String),
}

/// `STOREFRONT_DATABASE_URL`, falling back to `DATABASE_URL`.
pub fn database_url() -> Result<SecretString, CommandError> {
    dotenvy::dotenv().ok();

    std::env::var("STOREFRONT_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar("STOREFRONT_DATABASE_URL"))
}

/// Connect to the storefront database.
pub async fn connect() -> Result<PgStore, CommandError> {
    let url = database_url()?;
    tracing::info!("Connecting to storefront database...");
    Ok(PgStore::new(create_pool(&url).await?))
}
