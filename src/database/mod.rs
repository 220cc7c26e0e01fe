use log::info;
use secrecy::ExposeSecret;
use sqlx::{migrate::MigrateDatabase, postgres::PgPoolOptions, PgPool, Postgres};

use crate::configuration::DatabaseSettings;

pub mod memory;
pub mod models;
pub mod postgres;
pub mod repository;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use repository::{ClientStore, DeliveryStore, RegistrationStore, TokenStore};

pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool, sqlx::Error> {
    let uri = settings.url.expose_secret();

    if !Postgres::database_exists(uri).await? {
        info!("Creating database...");
        Postgres::create_database(uri).await?;
    }

    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(uri)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    info!("Running migrations...");

    sqlx::migrate!().run(pool).await
}
