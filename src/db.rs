use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm::{ConnectionTrait, Schema};
use tracing::info;

use crate::entities;

pub type DbPool = DatabaseConnection;

/// Establishes the database connection pool.
pub async fn connect(database_url: &str) -> Result<DbPool, DbErr> {
    let mut options = ConnectOptions::new(database_url.to_string());
    options
        .max_connections(20)
        .min_connections(2)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .sqlx_logging(false);

    let db = Database::connect(options).await?;
    info!("database connection established");
    Ok(db)
}

/// Creates any missing tables from the entity definitions. Used for sqlite
/// development databases and the test harness; production schemas are managed
/// out of band.
pub async fn ensure_schema(db: &DbPool) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut statements = vec![
        schema.create_table_from_entity(entities::gateway_account::Entity),
        schema.create_table_from_entity(entities::charge::Entity),
        schema.create_table_from_entity(entities::charge_event::Entity),
        schema.create_table_from_entity(entities::refund::Entity),
    ];
    for statement in &mut statements {
        statement.if_not_exists();
        db.execute(backend.build(&*statement)).await?;
    }
    Ok(())
}
