pub mod models;
pub mod test_utils;

use common::config::AppConfig;
use common::database::{database_file, database_url};
use log::{LevelFilter, info};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use std::path::Path;

/// Connects to the database named by `DATABASE_PATH` in the global config.
pub async fn connect() -> Result<DatabaseConnection, DbErr> {
    connect_to(&AppConfig::global().database_path).await
}

/// Connects to `path_or_url`, which is either a DSN or a SQLite file path.
///
/// For SQLite files the parent directory is created first.
pub async fn connect_to(path_or_url: &str) -> Result<DatabaseConnection, DbErr> {
    let url = database_url(path_or_url);
    if let Some(parent) = database_file(path_or_url).and_then(|f| Path::new(f).parent()) {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbErr::Custom(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
    }

    let mut opts = ConnectOptions::new(url.clone());
    opts.sqlx_logging(true).sqlx_logging_level(LevelFilter::Debug);

    let db = Database::connect(opts).await?;
    info!("Connected to database at {url}");
    Ok(db)
}
