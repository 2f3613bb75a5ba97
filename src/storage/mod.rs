/// Storage layer
///
/// Owns the SQLite connection pool shared by the execution history store and the
/// per-task data-access handles.

pub mod database;

pub use database::Database;

/// Throw-away database in a temp directory; keep the `TempDir` alive while in use
#[cfg(test)]
pub(crate) async fn temp_database() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let config = crate::config::DatabaseConfig {
        path: dir.path().join("sync.db").to_string_lossy().into_owned(),
        max_connections: 16,
    };
    let database = Database::connect(&config).await.unwrap();
    (dir, database)
}
