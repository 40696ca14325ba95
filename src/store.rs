use sqlx::SqlitePool;
use std::path::PathBuf;

use crate::db::{create_pool, run_migrations};
use crate::error::{Result, TrackerError};

const APP_DIR: &str = "focuslog";
const DB_FILE: &str = "tracker.db";

/// Handle to the on-disk database. Opening runs migrations, so a freshly
/// created store is immediately usable.
#[derive(Debug)]
pub struct StoreContext {
    pub db_path: PathBuf,
    pub pool: SqlitePool,
}

impl StoreContext {
    /// Resolve the database location.
    ///
    /// `FOCUSLOG_DB` overrides everything; otherwise the database lives in
    /// the platform data directory under `focuslog/tracker.db`.
    pub fn resolve_db_path() -> Result<PathBuf> {
        if let Ok(env_path) = std::env::var("FOCUSLOG_DB") {
            return Ok(PathBuf::from(env_path));
        }

        let data_dir = dirs::data_dir().ok_or_else(|| {
            TrackerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine a data directory for this platform",
            ))
        })?;

        Ok(data_dir.join(APP_DIR).join(DB_FILE))
    }

    /// Open the store at the resolved path, creating parent directories and
    /// applying migrations as needed.
    pub async fn open() -> Result<Self> {
        let db_path = Self::resolve_db_path()?;
        Self::open_at(db_path).await
    }

    pub async fn open_at(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = create_pool(&db_path).await?;
        run_migrations(&pool).await?;

        tracing::debug!(db_path = %db_path.display(), "store opened");
        Ok(StoreContext { db_path, pool })
    }
}
