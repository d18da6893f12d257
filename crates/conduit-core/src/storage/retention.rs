//! Single-TTL retention sweep (SPEC_FULL.md §4.2.1; see DESIGN.md for the Open Question
//! decision this resolves).

use std::path::PathBuf;
use std::time::Duration;

use crate::error::StorageError;

use super::database::Database;
use super::sessions::SessionRepo;

pub async fn sweep_once(db_path: &PathBuf, ttl: Duration) -> Result<usize, StorageError> {
    let db_path = db_path.clone();
    tokio::task::spawn_blocking(move || {
        let db = Database::new(&db_path)?;
        let repo = SessionRepo::new(&db);
        repo.cleanup(chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::days(30)))
    })
    .await
    .map_err(|e| StorageError::NotFound(format!("retention sweep task panicked: {e}")))?
}

/// Spawns a background task that calls [`sweep_once`] on a fixed interval until the process
/// exits. Interval defaults to once per hour — frequent enough that the TTL is respected closely
/// without hammering the database.
pub fn spawn_periodic(db_path: PathBuf, ttl: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        loop {
            ticker.tick().await;
            match sweep_once(&db_path, ttl).await {
                Ok(n) if n > 0 => tracing::info!(purged = n, "retention sweep purged sessions"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "retention sweep failed"),
            }
        }
    });
}
