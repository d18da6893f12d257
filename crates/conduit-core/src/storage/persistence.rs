//! Debounced persistence for non-tool-call-bearing messages.
//!
//! SPEC_FULL.md §4.2 mandates two selectable strategies. Immediate mode needs no extra
//! machinery — every write lands in SQLite before the caller's future resolves. Debounced mode
//! stages plain conversational messages (never assistant messages carrying `tool_calls`, which
//! §9's "hot-path persistence bug" note forbids debouncing) and flushes them on a timer, on
//! reaching the batch cap, or on shutdown. Grounded in SPEC_FULL.md §9's "one worker per durable
//! subsystem with a bounded in-memory queue and a shutdown drain" guidance.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::interval;

use crate::error::StorageError;

use super::database::Database;
use super::messages::MessageRepo;
use super::types::NewMessage;

const COALESCE_WINDOW: Duration = Duration::from_secs(2);
const MAX_BATCH: usize = 50;

struct Staged {
    session_id: String,
    message: NewMessage,
}

pub struct Debouncer {
    db_path: PathBuf,
    queue: Arc<Mutex<Vec<Staged>>>,
}

impl Debouncer {
    pub fn spawn(db_path: PathBuf) -> Arc<Self> {
        let debouncer = Arc::new(Self {
            db_path,
            queue: Arc::new(Mutex::new(Vec::new())),
        });
        let worker = debouncer.clone();
        tokio::spawn(async move {
            let mut ticker = interval(COALESCE_WINDOW);
            loop {
                ticker.tick().await;
                if let Err(e) = worker.flush().await {
                    tracing::error!(error = %e, "debounced flush failed");
                }
            }
        });
        debouncer
    }

    pub async fn stage(&self, session_id: &str, message: NewMessage) {
        let mut queue = self.queue.lock().await;
        queue.push(Staged {
            session_id: session_id.to_string(),
            message,
        });
        let should_flush_now = queue.len() >= MAX_BATCH;
        drop(queue);
        if should_flush_now {
            if let Err(e) = self.flush().await {
                tracing::error!(error = %e, "batch-triggered flush failed");
            }
        }
    }

    /// Drains the queue and persists everything staged so far. Safe to call concurrently with
    /// `stage`; safe to call on shutdown.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let staged: Vec<Staged> = {
            let mut queue = self.queue.lock().await;
            std::mem::take(&mut *queue)
        };
        if staged.is_empty() {
            return Ok(());
        }
        let mut by_session: HashMap<String, Vec<NewMessage>> = HashMap::new();
        for item in staged {
            by_session.entry(item.session_id).or_default().push(item.message);
        }
        let db = Database::new(&self.db_path)?;
        let repo = MessageRepo::new(&db);
        for (session_id, messages) in by_session {
            for message in messages {
                repo.append(&session_id, message)?;
            }
        }
        Ok(())
    }
}
