use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mindflow_core::StudySession;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

pub type SessionHandle = Arc<Mutex<StudySession>>;

/// Sessions untouched for this long are dropped when a new one is created.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

struct Entry {
    handle: SessionHandle,
    last_used: Instant,
}

/// In-memory registry of study sessions, one per browser tab.
///
/// Each session sits behind its own mutex, held for the whole of an action,
/// so a user's actions run one at a time while different users never wait on
/// each other.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, Entry>>>,
    idle_timeout: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            idle_timeout,
        }
    }

    pub async fn create(&self) -> (Uuid, SessionHandle) {
        let id = Uuid::new_v4();
        let handle = Arc::new(Mutex::new(StudySession::new()));

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        let now = Instant::now();
        // A handle cloned out of the map belongs to a request still running.
        sessions.retain(|_, entry| {
            Arc::strong_count(&entry.handle) > 1
                || now.duration_since(entry.last_used) <= self.idle_timeout
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::info!("Dropped {} idle session(s)", evicted);
        }

        sessions.insert(
            id,
            Entry {
                handle: handle.clone(),
                last_used: now,
            },
        );
        tracing::info!("Created session {} ({} active)", id, sessions.len());
        (id, handle)
    }

    /// Looks a session up and marks it as used.
    pub async fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(id)?;
        entry.last_used = Instant::now();
        Some(entry.handle.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
