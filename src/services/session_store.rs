use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDateTime;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::db::{queries, SharedConnection};
use crate::models::Session;

/// Where sessions live between messages.
pub trait SessionBackend: Send + Sync {
    fn load(&self, phone: &str) -> anyhow::Result<Option<Session>>;
    fn save(&self, session: &Session) -> anyhow::Result<()>;
    fn remove(&self, phone: &str) -> anyhow::Result<bool>;
    /// Drops sessions idle since before `cutoff`, returning how many went away.
    fn purge_idle(&self, cutoff: NaiveDateTime) -> anyhow::Result<usize>;
    fn count(&self) -> anyhow::Result<usize>;
}

#[derive(Default)]
pub struct MemoryBackend {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionBackend for MemoryBackend {
    fn load(&self, phone: &str) -> anyhow::Result<Option<Session>> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.get(phone).cloned())
    }

    fn save(&self, session: &Session) -> anyhow::Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(session.phone.clone(), session.clone());
        Ok(())
    }

    fn remove(&self, phone: &str) -> anyhow::Result<bool> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.remove(phone).is_some())
    }

    fn purge_idle(&self, cutoff: NaiveDateTime) -> anyhow::Result<usize> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, s| s.last_activity >= cutoff);
        Ok(before - sessions.len())
    }

    fn count(&self) -> anyhow::Result<usize> {
        Ok(self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len())
    }
}

/// Durable backend on the shared SQLite connection.
pub struct SqliteBackend {
    db: SharedConnection,
}

impl SqliteBackend {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }
}

impl SessionBackend for SqliteBackend {
    fn load(&self, phone: &str) -> anyhow::Result<Option<Session>> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        queries::load_session(&db, phone)
    }

    fn save(&self, session: &Session) -> anyhow::Result<()> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        queries::save_session(&db, session)
    }

    fn remove(&self, phone: &str) -> anyhow::Result<bool> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        queries::delete_session(&db, phone)
    }

    fn purge_idle(&self, cutoff: NaiveDateTime) -> anyhow::Result<usize> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        queries::purge_sessions_before(&db, &cutoff)
    }

    fn count(&self) -> anyhow::Result<usize> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(queries::count_sessions(&db)? as usize)
    }
}

/// Session storage that serializes work per phone number.
///
/// Holding the guard returned by [`SessionStore::lock`] gives exclusive access to
/// one phone's session; different phones never wait on each other.
pub struct SessionStore {
    backend: Box<dyn SessionBackend>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

pub struct SessionGuard {
    phone: String,
    _guard: OwnedMutexGuard<()>,
}

impl SessionGuard {
    pub fn phone(&self) -> &str {
        &self.phone
    }
}

impl SessionStore {
    pub fn new(backend: Box<dyn SessionBackend>) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    pub async fn lock(&self, phone: &str) -> SessionGuard {
        let key_lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(phone.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        SessionGuard {
            phone: phone.to_string(),
            _guard: key_lock.lock_owned().await,
        }
    }

    /// Loads the session of the locked phone, creating a fresh one when absent.
    pub fn load_or_new(&self, guard: &SessionGuard, now: NaiveDateTime) -> anyhow::Result<Session> {
        Ok(self
            .backend
            .load(guard.phone())?
            .unwrap_or_else(|| Session::new(guard.phone(), now)))
    }

    pub fn save(&self, guard: &SessionGuard, session: &Session) -> anyhow::Result<()> {
        anyhow::ensure!(
            guard.phone() == session.phone,
            "session for {} saved under lock of {}",
            session.phone,
            guard.phone()
        );
        self.backend.save(session)
    }

    pub fn get(&self, phone: &str) -> anyhow::Result<Option<Session>> {
        self.backend.load(phone)
    }

    pub fn remove(&self, guard: &SessionGuard) -> anyhow::Result<bool> {
        self.backend.remove(guard.phone())
    }

    pub fn count(&self) -> anyhow::Result<usize> {
        self.backend.count()
    }

    /// Purges idle sessions and forgets per-phone locks nobody holds.
    pub fn purge_idle(&self, cutoff: NaiveDateTime) -> anyhow::Result<usize> {
        let purged = self.backend.purge_idle(cutoff)?;
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::db;
    use crate::models::{Intent, Period};

    fn now() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2025-06-16 09:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[tokio::test]
    async fn test_load_creates_fresh_session() {
        let store = SessionStore::in_memory();
        let guard = store.lock("+5511900000001").await;
        let session = store.load_or_new(&guard, now()).unwrap();
        assert_eq!(session.phone, "+5511900000001");
        assert!(session.customer.is_none());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_rejects_foreign_session() {
        let store = SessionStore::in_memory();
        let guard = store.lock("+5511900000001").await;
        let other = Session::new("+5511900000002", now());
        assert!(store.save(&guard, &other).is_err());
    }

    #[tokio::test]
    async fn test_same_phone_is_serialized() {
        let store = Arc::new(SessionStore::in_memory());
        let mut handles = Vec::new();
        for i in 0..20u32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let guard = store.lock("+5511900000001").await;
                let mut session = store.load_or_new(&guard, now()).unwrap();
                let seen = session.offered_slots.len();
                tokio::time::sleep(Duration::from_millis(1)).await;
                session.offered_slots.push(crate::models::SlotCandidate {
                    technician_id: i as u64,
                    sector_id: 1,
                    date: now().date(),
                    period: Period::Morning,
                    occupancy: seen as u32,
                    capacity: 2,
                });
                store.save(&guard, &session).unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let session = store.get("+5511900000001").unwrap().unwrap();
        // no lost updates
        assert_eq!(session.offered_slots.len(), 20);
    }

    #[tokio::test]
    async fn test_different_phones_do_not_block() {
        let store = SessionStore::in_memory();
        let _a = store.lock("+5511900000001").await;
        let b = tokio::time::timeout(Duration::from_millis(100), store.lock("+5511900000002")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_purge_idle_drops_old_sessions_and_locks() {
        let store = SessionStore::in_memory();
        {
            let guard = store.lock("+5511900000001").await;
            let session = store.load_or_new(&guard, now()).unwrap();
            store.save(&guard, &session).unwrap();
        }
        let purged = store
            .purge_idle(now() + chrono::Duration::minutes(1))
            .unwrap();
        assert_eq!(purged, 1);
        assert!(store.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_backend_survives_store_rebuild() {
        let conn = db::init_shared(":memory:").unwrap();
        {
            let store = SessionStore::new(Box::new(SqliteBackend::new(Arc::clone(&conn))));
            let guard = store.lock("+5511900000003").await;
            let mut session = store.load_or_new(&guard, now()).unwrap();
            session.record_intent(Intent::ListOrders);
            store.save(&guard, &session).unwrap();
        }
        let store = SessionStore::new(Box::new(SqliteBackend::new(conn)));
        let session = store.get("+5511900000003").unwrap().unwrap();
        assert_eq!(session.intent, Some(Intent::ListOrders));
    }
}
