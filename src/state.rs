use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDateTime;

use crate::config::AppConfig;
use crate::db::SharedConnection;
use crate::services::conversation::ConversationEngine;
use crate::services::directory::SectorDirectory;
use crate::services::messaging::MessagingProvider;

const RECENT_MESSAGE_IDS: usize = 1024;

/// Provider message ids seen lately, oldest evicted first.
#[derive(Debug)]
pub struct RecentMessageIds {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentMessageIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// `false` when the id was already seen.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }
}

impl Default for RecentMessageIds {
    fn default() -> Self {
        Self::new(RECENT_MESSAGE_IDS)
    }
}

pub struct AppState {
    pub db: SharedConnection,
    pub config: AppConfig,
    pub engine: ConversationEngine,
    pub directory: Arc<SectorDirectory>,
    pub messaging: Box<dyn MessagingProvider>,
    pub recent_messages: Mutex<RecentMessageIds>,
    pub started_at: NaiveDateTime,
}

impl AppState {
    /// Records a provider message id; `false` means it is a duplicate delivery.
    pub fn first_delivery(&self, message_id: &str) -> bool {
        self.recent_messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut ids = RecentMessageIds::new(3);
        assert!(ids.insert("wamid.1"));
        assert!(!ids.insert("wamid.1"));
        assert!(ids.insert("wamid.2"));
    }

    #[test]
    fn test_oldest_id_evicted() {
        let mut ids = RecentMessageIds::new(2);
        assert!(ids.insert("a"));
        assert!(ids.insert("b"));
        assert!(ids.insert("c"));
        // "a" fell out of the window
        assert!(ids.insert("a"));
        assert!(!ids.insert("c"));
    }
}
