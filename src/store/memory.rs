use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use teloxide::types::{ChatId, UserId};
use tokio::sync::Mutex;

use super::{MasterSettings, Store, StoreError, CHAT_NOT_REGISTERED, MASTER_NOT_REGISTERED};

#[derive(Default)]
struct Maps {
    masters: HashMap<UserId, MasterSettings>,
    // never holds an empty set
    chats: HashMap<ChatId, BTreeSet<UserId>>,
}

/// Store that keeps everything in process memory. Nothing survives a
/// restart.
#[derive(Default)]
pub struct InMemoryStore {
    maps: Mutex<Maps>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn save_or_update_master(&self, settings: MasterSettings) -> Result<(), StoreError> {
        let mut maps = self.maps.lock().await;
        maps.masters.insert(settings.master_id, settings);
        Ok(())
    }

    async fn get_master(&self, master_id: UserId) -> Result<Option<MasterSettings>, StoreError> {
        let maps = self.maps.lock().await;
        Ok(maps.masters.get(&master_id).copied())
    }

    async fn remove_master(&self, master_id: UserId) -> Result<(), StoreError> {
        let mut maps = self.maps.lock().await;
        maps.masters
            .remove(&master_id)
            .ok_or(StoreError::Consistency(MASTER_NOT_REGISTERED))?;

        maps.chats.retain(|_, subscribers| {
            subscribers.remove(&master_id);
            !subscribers.is_empty()
        });
        Ok(())
    }

    async fn subscribe(&self, master_id: UserId, chat_id: ChatId) -> Result<(), StoreError> {
        let mut maps = self.maps.lock().await;
        if !maps.masters.contains_key(&master_id) {
            return Err(StoreError::Consistency(MASTER_NOT_REGISTERED));
        }

        maps.chats.entry(chat_id).or_default().insert(master_id);
        Ok(())
    }

    async fn unsubscribe(
        &self,
        chat_id: ChatId,
        master_id: Option<UserId>,
    ) -> Result<(), StoreError> {
        let mut maps = self.maps.lock().await;

        let Some(master_id) = master_id else {
            return match maps.chats.remove(&chat_id) {
                Some(_) => Ok(()),
                None => Err(StoreError::Consistency(CHAT_NOT_REGISTERED)),
            };
        };

        if !maps.masters.contains_key(&master_id) {
            return Err(StoreError::Consistency(MASTER_NOT_REGISTERED));
        }
        let subscribers = maps
            .chats
            .get_mut(&chat_id)
            .ok_or(StoreError::Consistency(CHAT_NOT_REGISTERED))?;

        subscribers.remove(&master_id);
        if subscribers.is_empty() {
            maps.chats.remove(&chat_id);
        }
        Ok(())
    }

    async fn get_subscribers(&self, chat_id: ChatId) -> Result<Vec<MasterSettings>, StoreError> {
        let maps = self.maps.lock().await;
        let Some(subscribers) = maps.chats.get(&chat_id) else {
            return Ok(Vec::new());
        };

        Ok(subscribers
            .iter()
            .filter_map(|id| maps.masters.get(id).copied())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryStore;

    store_contract_tests!(InMemoryStore::new());
}
