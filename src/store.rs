use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use teloxide::types::{ChatId, UserId};
use thiserror::Error;

/// Settings of a single master of the bot.
///
/// Two settings are the same master if their `master_id` matches, no matter
/// where their reports go.
#[derive(Debug, Clone, Copy)]
pub struct MasterSettings {
    pub master_id: UserId,
    pub report_chat_id: ChatId,
}

impl MasterSettings {
    pub fn new(master_id: UserId, report_chat_id: ChatId) -> Self {
        Self {
            master_id,
            report_chat_id,
        }
    }
}

impl PartialEq for MasterSettings {
    fn eq(&self, other: &Self) -> bool {
        self.master_id == other.master_id
    }
}

impl Eq for MasterSettings {}

impl Hash for MasterSettings {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.master_id.hash(state)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store consistency violated: {0}")]
    Consistency(&'static str),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub const MASTER_NOT_REGISTERED: &str = "master should be registered first";
pub const CHAT_NOT_REGISTERED: &str = "chat should be registered first";

/// Persistence of masters and their subscriptions.
///
/// A chat is known to the store only as long as somebody is subscribed to
/// it.
#[async_trait]
pub trait Store: Send + Sync {
    /// Register a new master or replace the settings of an existing one.
    async fn save_or_update_master(&self, settings: MasterSettings) -> Result<(), StoreError>;

    async fn get_master(&self, master_id: UserId) -> Result<Option<MasterSettings>, StoreError>;

    /// Remove a master together with all of their subscriptions.
    async fn remove_master(&self, master_id: UserId) -> Result<(), StoreError>;

    async fn subscribe(&self, master_id: UserId, chat_id: ChatId) -> Result<(), StoreError>;

    /// Remove a single master from the chat, or every subscriber of the chat
    /// if `master_id` is `None`.
    async fn unsubscribe(&self, chat_id: ChatId, master_id: Option<UserId>)
        -> Result<(), StoreError>;

    /// All masters subscribed to the chat, ordered by id.
    async fn get_subscribers(&self, chat_id: ChatId) -> Result<Vec<MasterSettings>, StoreError>;
}

#[cfg(test)]
macro_rules! store_contract_tests {
    ($new_store:expr) => {
        use teloxide::types::{ChatId, UserId};

        use crate::store::{MasterSettings, Store, StoreError};

        const ALICE: UserId = UserId(1);
        const BOB: UserId = UserId(2);

        fn ids(subs: &[MasterSettings]) -> Vec<UserId> {
            subs.iter().map(|s| s.master_id).collect()
        }

        #[tokio::test]
        async fn saved_master_can_be_read_back() {
            let store = $new_store;
            let settings = MasterSettings::new(ALICE, ChatId(100));
            store.save_or_update_master(settings).await.unwrap();

            let found = store.get_master(ALICE).await.unwrap().unwrap();
            assert_eq!(found, settings);
            assert_eq!(found.report_chat_id, ChatId(100));
            assert!(store.get_master(BOB).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn update_replaces_report_chat() {
            let store = $new_store;
            store
                .save_or_update_master(MasterSettings::new(ALICE, ChatId(100)))
                .await
                .unwrap();
            store
                .save_or_update_master(MasterSettings::new(ALICE, ChatId(101)))
                .await
                .unwrap();

            let found = store.get_master(ALICE).await.unwrap().unwrap();
            assert_eq!(found.report_chat_id, ChatId(101));
        }

        #[tokio::test]
        async fn subscribe_is_idempotent() {
            let store = $new_store;
            store
                .save_or_update_master(MasterSettings::new(ALICE, ChatId(100)))
                .await
                .unwrap();
            store.subscribe(ALICE, ChatId(200)).await.unwrap();
            store.subscribe(ALICE, ChatId(200)).await.unwrap();

            let subs = store.get_subscribers(ChatId(200)).await.unwrap();
            assert_eq!(ids(&subs), vec![ALICE]);
        }

        #[tokio::test]
        async fn subscribe_requires_registration() {
            let store = $new_store;
            let err = store.subscribe(ALICE, ChatId(200)).await.unwrap_err();
            assert!(matches!(err, StoreError::Consistency(_)));
            assert!(store.get_subscribers(ChatId(200)).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn unknown_chat_has_no_subscribers() {
            let store = $new_store;
            assert!(store.get_subscribers(ChatId(-5)).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn subscribers_follow_report_chat_updates() {
            let store = $new_store;
            store
                .save_or_update_master(MasterSettings::new(ALICE, ChatId(100)))
                .await
                .unwrap();
            store.subscribe(ALICE, ChatId(200)).await.unwrap();
            store
                .save_or_update_master(MasterSettings::new(ALICE, ChatId(300)))
                .await
                .unwrap();

            let subs = store.get_subscribers(ChatId(200)).await.unwrap();
            assert_eq!(subs.len(), 1);
            assert_eq!(subs[0].report_chat_id, ChatId(300));
        }

        #[tokio::test]
        async fn removing_last_subscriber_forgets_chat() {
            let store = $new_store;
            store
                .save_or_update_master(MasterSettings::new(ALICE, ChatId(100)))
                .await
                .unwrap();
            store
                .save_or_update_master(MasterSettings::new(BOB, ChatId(101)))
                .await
                .unwrap();
            store.subscribe(ALICE, ChatId(200)).await.unwrap();
            store.subscribe(BOB, ChatId(200)).await.unwrap();

            store.unsubscribe(ChatId(200), Some(ALICE)).await.unwrap();
            let subs = store.get_subscribers(ChatId(200)).await.unwrap();
            assert_eq!(ids(&subs), vec![BOB]);

            store.unsubscribe(ChatId(200), Some(BOB)).await.unwrap();
            assert!(store.get_subscribers(ChatId(200)).await.unwrap().is_empty());

            // the chat entry is gone, so a full unsubscribe is a violation now
            let err = store.unsubscribe(ChatId(200), None).await.unwrap_err();
            assert!(matches!(err, StoreError::Consistency(_)));
        }

        #[tokio::test]
        async fn unsubscribe_all_drops_every_subscriber() {
            let store = $new_store;
            for (master, report) in [(ALICE, 100), (BOB, 101)] {
                store
                    .save_or_update_master(MasterSettings::new(master, ChatId(report)))
                    .await
                    .unwrap();
                store.subscribe(master, ChatId(200)).await.unwrap();
            }
            store.subscribe(ALICE, ChatId(201)).await.unwrap();

            store.unsubscribe(ChatId(200), None).await.unwrap();

            assert!(store.get_subscribers(ChatId(200)).await.unwrap().is_empty());
            assert_eq!(
                ids(&store.get_subscribers(ChatId(201)).await.unwrap()),
                vec![ALICE]
            );
            assert!(store.get_master(BOB).await.unwrap().is_some());
        }

        #[tokio::test]
        async fn unsubscribe_checks_preconditions() {
            let store = $new_store;
            store
                .save_or_update_master(MasterSettings::new(ALICE, ChatId(100)))
                .await
                .unwrap();

            let err = store
                .unsubscribe(ChatId(200), Some(ALICE))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::Consistency(_)));

            store.subscribe(ALICE, ChatId(200)).await.unwrap();
            let err = store.unsubscribe(ChatId(200), Some(BOB)).await.unwrap_err();
            assert!(matches!(err, StoreError::Consistency(_)));

            let err = store.unsubscribe(ChatId(201), None).await.unwrap_err();
            assert!(matches!(err, StoreError::Consistency(_)));
        }

        #[tokio::test]
        async fn remove_master_cascades() {
            let store = $new_store;
            for (master, report) in [(ALICE, 100), (BOB, 101)] {
                store
                    .save_or_update_master(MasterSettings::new(master, ChatId(report)))
                    .await
                    .unwrap();
            }
            store.subscribe(ALICE, ChatId(200)).await.unwrap();
            store.subscribe(ALICE, ChatId(201)).await.unwrap();
            store.subscribe(BOB, ChatId(201)).await.unwrap();

            store.remove_master(ALICE).await.unwrap();

            assert!(store.get_master(ALICE).await.unwrap().is_none());
            assert!(store.get_subscribers(ChatId(200)).await.unwrap().is_empty());
            assert_eq!(
                ids(&store.get_subscribers(ChatId(201)).await.unwrap()),
                vec![BOB]
            );
        }

        #[tokio::test]
        async fn remove_unknown_master_fails() {
            let store = $new_store;
            let err = store.remove_master(ALICE).await.unwrap_err();
            assert!(matches!(err, StoreError::Consistency(_)));
        }

        #[tokio::test]
        async fn subscribers_are_ordered_by_id() {
            let store = $new_store;
            for (master, report) in [(BOB, 101), (ALICE, 100)] {
                store
                    .save_or_update_master(MasterSettings::new(master, ChatId(report)))
                    .await
                    .unwrap();
                store.subscribe(master, ChatId(200)).await.unwrap();
            }

            let subs = store.get_subscribers(ChatId(200)).await.unwrap();
            assert_eq!(ids(&subs), vec![ALICE, BOB]);
        }
    };
}

pub mod database;
pub mod memory;

pub use database::SqliteStore;
pub use memory::InMemoryStore;

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use teloxide::types::{ChatId, UserId};

    use super::MasterSettings;

    #[test]
    fn settings_are_identified_by_master() {
        let a = MasterSettings::new(UserId(7), ChatId(1));
        let b = MasterSettings::new(UserId(7), ChatId(2));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 1);
        assert_ne!(a, MasterSettings::new(UserId(8), ChatId(1)));
    }
}
