use std::sync::Arc;
use std::time::Duration;

use teloxide::types::{ChatId, MessageId, UserId};
use thiserror::Error;

use crate::messages;
use crate::messenger::{DeliveryError, Format, Messenger};
use crate::store::{MasterSettings, Store, StoreError};

/// Pause after every forwarded message, keeps the bot below Telegram's
/// broadcast limits.
pub const FORWARD_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}

/// The chat an update came from.
#[derive(Debug, Clone)]
pub struct ChatInfo {
    pub id: ChatId,
    pub title: Option<String>,
    pub username: Option<String>,
    /// Message that triggered the update, replies are attached to it
    pub message_id: Option<MessageId>,
}

impl ChatInfo {
    pub fn display_name(&self) -> &str {
        self.title
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or("N/A")
    }
}

/// Commands are never relayed, whichever bot they are meant for.
pub fn is_forwardable(text: &str) -> bool {
    !text.starts_with('/')
}

/// The user who sent an update.
#[derive(Debug, Clone)]
pub struct Sender {
    pub id: UserId,
    pub name: String,
}

pub struct SpyBot {
    me: UserId,
    store: Arc<dyn Store>,
    messenger: Arc<dyn Messenger>,
    forward_delay: Duration,
}

impl SpyBot {
    pub fn new(me: UserId, store: Arc<dyn Store>, messenger: Arc<dyn Messenger>) -> Self {
        Self {
            me,
            store,
            messenger,
            forward_delay: FORWARD_DELAY,
        }
    }

    pub fn with_forward_delay(mut self, forward_delay: Duration) -> Self {
        self.forward_delay = forward_delay;
        self
    }

    async fn reply(&self, chat: &ChatInfo, text: &str) -> Result<(), Error> {
        self.messenger
            .send(chat.id, text, Format::Plain, chat.message_id)
            .await?;
        Ok(())
    }

    async fn is_subscribed(&self, master_id: UserId, chat_id: ChatId) -> Result<bool, Error> {
        let subscribers = self.store.get_subscribers(chat_id).await?;
        Ok(subscribers.iter().any(|s| s.master_id == master_id))
    }

    /// Send the master's reports to `chat_id` from now on. A master never
    /// watches their own report chat.
    async fn redirect(&self, master_id: UserId, chat_id: ChatId) -> Result<(), Error> {
        if self.is_subscribed(master_id, chat_id).await? {
            self.store.unsubscribe(chat_id, Some(master_id)).await?;
        }
        self.store
            .save_or_update_master(MasterSettings::new(master_id, chat_id))
            .await?;
        Ok(())
    }

    /// Settings of the sender if they are a master and `chat` is not where
    /// their reports go.
    async fn watching_master(
        &self,
        sender: &Sender,
        chat: &ChatInfo,
    ) -> Result<Option<MasterSettings>, Error> {
        let master = self.store.get_master(sender.id).await?;
        Ok(master.filter(|m| m.report_chat_id != chat.id))
    }

    async fn watch(&self, sender: &Sender, chat: &ChatInfo) -> Result<bool, Error> {
        let Some(master) = self.watching_master(sender, chat).await? else {
            return Ok(false);
        };

        self.store.subscribe(master.master_id, chat.id).await?;

        log::info!(
            "Watching chat '{}' ({}) for user '{}' ({})",
            chat.display_name(),
            chat.id,
            sender.name,
            sender.id
        );
        Ok(true)
    }

    pub async fn start(&self, sender: &Sender, chat: &ChatInfo) -> Result<(), Error> {
        self.redirect(sender.id, chat.id).await?;

        log::info!(
            "Registered user '{}' ({}) as master, reporting to '{}' ({})",
            sender.name,
            sender.id,
            chat.display_name(),
            chat.id
        );

        self.reply(chat, messages::registered()).await
    }

    pub async fn help(&self, chat: &ChatInfo) -> Result<(), Error> {
        self.reply(chat, messages::help()).await
    }

    pub async fn spy(&self, sender: &Sender, chat: &ChatInfo) -> Result<(), Error> {
        if !self.watch(sender, chat).await? {
            return Ok(());
        }
        self.reply(chat, messages::spying()).await
    }

    pub async fn dismiss(&self, sender: &Sender, chat: &ChatInfo) -> Result<(), Error> {
        let Some(master) = self.watching_master(sender, chat).await? else {
            return Ok(());
        };
        if !self.is_subscribed(master.master_id, chat.id).await? {
            return Ok(());
        }

        self.store.unsubscribe(chat.id, Some(master.master_id)).await?;

        log::info!(
            "Stopped watching chat '{}' ({}) for user '{}' ({})",
            chat.display_name(),
            chat.id,
            sender.name,
            sender.id
        );

        self.reply(chat, messages::dismissed()).await
    }

    pub async fn report_here(&self, sender: &Sender, chat: &ChatInfo) -> Result<(), Error> {
        if self.store.get_master(sender.id).await?.is_none() {
            return Ok(());
        }

        self.redirect(sender.id, chat.id).await?;

        log::info!(
            "Sending reports for user '{}' ({}) to chat '{}' ({})",
            sender.name,
            sender.id,
            chat.display_name(),
            chat.id
        );

        self.reply(chat, messages::reporting_here()).await
    }

    /// Track the bot joining or leaving `chat`. `actor` is whoever added or
    /// removed the members.
    pub async fn membership_changed(
        &self,
        chat: &ChatInfo,
        actor: Option<&Sender>,
        added: &[UserId],
        removed: Option<UserId>,
    ) -> Result<(), Error> {
        if let Some(actor) = actor.filter(|_| added.contains(&self.me)) {
            if self.watch(actor, chat).await? {
                log::info!(
                    "Invited to chat '{}' ({}) by user '{}' ({})",
                    chat.display_name(),
                    chat.id,
                    actor.name,
                    actor.id
                );
            }
        }

        if removed == Some(self.me) && !self.store.get_subscribers(chat.id).await?.is_empty() {
            self.store.unsubscribe(chat.id, None).await?;
            log::info!("Left from chat '{}' ({})", chat.display_name(), chat.id);
        }

        Ok(())
    }

    /// Send a copy of `text` to every master watching `chat`.
    ///
    /// Failing to reach one master is logged and never keeps the message
    /// from the others.
    pub async fn forward(
        &self,
        chat: &ChatInfo,
        sender: &Sender,
        text: &str,
    ) -> Result<(), Error> {
        let subscribers = self.store.get_subscribers(chat.id).await?;
        if subscribers.is_empty() {
            return Ok(());
        }

        let forwarded = messages::forwarded(chat, sender, text);

        for subscriber in subscribers {
            if let Err(e) = self.deliver(subscriber, &forwarded).await {
                log::error!(
                    "Failed to forward message {:?} from chat '{}' ({}) to master {}: {e}",
                    text,
                    chat.display_name(),
                    chat.id,
                    subscriber.master_id
                );
            }

            tokio::time::sleep(self.forward_delay).await;
        }

        Ok(())
    }

    async fn deliver(&self, subscriber: MasterSettings, text: &str) -> Result<(), Error> {
        let chat_id = subscriber.report_chat_id;

        match self.messenger.send(chat_id, text, Format::Markdown, None).await {
            Ok(()) => Ok(()),
            Err(DeliveryError::Migrated(new_chat_id)) => {
                log::warn!("Chat ID changed from {chat_id} to {new_chat_id}");
                self.redirect(subscriber.master_id, new_chat_id).await?;
                self.messenger
                    .send(new_chat_id, text, Format::Markdown, None)
                    .await?;
                Ok(())
            }
            Err(DeliveryError::Unauthorized) => {
                log::warn!(
                    "The bot was removed or banned in chat {chat_id}, dropping master {}",
                    subscriber.master_id
                );
                self.store.remove_master(subscriber.master_id).await?;
                Ok(())
            }
            Err(DeliveryError::Network(e)) => {
                log::warn!("Network error while forwarding to chat {chat_id}, retrying: {e}");
                self.messenger
                    .send(chat_id, text, Format::Markdown, None)
                    .await?;
                Ok(())
            }
            Err(e @ DeliveryError::Other(_)) => Err(e.into()),
        }
    }
}
