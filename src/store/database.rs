use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::{query, query_as, query_scalar};
use teloxide::types::{ChatId, UserId};

use super::{MasterSettings, Store, StoreError, CHAT_NOT_REGISTERED, MASTER_NOT_REGISTERED};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct MasterRow {
    master_id: i64,
    report_chat_id: i64,
}

impl From<MasterRow> for MasterSettings {
    fn from(row: MasterRow) -> Self {
        MasterSettings::new(UserId(row.master_id as u64), ChatId(row.report_chat_id))
    }
}

fn user_key(id: UserId) -> i64 {
    id.0 as i64
}

impl SqliteStore {
    /// Connect to the database and bring its schema up to date. The database
    /// file is created if it does not exist yet.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!()
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn save_or_update_master(&self, settings: MasterSettings) -> Result<(), StoreError> {
        query(
            "INSERT INTO masters (master_id, report_chat_id)
                VALUES ($1, $2)
                ON CONFLICT(master_id)
                DO UPDATE SET report_chat_id = $2",
        )
        .bind(user_key(settings.master_id))
        .bind(settings.report_chat_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_master(&self, master_id: UserId) -> Result<Option<MasterSettings>, StoreError> {
        let row: Option<MasterRow> =
            query_as("SELECT master_id, report_chat_id FROM masters WHERE master_id = ?")
                .bind(user_key(master_id))
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(MasterSettings::from))
    }

    async fn remove_master(&self, master_id: UserId) -> Result<(), StoreError> {
        let mut transaction = self.pool.begin().await?;

        query("DELETE FROM subscriptions WHERE master_id = ?")
            .bind(user_key(master_id))
            .execute(&mut *transaction)
            .await?;

        let removed = query("DELETE FROM masters WHERE master_id = ?")
            .bind(user_key(master_id))
            .execute(&mut *transaction)
            .await?
            .rows_affected();

        if removed == 0 {
            transaction.rollback().await?;
            return Err(StoreError::Consistency(MASTER_NOT_REGISTERED));
        }

        transaction.commit().await?;
        Ok(())
    }

    async fn subscribe(&self, master_id: UserId, chat_id: ChatId) -> Result<(), StoreError> {
        let mut transaction = self.pool.begin().await?;

        let registered: i64 = query_scalar("SELECT COUNT(*) FROM masters WHERE master_id = ?")
            .bind(user_key(master_id))
            .fetch_one(&mut *transaction)
            .await?;

        if registered == 0 {
            transaction.rollback().await?;
            return Err(StoreError::Consistency(MASTER_NOT_REGISTERED));
        }

        query("INSERT OR IGNORE INTO subscriptions (chat_id, master_id) VALUES (?, ?)")
            .bind(chat_id.0)
            .bind(user_key(master_id))
            .execute(&mut *transaction)
            .await?;

        transaction.commit().await?;
        Ok(())
    }

    async fn unsubscribe(
        &self,
        chat_id: ChatId,
        master_id: Option<UserId>,
    ) -> Result<(), StoreError> {
        let mut transaction = self.pool.begin().await?;

        if let Some(master_id) = master_id {
            let registered: i64 =
                query_scalar("SELECT COUNT(*) FROM masters WHERE master_id = ?")
                    .bind(user_key(master_id))
                    .fetch_one(&mut *transaction)
                    .await?;

            if registered == 0 {
                transaction.rollback().await?;
                return Err(StoreError::Consistency(MASTER_NOT_REGISTERED));
            }
        }

        let subscribers: i64 = query_scalar("SELECT COUNT(*) FROM subscriptions WHERE chat_id = ?")
            .bind(chat_id.0)
            .fetch_one(&mut *transaction)
            .await?;

        if subscribers == 0 {
            transaction.rollback().await?;
            return Err(StoreError::Consistency(CHAT_NOT_REGISTERED));
        }

        match master_id {
            Some(master_id) => {
                query("DELETE FROM subscriptions WHERE chat_id = ? AND master_id = ?")
                    .bind(chat_id.0)
                    .bind(user_key(master_id))
                    .execute(&mut *transaction)
                    .await?
            }
            None => {
                query("DELETE FROM subscriptions WHERE chat_id = ?")
                    .bind(chat_id.0)
                    .execute(&mut *transaction)
                    .await?
            }
        };

        transaction.commit().await?;
        Ok(())
    }

    async fn get_subscribers(&self, chat_id: ChatId) -> Result<Vec<MasterSettings>, StoreError> {
        let rows: Vec<MasterRow> = query_as(
            "SELECT m.master_id, m.report_chat_id
            FROM subscriptions s JOIN masters m ON s.master_id = m.master_id
            WHERE s.chat_id = ?
            ORDER BY m.master_id",
        )
        .bind(chat_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MasterSettings::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use sqlx::sqlite::SqlitePoolOptions;

    use super::SqliteStore;

    // every connection to `sqlite::memory:` opens its own database
    async fn test_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteStore::with_pool(pool).await.unwrap()
    }

    store_contract_tests!(test_store().await);
}
