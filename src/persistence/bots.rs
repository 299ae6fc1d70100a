//! Bot Repository
//!
//! The primary record carries configuration, stats and status; running
//! balances live under the auxiliary `bot_balances` key and are merged in
//! on read. A bot can only be deleted while stopped.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::domain::entities::bot::{BotConfig, BotStatus};
use crate::persistence::keys::KeyBuilder;
use crate::persistence::store::KeyedStore;
use crate::persistence::RepositoryError;

#[derive(Clone)]
pub struct BotRepository {
    store: Arc<dyn KeyedStore>,
    keys: KeyBuilder,
}

impl BotRepository {
    pub fn new(store: Arc<dyn KeyedStore>, keys: KeyBuilder) -> Self {
        BotRepository { store, keys }
    }

    fn encode(bot: &BotConfig, key: &str) -> Result<String, RepositoryError> {
        serde_json::to_string(bot).map_err(|e| RepositoryError::Corrupt {
            entity: "bot",
            key: key.to_string(),
            source: e,
        })
    }

    fn decode(key: &str, raw: &str) -> Result<BotConfig, RepositoryError> {
        serde_json::from_str(raw).map_err(|e| RepositoryError::Corrupt {
            entity: "bot",
            key: key.to_string(),
            source: e,
        })
    }

    pub async fn create(&self, mut bot: BotConfig) -> Result<BotConfig, RepositoryError> {
        if bot.id == 0 {
            bot.id = self.store.incr(&self.keys.sequence("bots")).await? as u64;
        }
        let now = Utc::now();
        bot.created_at = now;
        bot.updated_at = now;

        let key = self.keys.primary("bot", bot.id);
        self.store.set(&key, &Self::encode(&bot, &key)?, None).await?;
        self.write_balances(&bot).await?;

        let member = bot.id.to_string();
        self.store
            .set_add(
                &self.keys.attr_index("bots", "user", &bot.user_id.to_string()),
                &member,
            )
            .await?;
        self.store
            .set_add(
                &self.keys.attr_index("bots", "status", bot.status.as_str()),
                &member,
            )
            .await?;
        self.store
            .set_add(
                &self.keys.attr_index("bots", "type", bot.bot_type().as_str()),
                &member,
            )
            .await?;

        debug!(id = bot.id, bot_type = %bot.bot_type(), "created bot");
        Ok(bot)
    }

    /// Read the primary record and merge the auxiliary balances. A missing
    /// balances key just means the bot has not traded yet.
    pub async fn get(&self, id: u64) -> Result<BotConfig, RepositoryError> {
        let key = self.keys.primary("bot", id);
        let raw = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "bot",
                id: id.to_string(),
            })?;
        let mut bot = Self::decode(&key, &raw)?;
        bot.balances = self.read_balances(id).await?;
        Ok(bot)
    }

    pub async fn update(
        &self,
        bot: &mut BotConfig,
        previous_status: BotStatus,
    ) -> Result<(), RepositoryError> {
        bot.updated_at = Utc::now();
        let key = self.keys.primary("bot", bot.id);
        self.store.set(&key, &Self::encode(bot, &key)?, None).await?;
        self.write_balances(bot).await?;

        if previous_status != bot.status {
            let member = bot.id.to_string();
            self.store
                .set_remove(
                    &self
                        .keys
                        .attr_index("bots", "status", previous_status.as_str()),
                    &member,
                )
                .await?;
            self.store
                .set_add(
                    &self.keys.attr_index("bots", "status", bot.status.as_str()),
                    &member,
                )
                .await?;
        }
        debug!(id = bot.id, status = %bot.status, "updated bot");
        Ok(())
    }

    pub async fn delete(&self, id: u64) -> Result<(), RepositoryError> {
        let bot = self.get(id).await?;
        if bot.status != BotStatus::Stopped {
            return Err(RepositoryError::InvalidState {
                entity: "bot",
                id: id.to_string(),
                reason: format!("must be stopped before deletion, is {}", bot.status),
            });
        }
        self.store.delete(&self.keys.primary("bot", id)).await?;
        self.store.delete(&self.keys.bot_balances(id)).await?;

        let member = id.to_string();
        self.store
            .set_remove(
                &self.keys.attr_index("bots", "user", &bot.user_id.to_string()),
                &member,
            )
            .await?;
        self.store
            .set_remove(
                &self.keys.attr_index("bots", "status", bot.status.as_str()),
                &member,
            )
            .await?;
        self.store
            .set_remove(
                &self.keys.attr_index("bots", "type", bot.bot_type().as_str()),
                &member,
            )
            .await?;
        debug!(id, "deleted bot");
        Ok(())
    }

    pub async fn list_by_user(
        &self,
        user_id: u64,
        limit: usize,
    ) -> Result<Vec<BotConfig>, RepositoryError> {
        let ids = self
            .store
            .set_members(&self.keys.attr_index("bots", "user", &user_id.to_string()))
            .await?;
        self.hydrate(ids, limit).await
    }

    pub async fn list_by_status(
        &self,
        status: BotStatus,
        limit: usize,
    ) -> Result<Vec<BotConfig>, RepositoryError> {
        let ids = self
            .store
            .set_members(&self.keys.attr_index("bots", "status", status.as_str()))
            .await?;
        self.hydrate(ids, limit).await
    }

    async fn write_balances(&self, bot: &BotConfig) -> Result<(), RepositoryError> {
        let key = self.keys.bot_balances(bot.id);
        let raw = serde_json::to_string(&bot.balances).map_err(|e| RepositoryError::Corrupt {
            entity: "bot",
            key: key.clone(),
            source: e,
        })?;
        self.store.set(&key, &raw, None).await?;
        Ok(())
    }

    async fn read_balances(&self, id: u64) -> Result<HashMap<String, f64>, RepositoryError> {
        let key = self.keys.bot_balances(id);
        match self.store.get(&key).await? {
            None => Ok(HashMap::new()),
            Some(raw) => serde_json::from_str(&raw).map_err(|e| RepositoryError::Corrupt {
                entity: "bot",
                key,
                source: e,
            }),
        }
    }

    async fn hydrate(
        &self,
        ids: Vec<String>,
        limit: usize,
    ) -> Result<Vec<BotConfig>, RepositoryError> {
        let keys: Vec<String> = ids
            .iter()
            .take(limit)
            .filter_map(|id| id.parse::<u64>().ok())
            .map(|id| self.keys.primary("bot", id))
            .collect();
        let raws = self.store.get_many(&keys).await?;
        let mut out = Vec::with_capacity(raws.len());
        for (key, raw) in keys.iter().zip(raws) {
            match raw {
                Some(raw) => {
                    let mut bot = Self::decode(key, &raw)?;
                    bot.balances = self.read_balances(bot.id).await?;
                    out.push(bot);
                }
                None => warn!(%key, "index member has no primary record; skipping"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::bot::BotParams;
    use crate::persistence::store::MemoryStore;

    fn repo() -> (BotRepository, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let repo = BotRepository::new(store.clone(), KeyBuilder::unprefixed());
        (repo, store)
    }

    fn sample_bot() -> BotConfig {
        BotConfig::new(
            1,
            "btcidr",
            true,
            BotParams::MarketMaker {
                spread_pct: 0.002,
                order_amount: 0.001,
                refresh_secs: 30,
            },
        )
    }

    #[tokio::test]
    async fn test_create_then_get_merges_balances() {
        let (repo, _) = repo();
        let mut bot = sample_bot();
        bot.balances.insert("idr".to_string(), 5_000_000.0);
        let created = repo.create(bot).await.unwrap();

        let fetched = repo.get(created.id).await.unwrap();
        assert_eq!(fetched.balances.get("idr"), Some(&5_000_000.0));
        assert_eq!(fetched.stats, created.stats);
    }

    #[tokio::test]
    async fn test_get_tolerates_missing_balances_key() {
        let (repo, store) = repo();
        let created = repo.create(sample_bot()).await.unwrap();
        store.delete(&format!("bot_balances:{}", created.id)).await.unwrap();

        let fetched = repo.get(created.id).await.unwrap();
        assert!(fetched.balances.is_empty());
    }

    #[tokio::test]
    async fn test_stop_moves_status_index() {
        let (repo, _) = repo();
        let mut bot = sample_bot();
        bot.status = BotStatus::Running;
        let mut bot = repo.create(bot).await.unwrap();

        let previous = bot.status;
        bot.status = BotStatus::Stopped;
        repo.update(&mut bot, previous).await.unwrap();

        assert!(repo
            .list_by_status(BotStatus::Running, 10)
            .await
            .unwrap()
            .is_empty());
        let stopped = repo.list_by_status(BotStatus::Stopped, 10).await.unwrap();
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].id, bot.id);
    }

    #[tokio::test]
    async fn test_delete_requires_stopped() {
        let (repo, _) = repo();
        let mut bot = sample_bot();
        bot.status = BotStatus::Running;
        let bot = repo.create(bot).await.unwrap();

        let err = repo.delete(bot.id).await.unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidState { .. }));
        // still present
        assert!(repo.get(bot.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_stopped_clears_everything() {
        let (repo, _) = repo();
        let bot = repo.create(sample_bot()).await.unwrap();
        repo.delete(bot.id).await.unwrap();

        assert!(repo.delete(bot.id).await.unwrap_err().is_not_found());
        assert!(repo.list_by_user(1, 10).await.unwrap().is_empty());
        assert!(repo
            .list_by_status(BotStatus::Stopped, 10)
            .await
            .unwrap()
            .is_empty());
    }
}
