//! Trade Repository
//!
//! Reporting records: owner listings are time-ordered (newest first) via a
//! sorted set scored by creation time.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::domain::entities::trade::{Trade, TradeStatus};
use crate::persistence::keys::KeyBuilder;
use crate::persistence::store::KeyedStore;
use crate::persistence::RepositoryError;

#[derive(Clone)]
pub struct TradeRepository {
    store: Arc<dyn KeyedStore>,
    keys: KeyBuilder,
}

impl TradeRepository {
    pub fn new(store: Arc<dyn KeyedStore>, keys: KeyBuilder) -> Self {
        TradeRepository { store, keys }
    }

    fn encode(trade: &Trade, key: &str) -> Result<String, RepositoryError> {
        serde_json::to_string(trade).map_err(|e| RepositoryError::Corrupt {
            entity: "trade",
            key: key.to_string(),
            source: e,
        })
    }

    fn decode(key: &str, raw: &str) -> Result<Trade, RepositoryError> {
        serde_json::from_str(raw).map_err(|e| RepositoryError::Corrupt {
            entity: "trade",
            key: key.to_string(),
            source: e,
        })
    }

    pub async fn create(&self, mut trade: Trade) -> Result<Trade, RepositoryError> {
        if trade.id == 0 {
            trade.id = self.store.incr(&self.keys.sequence("trades")).await? as u64;
        }
        let now = Utc::now();
        trade.created_at = now;
        trade.updated_at = now;

        let key = self.keys.primary("trade", trade.id);
        self.store
            .set(&key, &Self::encode(&trade, &key)?, None)
            .await?;

        let member = trade.id.to_string();
        self.store
            .sorted_add(
                &self.keys.user_trades(trade.user_id),
                trade.created_at.timestamp_millis() as f64,
                &member,
            )
            .await?;
        self.store
            .set_add(
                &self.keys.attr_index("trades", "status", trade.status.as_str()),
                &member,
            )
            .await?;

        debug!(id = trade.id, user_id = trade.user_id, "created trade");
        Ok(trade)
    }

    pub async fn get(&self, id: u64) -> Result<Trade, RepositoryError> {
        let key = self.keys.primary("trade", id);
        match self.store.get(&key).await? {
            Some(raw) => Self::decode(&key, &raw),
            None => Err(RepositoryError::NotFound {
                entity: "trade",
                id: id.to_string(),
            }),
        }
    }

    pub async fn update(
        &self,
        trade: &mut Trade,
        previous_status: TradeStatus,
    ) -> Result<(), RepositoryError> {
        trade.updated_at = Utc::now();
        let key = self.keys.primary("trade", trade.id);
        self.store
            .set(&key, &Self::encode(trade, &key)?, None)
            .await?;

        if previous_status != trade.status {
            let member = trade.id.to_string();
            self.store
                .set_remove(
                    &self
                        .keys
                        .attr_index("trades", "status", previous_status.as_str()),
                    &member,
                )
                .await?;
            self.store
                .set_add(
                    &self.keys.attr_index("trades", "status", trade.status.as_str()),
                    &member,
                )
                .await?;
        }
        Ok(())
    }

    pub async fn delete(&self, id: u64) -> Result<(), RepositoryError> {
        let trade = self.get(id).await?;
        self.store.delete(&self.keys.primary("trade", id)).await?;

        let member = id.to_string();
        self.store
            .sorted_remove(&self.keys.user_trades(trade.user_id), &member)
            .await?;
        self.store
            .set_remove(
                &self.keys.attr_index("trades", "status", trade.status.as_str()),
                &member,
            )
            .await?;
        debug!(id, "deleted trade");
        Ok(())
    }

    /// Owner listing, newest first, windowed by offset/limit.
    pub async fn list_by_user(
        &self,
        user_id: u64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Trade>, RepositoryError> {
        let ids = self
            .store
            .sorted_range_desc(&self.keys.user_trades(user_id), offset, limit)
            .await?;
        self.hydrate(ids, limit).await
    }

    pub async fn list_by_status(
        &self,
        status: TradeStatus,
        limit: usize,
    ) -> Result<Vec<Trade>, RepositoryError> {
        let ids = self
            .store
            .set_members(&self.keys.attr_index("trades", "status", status.as_str()))
            .await?;
        self.hydrate(ids, limit).await
    }

    async fn hydrate(&self, ids: Vec<String>, limit: usize) -> Result<Vec<Trade>, RepositoryError> {
        let keys: Vec<String> = ids
            .iter()
            .take(limit)
            .filter_map(|id| id.parse::<u64>().ok())
            .map(|id| self.keys.primary("trade", id))
            .collect();
        let raws = self.store.get_many(&keys).await?;
        let mut out = Vec::with_capacity(raws.len());
        for (key, raw) in keys.iter().zip(raws) {
            match raw {
                Some(raw) => out.push(Self::decode(key, &raw)?),
                None => warn!(%key, "index member has no primary record; skipping"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::store::MemoryStore;

    fn repo() -> TradeRepository {
        TradeRepository::new(Arc::new(MemoryStore::new()), KeyBuilder::unprefixed())
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let repo = repo();
        let created = repo.create(Trade::new(9, "btcidr", 41)).await.unwrap();
        assert_eq!(created.id, 1);
        assert_eq!(repo.get(created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_owner_listing_is_time_ordered() {
        let repo = repo();
        // creation stamps are taken inside create(), so later creates score higher
        let first = repo.create(Trade::new(9, "btcidr", 1)).await.unwrap();
        let second = repo.create(Trade::new(9, "ethidr", 2)).await.unwrap();
        let third = repo.create(Trade::new(9, "btcidr", 3)).await.unwrap();

        let listed = repo.list_by_user(9, 0, 2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, third.id);
        assert_eq!(listed[1].id, second.id);

        let rest = repo.list_by_user(9, 2, 10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, first.id);
    }

    #[tokio::test]
    async fn test_close_moves_status_index() {
        let repo = repo();
        let mut trade = repo.create(Trade::new(9, "btcidr", 41)).await.unwrap();

        let previous = trade.status;
        trade.status = TradeStatus::Closed;
        trade.sell_order_id = Some(42);
        trade.profit = 1500.0;
        repo.update(&mut trade, previous).await.unwrap();

        assert!(repo
            .list_by_status(TradeStatus::Open, 10)
            .await
            .unwrap()
            .is_empty());
        let closed = repo.list_by_status(TradeStatus::Closed, 10).await.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].profit, 1500.0);
    }

    #[tokio::test]
    async fn test_delete_clears_indexes() {
        let repo = repo();
        let trade = repo.create(Trade::new(9, "btcidr", 41)).await.unwrap();
        repo.delete(trade.id).await.unwrap();

        assert!(repo.delete(trade.id).await.unwrap_err().is_not_found());
        assert!(repo.list_by_user(9, 0, 10).await.unwrap().is_empty());
    }
}
