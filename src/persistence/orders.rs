//! Order Repository
//!
//! Primary record plus ownership/status/pair sets, the exchange-order-ID
//! mapping and the per-parent time-ordered index. Writes go primary-first;
//! deletes read the record first to learn its index membership.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::domain::entities::order::{Order, OrderStatus, ParentRef};
use crate::persistence::keys::KeyBuilder;
use crate::persistence::store::KeyedStore;
use crate::persistence::RepositoryError;

#[derive(Clone)]
pub struct OrderRepository {
    store: Arc<dyn KeyedStore>,
    keys: KeyBuilder,
}

impl OrderRepository {
    pub fn new(store: Arc<dyn KeyedStore>, keys: KeyBuilder) -> Self {
        OrderRepository { store, keys }
    }

    fn encode(order: &Order, key: &str) -> Result<String, RepositoryError> {
        serde_json::to_string(order).map_err(|e| RepositoryError::Corrupt {
            entity: "order",
            key: key.to_string(),
            source: e,
        })
    }

    fn decode(key: &str, raw: &str) -> Result<Order, RepositoryError> {
        serde_json::from_str(raw).map_err(|e| RepositoryError::Corrupt {
            entity: "order",
            key: key.to_string(),
            source: e,
        })
    }

    /// Persist a new order, assigning its internal ID when unset.
    pub async fn create(&self, mut order: Order) -> Result<Order, RepositoryError> {
        if order.id == 0 {
            order.id = self.store.incr(&self.keys.sequence("orders")).await? as u64;
        }
        let now = Utc::now();
        order.created_at = now;
        order.updated_at = now;

        let key = self.keys.primary("order", order.id);
        self.store
            .set(&key, &Self::encode(&order, &key)?, None)
            .await?;

        let member = order.id.to_string();
        self.store
            .set_add(
                &self
                    .keys
                    .attr_index("orders", "user", &order.user_id.to_string()),
                &member,
            )
            .await?;
        self.store
            .set_add(
                &self.keys.attr_index("orders", "status", order.status.as_str()),
                &member,
            )
            .await?;
        self.store
            .set_add(
                &self.keys.attr_index("orders", "pair", &order.pair),
                &member,
            )
            .await?;
        if let Some(xid) = &order.exchange_order_id {
            self.store
                .set(&self.keys.order_by_exchange_id(xid), &member, None)
                .await?;
        }
        self.index_parent(&order).await?;

        debug!(id = order.id, pair = %order.pair, side = %order.side, "created order");
        Ok(order)
    }

    async fn index_parent(&self, order: &Order) -> Result<(), RepositoryError> {
        let key = match order.parent {
            ParentRef::Bot(bot_id) => self.keys.parent_orders("bot", bot_id),
            ParentRef::Position(position_id) => self.keys.parent_orders("position", position_id),
            ParentRef::None => return Ok(()),
        };
        self.store
            .sorted_add(
                &key,
                order.created_at.timestamp_millis() as f64,
                &order.id.to_string(),
            )
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: u64) -> Result<Order, RepositoryError> {
        let key = self.keys.primary("order", id);
        match self.store.get(&key).await? {
            Some(raw) => Self::decode(&key, &raw),
            None => Err(RepositoryError::NotFound {
                entity: "order",
                id: id.to_string(),
            }),
        }
    }

    /// Resolve an exchange-assigned order ID to the internal record.
    pub async fn get_by_exchange_id(
        &self,
        exchange_order_id: &str,
    ) -> Result<Order, RepositoryError> {
        let mapping = self.keys.order_by_exchange_id(exchange_order_id);
        let raw = self
            .store
            .get(&mapping)
            .await?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "order",
                id: exchange_order_id.to_string(),
            })?;
        match raw.parse::<u64>() {
            Ok(id) => self.get(id).await,
            Err(_) => {
                warn!(key = %mapping, value = %raw, "exchange-ID mapping holds a non-numeric ID");
                Err(RepositoryError::NotFound {
                    entity: "order",
                    id: exchange_order_id.to_string(),
                })
            }
        }
    }

    /// Rewrite the primary record; `previous_status` is the status the
    /// caller already holds, so no re-read happens under a race. When it
    /// differs from the current status the ID moves between status sets.
    pub async fn update(
        &self,
        order: &mut Order,
        previous_status: OrderStatus,
    ) -> Result<(), RepositoryError> {
        order.updated_at = Utc::now();
        let key = self.keys.primary("order", order.id);
        self.store
            .set(&key, &Self::encode(order, &key)?, None)
            .await?;

        let member = order.id.to_string();
        if previous_status != order.status {
            self.store
                .set_remove(
                    &self
                        .keys
                        .attr_index("orders", "status", previous_status.as_str()),
                    &member,
                )
                .await?;
            self.store
                .set_add(
                    &self.keys.attr_index("orders", "status", order.status.as_str()),
                    &member,
                )
                .await?;
        }
        // Re-asserting the mapping is an idempotent set; it covers orders
        // whose exchange ID arrived after creation.
        if let Some(xid) = &order.exchange_order_id {
            self.store
                .set(&self.keys.order_by_exchange_id(xid), &member, None)
                .await?;
        }
        debug!(id = order.id, status = %order.status, "updated order");
        Ok(())
    }

    /// Delete the primary record, then every index it was known to belong
    /// to. A second call fails `NotFound` before any index is touched.
    pub async fn delete(&self, id: u64) -> Result<(), RepositoryError> {
        let order = self.get(id).await?;
        self.store.delete(&self.keys.primary("order", id)).await?;

        let member = id.to_string();
        self.store
            .set_remove(
                &self
                    .keys
                    .attr_index("orders", "user", &order.user_id.to_string()),
                &member,
            )
            .await?;
        self.store
            .set_remove(
                &self.keys.attr_index("orders", "status", order.status.as_str()),
                &member,
            )
            .await?;
        self.store
            .set_remove(
                &self.keys.attr_index("orders", "pair", &order.pair),
                &member,
            )
            .await?;
        if let Some(xid) = &order.exchange_order_id {
            self.store.delete(&self.keys.order_by_exchange_id(xid)).await?;
        }
        match order.parent {
            ParentRef::Bot(bot_id) => {
                self.store
                    .sorted_remove(&self.keys.parent_orders("bot", bot_id), &member)
                    .await?;
            }
            ParentRef::Position(position_id) => {
                self.store
                    .sorted_remove(&self.keys.parent_orders("position", position_id), &member)
                    .await?;
            }
            ParentRef::None => {}
        }
        debug!(id, "deleted order");
        Ok(())
    }

    pub async fn list_by_status(
        &self,
        status: OrderStatus,
        limit: usize,
    ) -> Result<Vec<Order>, RepositoryError> {
        let ids = self
            .store
            .set_members(&self.keys.attr_index("orders", "status", status.as_str()))
            .await?;
        self.hydrate(ids, limit).await
    }

    pub async fn list_by_user(
        &self,
        user_id: u64,
        limit: usize,
    ) -> Result<Vec<Order>, RepositoryError> {
        let ids = self
            .store
            .set_members(&self.keys.attr_index("orders", "user", &user_id.to_string()))
            .await?;
        self.hydrate(ids, limit).await
    }

    pub async fn list_by_pair(
        &self,
        pair: &str,
        limit: usize,
    ) -> Result<Vec<Order>, RepositoryError> {
        let ids = self
            .store
            .set_members(&self.keys.attr_index("orders", "pair", pair))
            .await?;
        self.hydrate(ids, limit).await
    }

    /// Orders under one bot or position, newest first.
    ///
    /// Prefers the per-parent sorted index. Records that predate that index
    /// have no entry in it, so an empty index falls back to scanning the
    /// owner's full listing and filtering client-side; slower, but legacy
    /// orders stay visible to their owner.
    pub async fn list_by_parent(
        &self,
        parent: &ParentRef,
        owner: u64,
        limit: usize,
    ) -> Result<Vec<Order>, RepositoryError> {
        let (kind, parent_id) = match *parent {
            ParentRef::Bot(id) => ("bot", id),
            ParentRef::Position(id) => ("position", id),
            ParentRef::None => return Ok(Vec::new()),
        };
        let index = self.keys.parent_orders(kind, parent_id);
        let ids = self.store.sorted_range_desc(&index, 0, limit).await?;
        if !ids.is_empty() {
            return self.hydrate(ids, limit).await;
        }

        warn!(
            parent = kind,
            parent_id, "per-parent order index empty; scanning owner listing"
        );
        let all = self.list_by_user(owner, usize::MAX).await?;
        let mut matching: Vec<Order> = all.into_iter().filter(|o| o.parent == *parent).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    /// One bulk read for the whole member list. Ids whose primary record is
    /// gone (the documented crash window) are skipped with a warning.
    async fn hydrate(&self, ids: Vec<String>, limit: usize) -> Result<Vec<Order>, RepositoryError> {
        let keys: Vec<String> = ids
            .iter()
            .take(limit)
            .filter_map(|id| id.parse::<u64>().ok())
            .map(|id| self.keys.primary("order", id))
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
    use crate::domain::entities::order::{OrderSide, OrderType};
    use crate::persistence::store::MemoryStore;

    fn repo() -> (OrderRepository, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let repo = OrderRepository::new(store.clone(), KeyBuilder::unprefixed());
        (repo, store)
    }

    fn sample_order() -> Order {
        Order::new(3, "btcidr", OrderSide::Buy, OrderType::Limit, 650_000_000.0, 0.001).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_get_round_trip() {
        let (repo, _) = repo();
        let created = repo.create(sample_order()).await.unwrap();
        assert_eq!(created.id, 1);

        let fetched = repo.get(created.id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.status, OrderStatus::Open);
    }

    #[tokio::test]
    async fn test_sequential_ids() {
        let (repo, _) = repo();
        let first = repo.create(sample_order()).await.unwrap();
        let second = repo.create(sample_order()).await.unwrap();
        assert_eq!(second.id, first.id + 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (repo, _) = repo();
        let err = repo.get(99).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_exchange_id_round_trip() {
        let (repo, _) = repo();
        let mut order = sample_order();
        order.exchange_order_id = Some("91834".to_string());
        let created = repo.create(order).await.unwrap();

        let resolved = repo.get_by_exchange_id("91834").await.unwrap();
        assert_eq!(resolved.id, created.id);
        assert!(repo.get_by_exchange_id("other").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_moves_status_index() {
        let (repo, _) = repo();
        let mut order = repo.create(sample_order()).await.unwrap();

        let previous = order.status;
        order.status = OrderStatus::Filled;
        order.filled_amount = order.amount;
        repo.update(&mut order, previous).await.unwrap();

        let open = repo.list_by_status(OrderStatus::Open, 100).await.unwrap();
        assert!(open.is_empty());
        let filled = repo.list_by_status(OrderStatus::Filled, 100).await.unwrap();
        assert_eq!(filled.len(), 1);
        assert_eq!(filled[0].id, order.id);
        assert_eq!(filled[0].filled_amount, 0.001);
    }

    #[tokio::test]
    async fn test_update_binds_late_exchange_id() {
        let (repo, _) = repo();
        let mut order = repo.create(sample_order()).await.unwrap();
        order.exchange_order_id = Some("555".to_string());
        let previous = order.status;
        repo.update(&mut order, previous).await.unwrap();
        assert_eq!(repo.get_by_exchange_id("555").await.unwrap().id, order.id);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_in_effect() {
        let (repo, store) = repo();
        let mut order = sample_order();
        order.exchange_order_id = Some("777".to_string());
        let order = repo.create(order.with_parent(ParentRef::Bot(4))).await.unwrap();

        repo.delete(order.id).await.unwrap();
        let err = repo.delete(order.id).await.unwrap_err();
        assert!(err.is_not_found());

        assert!(repo.list_by_status(OrderStatus::Open, 10).await.unwrap().is_empty());
        assert!(repo.list_by_user(3, 10).await.unwrap().is_empty());
        assert!(repo.list_by_pair("btcidr", 10).await.unwrap().is_empty());
        assert!(repo.get_by_exchange_id("777").await.unwrap_err().is_not_found());
        assert!(store
            .sorted_range_desc("bot_orders:4", 0, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_list_by_parent_uses_index() {
        let (repo, _) = repo();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let order = repo
                .create(sample_order().with_parent(ParentRef::Position(8)))
                .await
                .unwrap();
            ids.push(order.id);
        }
        let listed = repo
            .list_by_parent(&ParentRef::Position(8), 3, 2)
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        for order in &listed {
            assert_eq!(order.parent, ParentRef::Position(8));
        }
    }

    #[tokio::test]
    async fn test_list_by_parent_falls_back_to_owner_scan() {
        let (repo, store) = repo();
        let order = repo
            .create(sample_order().with_parent(ParentRef::Bot(6)))
            .await
            .unwrap();
        // simulate a record that predates the per-parent index
        store
            .sorted_remove("bot_orders:6", &order.id.to_string())
            .await
            .unwrap();

        let listed = repo
            .list_by_parent(&ParentRef::Bot(6), order.user_id, 10)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, order.id);
    }

    #[tokio::test]
    async fn test_hydrate_skips_dangling_index_members() {
        let (repo, store) = repo();
        let order = repo.create(sample_order()).await.unwrap();
        store.set_add("orders_by_user:3", "4242").await.unwrap();

        let listed = repo.list_by_user(3, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, order.id);
    }
}
