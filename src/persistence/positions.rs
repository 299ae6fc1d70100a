//! Position Repository

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::domain::entities::position::{Position, PositionStatus};
use crate::persistence::keys::KeyBuilder;
use crate::persistence::store::KeyedStore;
use crate::persistence::RepositoryError;

#[derive(Clone)]
pub struct PositionRepository {
    store: Arc<dyn KeyedStore>,
    keys: KeyBuilder,
}

impl PositionRepository {
    pub fn new(store: Arc<dyn KeyedStore>, keys: KeyBuilder) -> Self {
        PositionRepository { store, keys }
    }

    fn encode(position: &Position, key: &str) -> Result<String, RepositoryError> {
        serde_json::to_string(position).map_err(|e| RepositoryError::Corrupt {
            entity: "position",
            key: key.to_string(),
            source: e,
        })
    }

    fn decode(key: &str, raw: &str) -> Result<Position, RepositoryError> {
        serde_json::from_str(raw).map_err(|e| RepositoryError::Corrupt {
            entity: "position",
            key: key.to_string(),
            source: e,
        })
    }

    pub async fn create(&self, mut position: Position) -> Result<Position, RepositoryError> {
        if position.id == 0 {
            position.id = self.store.incr(&self.keys.sequence("positions")).await? as u64;
        }
        let now = Utc::now();
        position.created_at = now;
        position.updated_at = now;

        let key = self.keys.primary("position", position.id);
        self.store
            .set(&key, &Self::encode(&position, &key)?, None)
            .await?;

        let member = position.id.to_string();
        self.store
            .set_add(
                &self
                    .keys
                    .attr_index("positions", "bot", &position.bot_id.to_string()),
                &member,
            )
            .await?;
        self.store
            .set_add(
                &self
                    .keys
                    .attr_index("positions", "status", position.status.as_str()),
                &member,
            )
            .await?;
        if position.status.is_active() {
            self.store
                .set_add(&self.keys.active_positions(position.bot_id), &member)
                .await?;
        }
        debug!(id = position.id, bot_id = position.bot_id, "created position");
        Ok(position)
    }

    pub async fn get(&self, id: u64) -> Result<Position, RepositoryError> {
        let key = self.keys.primary("position", id);
        match self.store.get(&key).await? {
            Some(raw) => Self::decode(&key, &raw),
            None => Err(RepositoryError::NotFound {
                entity: "position",
                id: id.to_string(),
            }),
        }
    }

    pub async fn update(
        &self,
        position: &mut Position,
        previous_status: PositionStatus,
    ) -> Result<(), RepositoryError> {
        position.updated_at = Utc::now();
        let key = self.keys.primary("position", position.id);
        self.store
            .set(&key, &Self::encode(position, &key)?, None)
            .await?;

        let member = position.id.to_string();
        if previous_status != position.status {
            self.store
                .set_remove(
                    &self
                        .keys
                        .attr_index("positions", "status", previous_status.as_str()),
                    &member,
                )
                .await?;
            self.store
                .set_add(
                    &self
                        .keys
                        .attr_index("positions", "status", position.status.as_str()),
                    &member,
                )
                .await?;
            if !position.status.is_active() {
                self.store
                    .set_remove(&self.keys.active_positions(position.bot_id), &member)
                    .await?;
            }
        }
        debug!(id = position.id, status = %position.status, "updated position");
        Ok(())
    }

    pub async fn delete(&self, id: u64) -> Result<(), RepositoryError> {
        let position = self.get(id).await?;
        self.store.delete(&self.keys.primary("position", id)).await?;

        let member = id.to_string();
        self.store
            .set_remove(
                &self
                    .keys
                    .attr_index("positions", "bot", &position.bot_id.to_string()),
                &member,
            )
            .await?;
        self.store
            .set_remove(
                &self
                    .keys
                    .attr_index("positions", "status", position.status.as_str()),
                &member,
            )
            .await?;
        self.store
            .set_remove(&self.keys.active_positions(position.bot_id), &member)
            .await?;
        debug!(id, "deleted position");
        Ok(())
    }

    pub async fn list_by_bot(
        &self,
        bot_id: u64,
        limit: usize,
    ) -> Result<Vec<Position>, RepositoryError> {
        let ids = self
            .store
            .set_members(&self.keys.attr_index("positions", "bot", &bot_id.to_string()))
            .await?;
        self.hydrate(ids, limit).await
    }

    pub async fn list_by_status(
        &self,
        status: PositionStatus,
        limit: usize,
    ) -> Result<Vec<Position>, RepositoryError> {
        let ids = self
            .store
            .set_members(&self.keys.attr_index("positions", "status", status.as_str()))
            .await?;
        self.hydrate(ids, limit).await
    }

    /// Non-terminal positions of one bot, via the active-membership index.
    pub async fn list_active(
        &self,
        bot_id: u64,
        limit: usize,
    ) -> Result<Vec<Position>, RepositoryError> {
        let ids = self
            .store
            .set_members(&self.keys.active_positions(bot_id))
            .await?;
        self.hydrate(ids, limit).await
    }

    async fn hydrate(
        &self,
        ids: Vec<String>,
        limit: usize,
    ) -> Result<Vec<Position>, RepositoryError> {
        let keys: Vec<String> = ids
            .iter()
            .take(limit)
            .filter_map(|id| id.parse::<u64>().ok())
            .map(|id| self.keys.primary("position", id))
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

    fn repo() -> PositionRepository {
        PositionRepository::new(Arc::new(MemoryStore::new()), KeyBuilder::unprefixed())
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let repo = repo();
        let created = repo.create(Position::new(4, "ethidr")).await.unwrap();
        assert_eq!(created.id, 1);
        let fetched = repo.get(created.id).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_active_index_tracks_lifecycle() {
        let repo = repo();
        let mut position = repo.create(Position::new(4, "ethidr")).await.unwrap();
        assert_eq!(repo.list_active(4, 10).await.unwrap().len(), 1);

        let previous = position.status;
        position.status = PositionStatus::Open;
        repo.update(&mut position, previous).await.unwrap();
        assert_eq!(repo.list_active(4, 10).await.unwrap().len(), 1);

        let previous = position.status;
        position.status = PositionStatus::Closed;
        repo.update(&mut position, previous).await.unwrap();
        assert!(repo.list_active(4, 10).await.unwrap().is_empty());

        let by_status = repo
            .list_by_status(PositionStatus::Closed, 10)
            .await
            .unwrap();
        assert_eq!(by_status.len(), 1);
        assert_eq!(by_status[0].id, position.id);
    }

    #[tokio::test]
    async fn test_delete_clears_indexes() {
        let repo = repo();
        let position = repo.create(Position::new(2, "btcidr")).await.unwrap();
        repo.delete(position.id).await.unwrap();

        assert!(repo.delete(position.id).await.unwrap_err().is_not_found());
        assert!(repo.list_by_bot(2, 10).await.unwrap().is_empty());
        assert!(repo.list_active(2, 10).await.unwrap().is_empty());
        assert!(repo
            .list_by_status(PositionStatus::Pending, 10)
            .await
            .unwrap()
            .is_empty());
    }
}
