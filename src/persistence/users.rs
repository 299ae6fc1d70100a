//! User Repository

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::domain::entities::user::User;
use crate::persistence::keys::KeyBuilder;
use crate::persistence::store::KeyedStore;
use crate::persistence::RepositoryError;

#[derive(Clone)]
pub struct UserRepository {
    store: Arc<dyn KeyedStore>,
    keys: KeyBuilder,
}

impl UserRepository {
    pub fn new(store: Arc<dyn KeyedStore>, keys: KeyBuilder) -> Self {
        UserRepository { store, keys }
    }

    fn encode(user: &User, key: &str) -> Result<String, RepositoryError> {
        serde_json::to_string(user).map_err(|e| RepositoryError::Corrupt {
            entity: "user",
            key: key.to_string(),
            source: e,
        })
    }

    fn decode(key: &str, raw: &str) -> Result<User, RepositoryError> {
        serde_json::from_str(raw).map_err(|e| RepositoryError::Corrupt {
            entity: "user",
            key: key.to_string(),
            source: e,
        })
    }

    pub async fn create(&self, mut user: User) -> Result<User, RepositoryError> {
        let username_key = self.keys.user_by_username(&user.username);
        if self.store.get(&username_key).await?.is_some() {
            return Err(RepositoryError::InvalidState {
                entity: "user",
                id: user.username.clone(),
                reason: "username already taken".to_string(),
            });
        }
        if user.id == 0 {
            user.id = self.store.incr(&self.keys.sequence("users")).await? as u64;
        }
        let now = Utc::now();
        user.created_at = now;
        user.updated_at = now;

        let key = self.keys.primary("user", user.id);
        self.store.set(&key, &Self::encode(&user, &key)?, None).await?;
        self.store
            .set(&username_key, &user.id.to_string(), None)
            .await?;

        debug!(id = user.id, username = %user.username, "created user");
        Ok(user)
    }

    pub async fn get(&self, id: u64) -> Result<User, RepositoryError> {
        let key = self.keys.primary("user", id);
        match self.store.get(&key).await? {
            Some(raw) => Self::decode(&key, &raw),
            None => Err(RepositoryError::NotFound {
                entity: "user",
                id: id.to_string(),
            }),
        }
    }

    pub async fn get_by_username(&self, username: &str) -> Result<User, RepositoryError> {
        let raw = self
            .store
            .get(&self.keys.user_by_username(username))
            .await?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "user",
                id: username.to_string(),
            })?;
        match raw.parse::<u64>() {
            Ok(id) => self.get(id).await,
            Err(_) => Err(RepositoryError::NotFound {
                entity: "user",
                id: username.to_string(),
            }),
        }
    }

    pub async fn update(&self, user: &mut User) -> Result<(), RepositoryError> {
        user.updated_at = Utc::now();
        let key = self.keys.primary("user", user.id);
        self.store.set(&key, &Self::encode(user, &key)?, None).await?;
        Ok(())
    }

    pub async fn delete(&self, id: u64) -> Result<(), RepositoryError> {
        let user = self.get(id).await?;
        self.store.delete(&self.keys.primary("user", id)).await?;
        self.store
            .delete(&self.keys.user_by_username(&user.username))
            .await?;
        debug!(id, "deleted user");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::store::MemoryStore;

    fn repo() -> UserRepository {
        UserRepository::new(Arc::new(MemoryStore::new()), KeyBuilder::unprefixed())
    }

    #[tokio::test]
    async fn test_create_and_lookup_by_username() {
        let repo = repo();
        let created = repo.create(User::new("ayu").unwrap()).await.unwrap();
        let by_name = repo.get_by_username("ayu").await.unwrap();
        assert_eq!(by_name.id, created.id);
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let repo = repo();
        repo.create(User::new("ayu").unwrap()).await.unwrap();
        let err = repo.create(User::new("ayu").unwrap()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_delete_frees_username() {
        let repo = repo();
        let user = repo.create(User::new("ayu").unwrap()).await.unwrap();
        repo.delete(user.id).await.unwrap();
        assert!(repo.get_by_username("ayu").await.unwrap_err().is_not_found());
        assert!(repo.create(User::new("ayu").unwrap()).await.is_ok());
    }
}
