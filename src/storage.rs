use crate::config::RegistryConfig;
use crate::error::Result;
use crate::registry::{Upserted, UserParams, UserRecord, UserRegistry};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn find(&self, name: &str) -> Result<Option<UserRecord>>;
    async fn create(&self, name: &str, params: UserParams) -> Result<UserRecord>;
    async fn upsert(&self, name: &str, params: UserParams) -> Result<Upserted>;
    async fn delete(&self, name: &str) -> Result<usize>;
    async fn len(&self) -> Result<usize>;
}

/// Registry kept behind a lock so each request sees a consistent list.
#[derive(Default)]
pub struct MemoryStorage {
    users: Arc<RwLock<UserRegistry>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: Vec<UserRecord>) -> Self {
        Self {
            users: Arc::new(RwLock::new(UserRegistry::with_users(users))),
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn find(&self, name: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.read().await.find(name).cloned())
    }

    async fn create(&self, name: &str, params: UserParams) -> Result<UserRecord> {
        self.users.write().await.create(name, params)
    }

    async fn upsert(&self, name: &str, params: UserParams) -> Result<Upserted> {
        Ok(self.users.write().await.upsert(name, params))
    }

    async fn delete(&self, name: &str) -> Result<usize> {
        Ok(self.users.write().await.delete(name))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.users.read().await.len())
    }
}

pub fn create_storage(config: &RegistryConfig) -> Arc<dyn Storage> {
    Arc::new(MemoryStorage::with_users(config.seed.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;

    #[tokio::test]
    async fn seeded_storage_serves_lookups() {
        let storage = create_storage(&RegistryConfig::seeded());

        assert_eq!(storage.len().await.unwrap(), 4);
        let viktor = storage.find("Viktor").await.unwrap().unwrap();
        assert_eq!(viktor.occupation.as_deref(), Some("Doctor"));
        assert!(storage.find("Nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_then_conflict() {
        let storage = MemoryStorage::new();

        storage
            .create("Ada", UserParams::new("36", "Mathematician"))
            .await
            .unwrap();
        let err = storage
            .create("Ada", UserParams::new("1", "Baby"))
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::Conflict(_)));
        assert_eq!(storage.len().await.unwrap(), 1);
        let ada = storage.find("Ada").await.unwrap().unwrap();
        assert_eq!(ada.age.as_deref(), Some("36"));
    }

    #[tokio::test]
    async fn concurrent_creates_admit_one_winner() {
        let storage = Arc::new(MemoryStorage::new());

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let storage = storage.clone();
                tokio::spawn(async move {
                    storage
                        .create("Racer", UserParams::new(i.to_string(), "Driver"))
                        .await
                        .is_ok()
                })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            if task.await.unwrap() {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(storage.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_and_delete_round_out_lifecycle() {
        let storage = MemoryStorage::new();

        let created = storage
            .upsert("Jonas", UserParams::new("12", "Racing Driver"))
            .await
            .unwrap();
        assert!(matches!(created, Upserted::Created(_)));

        let updated = storage
            .upsert("Jonas", UserParams::new("30", "Pilot"))
            .await
            .unwrap();
        assert!(matches!(updated, Upserted::Updated(_)));
        assert_eq!(storage.len().await.unwrap(), 1);

        assert_eq!(storage.delete("Jonas").await.unwrap(), 1);
        assert_eq!(storage.delete("Jonas").await.unwrap(), 0);
        assert!(storage.find("Jonas").await.unwrap().is_none());
    }
}
