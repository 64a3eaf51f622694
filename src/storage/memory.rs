//! In-memory storage backend
//!
//! Used by tests and local development where no object store is running.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{ObjectMeta, StorageBackend};
use crate::error::{Error, Result};

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, (Vec<u8>, chrono::DateTime<Utc>)>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.objects
            .lock()
            .expect("storage mutex poisoned")
            .insert(key.to_string(), (data, Utc::now()));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .expect("storage mutex poisoned")
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| Error::Storage(format!("object not found: {key}")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects
            .lock()
            .expect("storage mutex poisoned")
            .remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.lock().expect("storage mutex poisoned");
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (data, at))| ObjectMeta {
                key: key.clone(),
                size_bytes: data.len() as i64,
                last_modified: Some(*at),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_put_get_list() {
        let storage = Storage::with_backend(Arc::new(MemoryStorage::new()));
        storage.put("a/1.json", b"{}".to_vec()).await.unwrap();
        storage.put("a/2.json", b"{}".to_vec()).await.unwrap();
        storage.put("b/1.json", b"{}".to_vec()).await.unwrap();

        assert_eq!(storage.get("a/1.json").await.unwrap(), b"{}".to_vec());
        assert_eq!(storage.list("a/").await.unwrap().len(), 2);
        assert!(storage.get("missing").await.is_err());
    }
}
