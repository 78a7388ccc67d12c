//! In-memory repositories
//!
//! Thread-safe maps keyed by entity id, for tests and for embedding the
//! service without external storage.

use super::repository::{
    PrincipalPolicyRecord, PrincipalPolicyRepository, ResourceRepository, RolePolicyRecord,
    RolePolicyRepository,
};
use crate::core::iam::Resource;
use crate::error::Result;
use ahash::AHashMap;
use parking_lot::RwLock;

/// Entities that can be stored by id
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for Resource {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for PrincipalPolicyRecord {
    fn key(&self) -> &str {
        &self.principal_id
    }
}

impl Keyed for RolePolicyRecord {
    fn key(&self) -> &str {
        &self.role_id
    }
}

/// Repository over a `RwLock`-guarded hash map
pub struct InMemoryRepository<T> {
    entries: RwLock<AHashMap<String, T>>,
}

impl<T> Default for InMemoryRepository<T> {
    fn default() -> Self {
        InMemoryRepository {
            entries: RwLock::new(AHashMap::new()),
        }
    }
}

impl<T: Keyed + Clone> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from an iterator; later duplicates replace earlier ones
    pub fn with_entries<I: IntoIterator<Item = T>>(entries: I) -> Self {
        let repo = Self::new();
        {
            let mut map = repo.entries.write();
            for entry in entries {
                map.insert(entry.key().to_string(), entry);
            }
        }
        repo
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.entries.read().get(key).cloned()
    }

    pub fn insert(&self, entry: T) -> T {
        self.entries
            .write()
            .insert(entry.key().to_string(), entry.clone());
        entry
    }

    pub fn remove(&self, key: &str) -> Option<T> {
        self.entries.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResourceRepository for InMemoryRepository<Resource> {
    fn find_by_id(&self, id: &str) -> Result<Option<Resource>> {
        Ok(self.get(id))
    }

    fn save(&self, resource: Resource) -> Result<Resource> {
        Ok(self.insert(resource))
    }

    fn delete_by_id(&self, id: &str) -> Result<()> {
        self.remove(id);
        Ok(())
    }
}

impl PrincipalPolicyRepository for InMemoryRepository<PrincipalPolicyRecord> {
    fn find_by_principal_id(&self, principal_id: &str) -> Result<Option<PrincipalPolicyRecord>> {
        Ok(self.get(principal_id))
    }

    fn save(&self, record: PrincipalPolicyRecord) -> Result<PrincipalPolicyRecord> {
        Ok(self.insert(record))
    }

    fn delete_by_principal_id(&self, principal_id: &str) -> Result<()> {
        self.remove(principal_id);
        Ok(())
    }
}

impl RolePolicyRepository for InMemoryRepository<RolePolicyRecord> {
    fn find_by_id(&self, role_id: &str) -> Result<Option<RolePolicyRecord>> {
        Ok(self.get(role_id))
    }

    fn find_by_ids(&self, role_ids: &[String]) -> Result<Vec<RolePolicyRecord>> {
        let entries = self.entries.read();
        Ok(role_ids
            .iter()
            .filter_map(|id| entries.get(id).cloned())
            .collect())
    }

    fn save(&self, record: RolePolicyRecord) -> Result<RolePolicyRecord> {
        Ok(self.insert(record))
    }

    fn delete_by_id(&self, role_id: &str) -> Result<()> {
        self.remove(role_id);
        Ok(())
    }
}
