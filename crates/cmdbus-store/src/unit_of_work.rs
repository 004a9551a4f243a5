//! In-memory unit-of-work provider
//!
//! Committed entities live in a shared map keyed by `(kind, id)`. Each fork
//! stages its writes privately and applies them in one step on `flush`.

use cmdbus_core::collaborators::{UnitOfWork, UnitOfWorkProvider};
use cmdbus_core::errors::{ExError, ExErrorKind, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

type EntityKey = (String, String);
type Entities = BTreeMap<EntityKey, Value>;

fn key(kind: &str, id: &str) -> EntityKey {
    (kind.to_string(), id.to_string())
}

fn lock(entities: &Mutex<Entities>) -> Result<MutexGuard<'_, Entities>> {
    entities.lock().map_err(|_| {
        ExError::new(ExErrorKind::Internal)
            .with_op("unit_of_work")
            .with_message("Entity map lock poisoned")
    })
}

/// Shared entity map that hands out staging forks
#[derive(Debug, Clone, Default)]
pub struct MemoryUnitOfWork {
    entities: Arc<Mutex<Entities>>,
}

impl MemoryUnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed state of an entity
    pub fn get(&self, kind: &str, id: &str) -> Result<Option<Value>> {
        Ok(lock(&self.entities)?.get(&key(kind, id)).cloned())
    }

    /// Committed ids of one kind, sorted
    pub fn ids(&self, kind: &str) -> Result<Vec<String>> {
        Ok(lock(&self.entities)?
            .keys()
            .filter(|(k, _)| k == kind)
            .map(|(_, id)| id.clone())
            .collect())
    }

    /// Write an entity directly, bypassing any fork
    pub fn seed(&self, kind: &str, id: &str, entity: Value) -> Result<()> {
        lock(&self.entities)?.insert(key(kind, id), entity);
        Ok(())
    }
}

impl UnitOfWorkProvider for MemoryUnitOfWork {
    fn fork(&self) -> Box<dyn UnitOfWork> {
        Box::new(MemoryUnitOfWorkFork {
            committed: self.entities.clone(),
            staged: BTreeMap::new(),
        })
    }
}

/// One execution's view; `None` in `staged` is a pending delete
#[derive(Debug)]
pub struct MemoryUnitOfWorkFork {
    committed: Arc<Mutex<Entities>>,
    staged: BTreeMap<EntityKey, Option<Value>>,
}

impl UnitOfWork for MemoryUnitOfWorkFork {
    fn find(&self, kind: &str, id: &str) -> Result<Option<Value>> {
        let k = key(kind, id);
        if let Some(staged) = self.staged.get(&k) {
            return Ok(staged.clone());
        }
        Ok(lock(&self.committed)?.get(&k).cloned())
    }

    fn create(&mut self, kind: &str, id: &str, entity: Value) -> Result<()> {
        if self.find(kind, id)?.is_some() {
            return Err(ExError::conflict(format!("{} {} already exists", kind, id))
                .with_resource_id(id));
        }
        self.staged.insert(key(kind, id), Some(entity));
        Ok(())
    }

    fn persist(&mut self, kind: &str, id: &str, entity: Value) -> Result<()> {
        self.staged.insert(key(kind, id), Some(entity));
        Ok(())
    }

    fn remove(&mut self, kind: &str, id: &str) -> Result<bool> {
        let existed = self.find(kind, id)?.is_some();
        self.staged.insert(key(kind, id), None);
        Ok(existed)
    }

    fn flush(&mut self) -> Result<()> {
        let mut committed = lock(&self.committed)?;
        for (k, staged) in std::mem::take(&mut self.staged) {
            match staged {
                Some(entity) => {
                    committed.insert(k, entity);
                }
                None => {
                    committed.remove(&k);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdbus_core::collaborators::transactional;
    use serde_json::json;

    #[test]
    fn test_fork_isolated_until_flush() {
        let provider = MemoryUnitOfWork::new();
        let mut uow = provider.fork();

        uow.create("widgets", "w1", json!({"id": "w1"})).unwrap();
        assert!(uow.find("widgets", "w1").unwrap().is_some());
        assert!(provider.get("widgets", "w1").unwrap().is_none());

        uow.flush().unwrap();
        assert_eq!(
            provider.get("widgets", "w1").unwrap(),
            Some(json!({"id": "w1"}))
        );
    }

    #[test]
    fn test_create_conflicts_with_committed() {
        let provider = MemoryUnitOfWork::new();
        provider.seed("widgets", "w1", json!({"id": "w1"})).unwrap();

        let mut uow = provider.fork();
        let err = uow.create("widgets", "w1", json!({})).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::DomainConflict);
    }

    #[test]
    fn test_remove_is_staged() {
        let provider = MemoryUnitOfWork::new();
        provider.seed("widgets", "w1", json!({"id": "w1"})).unwrap();

        let failed: Result<()> = transactional(&provider, |uow| {
            assert!(uow.remove("widgets", "w1")?);
            Err(ExError::validation("abort"))
        });
        assert!(failed.is_err());
        assert_eq!(provider.ids("widgets").unwrap(), vec!["w1"]);

        transactional(&provider, |uow| uow.remove("widgets", "w1").map(|_| ())).unwrap();
        assert!(provider.ids("widgets").unwrap().is_empty());
    }
}
