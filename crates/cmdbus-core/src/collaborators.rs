//! Seams to collaborators the bus coordinates with but does not own
//!
//! - [`UnitOfWorkProvider`]: transactional entity storage used by handlers
//! - [`TenantEncryption`]: decrypts stored audit fields on read
//! - [`CacheInvalidator`]: notified after every execute and undo

use crate::errors::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ===== Unit of work =====

/// A forked, isolated view of entity storage
///
/// Writes are staged until [`UnitOfWork::flush`]; dropping an unflushed
/// unit of work discards them.
pub trait UnitOfWork: Send {
    /// Current state of an entity, including this unit's staged writes
    fn find(&self, kind: &str, id: &str) -> Result<Option<Value>>;

    /// Stage a new entity. Fails with `DomainConflict` when the id is taken.
    fn create(&mut self, kind: &str, id: &str, entity: Value) -> Result<()>;

    /// Stage an insert-or-replace
    fn persist(&mut self, kind: &str, id: &str, entity: Value) -> Result<()>;

    /// Stage a delete. Returns `false` when the entity did not exist.
    fn remove(&mut self, kind: &str, id: &str) -> Result<bool>;

    /// Commit staged writes
    fn flush(&mut self) -> Result<()>;
}

/// Hands out one unit of work per execution
pub trait UnitOfWorkProvider: Send + Sync {
    fn fork(&self) -> Box<dyn UnitOfWork>;
}

/// Run `f` in a fresh unit of work, flushing only when it succeeds
///
/// # Errors
///
/// Returns the error of `f` (nothing is committed) or of the flush.
pub fn transactional<T, F>(provider: &dyn UnitOfWorkProvider, f: F) -> Result<T>
where
    F: FnOnce(&mut dyn UnitOfWork) -> Result<T>,
{
    let mut uow = provider.fork();
    let value = f(uow.as_mut())?;
    uow.flush()?;
    Ok(value)
}

// ===== Encryption =====

/// Tenant-scoped decryption of stored audit values
pub trait TenantEncryption: Send + Sync {
    fn decrypt_value(
        &self,
        tenant_id: Option<&str>,
        organization_id: Option<&str>,
        value: &Value,
    ) -> Result<Value>;
}

// ===== Cache =====

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheIdentifiers {
    pub id: Option<String>,
    pub organization_id: Option<String>,
    pub tenant_id: Option<String>,
}

/// One invalidation notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInvalidation {
    pub entity_kind: String,
    pub identifiers: CacheIdentifiers,
    pub tenant_id: Option<String>,
    /// `command:<id>:execute` or `command:<id>:undo`
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_tags: Vec<String>,
}

impl CacheInvalidation {
    pub fn reason_for(command_id: &str, stage: &str) -> String {
        format!("command:{}:{}", command_id, stage)
    }
}

/// Receives invalidation notices; failures are logged by the bus and never
/// fail the command
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, invalidation: &CacheInvalidation) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCacheInvalidator;

impl CacheInvalidator for NoopCacheInvalidator {
    fn invalidate(&self, _invalidation: &CacheInvalidation) -> Result<()> {
        Ok(())
    }
}
