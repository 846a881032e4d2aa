//! Persistence and collaborator ports.
//!
//! The transaction service depends on these traits only; adapters live under
//! `crate::adapters`.

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{OriginAdapter, OriginRef, Transaction};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("external id {external_id} already used by provider {provider}")]
    DuplicateExternalId {
        provider: String,
        external_id: String,
    },

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row".to_string()),
            other => RepositoryError::Database(other.to_string()),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Exclusive hold on one transaction, released when dropped.
///
/// Whatever keeps the lock alive (a mutex guard, an open database
/// transaction) is owned here and never looked at again.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct TransactionGuard {
    _held: Box<dyn Any + Send>,
}

impl TransactionGuard {
    pub fn new<T: Send + 'static>(held: T) -> Self {
        Self {
            _held: Box::new(held),
        }
    }
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert(&self, tx: &Transaction) -> RepositoryResult<Transaction>;

    async fn get(&self, id: Uuid) -> RepositoryResult<Transaction>;

    /// Waits for exclusive access to transaction `id`.
    ///
    /// The lock is shared by every service over the same store, in this
    /// process or another one. The id does not have to exist yet.
    async fn lock(&self, id: Uuid) -> RepositoryResult<TransactionGuard>;

    /// Persists every mutable field of `tx`. Origin and identity are never rewritten.
    async fn update(&self, tx: &Transaction) -> RepositoryResult<Transaction>;

    async fn find_by_external_id(
        &self,
        provider_name: &str,
        external_id: &str,
    ) -> RepositoryResult<Option<Transaction>>;

    async fn list_by_origin(&self, origin: &OriginRef) -> RepositoryResult<Vec<Transaction>>;

    /// Oldest first.
    async fn list_pending(&self, limit: i64) -> RepositoryResult<Vec<Transaction>>;
}

/// Resolves a stored origin reference back to its live document.
pub trait OriginDirectory: Send + Sync {
    fn lookup(&self, origin: &OriginRef) -> Option<Arc<dyn OriginAdapter>>;
}
