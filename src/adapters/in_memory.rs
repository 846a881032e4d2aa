use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::locks::TransactionLocks;
use crate::domain::{OriginAdapter, OriginRef, Transaction, TransactionState};
use crate::ports::{
    OriginDirectory, RepositoryError, RepositoryResult, TransactionGuard, TransactionRepository,
};

/// A thread-safe in-memory transaction store.
///
/// Enforces the same `(provider_name, external_id)` uniqueness as the SQL schema.
/// Clones share both the records and the per-transaction locks.
#[derive(Default, Clone)]
pub struct InMemoryTransactionRepository {
    transactions: Arc<RwLock<HashMap<Uuid, Transaction>>>,
    locks: TransactionLocks,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.transactions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.transactions.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<Transaction> {
        self.transactions.read().await.values().cloned().collect()
    }
}

fn check_external_id(
    transactions: &HashMap<Uuid, Transaction>,
    tx: &Transaction,
) -> RepositoryResult<()> {
    let Some(external_id) = tx.external_id.as_deref() else {
        return Ok(());
    };

    let taken = transactions.values().any(|other| {
        other.id != tx.id
            && other.provider_name == tx.provider_name
            && other.external_id.as_deref() == Some(external_id)
    });

    if taken {
        return Err(RepositoryError::DuplicateExternalId {
            provider: tx.provider_name.clone(),
            external_id: external_id.to_string(),
        });
    }

    Ok(())
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn insert(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let mut transactions = self.transactions.write().await;
        check_external_id(&transactions, tx)?;
        transactions.insert(tx.id, tx.clone());
        Ok(tx.clone())
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<Transaction> {
        let transactions = self.transactions.read().await;
        transactions
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("transaction {}", id)))
    }

    async fn lock(&self, id: Uuid) -> RepositoryResult<TransactionGuard> {
        Ok(TransactionGuard::new(self.locks.acquire(id).await))
    }

    async fn update(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let mut transactions = self.transactions.write().await;
        if !transactions.contains_key(&tx.id) {
            return Err(RepositoryError::NotFound(format!("transaction {}", tx.id)));
        }
        check_external_id(&transactions, tx)?;
        transactions.insert(tx.id, tx.clone());
        Ok(tx.clone())
    }

    async fn find_by_external_id(
        &self,
        provider_name: &str,
        external_id: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .find(|tx| {
                tx.provider_name == provider_name && tx.external_id.as_deref() == Some(external_id)
            })
            .cloned())
    }

    async fn list_by_origin(&self, origin: &OriginRef) -> RepositoryResult<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut matching: Vec<Transaction> = transactions
            .values()
            .filter(|tx| &tx.origin == origin)
            .cloned()
            .collect();
        matching.sort_by_key(|tx| tx.created_at);
        Ok(matching)
    }

    async fn list_pending(&self, limit: i64) -> RepositoryResult<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut pending: Vec<Transaction> = transactions
            .values()
            .filter(|tx| tx.state == TransactionState::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|tx| tx.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }
}

/// Registry of live origin documents, keyed by their reference.
#[derive(Default, Clone)]
pub struct InMemoryOriginDirectory {
    origins: Arc<StdRwLock<HashMap<OriginRef, Arc<dyn OriginAdapter>>>>,
}

impl InMemoryOriginDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, origin: Arc<dyn OriginAdapter>) {
        let mut origins = self
            .origins
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        origins.insert(origin.reference(), origin);
    }
}

impl OriginDirectory for InMemoryOriginDirectory {
    fn lookup(&self, origin: &OriginRef) -> Option<Arc<dyn OriginAdapter>> {
        let origins = self
            .origins
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        origins.get(origin).cloned()
    }
}
