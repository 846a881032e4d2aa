//! Postgres implementation of TransactionRepository.

use async_trait::async_trait;
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{
    CapturePolicy, OriginKind, OriginRef, RiskLevel, Transaction, TransactionState,
    UnknownVariant,
};
use crate::ports::{RepositoryError, RepositoryResult, TransactionGuard, TransactionRepository};

const COLUMNS: &str = "id, name, provider_name, external_id, capture_policy, origin_kind, \
    origin_id, partner_email, amount, currency, state, risk_level, redirect_url, \
    redirect_cancel_url, redirect_success_url, raw_provider_data, error, processed_at, \
    used_strong_authentication, created_at, updated_at";

/// Postgres-backed transaction repository.
#[derive(Clone)]
pub struct PostgresTransactionRepository {
    pool: PgPool,
}

impl PostgresTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Advisory lock key of a transaction. Collisions only serialize unrelated ids.
fn advisory_key(id: Uuid) -> i64 {
    let (high, low) = id.as_u64_pair();
    (high ^ low) as i64
}

fn map_write_error(err: sqlx::Error, tx: &Transaction) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return RepositoryError::DuplicateExternalId {
                provider: tx.provider_name.clone(),
                external_id: tx.external_id.clone().unwrap_or_default(),
            };
        }
    }
    RepositoryError::from(err)
}

#[async_trait]
impl TransactionRepository for PostgresTransactionRepository {
    async fn insert(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let sql = format!(
            "INSERT INTO gateway_transactions ({COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
             $19, $20, $21) RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(tx.id)
            .bind(&tx.name)
            .bind(&tx.provider_name)
            .bind(&tx.external_id)
            .bind(tx.capture_policy.as_str())
            .bind(tx.origin.kind.as_str())
            .bind(&tx.origin.id)
            .bind(&tx.partner_email)
            .bind(&tx.amount)
            .bind(&tx.currency)
            .bind(tx.state.as_str())
            .bind(tx.risk_level.as_str())
            .bind(&tx.redirect_url)
            .bind(&tx.redirect_cancel_url)
            .bind(&tx.redirect_success_url)
            .bind(&tx.raw_provider_data)
            .bind(&tx.error)
            .bind(tx.processed_at)
            .bind(tx.used_strong_authentication)
            .bind(tx.created_at)
            .bind(tx.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_write_error(e, tx))?;

        row.into_domain()
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<Transaction> {
        let sql = format!("SELECT {COLUMNS} FROM gateway_transactions WHERE id = $1");
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("transaction {}", id)))?
            .into_domain()
    }

    /// Holds a transaction-scoped advisory lock on a dedicated connection.
    /// Dropping the guard rolls the database transaction back, which releases it.
    /// Row writes go through other connections and are not blocked by it.
    async fn lock(&self, id: Uuid) -> RepositoryResult<TransactionGuard> {
        let mut lease = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(advisory_key(id))
            .execute(&mut *lease)
            .await?;
        Ok(TransactionGuard::new(lease))
    }

    async fn update(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let sql = format!(
            "UPDATE gateway_transactions SET external_id = $2, amount = $3, state = $4, \
             risk_level = $5, redirect_url = $6, raw_provider_data = $7, error = $8, \
             processed_at = $9, used_strong_authentication = $10, updated_at = $11 \
             WHERE id = $1 RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(tx.id)
            .bind(&tx.external_id)
            .bind(&tx.amount)
            .bind(tx.state.as_str())
            .bind(tx.risk_level.as_str())
            .bind(&tx.redirect_url)
            .bind(&tx.raw_provider_data)
            .bind(&tx.error)
            .bind(tx.processed_at)
            .bind(tx.used_strong_authentication)
            .bind(tx.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_write_error(e, tx))?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("transaction {}", tx.id)))?
            .into_domain()
    }

    async fn find_by_external_id(
        &self,
        provider_name: &str,
        external_id: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM gateway_transactions \
             WHERE provider_name = $1 AND external_id = $2"
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(provider_name)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn list_by_origin(&self, origin: &OriginRef) -> RepositoryResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM gateway_transactions \
             WHERE origin_kind = $1 AND origin_id = $2 ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(origin.kind.as_str())
            .bind(&origin.id)
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn list_pending(&self, limit: i64) -> RepositoryResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM gateway_transactions \
             WHERE state = 'pending' ORDER BY created_at LIMIT $1"
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    name: String,
    provider_name: String,
    external_id: Option<String>,
    capture_policy: String,
    origin_kind: String,
    origin_id: String,
    partner_email: Option<String>,
    amount: bigdecimal::BigDecimal,
    currency: String,
    state: String,
    risk_level: String,
    redirect_url: Option<String>,
    redirect_cancel_url: Option<String>,
    redirect_success_url: Option<String>,
    raw_provider_data: Option<serde_json::Value>,
    error: Option<String>,
    processed_at: Option<chrono::DateTime<chrono::Utc>>,
    used_strong_authentication: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

fn corrupt(err: UnknownVariant) -> RepositoryError {
    RepositoryError::Database(format!("corrupt row: {}", err))
}

impl TransactionRow {
    fn into_domain(self) -> RepositoryResult<Transaction> {
        Ok(Transaction {
            id: self.id,
            name: self.name,
            provider_name: self.provider_name,
            external_id: self.external_id,
            capture_policy: CapturePolicy::from_str(&self.capture_policy).map_err(corrupt)?,
            origin: OriginRef::new(
                OriginKind::from_str(&self.origin_kind).map_err(corrupt)?,
                self.origin_id,
            ),
            partner_email: self.partner_email,
            amount: self.amount,
            currency: self.currency,
            state: TransactionState::from_str(&self.state).map_err(corrupt)?,
            risk_level: RiskLevel::from_str(&self.risk_level).map_err(corrupt)?,
            redirect_url: self.redirect_url,
            redirect_cancel_url: self.redirect_cancel_url,
            redirect_success_url: self.redirect_success_url,
            raw_provider_data: self.raw_provider_data,
            error: self.error,
            processed_at: self.processed_at,
            used_strong_authentication: self.used_strong_authentication,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advisory_key_is_stable_per_id() {
        let id = Uuid::new_v4();
        assert_eq!(advisory_key(id), advisory_key(id));
        assert_ne!(
            advisory_key(Uuid::from_u128(1)),
            advisory_key(Uuid::from_u128(2))
        );
    }
}
