//! Record persistence
//!
//! A sink persists one record at a time and commits once per page. Persisting
//! the same external id again must resolve to `updated`, never a duplicate.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::error;

use super::fetcher::DetailedRecord;
use super::jobs::OwnerKey;

/// How a persisted record was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistOutcome {
    Created,
    Updated,
}

/// Storage for imported records
#[async_trait]
pub trait RecordSink: Send {
    async fn persist(&mut self, record: &DetailedRecord, owner: &OwnerKey)
        -> Result<PersistOutcome>;

    /// Close the transaction covering the current page
    async fn commit_batch(&mut self) -> Result<()>;
}

/// Upserts into `ml_orders`, one transaction per page
///
/// Each record runs under its own savepoint so a failing upsert only rolls
/// back that record; the rest of the page still commits.
pub struct PgRecordSink {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
    /// Set once the page transaction can no longer be trusted
    aborted: bool,
}

impl PgRecordSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tx: None,
            aborted: false,
        }
    }
}

#[async_trait]
impl RecordSink for PgRecordSink {
    async fn persist(
        &mut self,
        record: &DetailedRecord,
        owner: &OwnerKey,
    ) -> Result<PersistOutcome> {
        if self.aborted {
            return Err(anyhow!(
                "Batch transaction aborted, order {} not stored",
                record.external_id
            ));
        }

        let tx = match self.tx {
            Some(ref mut tx) => tx,
            None => self
                .tx
                .insert(self.pool.begin().await.context("Failed to start batch transaction")?),
        };

        if let Err(e) = sqlx::query("SAVEPOINT order_savepoint")
            .execute(&mut **tx)
            .await
        {
            self.aborted = true;
            return Err(e).context("Failed to create savepoint");
        }

        match upsert_order(&mut **tx, record, owner).await {
            Ok(inserted) => {
                if let Err(e) = sqlx::query("RELEASE SAVEPOINT order_savepoint")
                    .execute(&mut **tx)
                    .await
                {
                    self.aborted = true;
                    return Err(e).context("Failed to release savepoint");
                }

                match inserted {
                    Some(true) => Ok(PersistOutcome::Created),
                    Some(false) => Ok(PersistOutcome::Updated),
                    None => Err(anyhow!(
                        "Order {} belongs to another company",
                        record.external_id
                    )),
                }
            }
            Err(e) => {
                if let Err(rollback_err) = sqlx::query("ROLLBACK TO SAVEPOINT order_savepoint")
                    .execute(&mut **tx)
                    .await
                {
                    error!(
                        external_id = record.external_id,
                        error = %rollback_err,
                        "Failed to roll back savepoint, aborting batch"
                    );
                    self.aborted = true;
                }
                Err(e)
            }
        }
    }

    async fn commit_batch(&mut self) -> Result<()> {
        let tx = self.tx.take();
        if std::mem::take(&mut self.aborted) {
            if let Some(tx) = tx {
                tx.rollback().await.context("Failed to roll back batch")?;
            }
            return Err(anyhow!("Batch transaction was aborted and has been rolled back"));
        }
        if let Some(tx) = tx {
            tx.commit().await.context("Failed to commit batch")?;
        }
        Ok(())
    }
}

/// Insert or refresh one order
///
/// Returns `Some(true)` for a new row, `Some(false)` for an update and `None`
/// when the order id is already owned by another company.
async fn upsert_order(
    conn: &mut PgConnection,
    record: &DetailedRecord,
    owner: &OwnerKey,
) -> Result<Option<bool>> {
    let status = record.data.get("status").and_then(Value::as_str);
    let total_amount = record.data.get("total_amount").and_then(Value::as_f64);
    let date_created = record
        .data
        .get("date_created")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));

    // xmax is 0 only for a freshly inserted row version
    sqlx::query_scalar(
        r#"
        INSERT INTO ml_orders (
            ml_order_id, company_id, ml_account_id, status,
            total_amount, date_created, payload, imported_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
        ON CONFLICT (ml_order_id) DO UPDATE SET
            status = EXCLUDED.status,
            total_amount = EXCLUDED.total_amount,
            date_created = EXCLUDED.date_created,
            payload = EXCLUDED.payload,
            updated_at = NOW()
        WHERE ml_orders.company_id = EXCLUDED.company_id
        RETURNING (xmax = 0) AS inserted
        "#,
    )
    .bind(record.external_id)
    .bind(owner.company_id)
    .bind(owner.account_id)
    .bind(status)
    .bind(total_amount)
    .bind(date_created)
    .bind(&record.data)
    .fetch_optional(&mut *conn)
    .await
    .with_context(|| format!("Failed to upsert order {}", record.external_id))
}

/// Record held by [`InMemorySink`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub owner: OwnerKey,
    pub data: Value,
}

/// Shared view of what an [`InMemorySink`] has committed
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<StoreState>>,
}

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<i64, StoredRecord>,
    commits: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, external_id: i64) -> Option<StoredRecord> {
        self.state().records.get(&external_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of batches committed so far
    pub fn commits(&self) -> usize {
        self.state().commits
    }
}

/// Sink that stages records per batch and commits them into an [`InMemoryStore`]
///
/// Records persisted since the last commit are lost if the sink is dropped.
pub struct InMemorySink {
    store: InMemoryStore,
    staged: HashMap<i64, StoredRecord>,
}

impl InMemorySink {
    pub fn new(store: InMemoryStore) -> Self {
        Self {
            store,
            staged: HashMap::new(),
        }
    }
}

#[async_trait]
impl RecordSink for InMemorySink {
    async fn persist(
        &mut self,
        record: &DetailedRecord,
        owner: &OwnerKey,
    ) -> Result<PersistOutcome> {
        let existing_owner = self
            .staged
            .get(&record.external_id)
            .map(|r| r.owner)
            .or_else(|| self.store.get(record.external_id).map(|r| r.owner));

        let outcome = match existing_owner {
            Some(o) if o.company_id != owner.company_id => {
                return Err(anyhow!(
                    "Order {} belongs to another company",
                    record.external_id
                ));
            }
            Some(_) => PersistOutcome::Updated,
            None => PersistOutcome::Created,
        };

        self.staged.insert(
            record.external_id,
            StoredRecord {
                owner: *owner,
                data: record.data.clone(),
            },
        );
        Ok(outcome)
    }

    async fn commit_batch(&mut self) -> Result<()> {
        let mut state = self.store.state();
        state.records.extend(self.staged.drain());
        state.commits += 1;
        Ok(())
    }
}
