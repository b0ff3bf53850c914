//! Source account resolution
//!
//! Resolves an owner key to the marketplace seller id and a currently valid
//! access token. Account storage and token refresh belong to the account
//! layer; this module only reads what it has persisted.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use super::jobs::OwnerKey;

/// Marketplace account an import runs against
#[derive(Clone, PartialEq, Eq)]
pub struct SourceAccount {
    /// Seller id on the marketplace
    pub seller_id: String,
    /// Bearer token for the marketplace API
    pub access_token: String,
}

impl SourceAccount {
    pub fn new(seller_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            seller_id: seller_id.into(),
            access_token: access_token.into(),
        }
    }
}

impl std::fmt::Debug for SourceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceAccount")
            .field("seller_id", &self.seller_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Credential resolver consulted by the worker
///
/// `Ok(None)` means the account is gone or has no usable token, which is
/// fatal for a running import.
#[async_trait]
pub trait AccountResolver: Send + Sync {
    async fn resolve(&self, owner: &OwnerKey) -> Result<Option<SourceAccount>>;
}

/// Reads the active account and its newest unexpired token from PostgreSQL
pub struct PgAccountResolver {
    pool: PgPool,
}

impl PgAccountResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountResolver for PgAccountResolver {
    async fn resolve(&self, owner: &OwnerKey) -> Result<Option<SourceAccount>> {
        let row: Option<(String, String)> = sqlx::query_as(
            r#"
            SELECT a.ml_user_id::text, t.access_token
            FROM ml_accounts a
            JOIN tokens t ON t.ml_account_id = a.id
            WHERE a.id = $1
              AND a.company_id = $2
              AND UPPER(a.status::text) = 'ACTIVE'
              AND t.is_active = true
              AND t.expires_at > NOW()
            ORDER BY t.expires_at DESC
            LIMIT 1
            "#,
        )
        .bind(owner.account_id)
        .bind(owner.company_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to resolve source account for {owner}"))?;

        Ok(row.map(|(seller_id, access_token)| SourceAccount {
            seller_id,
            access_token,
        }))
    }
}
