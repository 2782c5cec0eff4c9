//! IremboPay product code lookup
//!
//! Every invoice line item must reference a product code registered in the
//! IremboPay merchant portal. Codes are resolved per tour package through a
//! [`ProductCatalog`], so the mapping can change without a redeploy.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{PaymentError, PaymentResult};

/// Provider product code, always stored trimmed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProductCode(String);

impl ProductCode {
    /// Returns `None` for a blank code
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn resolve(&self, tour_id: Uuid) -> PaymentResult<Option<ProductCode>>;
}

// =============================================================================
// Postgres-backed catalog
// =============================================================================

/// Reads `tour_product_codes`
#[derive(Clone)]
pub struct PgProductCatalog {
    pool: PgPool,
}

impl PgProductCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace the code for a tour
    pub async fn upsert(
        &self,
        tour_id: Uuid,
        code: &ProductCode,
        notes: Option<&str>,
    ) -> PaymentResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tour_product_codes (tour_package_id, product_code, notes, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (tour_package_id)
            DO UPDATE SET product_code = EXCLUDED.product_code,
                          notes = EXCLUDED.notes,
                          updated_at = NOW()
            "#,
        )
        .bind(tour_id)
        .bind(code.as_str())
        .bind(notes)
        .execute(&self.pool)
        .await?;

        tracing::info!(tour_id = %tour_id, product_code = %code, "Product code mapping saved");
        Ok(())
    }

    /// Returns true when a mapping was deleted
    pub async fn remove(&self, tour_id: Uuid) -> PaymentResult<bool> {
        let result = sqlx::query("DELETE FROM tour_product_codes WHERE tour_package_id = $1")
            .bind(tour_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Tour packages with no product code
    pub async fn list_unmapped(&self) -> PaymentResult<Vec<(Uuid, String)>> {
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT t.id, t.title
            FROM tour_packages t
            LEFT JOIN tour_product_codes c ON c.tour_package_id = t.id
            WHERE c.tour_package_id IS NULL
            ORDER BY t.title
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl ProductCatalog for PgProductCatalog {
    async fn resolve(&self, tour_id: Uuid) -> PaymentResult<Option<ProductCode>> {
        let code: Option<String> = sqlx::query_scalar(
            "SELECT product_code FROM tour_product_codes WHERE tour_package_id = $1",
        )
        .bind(tour_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(code.as_deref().and_then(ProductCode::new))
    }
}

// =============================================================================
// In-process catalog
// =============================================================================

/// One entry of a mappings file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductMappingEntry {
    pub tour_id: Uuid,
    pub product_code: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// In-memory mapping, seeded from a list or a JSON file
#[derive(Debug, Default)]
pub struct StaticProductCatalog {
    codes: RwLock<HashMap<Uuid, ProductCode>>,
}

impl StaticProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (Uuid, String)>) -> Self {
        let codes = entries
            .into_iter()
            .filter_map(|(tour_id, raw)| ProductCode::new(&raw).map(|code| (tour_id, code)))
            .collect();
        Self {
            codes: RwLock::new(codes),
        }
    }

    /// Load a JSON array of `{tourId, productCode, notes?}` objects
    pub async fn from_json_file(path: impl AsRef<Path>) -> PaymentResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            PaymentError::Config(format!(
                "Cannot read product mappings {}: {}",
                path.display(),
                e
            ))
        })?;
        let entries: Vec<ProductMappingEntry> = serde_json::from_str(&raw).map_err(|e| {
            PaymentError::Config(format!(
                "Invalid product mappings {}: {}",
                path.display(),
                e
            ))
        })?;

        let catalog =
            Self::from_entries(entries.into_iter().map(|e| (e.tour_id, e.product_code)));
        tracing::info!(
            path = %path.display(),
            mappings = catalog.codes.read().await.len(),
            "Loaded product code mappings"
        );
        Ok(catalog)
    }

    pub async fn insert(&self, tour_id: Uuid, code: ProductCode) {
        self.codes.write().await.insert(tour_id, code);
    }

    pub async fn remove(&self, tour_id: Uuid) -> Option<ProductCode> {
        self.codes.write().await.remove(&tour_id)
    }
}

#[async_trait]
impl ProductCatalog for StaticProductCatalog {
    async fn resolve(&self, tour_id: Uuid) -> PaymentResult<Option<ProductCode>> {
        Ok(self.codes.read().await.get(&tour_id).cloned())
    }
}

// =============================================================================
// Validation
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingReport {
    pub checked: usize,
    /// Tours that would fail payment initialization
    pub missing: Vec<Uuid>,
}

impl MappingReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Check every tour id against the catalog
pub async fn validate_mappings(
    tour_ids: &[Uuid],
    catalog: &dyn ProductCatalog,
) -> PaymentResult<MappingReport> {
    let mut report = MappingReport {
        checked: tour_ids.len(),
        missing: Vec::new(),
    };

    for tour_id in tour_ids {
        if catalog.resolve(*tour_id).await?.is_none() {
            report.missing.push(*tour_id);
        }
    }

    if !report.is_complete() {
        tracing::warn!(
            missing = report.missing.len(),
            checked = report.checked,
            "Tour packages without IremboPay product code"
        );
    }
    Ok(report)
}
