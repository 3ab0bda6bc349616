//! In-memory catalog of report-eligible album variants.
//!
//! The cache maps variant ids to [`CatalogEntry`] values and is rebuilt
//! wholesale: a refresh builds a complete new snapshot and swaps it in
//! atomically, so readers never observe a half-rebuilt state and a failed
//! refresh leaves the previous snapshot intact.

use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument};

use crate::barcode::is_valid_barcode;
use crate::clock::Clock;
use crate::model::CatalogEntry;
use crate::shopify::model::Product;
use crate::shopify::{ShopifyClient, ShopifyError};

/// An immutable point-in-time view of the catalog.
#[derive(Debug, Default)]
pub struct Snapshot {
    entries: HashMap<i64, CatalogEntry>,
    built_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn lookup(&self, item_id: i64) -> Option<&CatalogEntry> {
        self.entries.get(&item_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        entries: HashMap<i64, CatalogEntry>,
        built_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self { entries, built_at }
    }
}

pub struct CatalogCache {
    shopify: Arc<ShopifyClient>,
    /// Recognized album tags, lowercased.
    album_tags: Vec<String>,
    snapshot: RwLock<Arc<Snapshot>>,
    /// Single-flight guard: concurrent refreshes queue here instead of
    /// issuing duplicate full-catalog fetches.
    refresh_lock: Mutex<()>,
    clock: Clock,
}

impl CatalogCache {
    pub fn new(shopify: Arc<ShopifyClient>, album_tags: &str, clock: Clock) -> Self {
        let album_tags = album_tags
            .split(',')
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self {
            shopify,
            album_tags,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            refresh_lock: Mutex::new(()),
            clock,
        }
    }

    /// Current snapshot. Cheap; never blocks on a refresh in progress.
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.snapshot.read().await)
    }

    pub async fn lookup(&self, item_id: i64) -> Option<CatalogEntry> {
        self.snapshot.read().await.lookup(item_id).cloned()
    }

    pub async fn size(&self) -> usize {
        self.snapshot.read().await.len()
    }

    pub async fn built_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot.read().await.built_at()
    }

    /// Rebuilds the snapshot from every catalog page and swaps it in.
    /// Returns the number of eligible variants. On error the previous
    /// snapshot stays in place.
    #[instrument(skip_all)]
    pub async fn refresh(&self) -> Result<usize, ShopifyError> {
        let _flight = self.refresh_lock.lock().await;
        self.rebuild().await
    }

    /// Refreshes when the cache is empty or older than `max_age`. Callers
    /// block on a cold cache rather than operate on stale or empty data.
    pub async fn ensure_fresh(&self, max_age: Duration) -> Result<(), ShopifyError> {
        if self.is_fresh(max_age).await {
            return Ok(());
        }
        let _flight = self.refresh_lock.lock().await;
        // Re-check: another caller may have refreshed while we waited.
        if self.is_fresh(max_age).await {
            return Ok(());
        }
        self.rebuild().await?;
        Ok(())
    }

    async fn is_fresh(&self, max_age: Duration) -> bool {
        let snap = self.snapshot.read().await;
        match snap.built_at() {
            Some(built_at) if !snap.is_empty() => self.clock.now() - built_at <= max_age,
            _ => false,
        }
    }

    async fn rebuild(&self) -> Result<usize, ShopifyError> {
        let mut entries = HashMap::new();
        let pages = self.shopify.product_pages();
        tokio::pin!(pages);
        while let Some(page) = pages.try_next().await? {
            for product in page {
                collect_eligible(&product, &self.album_tags, &mut entries);
            }
        }

        let count = entries.len();
        let snapshot = Arc::new(Snapshot {
            entries,
            built_at: Some(self.clock.now()),
        });
        *self.snapshot.write().await = snapshot;
        info!(entries = count, "catalog snapshot rebuilt");
        Ok(count)
    }
}

/// Applies the eligibility filter: the product must carry a recognized album
/// tag and the variant a valid report barcode.
fn collect_eligible(
    product: &Product,
    album_tags: &[String],
    out: &mut HashMap<i64, CatalogEntry>,
) {
    if !has_album_tag(&product.tags, album_tags) {
        return;
    }
    for variant in &product.variants {
        let Some(barcode) = variant.barcode.as_deref() else {
            continue;
        };
        if !is_valid_barcode(barcode) {
            continue;
        }
        out.insert(
            variant.id,
            CatalogEntry {
                item_id: variant.id,
                parent_id: product.id,
                display_title: product.title.clone(),
                variant_title: variant.title.clone(),
                vendor: product.vendor.clone(),
                report_barcode: barcode.trim().to_owned(),
                tags: product.tags.clone(),
            },
        );
    }
}

/// Case-insensitive membership test against a comma-delimited tag string.
fn has_album_tag(tags: &str, album_tags: &[String]) -> bool {
    tags.split(',')
        .map(|t| t.trim().to_lowercase())
        .any(|t| album_tags.iter().any(|a| *a == t))
}
