//! The synchronization pipeline: catalog freshness, order paging, mapping,
//! and chunked submission, composed for the periodic sweep and the
//! webhook-triggered single-order sweep.

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use futures::TryStreamExt;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::catalog::CatalogCache;
use crate::clock::Clock;
use crate::config::Config;
use crate::hanteo::{HanteoClient, ReportSink, RetryPolicy, SubmitOptions, TokenManager};
use crate::mapper;
use crate::model::{SweepReport, Transaction};
use crate::shopify::model::Order;
use crate::shopify::ShopifyClient;
use crate::submitter;

pub struct Pipeline {
    shopify: Arc<ShopifyClient>,
    catalog: Arc<CatalogCache>,
    sink: Arc<dyn ReportSink>,
    catalog_max_age: ChronoDuration,
    chunk_delay: Duration,
    clock: Clock,
}

impl Pipeline {
    pub fn new(
        shopify: Arc<ShopifyClient>,
        catalog: Arc<CatalogCache>,
        sink: Arc<dyn ReportSink>,
        catalog_max_age: ChronoDuration,
        chunk_delay: Duration,
        clock: Clock,
    ) -> Self {
        Self {
            shopify,
            catalog,
            sink,
            catalog_max_age,
            chunk_delay,
            clock,
        }
    }

    pub fn catalog(&self) -> &CatalogCache {
        &self.catalog
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Sweeps orders updated in the last `hours_ago` hours, mapping and
    /// submitting their fulfilled album line items. One order failing to
    /// map is skipped with a warning; the sweep continues.
    #[instrument(skip(self))]
    pub async fn sweep_recent(&self, hours_ago: i64, limit: u32) -> Result<SweepReport> {
        self.catalog
            .ensure_fresh(self.catalog_max_age)
            .await
            .context("failed to refresh catalog before sweep")?;
        let snapshot = self.catalog.snapshot().await;

        let mut report = SweepReport::default();
        let mut transactions: Vec<Transaction> = Vec::new();
        let updated_min = self.clock.now() - ChronoDuration::hours(hours_ago);

        let pages = self.shopify.order_pages(updated_min, limit);
        tokio::pin!(pages);
        while let Some(page) = pages
            .try_next()
            .await
            .context("failed to fetch order page")?
        {
            for order in page {
                report.orders_seen += 1;
                match self.order_transactions(&order, &snapshot).await {
                    Ok(mut txs) => transactions.append(&mut txs),
                    Err(err) => {
                        report.orders_skipped += 1;
                        warn!(order_id = order.id, ?err, "skipping order after mapping failure");
                    }
                }
            }
        }

        Ok(self.submit_and_report(report, transactions).await)
    }

    /// Single-order sweep, invoked per fulfillment webhook event.
    #[instrument(skip(self))]
    pub async fn sweep_order(&self, order_id: i64) -> Result<SweepReport> {
        self.catalog
            .ensure_fresh(self.catalog_max_age)
            .await
            .context("failed to refresh catalog before sweep")?;
        let snapshot = self.catalog.snapshot().await;

        let order = self
            .shopify
            .fetch_order(order_id)
            .await
            .with_context(|| format!("failed to fetch order {order_id}"))?;

        let mut report = SweepReport {
            orders_seen: 1,
            ..Default::default()
        };
        let transactions = self.order_transactions(&order, &snapshot).await?;
        report = self.submit_and_report(report, transactions).await;
        Ok(report)
    }

    async fn order_transactions(
        &self,
        order: &Order,
        snapshot: &crate::catalog::Snapshot,
    ) -> Result<Vec<Transaction>> {
        let fetched;
        let fulfillments = if order.fulfillments.is_empty() {
            fetched = self
                .shopify
                .fetch_fulfillments(order.id)
                .await
                .with_context(|| format!("failed to fetch fulfillments of order {}", order.id))?;
            &fetched
        } else {
            &order.fulfillments
        };
        Ok(mapper::map_order(order, fulfillments, snapshot, self.clock.now()))
    }

    async fn submit_and_report(
        &self,
        mut report: SweepReport,
        transactions: Vec<Transaction>,
    ) -> SweepReport {
        report.transactions = transactions.len();
        let summary = submitter::submit_in_chunks(
            self.sink.as_ref(),
            transactions,
            self.sink.max_batch_size(),
            self.chunk_delay,
        )
        .await;
        report.succeeded = summary.succeeded;
        report.failed = summary.failed.len();
        report.finished_at = Some(self.clock.now());
        info!(
            orders = report.orders_seen,
            transactions = report.transactions,
            succeeded = report.succeeded,
            failed = report.failed,
            "sweep finished"
        );
        report
    }
}

/// Wires the full pipeline from configuration. Used by the server binary
/// and the one-shot sweep binary.
pub fn build_pipeline(cfg: &Config, clock: Clock) -> Result<Arc<Pipeline>> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.app.request_timeout_secs))
        .user_agent(concat!("album-sync/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let shopify = Arc::new(
        ShopifyClient::new(
            http.clone(),
            &cfg.shopify.shop_url,
            cfg.shopify.access_token.clone(),
            cfg.shopify.api_version.clone(),
            cfg.shopify.page_size,
        )
        .context("invalid Shopify configuration")?,
    );

    let catalog = Arc::new(CatalogCache::new(
        Arc::clone(&shopify),
        &cfg.shopify.album_tags,
        clock.clone(),
    ));

    let hanteo_base =
        Url::parse(&cfg.hanteo.base_url).context("invalid hanteo.base_url")?;
    let token = Arc::new(TokenManager::new(
        http.clone(),
        hanteo_base.clone(),
        cfg.hanteo.client_key.clone(),
        clock.clone(),
    ));
    let sink: Arc<dyn ReportSink> = Arc::new(HanteoClient::new(
        http,
        hanteo_base,
        token,
        SubmitOptions {
            family_code: cfg.hanteo.family_code,
            branch_code: cfg.hanteo.branch_code,
            max_batch_size: cfg.hanteo.max_batch_size,
            retry: RetryPolicy {
                max_attempts: cfg.hanteo.max_retries,
                initial_delay: Duration::from_millis(cfg.hanteo.initial_backoff_ms),
                max_delay: Duration::from_millis(cfg.hanteo.max_backoff_ms),
                ..RetryPolicy::default()
            },
        },
    ));

    Ok(Arc::new(Pipeline::new(
        shopify,
        catalog,
        sink,
        ChronoDuration::seconds(cfg.app.catalog_max_age_secs as i64),
        Duration::from_millis(cfg.hanteo.chunk_delay_ms),
        clock,
    )))
}
