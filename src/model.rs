use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Submission lifecycle of a transaction within one pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Sent => "sent",
            TxStatus::Failed => "failed",
            TxStatus::Cancelled => "cancelled",
        }
    }
}

/// A report-eligible product variant, as cached from the shop catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Variant id — the identifier order line items reference.
    pub item_id: i64,
    /// Owning product id.
    pub parent_id: i64,
    pub display_title: String,
    pub variant_title: String,
    pub vendor: Option<String>,
    pub report_barcode: String,
    pub tags: String,
}

/// One fulfilled album line item, ready for submission to the chart API.
///
/// Identified by `(order_id, line_item_id)`; never persisted — its lifetime
/// is bounded by one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub order_id: i64,
    pub order_name: String,
    pub fulfillment_id: i64,
    pub line_item_id: i64,
    pub item_id: i64,
    pub parent_id: i64,
    pub barcode: String,
    pub display_name: String,
    pub quantity: i64,
    pub nation: Option<String>,
    pub addr_top: Option<String>,
    pub sws_sex: Option<String>,
    pub sws_birth: Option<String>,
    /// Fulfillment creation time in epoch seconds.
    pub real_time: i64,
    pub tracking_number: String,
    pub status: TxStatus,
    pub error_detail: Option<String>,
}

impl Transaction {
    /// Dedup token sent to the chart API. Derived only from the stable
    /// order/line-item identifiers so a retried send of the same logical
    /// transaction carries the same token.
    pub fn op_val(&self) -> String {
        format!("{}-{}", self.order_id, self.line_item_id)
    }
}

/// Per-batch result reported by the chart API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub request_count: i64,
    pub success_count: i64,
    pub fail_count: i64,
    /// Rejected records keyed by dedup token, valued by the API error code.
    pub failures: HashMap<String, i64>,
}

impl BatchOutcome {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Aggregate result of a full sweep, for logging and the manual trigger.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub orders_seen: usize,
    pub orders_skipped: usize,
    pub transactions: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub finished_at: Option<DateTime<Utc>>,
}
