//! Chunked submission of transactions to a report sink.
//!
//! Chunks are sent sequentially with a pause between them, to stay under
//! the chart API's own rate limiting. A failed chunk marks its own
//! transactions failed and the run continues with the next chunk.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

use crate::hanteo::{HanteoError, ReportSink};
use crate::model::{Transaction, TxStatus};

/// Aggregate result of a chunked submission. `transactions` carries every
/// input back with its final status and error detail set.
#[derive(Debug, Default)]
pub struct SubmitSummary {
    pub attempted: usize,
    pub succeeded: usize,
    /// Failed transactions paired with the error code or message.
    pub failed: Vec<(Transaction, String)>,
    pub transactions: Vec<Transaction>,
}

/// Splits `transactions` into fixed-size chunks and submits them
/// sequentially, waiting `inter_chunk_delay` between chunks.
#[instrument(skip_all, fields(total = transactions.len()))]
pub async fn submit_in_chunks(
    sink: &dyn ReportSink,
    mut transactions: Vec<Transaction>,
    chunk_size: usize,
    inter_chunk_delay: Duration,
) -> SubmitSummary {
    let chunk_size = chunk_size.max(1);
    let total = transactions.len();
    let mut summary = SubmitSummary::default();

    let mut start = 0usize;
    while start < total {
        let end = (start + chunk_size).min(total);
        if start > 0 {
            sleep(inter_chunk_delay).await;
        }

        let chunk = &mut transactions[start..end];
        summary.attempted += chunk.len();
        match sink.submit(chunk).await {
            Ok(_outcome) => {
                for tx in chunk.iter_mut() {
                    tx.status = TxStatus::Sent;
                }
                summary.succeeded += end - start;
            }
            Err(HanteoError::Partial { outcome }) => {
                // Only the opVal-keyed records failed; reconcile them back
                // to their transactions within this chunk.
                for tx in chunk.iter_mut() {
                    match outcome.failures.get(&tx.op_val()) {
                        Some(code) => {
                            tx.status = TxStatus::Failed;
                            tx.error_detail = Some(format!("rejected with code {code}"));
                            summary.failed.push((tx.clone(), code.to_string()));
                        }
                        None => {
                            tx.status = TxStatus::Sent;
                            summary.succeeded += 1;
                        }
                    }
                }
                warn!(
                    chunk_start = start,
                    rejected = outcome.fail_count,
                    "chunk partially rejected"
                );
            }
            Err(err) => {
                // Chunk-level failure: every transaction in this chunk is
                // marked failed; later chunks still run.
                let message = err.to_string();
                for tx in chunk.iter_mut() {
                    tx.status = TxStatus::Failed;
                    tx.error_detail = Some(message.clone());
                    summary.failed.push((tx.clone(), message.clone()));
                }
                warn!(chunk_start = start, error = %message, "chunk submission failed");
            }
        }

        start = end;
    }

    info!(
        attempted = summary.attempted,
        succeeded = summary.succeeded,
        failed = summary.failed.len(),
        "chunked submission finished"
    );
    summary.transactions = transactions;
    summary
}
