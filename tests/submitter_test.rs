//! Chunking-layer tests against a recording sink double.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use album_sync::hanteo::{HanteoError, ReportSink};
use album_sync::model::{BatchOutcome, Transaction, TxStatus};
use album_sync::submitter::submit_in_chunks;

/// Sink double that records chunk sizes and plays back scripted responses.
/// An exhausted script means "accept the chunk".
struct RecordingSink {
    chunk_sizes: Mutex<Vec<usize>>,
    script: Mutex<VecDeque<Result<BatchOutcome, HanteoError>>>,
    max: usize,
}

impl RecordingSink {
    fn accepting(max: usize) -> Self {
        Self::scripted(max, vec![])
    }

    fn scripted(max: usize, script: Vec<Result<BatchOutcome, HanteoError>>) -> Self {
        Self {
            chunk_sizes: Mutex::new(Vec::new()),
            script: Mutex::new(script.into()),
            max,
        }
    }

    fn chunk_sizes(&self) -> Vec<usize> {
        self.chunk_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportSink for RecordingSink {
    async fn submit(&self, batch: &[Transaction]) -> Result<BatchOutcome, HanteoError> {
        self.chunk_sizes.lock().unwrap().push(batch.len());
        match self.script.lock().unwrap().pop_front() {
            Some(response) => response,
            None => Ok(BatchOutcome {
                request_count: batch.len() as i64,
                success_count: batch.len() as i64,
                fail_count: 0,
                failures: HashMap::new(),
            }),
        }
    }

    fn max_batch_size(&self) -> usize {
        self.max
    }
}

fn tx(order_id: i64, line_item_id: i64) -> Transaction {
    Transaction {
        order_id,
        order_name: format!("#{order_id}"),
        fulfillment_id: 1,
        line_item_id,
        item_id: 39072856,
        parent_id: 632910392,
        barcode: "8809633189505".into(),
        display_name: "Test Album".into(),
        quantity: 1,
        nation: Some("KR".into()),
        addr_top: None,
        sws_sex: None,
        sws_birth: None,
        real_time: 1_700_000_000,
        tracking_number: "1Z2345".into(),
        status: TxStatus::Pending,
        error_detail: None,
    }
}

fn txs(count: usize) -> Vec<Transaction> {
    (0..count).map(|i| tx(1000, i as i64)).collect()
}

#[tokio::test]
async fn splits_into_fixed_chunks_with_short_tail() {
    let sink = RecordingSink::accepting(100);
    let summary = submit_in_chunks(&sink, txs(250), 100, Duration::ZERO).await;

    assert_eq!(sink.chunk_sizes(), vec![100, 100, 50]);
    assert_eq!(summary.attempted, 250);
    assert_eq!(summary.succeeded, 250);
    assert!(summary.failed.is_empty());
    assert!(summary
        .transactions
        .iter()
        .all(|t| t.status == TxStatus::Sent));
}

#[tokio::test(start_paused = true)]
async fn pauses_between_chunks_but_not_before_the_first() {
    let sink = RecordingSink::accepting(100);
    let delay = Duration::from_secs(3);
    let started = tokio::time::Instant::now();
    submit_in_chunks(&sink, txs(250), 100, delay).await;

    // Three chunks mean exactly two inter-chunk pauses.
    assert_eq!(started.elapsed(), delay * 2);
}

#[tokio::test]
async fn transport_failure_marks_only_its_own_chunk() {
    let sink = RecordingSink::scripted(
        10,
        vec![
            Ok(BatchOutcome::empty()),
            Err(HanteoError::UnexpectedStatus { status: 503 }),
        ],
    );
    let summary = submit_in_chunks(&sink, txs(25), 10, Duration::ZERO).await;

    assert_eq!(sink.chunk_sizes(), vec![10, 10, 5]);
    assert_eq!(summary.succeeded, 15);
    assert_eq!(summary.failed.len(), 10);
    let statuses: Vec<TxStatus> = summary.transactions.iter().map(|t| t.status).collect();
    assert!(statuses[..10].iter().all(|s| *s == TxStatus::Sent));
    assert!(statuses[10..20].iter().all(|s| *s == TxStatus::Failed));
    assert!(statuses[20..].iter().all(|s| *s == TxStatus::Sent));
    assert!(summary.transactions[10]
        .error_detail
        .as_deref()
        .is_some_and(|d| d.contains("503")));
}

#[tokio::test]
async fn partial_failure_is_reconciled_per_record() {
    let transactions = txs(3);
    let rejected_key = transactions[1].op_val();
    let mut failures = HashMap::new();
    failures.insert(rejected_key.clone(), 301);
    let sink = RecordingSink::scripted(
        10,
        vec![Err(HanteoError::Partial {
            outcome: BatchOutcome {
                request_count: 3,
                success_count: 2,
                fail_count: 1,
                failures,
            },
        })],
    );

    let summary = submit_in_chunks(&sink, transactions, 10, Duration::ZERO).await;

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0.op_val(), rejected_key);
    assert_eq!(summary.failed[0].1, "301");
    let rejected = &summary.transactions[1];
    assert_eq!(rejected.status, TxStatus::Failed);
    assert_eq!(rejected.error_detail.as_deref(), Some("rejected with code 301"));
    assert_eq!(summary.transactions[0].status, TxStatus::Sent);
    assert_eq!(summary.transactions[2].status, TxStatus::Sent);
}

#[tokio::test]
async fn empty_input_never_touches_the_sink() {
    let sink = RecordingSink::accepting(100);
    let summary = submit_in_chunks(&sink, Vec::new(), 100, Duration::from_secs(1)).await;

    assert!(sink.chunk_sizes().is_empty());
    assert_eq!(summary.attempted, 0);
    assert_eq!(summary.succeeded, 0);
    assert!(summary.failed.is_empty());
}

#[tokio::test]
async fn zero_chunk_size_is_clamped_to_one() {
    let sink = RecordingSink::accepting(100);
    submit_in_chunks(&sink, txs(3), 0, Duration::ZERO).await;
    assert_eq!(sink.chunk_sizes(), vec![1, 1, 1]);
}
