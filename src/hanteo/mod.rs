//! Client for the Hanteo bulk-collect API.
//!
//! One [`submit`](HanteoClient::submit) call posts a single batch of up to
//! `max_batch_size` records. Transport and 5xx failures are retried with
//! exponential backoff; a token rejection triggers exactly one
//! re-authenticate-and-resend cycle; validation failures are surfaced
//! immediately.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{BatchOutcome, Transaction};

pub mod auth;
pub mod model;

pub use auth::TokenManager;

use model::{codes, CollectData, Envelope, SaleRecord};

#[derive(Debug, Error)]
pub enum HanteoError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication failed (code {code}): {message}")]
    AuthFailed { code: i64, message: String },

    /// The server rejected the bearer token (HTTP 401 or body code 821/822).
    #[error("token rejected by chart API")]
    TokenRejected,

    #[error("batch of {len} exceeds the maximum of {max} records")]
    BatchTooLarge { len: usize, max: usize },

    /// Some records were accepted and others rejected; the outcome carries
    /// the per-record failure map keyed by dedup token.
    #[error("partial submission failure: {} of {} records rejected", outcome.fail_count, outcome.request_count)]
    Partial { outcome: BatchOutcome },

    #[error("chart API error (code {code}): {message}")]
    Api { code: i64, message: String },

    #[error("unexpected HTTP status {status} from chart API")]
    UnexpectedStatus { status: u16 },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid chart API base URL: {0}")]
    InvalidBaseUrl(String),
}

/// Exponential backoff settings for transient submission failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// `initial_delay * factor^attempt`, capped at `max_delay`.
    fn delay_for(&self, attempt: u32) -> Duration {
        let millis = self.initial_delay.as_millis() as f64 * self.factor.powi(attempt as i32);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

/// Transient failures worth another attempt: transport errors and
/// 5xx-class statuses. Validation, auth, and partial-success outcomes
/// are never retried here.
fn is_transient(err: &HanteoError) -> bool {
    match err {
        HanteoError::Http(e) => {
            e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
        }
        HanteoError::UnexpectedStatus { status } => (500..600).contains(status),
        _ => false,
    }
}

/// Runs `operation` with exponential backoff on transient errors, up to
/// `policy.max_attempts` total attempts.
async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, HanteoError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HanteoError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_transient(&err) || attempt + 1 >= policy.max_attempts {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient submission error; retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Batch sink abstraction so the chunking layer and the pipeline can be
/// tested against a recording double.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Submits one batch. Empty input returns a zero-count outcome without
    /// touching the network.
    async fn submit(&self, batch: &[Transaction]) -> Result<BatchOutcome, HanteoError>;

    /// Batch ceiling callers should chunk to.
    fn max_batch_size(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub family_code: i64,
    pub branch_code: i64,
    pub max_batch_size: usize,
    pub retry: RetryPolicy,
}

pub struct HanteoClient {
    http: Client,
    base_url: Url,
    token: Arc<TokenManager>,
    opts: SubmitOptions,
}

impl fmt::Debug for HanteoClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HanteoClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HanteoClient {
    pub fn new(http: Client, base_url: Url, token: Arc<TokenManager>, opts: SubmitOptions) -> Self {
        Self {
            http,
            base_url,
            token,
            opts,
        }
    }

    fn to_record(&self, tx: &Transaction) -> SaleRecord {
        SaleRecord {
            family_code: self.opts.family_code,
            branch_code: self.opts.branch_code,
            barcode: tx.barcode.clone(),
            album_name: tx.display_name.clone(),
            sales_volume: tx.quantity,
            nation: tx.nation.clone(),
            addr_top: tx.addr_top.clone(),
            sws_sex: tx.sws_sex.clone(),
            sws_birth: tx.sws_birth.clone(),
            sp_code: None,
            real_time: tx.real_time,
            op_val: tx.op_val(),
        }
    }

    /// One POST of the whole batch, with transient-failure retry. Token
    /// rejections surface as [`HanteoError::TokenRejected`] for the caller
    /// to handle.
    async fn post_batch(&self, token: &str, batch: &[Transaction]) -> Result<BatchOutcome, HanteoError> {
        let url = self
            .base_url
            .join("v4/collect/realtimedata/ALBUM")
            .map_err(|e| HanteoError::InvalidBaseUrl(e.to_string()))?;
        let records: Vec<SaleRecord> = batch.iter().map(|tx| self.to_record(tx)).collect();

        let body = retry_transient(&self.opts.retry, || {
            let url = url.clone();
            let records = &records;
            async move {
                let res = self
                    .http
                    .post(url)
                    .bearer_auth(token)
                    .json(records)
                    .send()
                    .await?;

                let status = res.status();
                if status == StatusCode::UNAUTHORIZED {
                    return Err(HanteoError::TokenRejected);
                }
                if !status.is_success() {
                    return Err(HanteoError::UnexpectedStatus {
                        status: status.as_u16(),
                    });
                }
                Ok(res.text().await?)
            }
        })
        .await?;

        let envelope: Envelope<CollectData> =
            serde_json::from_str(&body).map_err(|e| HanteoError::Deserialize {
                context: "collect response".into(),
                source: e,
            })?;

        match envelope.code {
            codes::SUCCESS => {
                let outcome = outcome_from(envelope.result_data, batch.len());
                debug!(
                    request = outcome.request_count,
                    success = outcome.success_count,
                    "batch accepted"
                );
                Ok(outcome)
            }
            codes::PARTIAL_SUCCESS => {
                let outcome = outcome_from(envelope.result_data, batch.len());
                Err(HanteoError::Partial { outcome })
            }
            codes::TOKEN_INVALID | codes::TOKEN_EXPIRED => Err(HanteoError::TokenRejected),
            code => Err(HanteoError::Api {
                code,
                message: envelope.message.unwrap_or_default(),
            }),
        }
    }
}

fn outcome_from(data: Option<CollectData>, batch_len: usize) -> BatchOutcome {
    match data {
        Some(data) => BatchOutcome {
            request_count: data.request_count,
            success_count: data.success_count,
            fail_count: data.fail_count,
            failures: data.fail_data.unwrap_or_default(),
        },
        // Defensive shape for a success envelope without resultData.
        None => BatchOutcome {
            request_count: batch_len as i64,
            success_count: batch_len as i64,
            fail_count: 0,
            failures: Default::default(),
        },
    }
}

#[async_trait]
impl ReportSink for HanteoClient {
    async fn submit(&self, batch: &[Transaction]) -> Result<BatchOutcome, HanteoError> {
        if batch.is_empty() {
            return Ok(BatchOutcome::empty());
        }
        if batch.len() > self.opts.max_batch_size {
            return Err(HanteoError::BatchTooLarge {
                len: batch.len(),
                max: self.opts.max_batch_size,
            });
        }

        // Bounded re-auth loop, never recursion: one retry after a token
        // rejection, then the error surfaces.
        for auth_attempt in 0..2u8 {
            let token = self.token.ensure_valid().await?;
            match self.post_batch(&token, batch).await {
                Err(HanteoError::TokenRejected) if auth_attempt == 0 => {
                    warn!("token rejected mid-submission; re-authenticating once");
                    self.token.invalidate().await;
                }
                other => return other,
            }
        }
        Err(HanteoError::TokenRejected)
    }

    fn max_batch_size(&self) -> usize {
        self.opts.max_batch_size
    }
}
