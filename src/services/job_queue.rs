use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::transaction_service::TransactionService;
use crate::error::GatewayError;

/// One inbound webhook call waiting to be processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookJob {
    pub provider_name: String,
    pub method_name: String,
    pub params: Value,
    /// Zero on first delivery.
    #[serde(default)]
    pub attempt: u32,
}

impl WebhookJob {
    pub fn new(provider_name: &str, method_name: &str, params: Value) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            method_name: method_name.to_string(),
            params,
            attempt: 0,
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: WebhookJob) -> Result<(), GatewayError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

/// In-process queue: an unbounded channel drained by a tokio worker.
///
/// Each job runs on its own task; ordering between jobs of one transaction is
/// left to the transaction locks. Retryable failures are redelivered after
/// `RetryPolicy::delay` until `max_attempts` is reached.
#[derive(Clone)]
pub struct TokioJobQueue {
    sender: mpsc::UnboundedSender<WebhookJob>,
}

impl TokioJobQueue {
    /// Spawns the worker. Must be called inside a tokio runtime.
    pub fn start(service: Arc<TransactionService>, policy: RetryPolicy) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(service, policy, sender.clone(), receiver));
        info!(max_attempts = policy.max_attempts, "webhook worker started");
        Self { sender }
    }
}

#[async_trait]
impl JobQueue for TokioJobQueue {
    async fn enqueue(&self, job: WebhookJob) -> Result<(), GatewayError> {
        self.sender
            .send(job)
            .map_err(|_| GatewayError::Queue("webhook worker is not running".to_string()))
    }
}

async fn run_worker(
    service: Arc<TransactionService>,
    policy: RetryPolicy,
    sender: mpsc::UnboundedSender<WebhookJob>,
    mut receiver: mpsc::UnboundedReceiver<WebhookJob>,
) {
    while let Some(job) = receiver.recv().await {
        let service = service.clone();
        let sender = sender.clone();
        tokio::spawn(async move {
            if let Some(retry) = execute(&service, policy, job).await {
                tokio::time::sleep(policy.delay).await;
                if sender.send(retry).is_err() {
                    error!("webhook worker stopped, retry lost");
                }
            }
        });
    }
    warn!("webhook worker stopped");
}

/// Runs one job. Returns the job to redeliver, if any.
pub async fn execute(
    service: &TransactionService,
    policy: RetryPolicy,
    job: WebhookJob,
) -> Option<WebhookJob> {
    let result = service
        .process_webhook(&job.provider_name, &job.method_name, &job.params)
        .await;

    match result {
        Ok(updated) => {
            debug!(
                provider = %job.provider_name,
                method = %job.method_name,
                updated = updated.len(),
                "webhook job done"
            );
            None
        }
        Err(err) if err.is_retryable() && job.attempt + 1 < policy.max_attempts => {
            warn!(
                provider = %job.provider_name,
                method = %job.method_name,
                attempt = job.attempt + 1,
                error = %err,
                "webhook job failed, will retry"
            );
            Some(WebhookJob {
                attempt: job.attempt + 1,
                ..job
            })
        }
        Err(err) => {
            error!(
                provider = %job.provider_name,
                method = %job.method_name,
                attempt = job.attempt + 1,
                error = %err,
                "webhook job dropped"
            );
            None
        }
    }
}
