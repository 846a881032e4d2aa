use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use super::job_queue::{JobQueue, WebhookJob};
use super::transaction_service::TransactionService;
use crate::domain::Transaction;
use crate::error::GatewayError;

/// Entry point for provider callbacks.
///
/// Server-to-server webhooks are only queued here; the provider gets its
/// acknowledgment before any provider call or database write happens. Browser
/// returns run inline since a customer is waiting on the answer.
#[derive(Clone)]
pub struct WebhookDispatcher {
    queue: Arc<dyn JobQueue>,
    service: Arc<TransactionService>,
}

impl WebhookDispatcher {
    pub fn new(queue: Arc<dyn JobQueue>, service: Arc<TransactionService>) -> Self {
        Self { queue, service }
    }

    pub async fn accept(
        &self,
        provider_name: &str,
        method_name: &str,
        params: Value,
    ) -> Result<(), GatewayError> {
        self.queue
            .enqueue(WebhookJob::new(provider_name, method_name, params))
            .await?;
        info!(provider = %provider_name, method = %method_name, "webhook queued");
        Ok(())
    }

    /// Runs a webhook method inline and returns the transactions it touched.
    pub async fn dispatch_now(
        &self,
        provider_name: &str,
        method_name: &str,
        params: &Value,
    ) -> Result<Vec<Transaction>, GatewayError> {
        self.service
            .process_webhook(provider_name, method_name, params)
            .await
    }

    pub async fn process_return(
        &self,
        provider_name: &str,
        params: &Value,
    ) -> Result<Transaction, GatewayError> {
        self.service.process_return(provider_name, params).await
    }
}
