use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

use super::transaction_service::TransactionService;

/// Background loop re-checking `pending` transactions whose webhook never came.
///
/// Runs `check_state` on up to `batch_size` of them every `interval`. One
/// failing batch does not stop the loop.
pub async fn run_poller(service: Arc<TransactionService>, interval: Duration, batch_size: i64) {
    info!(interval_secs = interval.as_secs(), batch_size, "pending transaction poller started");

    loop {
        match service.check_pending(batch_size).await {
            Ok(0) => {}
            Ok(checked) => debug!(checked, "pending transactions checked"),
            Err(e) => error!("Poller batch error: {}", e),
        }

        sleep(interval).await;
    }
}
