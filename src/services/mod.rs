pub mod dispatcher;
pub mod job_queue;
pub mod poller;
pub mod transaction_service;

pub use dispatcher::WebhookDispatcher;
pub use job_queue::{JobQueue, RetryPolicy, TokioJobQueue, WebhookJob};
pub use poller::run_poller;
pub use transaction_service::{CaptureOutcome, GenerateOptions, TransactionService, RETURN_METHOD};
