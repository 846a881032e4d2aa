pub mod in_memory;
pub mod locks;
pub mod postgres_transaction_repository;

pub use in_memory::{InMemoryOriginDirectory, InMemoryTransactionRepository};
pub use locks::TransactionLocks;
pub use postgres_transaction_repository::PostgresTransactionRepository;
