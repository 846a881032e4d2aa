use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::Transaction;
use crate::services::TransactionService;

#[derive(Parser)]
#[command(name = "payment-gateway")]
#[command(about = "Payment Gateway - provider-agnostic payment transactions", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Transaction management commands
    #[command(subcommand)]
    Tx(TxCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Print a transaction as JSON
    Show {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },
    /// Capture an authorized transaction
    Capture {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },
    /// Cancel a non-terminal transaction
    Cancel {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },
    /// Ask the provider for the state of a pending transaction
    CheckState {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },
}

pub async fn handle_tx(service: &TransactionService, command: TxCommands) -> anyhow::Result<()> {
    let tx = match command {
        TxCommands::Show { tx_id } => service.get(tx_id).await?,
        TxCommands::Capture { tx_id } => {
            let tx = service.capture_or_raise(tx_id).await?;
            tracing::info!("Transaction {} captured", tx_id);
            tx
        }
        TxCommands::Cancel { tx_id } => {
            let tx = service.cancel(tx_id).await?;
            tracing::info!("Transaction {} cancelled", tx_id);
            tx
        }
        TxCommands::CheckState { tx_id } => service.check_state(tx_id).await?,
    };

    print_transaction(&tx)
}

fn print_transaction(tx: &Transaction) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(tx)?);
    println!("✓ Transaction {} is {}", tx.id, tx.state);
    Ok(())
}

pub fn print_config(config: &Config) {
    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    match &config.database_url {
        Some(url) => println!("  Database URL: {}", mask_password(url)),
        None => println!("  Database URL: (none, in-memory store)"),
    }
    println!("  Stripe API: {}", config.stripe_api_base);
    println!("  Adyen API: {}", config.adyen_api_base);
    println!("  PayPal API: {}", config.paypal_api_base);
    println!("  Provider Timeout: {}s", config.provider_timeout_secs);
    println!(
        "  Webhook Retries: {} attempts, {}ms apart",
        config.webhook_max_attempts, config.webhook_retry_delay_ms
    );
    println!("  Keychain: {:?}", config.keychain_backend);
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_password() {
        assert_eq!(
            mask_password("postgres://gateway:hunter2@db:5432/payments"),
            "postgres://gateway:****@db:5432/payments"
        );
        assert_eq!(mask_password("postgres://db/payments"), "postgres://db/payments");
    }

    #[test]
    fn test_parse_tx_capture() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from(["payment-gateway", "tx", "capture", &id.to_string()]).unwrap();
        match cli.command {
            Some(Commands::Tx(TxCommands::Capture { tx_id })) => assert_eq!(tx_id, id),
            _ => panic!("expected tx capture"),
        }
    }

    #[test]
    fn test_parse_check_state_is_kebab_case() {
        let id = Uuid::new_v4();
        let cli =
            Cli::try_parse_from(["payment-gateway", "tx", "check-state", &id.to_string()]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Tx(TxCommands::CheckState { .. }))
        ));
    }
}
