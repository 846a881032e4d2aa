use crate::config::Config;
use crate::providers::ProviderRegistry;
use anyhow::{Context, Result};
use sqlx::PgPool;

pub struct ValidationReport {
    pub environment: bool,
    /// `None` when running without a database.
    pub database: Option<bool>,
    pub credentials: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database.unwrap_or(true) && self.credentials
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        match self.database {
            Some(ok) => println!("Database Connectivity: {}", status(ok)),
            None => println!("Database Connectivity: - (in-memory store)"),
        }
        println!("Provider Credentials:  {}", status(self.credentials));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(
    config: &Config,
    pool: Option<&PgPool>,
    registry: &ProviderRegistry,
) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        database: pool.map(|_| true),
        credentials: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Some(pool) = pool {
        if let Err(e) = validate_database(pool).await {
            report.database = Some(false);
            report.errors.push(format!("Database: {}", e));
        }
    }

    for name in registry.names() {
        if let Err(e) = registry.resolve(name).await {
            report.credentials = false;
            report.errors.push(format!("Provider '{}': {}", name, e));
        }
    }

    Ok(report)
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    if config.poll_batch_size <= 0 {
        anyhow::bail!("POLL_BATCH_SIZE must be greater than 0");
    }

    for (key, value) in [
        ("STRIPE_API_BASE", &config.stripe_api_base),
        ("ADYEN_API_BASE", &config.adyen_api_base),
        ("PAYPAL_API_BASE", &config.paypal_api_base),
    ] {
        url::Url::parse(value).with_context(|| format!("{} is not a valid URL", key))?;
    }

    Ok(())
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}
