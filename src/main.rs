use clap::Parser;
use payment_gateway::adapters::{
    InMemoryOriginDirectory, InMemoryTransactionRepository, PostgresTransactionRepository,
};
use payment_gateway::cli::{self, Cli, Commands};
use payment_gateway::config::{Config, KeychainBackend, LogFormat};
use payment_gateway::keychain::{EnvKeychain, Keychain, VaultKeychain};
use payment_gateway::middleware::RequestLogSettings;
use payment_gateway::ports::TransactionRepository;
use payment_gateway::providers::ProviderRegistry;
use payment_gateway::services::{run_poller, TokioJobQueue, TransactionService, WebhookDispatcher};
use payment_gateway::{create_app, startup, AppState};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config);

    let cli = Cli::parse();

    let pool = match &config.database_url {
        Some(url) => Some(connect(url).await?),
        None => None,
    };
    let keychain = build_keychain(&config).await?;
    let registry = Arc::new(ProviderRegistry::with_builtin(
        keychain,
        &config.provider_settings(),
    ));

    if let Some(Commands::Config) = cli.command {
        cli::print_config(&config);
        let report = startup::validate_environment(&config, pool.as_ref(), &registry).await?;
        report.print();
        if !report.is_valid() {
            anyhow::bail!("configuration is invalid");
        }
        return Ok(());
    }

    let repo: Arc<dyn TransactionRepository> = match &pool {
        Some(pool) => Arc::new(PostgresTransactionRepository::new(pool.clone())),
        None => {
            tracing::warn!("DATABASE_URL not set, transactions are kept in memory");
            Arc::new(InMemoryTransactionRepository::new())
        }
    };
    let origins = Arc::new(InMemoryOriginDirectory::new());
    let service = Arc::new(TransactionService::new(repo, registry, origins.clone()));

    match cli.command {
        Some(Commands::Tx(command)) => cli::handle_tx(&service, command).await,
        Some(Commands::Serve) | None | Some(Commands::Config) => {
            serve(&config, service, origins).await
        }
    }
}

fn init_tracing(config: &Config) {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn connect(url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;

    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    Ok(pool)
}

async fn build_keychain(config: &Config) -> anyhow::Result<Arc<dyn Keychain>> {
    Ok(match config.keychain_backend {
        KeychainBackend::Env => Arc::new(EnvKeychain),
        KeychainBackend::Vault => {
            let vault = VaultKeychain::from_env().await?;
            tracing::info!("Vault keychain initialized");
            Arc::new(vault)
        }
    })
}

async fn serve(
    config: &Config,
    service: Arc<TransactionService>,
    origins: Arc<InMemoryOriginDirectory>,
) -> anyhow::Result<()> {
    let queue = TokioJobQueue::start(service.clone(), config.retry_policy());

    match config.poll_interval() {
        Some(interval) => {
            tokio::spawn(run_poller(service.clone(), interval, config.poll_batch_size));
        }
        None => tracing::info!("pending transaction poller disabled"),
    }

    let app = create_app(AppState {
        dispatcher: WebhookDispatcher::new(Arc::new(queue), service.clone()),
        service,
        origins,
        request_log: RequestLogSettings {
            log_body: config.log_request_body,
        },
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
