use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relationship_service::clock::SystemClock;
use relationship_service::config::{Config, StorageBackend};
use relationship_service::security::Argon2CredentialHasher;
use relationship_service::services::{S3AssetStore, SmtpMailer};
use relationship_service::workers::ReconciliationWorker;
use relationship_service::{AppState, Collaborators, Storage};

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,relationship_service=debug,sqlx=warn".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn connect_storage(config: &Config) -> Result<Storage> {
    match config.app.storage {
        StorageBackend::Memory => {
            info!("Using in-memory storage");
            Ok(Storage::in_memory())
        }
        StorageBackend::Postgres => {
            let url = config
                .database
                .url
                .as_deref()
                .context("DATABASE_URL is required for the postgres backend")?;

            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(600))
                .connect(url)
                .await
                .context("Failed to connect to database")?;

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run database migrations")?;
            info!("Database pool created and migrations applied");

            Ok(Storage::postgres(pool))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.app.json_logs);

    info!(
        env = %config.app.env,
        storage = ?config.app.storage,
        "Starting relationship-service"
    );

    let storage = connect_storage(&config).await?;

    let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let s3_client = Arc::new(aws_sdk_s3::Client::new(&aws_config));
    let assets = Arc::new(S3AssetStore::new(s3_client, &config.assets));
    info!(bucket = %config.assets.bucket, "Asset store initialized");

    let mailer = SmtpMailer::new(&config.email).context("Failed to initialize mailer")?;
    info!(enabled = mailer.is_enabled(), "Mailer initialized");

    let state = AppState::new(
        storage,
        Collaborators {
            assets,
            mailer: Arc::new(mailer),
            hasher: Arc::new(Argon2CredentialHasher),
            clock: Arc::new(SystemClock),
        },
        &config.consistency,
        &config.reset,
    );

    let (worker_shutdown, worker_handle) = ReconciliationWorker::new(
        state.reconciler.clone(),
        config.consistency.reconcile_interval(),
        config.consistency.reconcile_batch_size,
    )
    .spawn();

    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = worker_shutdown.send(());
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "Reconciliation worker terminated abnormally");
    }

    info!("relationship-service stopped");
    Ok(())
}
