//! Campaign lifecycle scheduler.
//!
//! Runs the start and end claim passes against the MySQL system of record,
//! keeps the Redis delivery records in step with campaign status, and
//! consumes mutation and budget streams.
//!
//! ## Configuration
//!
//! Every setting is a flag with an environment fallback (see `--help`).
//! A `.env` file in the working directory is loaded first.
//!
//! ## Subcommands
//!
//! - `db migrate`: apply the bundled schema migrations and exit.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cadence_core::{
    LifecycleMetrics, LifecyclePorts, LifecycleRuntime, MIGRATOR,
    infra::{
        mysql::MySqlCampaignStore,
        redis::{
            self as redis_infra, DeliveryKeys, RedisDeliveryStore, RedisStreamPublisher,
            RedisStreamQueue,
        },
    },
    ports::MessageQueue,
};
use cadence_server::{
    admin::{self, AdminState},
    config::{Cli, Command, DbCommand, LogFormat, ServeArgs},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_loaded = dotenvy::dotenv().is_ok();
    let cli = Cli::parse();
    init_tracing(cli.serve.log_format);
    if env_loaded {
        info!("loaded .env file");
    }

    cli.serve.validate()?;

    match cli.command {
        Some(Command::Db(DbCommand::Migrate)) => run_db_migrate(&cli.serve).await,
        None => run_service(cli.serve).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Override via RUST_LOG.
        "info,cadence::timer=warn,sqlx=warn,tower_http=warn".into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init(),
    }
}

async fn connect_database(args: &ServeArgs) -> anyhow::Result<MySqlPool> {
    MySqlPoolOptions::new()
        .max_connections(args.database_max_connections.get())
        .max_lifetime(args.database_conn_max_lifetime)
        .connect(&args.database_url)
        .await
        .context("failed to connect to MySQL")
}

async fn run_db_migrate(args: &ServeArgs) -> anyhow::Result<()> {
    let pool = connect_database(args).await?;
    MIGRATOR
        .run(&pool)
        .await
        .context("database migration failed")?;
    info!("Database migrations applied successfully");
    Ok(())
}

async fn run_service(args: ServeArgs) -> anyhow::Result<()> {
    let config = args.lifecycle_config();
    info!(
        tick_interval_ms = config.scheduler.tick_interval_ms,
        claim_margin_ms = config.scheduler.claim_margin_ms,
        page_size = config.scheduler.page_size,
        claim_concurrency = args.claim_concurrency.get(),
        execution_concurrency = args.execution_concurrency.get(),
        start_skew_ms = config.start.skew_ms,
        end_skew_ms = config.end.skew_ms,
        "scheduler configuration in effect"
    );

    let metrics_handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            cadence_core::metrics::describe();
            Some(handle)
        }
        Err(err) => {
            warn!(error = %err, "failed to install prometheus recorder; metrics disabled");
            None
        }
    };

    let pool = connect_database(&args).await?;
    let store = Arc::new(MySqlCampaignStore::new(pool));

    let redis = redis_infra::connect(&args.redis_url)
        .await
        .context("failed to connect to Redis")?;
    let delivery = Arc::new(RedisDeliveryStore::new(
        redis.clone(),
        DeliveryKeys::new(args.delivery_key_prefix.as_str()),
    ));
    let publisher = Arc::new(RedisStreamPublisher::new(redis.clone()));

    let consumer = args.consumer_name();
    let mutations = open_queue(&args, args.mutation_stream(), &consumer).await?;
    let budget = open_queue(&args, args.budget_stream(), &consumer).await?;
    if mutations.is_none() {
        warn!("MUTATION_QUEUE is empty; operator mutations are not reconciled");
    }

    let shutdown = CancellationToken::new();
    let runtime = LifecycleRuntime::new(
        LifecyclePorts {
            store: store.clone(),
            delivery,
            publisher,
            mutations,
            budget,
            timer: None,
        },
        config,
        LifecycleMetrics::new(args.service_name.as_str()),
        shutdown.clone(),
    );

    let admin_shutdown = CancellationToken::new();
    let admin = tokio::spawn(admin::serve(
        args.admin_addr(),
        AdminState::new(store, metrics_handle),
        args.metrics_path.clone(),
        admin_shutdown.clone(),
    ));

    runtime.start();
    wait_for_signal().await;

    if !runtime.shutdown().await {
        warn!("shutdown timeout elapsed before all work drained");
    }
    admin_shutdown.cancel();
    match admin.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "admin server stopped with error"),
        Err(err) => error!(error = %err, "admin server task failed"),
    }

    info!("cadence stopped");
    Ok(())
}

/// Each stream gets its own connection: a blocking read parks the whole
/// connection it runs on.
async fn open_queue(
    args: &ServeArgs,
    stream: Option<&str>,
    consumer: &str,
) -> anyhow::Result<Option<Arc<dyn MessageQueue>>> {
    let Some(stream) = stream else {
        return Ok(None);
    };
    let queue = RedisStreamQueue::connect(
        &args.redis_url,
        stream,
        args.mutation_group.as_str(),
        consumer,
        args.queue_poll_config(),
    )
    .await
    .with_context(|| format!("failed to open stream {stream}"))?;
    info!(stream = %stream, group = %args.mutation_group, consumer = %consumer, "consuming stream");
    let queue: Arc<dyn MessageQueue> = Arc::new(queue);
    Ok(Some(queue))
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}
