//! Command line and environment configuration.

use std::{
    net::{IpAddr, SocketAddr},
    num::{NonZeroU32, NonZeroUsize},
    time::Duration,
};

use anyhow::bail;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use cadence_core::lifecycle::{
    EdgeConfig, LifecycleConfig, PublisherConfig, QueuePollConfig, ReconcileConfig,
    SchedulerConfig,
};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "cadence-server")]
#[command(about = "Campaign lifecycle scheduler: starts and ends campaigns on time")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Debug, Subcommand)]
pub enum DbCommand {
    /// Apply database migrations and exit
    Migrate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ServeArgs {
    /// MySQL connection string of the system of record
    #[arg(long, env = "DATABASE_URL", default_value = "mysql://cadence@localhost:3306/cadence")]
    pub database_url: String,

    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value = "5")]
    pub database_max_connections: NonZeroU32,

    /// Recycle pooled connections after this long (e.g. 30m)
    #[arg(long, env = "DATABASE_CONN_MAX_LIFETIME", default_value = "1h", value_parser = humantime::parse_duration)]
    pub database_conn_max_lifetime: Duration,

    /// Redis holding the delivery records, the inbound streams and the control topic
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Prepended to every delivery record key
    #[arg(long, env = "DELIVERY_KEY_PREFIX", default_value = "")]
    pub delivery_key_prefix: String,

    /// Stream control events are appended to
    #[arg(long, env = "CONTROL_TOPIC", default_value = "cadence:control")]
    pub control_topic: String,

    /// `service` field of every control event
    #[arg(long, env = "SERVICE_NAME", default_value = "campaign-manager")]
    pub service_name: String,

    #[arg(long, env = "EVENT_VERSION", default_value = "1.0")]
    pub event_version: String,

    /// Mutation notifications; empty disables reconciliation
    #[arg(long, env = "MUTATION_QUEUE", default_value = "cadence:mutations")]
    pub mutation_queue: String,

    /// Consumer group shared by every instance
    #[arg(long, env = "MUTATION_GROUP", default_value = "cadence")]
    pub mutation_group: String,

    /// Budget verdicts; empty disables the budget consumer
    #[arg(long, env = "BUDGET_QUEUE", default_value = "")]
    pub budget_queue: String,

    /// Consumer name inside the group; random per process when unset
    #[arg(long, env = "CONSUMER_NAME")]
    pub consumer_name: Option<String>,

    /// Tick cadence; ticks align to multiples of it on the wall clock
    #[arg(long, env = "TICK_INTERVAL", default_value = "1m", value_parser = parse_tick_interval)]
    pub tick_interval: Duration,

    /// Look-ahead past the next tick for the imminent claim pass
    #[arg(long, env = "CLAIM_MARGIN", default_value = "10s", value_parser = humantime::parse_duration)]
    pub claim_margin: Duration,

    /// Rows per claim page
    #[arg(long, env = "TASK_LIMIT", default_value = "10")]
    pub task_limit: NonZeroUsize,

    #[arg(long, env = "CLAIM_CONCURRENCY", default_value = "5")]
    pub claim_concurrency: NonZeroUsize,

    #[arg(long, env = "CLAIM_QUEUE_SIZE", default_value = "5")]
    pub claim_queue_size: NonZeroUsize,

    #[arg(long, env = "EXECUTION_CONCURRENCY", default_value = "5")]
    pub execution_concurrency: NonZeroUsize,

    #[arg(long, env = "EXECUTION_QUEUE_SIZE", default_value = "5")]
    pub execution_queue_size: NonZeroUsize,

    /// Start transitions fire this long before the boundary
    #[arg(long, env = "START_LEAD", default_value = "150ms", value_parser = humantime::parse_duration)]
    pub start_lead: Duration,

    /// End transitions fire this long after the boundary
    #[arg(long, env = "END_DELAY", default_value = "100ms", value_parser = humantime::parse_duration)]
    pub end_delay: Duration,

    /// Pollers per inbound stream
    #[arg(long, env = "QUEUE_POLLERS", default_value = "1")]
    pub queue_pollers: NonZeroUsize,

    /// Idle time after which another consumer may take over a message
    #[arg(long, env = "QUEUE_VISIBILITY_TIMEOUT", default_value = "60s", value_parser = humantime::parse_duration)]
    pub queue_visibility_timeout: Duration,

    #[arg(long, env = "QUEUE_WAIT_TIME", default_value = "20s", value_parser = humantime::parse_duration)]
    pub queue_wait_time: Duration,

    #[arg(long, env = "QUEUE_MAX_MESSAGES", default_value = "10")]
    pub queue_max_messages: NonZeroUsize,

    #[arg(long, env = "QUEUE_ERROR_BACKOFF", default_value = "1s", value_parser = humantime::parse_duration)]
    pub queue_error_backoff: Duration,

    /// How long orphaned creative records survive a campaign delete
    #[arg(long, env = "CREATIVE_EXPIRY", default_value = "24h", value_parser = humantime::parse_duration)]
    pub creative_expiry: Duration,

    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value = "1m", value_parser = humantime::parse_duration)]
    pub shutdown_timeout: Duration,

    #[arg(long, env = "ADMIN_HOST", default_value = "0.0.0.0")]
    pub admin_host: IpAddr,

    #[arg(long, env = "ADMIN_PORT", default_value_t = 8081)]
    pub admin_port: u16,

    #[arg(long, env = "METRICS_PATH", default_value = "/metrics")]
    pub metrics_path: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Shortest tick the claim loop accepts.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_secs(1);

fn parse_tick_interval(value: &str) -> Result<Duration, String> {
    let interval = humantime::parse_duration(value).map_err(|e| e.to_string())?;
    if interval < MIN_TICK_INTERVAL {
        return Err(format!(
            "tick interval must be at least {}",
            humantime::format_duration(MIN_TICK_INTERVAL)
        ));
    }
    Ok(interval)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn signed_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn enabled(stream: &str) -> Option<&str> {
    let stream = stream.trim();
    (!stream.is_empty()).then_some(stream)
}

impl ServeArgs {
    /// Checks constraints that span several settings.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.claim_margin >= self.tick_interval {
            bail!(
                "CLAIM_MARGIN ({}) must be shorter than TICK_INTERVAL ({})",
                humantime::format_duration(self.claim_margin),
                humantime::format_duration(self.tick_interval)
            );
        }
        if !self.metrics_path.starts_with('/') {
            bail!("METRICS_PATH must start with '/', got {:?}", self.metrics_path);
        }
        Ok(())
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        let edge = |skew_ms| EdgeConfig {
            claim_workers: self.claim_concurrency.get(),
            claim_queue: self.claim_queue_size.get(),
            execution_workers: self.execution_concurrency.get(),
            execution_queue: self.execution_queue_size.get(),
            skew_ms,
        };

        LifecycleConfig {
            scheduler: SchedulerConfig {
                tick_interval_ms: millis(self.tick_interval),
                claim_margin_ms: millis(self.claim_margin),
                page_size: self.task_limit.get(),
            },
            start: edge(-signed_millis(self.start_lead)),
            end: edge(signed_millis(self.end_delay)),
            publisher: PublisherConfig {
                topic: self.control_topic.clone(),
                service: self.service_name.clone(),
                version: self.event_version.clone(),
            },
            reconcile: ReconcileConfig {
                pollers: self.queue_pollers.get(),
                creative_expiry_secs: i64::try_from(self.creative_expiry.as_secs())
                    .unwrap_or(i64::MAX),
                error_backoff_ms: millis(self.queue_error_backoff),
            },
            shutdown_timeout_ms: millis(self.shutdown_timeout),
        }
    }

    pub fn queue_poll_config(&self) -> QueuePollConfig {
        QueuePollConfig {
            visibility_timeout_ms: millis(self.queue_visibility_timeout),
            wait_time_ms: millis(self.queue_wait_time),
            max_messages: self.queue_max_messages.get(),
        }
    }

    pub fn mutation_stream(&self) -> Option<&str> {
        enabled(&self.mutation_queue)
    }

    pub fn budget_stream(&self) -> Option<&str> {
        enabled(&self.budget_queue)
    }

    pub fn admin_addr(&self) -> SocketAddr {
        SocketAddr::new(self.admin_host, self.admin_port)
    }

    pub fn consumer_name(&self) -> String {
        self.consumer_name
            .clone()
            .unwrap_or_else(|| format!("cadence-{}", Uuid::new_v4().simple()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn try_parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("cadence-server").chain(args.iter().copied()))
    }

    fn parse(args: &[&str]) -> Cli {
        try_parse(args).unwrap()
    }

    #[test]
    fn defaults_match_library_defaults() {
        let cli = parse(&[]);
        let config = cli.serve.lifecycle_config();
        let defaults = LifecycleConfig::default();

        assert!(cli.command.is_none());
        assert_eq!(config.scheduler.tick_interval_ms, defaults.scheduler.tick_interval_ms);
        assert_eq!(config.scheduler.claim_margin_ms, defaults.scheduler.claim_margin_ms);
        assert_eq!(config.scheduler.page_size, defaults.scheduler.page_size);
        assert_eq!(config.start.skew_ms, defaults.start.skew_ms);
        assert_eq!(config.end.skew_ms, defaults.end.skew_ms);
        assert_eq!(config.reconcile.creative_expiry_secs, 86_400);
        assert_eq!(config.publisher.topic, defaults.publisher.topic);
        assert_eq!(config.shutdown_timeout_ms, defaults.shutdown_timeout_ms);
    }

    #[test]
    fn parses_humantime_durations() {
        let cli = parse(&[
            "--tick-interval",
            "30s",
            "--start-lead",
            "500ms",
            "--end-delay",
            "1s",
            "--queue-wait-time",
            "2s",
            "--log-format",
            "json",
        ]);
        let config = cli.serve.lifecycle_config();

        assert_eq!(config.scheduler.tick_interval_ms, 30_000);
        assert_eq!(config.start.skew_ms, -500);
        assert_eq!(config.end.skew_ms, 1_000);
        assert_eq!(cli.serve.queue_poll_config().wait_time_ms, 2_000);
        assert_eq!(cli.serve.log_format, LogFormat::Json);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        for flag in [
            "--task-limit",
            "--claim-concurrency",
            "--claim-queue-size",
            "--execution-concurrency",
            "--execution-queue-size",
            "--queue-pollers",
            "--queue-max-messages",
            "--database-max-connections",
        ] {
            assert!(try_parse(&[flag, "0"]).is_err(), "{flag} accepted 0");
        }
        let cli = parse(&["--task-limit", "1"]);
        assert_eq!(cli.serve.lifecycle_config().scheduler.page_size, 1);
    }

    #[test]
    fn sub_second_tick_is_rejected() {
        assert!(try_parse(&["--tick-interval", "0s"]).is_err());
        assert!(try_parse(&["--tick-interval", "500ms"]).is_err());
        assert!(try_parse(&["--tick-interval", "soon"]).is_err());

        let cli = parse(&["--tick-interval", "1s", "--claim-margin", "200ms"]);
        assert_eq!(cli.serve.lifecycle_config().scheduler.tick_interval_ms, 1_000);
        assert!(cli.serve.validate().is_ok());
    }

    #[test]
    fn claim_margin_must_be_shorter_than_tick() {
        assert!(parse(&[]).serve.validate().is_ok());

        let cli = parse(&["--tick-interval", "10s", "--claim-margin", "10s"]);
        let err = cli.serve.validate().unwrap_err();
        assert!(err.to_string().contains("CLAIM_MARGIN"), "{err}");

        let cli = parse(&["--tick-interval", "10s", "--claim-margin", "9s"]);
        assert!(cli.serve.validate().is_ok());
    }

    #[test]
    fn metrics_path_must_be_absolute() {
        let cli = parse(&["--metrics-path", "metrics"]);
        assert!(cli.serve.validate().is_err());
    }

    #[test]
    fn empty_stream_names_disable_consumers() {
        let cli = parse(&["--mutation-queue", "", "--budget-queue", "budget"]);
        assert_eq!(cli.serve.mutation_stream(), None);
        assert_eq!(cli.serve.budget_stream(), Some("budget"));
    }

    #[test]
    fn admin_addr_joins_host_and_port() {
        let cli = parse(&["--admin-host", "127.0.0.1", "--admin-port", "9000"]);
        assert_eq!(cli.serve.admin_addr().to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn migrate_subcommand() {
        let cli = parse(&["db", "migrate"]);
        assert!(matches!(cli.command, Some(Command::Db(DbCommand::Migrate))));
    }

    #[test]
    fn explicit_consumer_name_wins() {
        let cli = parse(&["--consumer-name", "node-a"]);
        assert_eq!(cli.serve.consumer_name(), "node-a");
    }
}
