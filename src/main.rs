use clap::{builder::BoolishValueParser, ArgAction, Parser};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use user_registry::{RegistryConfig, RegistryServer, StatsConfig};

/// In-memory user registry served over REST.
#[derive(Parser, Debug)]
#[command(name = "user-registry", version, about)]
struct Args {
    /// Prefix every route with `/<name>`
    #[arg(long, env = "SERVICE_NAME")]
    service_name: Option<String>,

    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 5000)]
    port: u16,

    /// Serve Prometheus metrics at `/metrics`
    #[arg(
        long,
        env = "ENABLE_METRICS",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    metrics: bool,

    /// Wrap requests in tracing spans
    #[arg(
        long,
        env = "ENABLE_TRACING",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    tracing: bool,

    /// Upper bound of the random delay added by `/stats`
    #[arg(long, env = "STATS_MAX_DELAY_MS", default_value_t = 1000)]
    stats_max_delay_ms: u64,

    /// Probability that `/stats` answers with an error
    #[arg(long, env = "STATS_FAILURE_RATE", default_value_t = 0.1)]
    stats_failure_rate: f64,

    /// Start without the built-in users
    #[arg(long)]
    empty: bool,
}

impl Args {
    fn into_config(self) -> user_registry::Result<RegistryConfig> {
        let stats = StatsConfig::new(
            Duration::from_millis(self.stats_max_delay_ms),
            self.stats_failure_rate,
        )?;

        let mut config = if self.empty {
            RegistryConfig::empty()
        } else {
            RegistryConfig::seeded()
        }
        .with_host(self.host)
        .with_port(self.port)
        .with_metrics(self.metrics)
        .with_tracing(self.tracing)
        .with_stats(stats);

        if let Some(name) = self.service_name {
            config = config.with_service_name(name);
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "user_registry=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Args::parse().into_config()?;

    tracing::info!(
        host = %config.host,
        prefix = %config.route_prefix(),
        users = config.seed.len(),
        metrics = config.metrics_enabled,
        tracing = config.tracing_enabled,
        "Configuration loaded"
    );

    let server = RegistryServer::new(config).await?;
    tracing::info!(url = %server.url(), "User registry started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    server.shutdown().await;

    Ok(())
}
