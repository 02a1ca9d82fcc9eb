//! Main binary for the Newsroom Notification Service
//!
//! `notification-server` runs the HTTP API and the RabbitMQ consumers.
//! `notification-server publish` sends a single event, which is handy for
//! exercising a running service by hand.

use notification_service::{
    broker::BrokerConnection, config::NotificationConfig, manager::NotificationManager,
    routes::create_router,
};

use anyhow::Context;
use axum::serve;
use clap::{Arg, ArgMatches, Command};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Parse command line arguments
    let matches = create_cli().get_matches();

    // Initialize tracing
    init_tracing(matches.get_one::<String>("log-level").map(String::as_str))?;

    // Load configuration
    let config = load_config(&matches)?;

    if let Some(publish) = matches.subcommand_matches("publish") {
        return publish_event(&config, publish).await;
    }

    serve_notifications(config).await
}

async fn serve_notifications(config: NotificationConfig) -> anyhow::Result<()> {
    info!("Starting Newsroom Notification Service");
    info!(
        host = %config.server.host,
        port = config.server.port,
        broker = %config.broker.url,
        email = config.email.enabled,
        push = config.push.enabled,
        "Configuration loaded"
    );

    // Create cancellation token for graceful shutdown
    let cancellation_token = CancellationToken::new();

    // Initialize notification manager
    let notification_manager = Arc::new(
        NotificationManager::new(config.clone())
            .context("Failed to initialize notification manager")?,
    );

    // Create router
    let app = create_router(notification_manager.clone());

    // Create socket address
    let addr = SocketAddr::new(
        config
            .server
            .host
            .parse()
            .with_context(|| format!("Invalid host address: {}", config.server.host))?,
        config.server.port,
    );

    // Create TCP listener
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to address {}", addr))?;

    info!("Notification service listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Metrics: http://{}{}", addr, config.metrics.endpoint);

    // Start event consumers
    let consumer_task = tokio::spawn({
        let manager = notification_manager.clone();
        let cancellation_token = cancellation_token.clone();
        async move { manager.run(cancellation_token).await }
    });

    // Start server with graceful shutdown
    let server_task = tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            let server = serve(listener, app)
                .with_graceful_shutdown(async move { cancellation_token.cancelled().await });

            if let Err(e) = server.await {
                error!("Server error: {}", e);
            }
        }
    });

    // Wait for shutdown signal
    wait_for_shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Cancel all tasks
    cancellation_token.cancel();

    if let Err(e) = consumer_task.await {
        error!("Consumer task error during shutdown: {}", e);
    }

    // Wait for server to shutdown
    if let Err(e) = server_task.await {
        error!("Server task error during shutdown: {}", e);
    }

    info!("Newsroom Notification Service stopped gracefully");
    Ok(())
}

/// Publish one event and exit
async fn publish_event(config: &NotificationConfig, matches: &ArgMatches) -> anyhow::Result<()> {
    let exchange = required(matches, "exchange")?;
    let routing_key = required(matches, "routing-key")?;
    let payload: serde_json::Value = serde_json::from_str(required(matches, "payload")?)
        .context("Payload must be a JSON object")?;

    let broker = BrokerConnection::try_connect(&config.broker)
        .await
        .context("Failed to connect to RabbitMQ")?;

    let result = broker
        .publisher()
        .publish(exchange, routing_key, payload)
        .await
        .context("Failed to publish event");
    broker.close().await;
    result?;

    info!(exchange, routing_key, "Event published");
    Ok(())
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> anyhow::Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("Missing --{}", name))
}

/// Initialize tracing/logging
fn init_tracing(log_level: Option<&str>) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = log_level.unwrap_or("info");
        format!("notification_service={level},notification_server={level},tower_http=info,lapin=warn")
            .into()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .context("Failed to initialize tracing")?;

    Ok(())
}

/// Create CLI argument parser
fn create_cli() -> Command {
    Command::new("notification-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Newsroom Notification Service - event-driven email and Web Push delivery")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Server host address"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Server port"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
                .default_value("info"),
        )
        .subcommand(
            Command::new("publish")
                .about("Publish a single event to the broker")
                .arg(
                    Arg::new("exchange")
                        .short('e')
                        .long("exchange")
                        .value_name("EXCHANGE")
                        .required(true),
                )
                .arg(
                    Arg::new("routing-key")
                        .short('k')
                        .long("routing-key")
                        .value_name("KEY")
                        .required(true),
                )
                .arg(
                    Arg::new("payload")
                        .long("payload")
                        .value_name("JSON")
                        .help("Event payload, a JSON object")
                        .default_value("{}"),
                ),
        )
}

/// Load configuration from file and environment
fn load_config(matches: &ArgMatches) -> anyhow::Result<NotificationConfig> {
    let mut config = if let Some(config_file) = matches.get_one::<String>("config") {
        info!("Loading configuration from file: {}", config_file);
        std::env::set_var("NOTIFICATION_CONFIG_FILE", config_file);
        NotificationConfig::from_env().context("Failed to load configuration from file")?
    } else {
        NotificationConfig::from_env().unwrap_or_else(|e| {
            warn!(
                "Failed to load configuration from environment: {}, using defaults",
                e
            );
            NotificationConfig::default()
        })
    };

    // Override with CLI arguments
    if let Some(host) = matches.get_one::<String>("host") {
        config.server.host = host.clone();
    }

    if let Some(port_str) = matches.get_one::<String>("port") {
        config.server.port = port_str
            .parse()
            .with_context(|| format!("Invalid port number '{}'", port_str))?;
    }

    Ok(config)
}

/// Wait for shutdown signals
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
