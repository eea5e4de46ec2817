use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use sendguard::auth::GoTrueClient;
use sendguard::config::ServerConfig;
use sendguard::dashboard::routes::dashboard_routes;
use sendguard::dashboard::{Dashboard, DashboardOptions, HostedConnector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = ServerConfig::from_env();

    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard = init_tracing(&config);

    let auth = config.auth.clone().unwrap_or_else(|| {
        eprintln!("Error: SENDGUARD_AUTH_URL not set");
        eprintln!("  export SENDGUARD_AUTH_URL=https://<project>.supabase.co");
        eprintln!("  export SENDGUARD_AUTH_KEY=<anon key>");
        std::process::exit(1);
    });

    eprintln!("🛡  SendGuard v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API:    http://0.0.0.0:{}/api", config.port);
    eprintln!("   WS:     ws://0.0.0.0:{}/ws", config.port);
    eprintln!("   Config: {}", config.config_path.display());
    eprintln!(
        "   Poll:   every {}s, realtime {}",
        config.poll_interval.as_secs(),
        if config.realtime_enabled { "on" } else { "off" }
    );

    let dashboard = Dashboard::new(
        DashboardOptions::from(&config),
        Arc::new(GoTrueClient::new(auth)),
        Arc::new(HostedConnector),
    )
    .context("Failed to load store config")?;

    let app = dashboard_routes(dashboard);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    info!(port = config.port, "SendGuard listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}

fn init_tracing(config: &ServerConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sendguard.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}
