use prompt_relay::{
    api::{self, AppState},
    config::AppConfig,
    upstream::UpstreamClient,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // -----------------------------
    // Logging
    // -----------------------------
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("🚀 Starting prompt relay...");

    // -----------------------------
    // Shared state / Dependencies
    // -----------------------------
    let config = AppConfig::from_env()?;
    let upstream = UpstreamClient::new(&config)?;
    info!(
        upstream = upstream.endpoint(),
        max_tokens = config.max_tokens,
        timeout_secs = config.upstream_timeout.as_secs(),
        "upstream configured"
    );

    let state = AppState::new(upstream, config.max_tokens);
    let app = api::app(state);

    let addr = config.bind_addr;

    println!("🌐 HTTP listening on http://{addr}");
    println!("🛠 Completion API at http://{addr}/api/completion");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
