use opendata_proxy::{router, AppConfig, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing(AppConfig::json_logs_from_env());

    let cfg = AppConfig::from_env()?;

    let configured = cfg.credentials.configured();
    if configured.is_empty() {
        tracing::warn!("no upstream credentials configured; every proxy endpoint will answer 500");
    } else {
        tracing::info!(upstreams = ?configured, "upstream credentials loaded");
    }

    let listen_addr = cfg.listen_addr();
    let state = AppState::try_new(cfg)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;

    tracing::info!(%listen_addr, "starting open-data proxy");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("open-data proxy exited cleanly");

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term_signal) => term_signal.recv().await,
            Err(error) => {
                tracing::warn!(%error, "failed to install SIGTERM handler");
                None
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
