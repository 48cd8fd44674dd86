use anyhow::{Context, Result};
use beach_helm::{
    cli::{self, Cli, Commands},
    config::Config,
    routes,
    state::AppState,
    telemetry::{self, Telemetry},
};
use clap::Parser;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Watch {
        url,
        token,
        request_control,
        duration,
    }) = cli.command
    {
        telemetry::init_tracing("warn")?;
        return cli::run_watch(url, token, request_control, duration).await;
    }

    let config = Config::try_from(cli.server)?;
    let telemetry = Telemetry::init(&config.log_filter)?;
    info!(
        listen_addr = %config.listen_addr,
        locked_controls = config.locked_controls,
        open_admission = config.resolver().is_open(),
        initial_screen = %config.initial_screen,
        "starting beach-helm server"
    );

    run(config, telemetry).await
}

async fn run(config: Config, telemetry: Telemetry) -> Result<()> {
    let state = AppState::from_config(&config)
        .context("failed to initialise desktop")?
        .with_metrics(telemetry.metrics_handle());

    let app = routes::router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;

    info!("beach-helm listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown with error")?;

    info!("beach-helm stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
