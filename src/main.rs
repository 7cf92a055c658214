use clap::Parser;
use dotenvy::dotenv;
use rust_docx2pdf::api::middleware::request_id::REQUEST_ID_HEADER;
use rust_docx2pdf::config::AppConfig;
use rust_docx2pdf::services::converter::LibreOfficeConverter;
use rust_docx2pdf::services::janitor::ScratchJanitor;
use rust_docx2pdf::{AppState, create_app};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port for the API server (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Scratch directory (overrides TEMP_DIR)
    #[arg(short, long)]
    temp_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_docx2pdf=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(args).await {
        error!("❌ Fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    info!("🚀 Starting document conversion service...");

    let mut config = AppConfig::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(temp_dir) = args.temp_dir {
        config.temp_dir = temp_dir;
    }

    tokio::fs::create_dir_all(&config.temp_dir)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to create temp directory {}: {}",
                config.temp_dir.display(),
                e
            )
        })?;

    info!(
        "🛠️  Config: Max Size={} bytes, Converter={} --convert-to {}, Accepts=.{}, Timeout={:?}, Scratch={}, API Token={}",
        config.max_file_size,
        config.converter_bin,
        config.target_format,
        config.input_extension,
        config.conversion_timeout,
        config.temp_dir.display(),
        if config.api_token.is_some() { "required" } else { "disabled" }
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    if !config.janitor_interval.is_zero() {
        let janitor = ScratchJanitor::new(
            config.temp_dir.clone(),
            config.janitor_interval,
            config.scratch_max_age,
            shutdown_rx,
        );
        tokio::spawn(janitor.run());
    }

    let converter = Arc::new(LibreOfficeConverter::from_config(&config));
    let port = config.port;
    let state = AppState::new(config, converter);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        })
        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
            info!("📥 {} {}", request.method(), request.uri());
        })
        .on_response(
            |response: &axum::http::Response<_>,
             latency: std::time::Duration,
             _span: &tracing::Span| {
                info!(
                    "📤 Finished in {:?} with status {}",
                    latency,
                    response.status()
                );
            },
        );

    let app = create_app(state).layer(trace_layer);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;

    info!("✅ Server listening on http://{}", addr);
    info!("📖 Swagger UI: http://localhost:{}/swagger-ui", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    info!("🛑 Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
