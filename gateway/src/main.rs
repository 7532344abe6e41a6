//! Inference Gateway binary.

use std::env;

use inference_gateway::vision::default_loader;
use inference_gateway::{api, logging, Config, Gateway};
use tokio::net::TcpListener;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    println!("inference-gateway {}", VERSION);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle --version / -V
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        print_version();
        return Ok(());
    }

    // Load configuration
    let config = Config::load().map_err(|e| {
        format!(
            "{}. Check config.toml or the GATEWAY__SECTION__KEY environment variables.",
            e
        )
    })?;
    logging::init(&config.logging);

    let backends = config.validate()?;
    tracing::info!("Starting inference-gateway {}", VERSION);

    let loader = default_loader(backends.yolo_iou_threshold, backends.yolo_input_size);
    let gateway = Gateway::new(backends, loader);

    // Backends are released when the guard drops, on every exit path below.
    let _guard = gateway.start()?;

    let app = api::router(gateway.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
