//! Example client that starts a VM session and follows its status.
//!
//! Run with: cargo run -p session-cli -- [origin] [token-file]
//!
//! `origin` defaults to http://localhost:3000. Press Ctrl-C to stop the VM.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use futures::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vm_session::{FileCredentials, SessionController, StartOutcome};
use vm_session_backend::HttpBackend;
use vm_session_core::{ClientContext, SessionConfig};
use vm_session_transport::WsDisplayConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let origin = args
        .next()
        .unwrap_or_else(|| "http://localhost:3000".to_string());
    let token_file = args.next().map(PathBuf::from);

    let config = SessionConfig::from_env().context("invalid session configuration")?;
    let context = ClientContext::from_url(&origin).context("invalid origin")?;
    let backend = HttpBackend::from_config(&config, &context).context("invalid backend URL")?;
    tracing::info!(backend = %backend.base_url(), %origin, "Starting VM session");

    let mut controller = SessionController::new(
        Arc::new(backend),
        Arc::new(WsDisplayConnector::new()),
        context,
        config,
    );
    if let Some(path) = token_file.or_else(FileCredentials::default_path) {
        if path.exists() {
            tracing::info!(path = %path.display(), "Using credential file");
            controller = controller.with_credentials(Arc::new(FileCredentials::new(path)));
        }
    }

    let mut status = controller.events().status_stream();
    let printer = tokio::spawn(async move {
        while let Some(line) = status.next().await {
            println!("{line}");
        }
    });

    tokio::select! {
        result = controller.start() => match result {
            Ok(StartOutcome::Connected { session_id, endpoint }) => {
                tracing::info!(%session_id, endpoint = %endpoint.url, "Press Ctrl-C to stop");
                tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
            }
            Ok(StartOutcome::Stopped) => {}
            Err(e) => tracing::error!("Session failed: {e}"),
        },
        _ = tokio::signal::ctrl_c() => {}
    }

    controller.stop().await;
    controller.settled().await;
    drop(controller);
    tokio::task::yield_now().await;
    printer.abort();
    Ok(())
}
