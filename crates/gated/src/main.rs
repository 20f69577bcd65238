use anyhow::Result;
use gate_core::{Gallery, GalleryClassifier};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dispatcher;
mod embedder;
mod engine;
mod error;
mod handler;
mod routes;
mod supervisor;
#[cfg(test)]
mod testutil;

use config::Config;
use dispatcher::ActuationDispatcher;
use embedder::RemoteEmbedder;
use handler::RecognitionHandler;
use routes::AppState;
use supervisor::{BrokerLink, ConnectionSupervisor};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gated=info,gate_core=info,tower_http=info")),
        )
        .init();

    tracing::info!("gated {} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    tracing::info!(
        bind = %config.bind,
        db_dir = %config.db_dir.display(),
        embedder = %config.embedder_url,
        controller = %config.controller.url,
        broker = %format!("{}:{}", config.broker.host, config.broker.port),
        topic = %config.broker.topic,
        "configuration loaded"
    );

    let gallery = Gallery::load(&config.db_dir)?;
    let gallery_size = gallery.len();
    if gallery.is_empty() {
        tracing::warn!("encoding database is empty; every face will be reported unknown");
    } else {
        tracing::info!(models = gallery_size, identities = gallery.labels().len(), "gallery loaded");
    }

    let embedder_url = config.embedder_url.clone();
    let embedder_timeout = config.embedder_timeout();
    let threshold = config.similarity_threshold;
    let engine = engine::spawn_engine(move || {
        let embedder = RemoteEmbedder::new(&embedder_url, embedder_timeout)?;
        Ok(GalleryClassifier::new(embedder, gallery, threshold))
    })
    .await?;

    // Broker trouble never blocks startup; the supervisor degrades instead.
    let supervisor = Arc::new(ConnectionSupervisor::start(&config.broker));
    let broker: Arc<dyn BrokerLink> = supervisor.clone();

    let dispatcher = ActuationDispatcher::new(broker.clone(), &config.broker.topic, &config.controller)?;
    let state = Arc::new(AppState {
        controller_url: dispatcher.controller_url().to_string(),
        handler: RecognitionHandler::new(engine, Arc::new(dispatcher)),
        broker,
        gallery_size,
    });

    let app = routes::router(state, config.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "gated ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.disconnect();
    tracing::info!("gated shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
