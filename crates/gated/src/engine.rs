use gate_core::{ClassifyError, IdentityClassifier, IdentityOutcome};
use image::DynamicImage;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("classifier failed to start: {0}")]
    Startup(#[from] ClassifyError),
    #[error("failed to spawn classifier thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("classifier thread exited")]
    ChannelClosed,
}

/// An image sent from a request handler to the classifier thread.
struct ClassifyRequest {
    image: DynamicImage,
    reply: oneshot::Sender<IdentityOutcome>,
}

/// Clone-safe handle to the classifier thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<ClassifyRequest>,
}

impl EngineHandle {
    /// Classify one decoded image. Waits behind any queued images.
    pub async fn classify(&self, image: DynamicImage) -> Result<IdentityOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ClassifyRequest {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the classifier on a dedicated OS thread.
///
/// `build` runs on that thread, so the classifier and any blocking clients
/// it owns never touch the async runtime. Startup errors are returned here;
/// the daemon refuses to start without a classifier.
pub async fn spawn_engine<F, C>(build: F) -> Result<EngineHandle, EngineError>
where
    F: FnOnce() -> Result<C, ClassifyError> + Send + 'static,
    C: IdentityClassifier + 'static,
{
    let (tx, mut rx) = mpsc::channel::<ClassifyRequest>(8);
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), ClassifyError>>();

    std::thread::Builder::new()
        .name("gate-classifier".into())
        .spawn(move || {
            let mut classifier = match build() {
                Ok(c) => {
                    let _ = ready_tx.send(Ok(()));
                    c
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            tracing::info!("classifier thread started");
            while let Some(req) = rx.blocking_recv() {
                let outcome = run_classify(&mut classifier, &req.image);
                let _ = req.reply.send(outcome);
            }
            tracing::info!("classifier thread exiting");
        })?;

    ready_rx.await.map_err(|_| EngineError::ChannelClosed)??;
    Ok(EngineHandle { tx })
}

/// Run one classification, folding errors and panics into
/// [`IdentityOutcome::ClassificationError`].
fn run_classify<C: IdentityClassifier>(classifier: &mut C, image: &DynamicImage) -> IdentityOutcome {
    let result = panic::catch_unwind(AssertUnwindSafe(|| classifier.classify(image)))
        .unwrap_or(Err(ClassifyError::Panicked));

    match result {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "face recognition failed");
            IdentityOutcome::ClassificationError
        }
    }
}
