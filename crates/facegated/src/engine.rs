use std::path::{Path, PathBuf};
use std::time::Duration;

use facegate_core::{DetectedFace, EmbeddingExtractor, ExtractorError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("cannot read image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("extractor error: {0}")]
    Extractor(#[from] ExtractorError),
    #[error("face extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to start engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl EngineError {
    /// An unreadable image is the caller's problem; everything else is ours.
    pub fn is_user_correctable(&self) -> bool {
        matches!(self, EngineError::Decode { .. })
    }
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Extract {
        image_path: PathBuf,
        reply: oneshot::Sender<Result<Vec<DetectedFace>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
}

impl EngineHandle {
    /// Decode the image at `image_path` and run the extractor on it.
    pub async fn extract(&self, image_path: PathBuf) -> Result<Vec<DetectedFace>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Extract {
                image_path,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;

        // The engine finishes a timed-out request on its own; its reply is dropped.
        tokio::time::timeout(self.timeout, reply_rx)
            .await
            .map_err(|_| EngineError::Timeout(self.timeout))?
            .map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The extractor is owned by that thread, so requests are served one at a
/// time in arrival order.
pub fn spawn_engine<E>(mut extractor: E, timeout: Duration) -> Result<EngineHandle, EngineError>
where
    E: EmbeddingExtractor + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract { image_path, reply } => {
                        let result = run_extract(&mut extractor, &image_path);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, timeout })
}

fn run_extract<E: EmbeddingExtractor>(
    extractor: &mut E,
    image_path: &Path,
) -> Result<Vec<DetectedFace>, EngineError> {
    let image = image::open(image_path)
        .map_err(|source| EngineError::Decode {
            path: image_path.to_path_buf(),
            source,
        })?
        .to_rgb8();

    let faces = extractor.detect_and_encode(&image)?;
    tracing::debug!(
        path = %image_path.display(),
        width = image.width(),
        height = image.height(),
        faces = faces.len(),
        "extraction finished"
    );
    Ok(faces)
}
