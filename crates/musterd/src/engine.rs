use muster_core::{Embedding, ExtractError, FaceExtractor};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the engine thread.
struct ExtractRequest {
    image: Vec<u8>,
    reply: oneshot::Sender<Result<Embedding, EngineError>>,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<ExtractRequest>,
}

impl EngineHandle {
    /// Decode an uploaded image and extract the embedding of its face.
    pub async fn extract(&self, image: Vec<u8>) -> Result<Embedding, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ExtractRequest {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// `make_extractor` runs on the engine thread so blocking backends are built
/// outside the async runtime. Fails fast if the extractor cannot be created.
pub async fn spawn_engine<F>(make_extractor: F) -> Result<EngineHandle, EngineError>
where
    F: FnOnce() -> Result<Box<dyn FaceExtractor>, ExtractError> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<ExtractRequest>(4);
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), ExtractError>>();

    std::thread::Builder::new()
        .name("muster-engine".into())
        .spawn(move || {
            let mut extractor = match make_extractor() {
                Ok(extractor) => {
                    let _ = ready_tx.send(Ok(()));
                    extractor
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };

            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                let result = run_extract(extractor.as_mut(), &req.image);
                let _ = req.reply.send(result);
            }
            tracing::info!("engine thread exiting");
        })?;

    ready_rx.await.map_err(|_| EngineError::ChannelClosed)??;
    Ok(EngineHandle { tx })
}

/// Decode to RGB (alpha dropped) and run the extractor.
fn run_extract(extractor: &mut dyn FaceExtractor, bytes: &[u8]) -> Result<Embedding, EngineError> {
    let image = image::load_from_memory(bytes)?.to_rgb8();
    tracing::debug!(
        width = image.width(),
        height = image.height(),
        "extract: image decoded"
    );

    extractor.extract(&image)?.ok_or(EngineError::NoFaceDetected)
}
