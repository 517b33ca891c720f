//! Descriptor extraction on a dedicated worker thread.
//!
//! Model loading and inference block, so the backend lives on its own OS
//! thread and async callers talk to it through a clonable handle. Loading
//! starts immediately; callers observe progress through [`Readiness`].

use crate::backend::{BackendError, FaceBackend};
use crate::types::{Descriptor, Frame};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractorError {
    #[error("model backend failed to load: {0}")]
    LoadFailed(String),
    #[error("extractor thread exited")]
    ChannelClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Loading,
    Ready,
    Failed(String),
}

struct ExtractRequest {
    frame: Frame,
    reply: oneshot::Sender<Option<Descriptor>>,
}

/// Clone-safe handle to the extractor thread.
#[derive(Clone)]
pub struct DescriptorExtractor {
    tx: mpsc::Sender<ExtractRequest>,
    readiness: watch::Receiver<Readiness>,
}

impl DescriptorExtractor {
    pub fn readiness(&self) -> Readiness {
        self.readiness.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.readiness.borrow(), Readiness::Ready)
    }

    /// Wait until loading has finished, successfully or not.
    pub async fn wait_ready(&self) -> Result<(), ExtractorError> {
        let mut rx = self.readiness.clone();
        let state = rx
            .wait_for(|r| *r != Readiness::Loading)
            .await
            .map_err(|_| ExtractorError::ChannelClosed)?
            .clone();

        match state {
            Readiness::Failed(reason) => Err(ExtractorError::LoadFailed(reason)),
            _ => Ok(()),
        }
    }

    /// Descriptor of the single dominant face in `frame`.
    ///
    /// Returns `None` when no face is found, when the models are not loaded
    /// yet (without waiting for them), or when inference fails.
    pub async fn extract(&self, frame: Frame) -> Option<Descriptor> {
        if !self.is_ready() {
            tracing::debug!(readiness = ?self.readiness(), "extract called before models are ready");
            return None;
        }

        let (reply, reply_rx) = oneshot::channel();
        if self.tx.send(ExtractRequest { frame, reply }).await.is_err() {
            tracing::warn!("extractor thread is gone");
            return None;
        }
        reply_rx.await.ok().flatten()
    }
}

/// Spawn the extractor thread. `load` runs on that thread.
pub fn spawn_extractor<B, F>(load: F) -> DescriptorExtractor
where
    B: FaceBackend,
    F: FnOnce() -> Result<B, BackendError> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<ExtractRequest>(4);
    let (ready_tx, readiness) = watch::channel(Readiness::Loading);

    std::thread::Builder::new()
        .name("rollcall-extractor".into())
        .spawn(move || {
            let mut backend = match load() {
                Ok(backend) => backend,
                Err(e) => {
                    tracing::error!(error = %e, "failed to load face models");
                    let _ = ready_tx.send(Readiness::Failed(e.to_string()));
                    return;
                }
            };
            tracing::info!("face models loaded");
            let _ = ready_tx.send(Readiness::Ready);

            while let Some(req) = rx.blocking_recv() {
                if req.reply.is_closed() {
                    tracing::debug!(seq = req.frame.sequence, "requester gone, skipping frame");
                    continue;
                }
                if !backend.is_ready() {
                    let _ = req.reply.send(None);
                    continue;
                }

                let result = match backend.detect_and_describe(&req.frame) {
                    Ok(descriptor) => descriptor,
                    Err(e) => {
                        tracing::warn!(error = %e, seq = req.frame.sequence, "extraction failed");
                        None
                    }
                };
                let _ = req.reply.send(result);
            }
            tracing::info!("extractor thread exiting");
        })
        .expect("failed to spawn extractor thread");

    DescriptorExtractor { tx, readiness }
}
