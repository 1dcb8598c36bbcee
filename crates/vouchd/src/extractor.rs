//! Landmark extraction worker.
//!
//! The mesh backend is a stateful resource (model session, FFI handle)
//! acquired once at startup. It lives on a dedicated OS thread; request
//! handlers talk to it through a channel, which also bounds extraction
//! concurrency — frames queue instead of thrashing the CPU.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use vouch_core::{LandmarkExtractor, MeshFrame};

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("extractor thread exited")]
    ChannelClosed,
}

struct FrameJob {
    rgb: Vec<u8>,
    width: u32,
    height: u32,
    reply: oneshot::Sender<Option<MeshFrame>>,
}

/// Clone-safe handle to the extractor thread.
#[derive(Clone)]
pub struct ExtractorHandle {
    tx: mpsc::Sender<FrameJob>,
}

impl ExtractorHandle {
    /// Extract landmarks from one decoded RGB frame.
    pub async fn extract(
        &self,
        rgb: Vec<u8>,
        width: u32,
        height: u32,
    ) -> Result<Option<MeshFrame>, ExtractorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(FrameJob {
                rgb,
                width,
                height,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ExtractorError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ExtractorError::ChannelClosed)
    }
}

/// Spawn the extraction worker on a dedicated OS thread.
///
/// The backend is moved onto the thread and held for the process
/// lifetime; the thread exits when the last handle drops.
pub fn spawn_extractor(mut backend: Box<dyn LandmarkExtractor>) -> ExtractorHandle {
    let (tx, mut rx) = mpsc::channel::<FrameJob>(32);

    std::thread::Builder::new()
        .name("vouch-mesh".into())
        .spawn(move || {
            tracing::info!("extractor thread started");
            while let Some(job) = rx.blocking_recv() {
                let result = backend.extract(&job.rgb, job.width, job.height);
                let _ = job.reply.send(result);
            }
            tracing::info!("extractor thread exiting");
        })
        .expect("failed to spawn extractor thread");

    ExtractorHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vouch_core::test_util::{FramePose, ScriptedExtractor};
    use vouch_core::NullExtractor;

    #[tokio::test]
    async fn null_backend_reports_no_face() {
        let handle = spawn_extractor(Box::new(NullExtractor));
        let result = handle.extract(vec![0u8; 12], 2, 2).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn scripted_backend_replays_in_order() {
        let handle = spawn_extractor(Box::new(ScriptedExtractor::from_poses(&[
            Some(FramePose::Baseline),
            None,
            Some(FramePose::Blink),
        ])));

        assert!(handle.extract(vec![], 0, 0).await.unwrap().is_some());
        assert!(handle.extract(vec![], 0, 0).await.unwrap().is_none());
        assert!(handle.extract(vec![], 0, 0).await.unwrap().is_some());
    }
}
