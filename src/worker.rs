//! Background image classification.
//!
//! The worker is a tokio task that receives owned [`ImageDescriptor`] chunks
//! over an mpsc channel and answers each chunk on its own oneshot channel.
//! It never sees the document; the caller applies the returned plans.

use anyhow::{anyhow, Context, Result};
use futures::future::try_join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::images::{self, ImageDescriptor, ImagePlan};

const QUEUE_DEPTH: usize = 16;

struct Job {
    descriptors: Vec<ImageDescriptor>,
    reply: oneshot::Sender<Vec<ImagePlan>>,
}

pub struct ClassifierWorker {
    tx: mpsc::Sender<Job>,
    chunk_size: usize,
    handle: JoinHandle<()>,
}

impl ClassifierWorker {
    /// Spawn on the current tokio runtime. `sizes` is the `sizes` value used
    /// for synthesized srcsets.
    pub fn spawn(sizes: String, chunk_size: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(QUEUE_DEPTH);
        let handle = tokio::spawn(async move {
            let mut chunks = 0u64;
            while let Some(job) = rx.recv().await {
                let plans = images::classify_all(&job.descriptors, &sizes);
                chunks += 1;
                trace!(len = plans.len(), "chunk classified");
                // The requester may have given up on this chunk.
                let _ = job.reply.send(plans);
            }
            debug!(chunks, "classifier worker stopped");
        });
        Self {
            tx,
            chunk_size: chunk_size.max(1),
            handle,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Classify `descriptors`, preserving their order.
    pub async fn classify(&self, descriptors: Vec<ImageDescriptor>) -> Result<Vec<ImagePlan>> {
        if descriptors.is_empty() {
            return Ok(Vec::new());
        }
        let mut replies = Vec::new();
        for chunk in descriptors.chunks(self.chunk_size) {
            let (reply, rx) = oneshot::channel();
            self.tx
                .send(Job {
                    descriptors: chunk.to_vec(),
                    reply,
                })
                .await
                .map_err(|_| anyhow!("classifier worker has stopped"))?;
            replies.push(rx);
        }
        debug!(images = descriptors.len(), chunks = replies.len(), "classification dispatched");
        let chunks = try_join_all(replies)
            .await
            .context("classifier worker dropped a chunk")?;
        Ok(chunks.into_iter().flatten().collect())
    }

    /// Close the queue and wait for the task to drain it.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.tx);
        self.handle.await.context("classifier worker panicked")?;
        Ok(())
    }
}
