//! Destinations for emitted patch batches

use blocksync_model::Patch;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

/// Receives each batch of patches the engine emits, in emission order
pub trait PatchSink {
    fn emit(&mut self, patches: Vec<Patch>);
}

/// Collects batches in memory
impl PatchSink for Vec<Vec<Patch>> {
    fn emit(&mut self, patches: Vec<Patch>) {
        self.push(patches);
    }
}

impl PatchSink for UnboundedSender<Vec<Patch>> {
    fn emit(&mut self, patches: Vec<Patch>) {
        if self.send(patches).is_err() {
            warn!("Patch receiver dropped, discarding batch");
        }
    }
}
