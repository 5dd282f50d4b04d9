//! Fragment stream pipeline.
//!
//! Stages run in registration order, each consuming the lazy output of the
//! previous one. Every stage is isolated per pass: a stage that fails
//! degrades to a passthrough for the rest of that pass only.
//!
//! The stage list is snapshotted when a pass starts. Mutating it while
//! passes are in flight only affects passes started afterwards.

pub(crate) mod isolate;
pub mod stage;

pub use stage::{FnStage, StageStream, StreamStage, map_stage};

use std::sync::{Arc, PoisonError, RwLock};

use crate::chunk::{Chunk, ChunkStream};

/// Ordered collection of stream stages.
pub struct Pipeline<F = Chunk> {
    stages: RwLock<Vec<Arc<dyn StreamStage<F>>>>,
}

impl<F> Pipeline<F>
where
    F: Clone + Send + 'static,
{
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self {
            stages: RwLock::new(Vec::new()),
        }
    }

    /// Append a stage. The same stage may be added more than once.
    pub fn add(&self, stage: Arc<dyn StreamStage<F>>) {
        tracing::debug!(stage = %stage.name(), "Added pipeline stage");
        self.stages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(stage);
    }

    /// Append several stages in order.
    pub fn extend(&self, stages: impl IntoIterator<Item = Arc<dyn StreamStage<F>>>) {
        self.stages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(stages);
    }

    /// Remove all stages.
    pub fn clear(&self) {
        self.stages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.stages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of the configured stages, in order.
    pub fn stage_names(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|stage| stage.name().to_string())
            .collect()
    }

    /// Current stages, in order.
    pub fn snapshot(&self) -> Vec<Arc<dyn StreamStage<F>>> {
        self.stages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Route `source` through every stage.
    ///
    /// Returns `source` itself when no stages are configured. Nothing is
    /// pulled from `source` until the returned stream is polled.
    pub fn process(&self, source: ChunkStream<F>) -> ChunkStream<F> {
        self.snapshot()
            .into_iter()
            .fold(source, |upstream, stage| isolate::isolate(stage, upstream))
    }
}

impl<F> Default for Pipeline<F>
where
    F: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
