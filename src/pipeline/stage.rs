//! Pipeline stage abstraction.

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};

use crate::chunk::{Chunk, ChunkStream};

/// Output of a stage: transformed fragments, or the error that ended it.
pub type StageStream<F = Chunk> = Pin<Box<dyn Stream<Item = anyhow::Result<F>> + Send>>;

/// A transformer from one lazy fragment stream to another.
///
/// A stage signals failure by yielding `Err` (or by panicking while being
/// polled); the pipeline then degrades it to a passthrough for the rest of
/// the pass.
pub trait StreamStage<F = Chunk>: Send + Sync {
    /// Name used when logging failures.
    fn name(&self) -> &str;

    /// Wrap `input` in this stage's transformation.
    fn apply(&self, input: ChunkStream<F>) -> StageStream<F>;
}

/// A stage built from a closure over the whole stream.
pub struct FnStage<F, T> {
    name: String,
    transform: T,
    _fragment: PhantomData<fn(F) -> F>,
}

impl<F, T> FnStage<F, T>
where
    T: Fn(ChunkStream<F>) -> StageStream<F> + Send + Sync,
{
    pub fn new(name: impl Into<String>, transform: T) -> Self {
        Self {
            name: name.into(),
            transform,
            _fragment: PhantomData,
        }
    }
}

impl<F, T> StreamStage<F> for FnStage<F, T>
where
    T: Fn(ChunkStream<F>) -> StageStream<F> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, input: ChunkStream<F>) -> StageStream<F> {
        (self.transform)(input)
    }
}

/// Build a one-to-one stage from a per-fragment function.
pub fn map_stage<F, M>(name: impl Into<String>, map: M) -> Arc<dyn StreamStage<F>>
where
    F: Send + 'static,
    M: Fn(F) -> anyhow::Result<F> + Send + Sync + 'static,
{
    let mapper = Arc::new(map);
    Arc::new(FnStage::new(name, move |input: ChunkStream<F>| {
        let mapper = Arc::clone(&mapper);
        Box::pin(input.map(move |chunk| (*mapper)(chunk))) as StageStream<F>
    }))
}
