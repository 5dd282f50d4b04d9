//! Per-stage failure isolation.
//!
//! The stage reads upstream through a tap that remembers the fragment it
//! most recently handed out. When the stage fails, that fragment is replayed
//! and the rest of upstream is forwarded untouched.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tracing::error;

use crate::chunk::ChunkStream;
use crate::pipeline::stage::{StageStream, StreamStage};

struct TapState<F> {
    upstream: Option<ChunkStream<F>>,
    /// Pulled by the stage but not yet followed by any stage output.
    in_flight: Option<F>,
}

type SharedTap<F> = Arc<Mutex<TapState<F>>>;

fn lock<F>(shared: &SharedTap<F>) -> MutexGuard<'_, TapState<F>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Upstream as seen by the stage.
struct Tap<F> {
    shared: SharedTap<F>,
}

impl<F: Clone> Stream for Tap<F> {
    type Item = F;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<F>> {
        let mut guard = lock(&self.shared);
        let state = &mut *guard;
        let Some(upstream) = state.upstream.as_mut() else {
            return Poll::Ready(None);
        };
        match upstream.as_mut().poll_next(cx) {
            Poll::Ready(Some(chunk)) => {
                state.in_flight = Some(chunk.clone());
                Poll::Ready(Some(chunk))
            }
            other => other,
        }
    }
}

/// Stage output with panics converted into failures.
struct Guarded<F> {
    inner: StageStream<F>,
}

impl<F> Stream for Guarded<F> {
    type Item = Result<anyhow::Result<F>, String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let inner = &mut self.inner;
        match panic::catch_unwind(AssertUnwindSafe(|| inner.as_mut().poll_next(cx))) {
            Ok(Poll::Ready(Some(item))) => Poll::Ready(Some(Ok(item))),
            Ok(Poll::Ready(None)) => Poll::Ready(None),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Some(Err(panic_message(payload.as_ref())))),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Run `stage` over `upstream`, falling back to passthrough if it fails.
pub(crate) fn isolate<F>(stage: Arc<dyn StreamStage<F>>, upstream: ChunkStream<F>) -> ChunkStream<F>
where
    F: Clone + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let shared: SharedTap<F> = Arc::new(Mutex::new(TapState {
            upstream: Some(upstream),
            in_flight: None,
        }));
        let tap: ChunkStream<F> = Box::pin(Tap {
            shared: Arc::clone(&shared),
        });

        let failure = match panic::catch_unwind(AssertUnwindSafe(|| stage.apply(tap))) {
            Err(payload) => Some(panic_message(payload.as_ref())),
            Ok(output) => {
                let mut output = Guarded { inner: output };
                let mut failure = None;
                while let Some(item) = output.next().await {
                    match item {
                        Ok(Ok(chunk)) => {
                            lock(&shared).in_flight = None;
                            yield chunk;
                        }
                        Ok(Err(err)) => {
                            failure = Some(format!("{err:#}"));
                            break;
                        }
                        Err(panic_msg) => {
                            failure = Some(format!("panicked: {panic_msg}"));
                            break;
                        }
                    }
                }
                failure
            }
        };

        let Some(reason) = failure else {
            return;
        };

        error!(
            stage = %stage.name(),
            error = %reason,
            "Pipeline stage failed, falling back to passthrough"
        );

        let (in_flight, upstream) = {
            let mut state = lock(&shared);
            (state.in_flight.take(), state.upstream.take())
        };
        if let Some(chunk) = in_flight {
            yield chunk;
        }
        if let Some(mut upstream) = upstream {
            while let Some(chunk) = upstream.next().await {
                yield chunk;
            }
        }
    })
}
