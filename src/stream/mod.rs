//! Stream cancellation handler (component C).
//!
//! Built with `async_stream::stream!` over the upstream delta stream, the
//! same idiom as the pack's `siumai-core` cancellation helpers: a
//! `tokio::select!` between `token.cancelled()` and `inner.next()` inside
//! the generator. State transitions are recorded in an `Arc<Mutex<StreamState>>`
//! so `state()` is a cheap synchronous-ish read for callers outside the
//! stream task.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::error::{CancellationError, CancellationPhase, LLMError};
use crate::message::StreamDelta;

/// Lifecycle of a wrapped delta stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Active,
    Paused,
    Cancelled,
    Completed,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Cancelled | StreamState::Completed)
    }
}

/// Wraps an upstream delta stream with cooperative cancellation, periodic
/// cancellation probes, and text-buffer accumulation.
pub struct StreamCancellationHandler {
    state: Arc<std::sync::Mutex<StreamState>>,
    buffer: Arc<AsyncMutex<String>>,
    token: CancellationToken,
}

impl StreamCancellationHandler {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            state: Arc::new(std::sync::Mutex::new(StreamState::Active)),
            buffer: Arc::new(AsyncMutex::new(String::new())),
            token,
        }
    }

    /// Resets state to `active` and clears the buffer, mirroring
    /// `startStreamMonitoring`'s reset-on-reuse contract (spec §8).
    pub fn start_stream_monitoring(&self) {
        *self.state.lock().expect("stream state lock poisoned") = StreamState::Active;
        // `clear_buffer` is async (it locks a tokio mutex); reset it
        // synchronously here since callers may invoke this from non-async
        // setup code, same as `state()`'s synchronous read.
        if let Ok(mut buf) = self.buffer.try_lock() {
            buf.clear();
        }
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock().expect("stream state lock poisoned")
    }

    /// Resets the accumulated text buffer. Typically called when monitoring
    /// starts, so buffered text from a previous run doesn't leak in.
    pub async fn clear_buffer(&self) {
        self.buffer.lock().await.clear();
    }

    pub async fn buffered_text(&self) -> String {
        self.buffer.lock().await.clone()
    }

    /// Wraps `inner`, yielding deltas until cancellation, exhaustion, or
    /// upstream error. The cancellation probe lives in the same `select!`
    /// arm as the next-chunk poll, so latency to detect cancellation is
    /// bounded by whichever is sooner: the next upstream chunk, or the
    /// periodic check timer passed via `check_interval`. That timer exists
    /// only to bound latency when the upstream stream itself stalls.
    pub fn wrap(
        self: Arc<Self>,
        mut inner: BoxStream<'static, Result<StreamDelta, LLMError>>,
        check_interval: std::time::Duration,
    ) -> BoxStream<'static, Result<StreamDelta, LLMError>> {
        let handler = self;
        Box::pin(async_stream::stream! {
            loop {
                let mut tick = Box::pin(tokio::time::sleep(check_interval));
                tokio::select! {
                    _ = handler.token.cancelled() => {
                        *handler.state.lock().expect("stream state lock poisoned") = StreamState::Cancelled;
                        yield Err(LLMError::Cancellation(CancellationError::Cancelled {
                            reason: None,
                            phase: CancellationPhase::Streaming,
                            cleanup_completed: true,
                        }));
                        break;
                    }
                    _ = &mut tick => {
                        // Periodic probe: no chunk arrived within the interval.
                        // Loop back around to re-check cancellation and re-poll.
                        continue;
                    }
                    next = inner.next() => {
                        match next {
                            Some(Ok(delta)) => {
                                if let Some(parts) = &delta.delta.content {
                                    let mut buf = handler.buffer.lock().await;
                                    for part in parts {
                                        if let crate::message::ContentPart::Text { text } = part {
                                            buf.push_str(text);
                                        }
                                    }
                                }
                                let finished = delta.finished;
                                yield Ok(delta);
                                if finished {
                                    *handler.state.lock().expect("stream state lock poisoned") = StreamState::Completed;
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                yield Err(e);
                                *handler.state.lock().expect("stream state lock poisoned") = StreamState::Completed;
                                break;
                            }
                            None => {
                                *handler.state.lock().expect("stream state lock poisoned") = StreamState::Completed;
                                break;
                            }
                        }
                    }
                }
            }
        })
    }

    pub fn pause(&self) {
        let mut state = self.state.lock().expect("stream state lock poisoned");
        if *state == StreamState::Active {
            *state = StreamState::Paused;
        }
    }

    pub fn resume(&self) {
        let mut state = self.state.lock().expect("stream state lock poisoned");
        if *state == StreamState::Paused {
            *state = StreamState::Active;
        }
    }

    /// Requests cancellation. A second call after a terminal state is a
    /// no-op: the first cancellation already won the race for the reason.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DeltaBody;
    use std::time::Duration;

    fn delta(text: &str, finished: bool) -> StreamDelta {
        StreamDelta {
            id: "d1".into(),
            delta: DeltaBody {
                content: Some(vec![crate::message::ContentPart::Text { text: text.into() }]),
                role: None,
                tool_calls: None,
            },
            finished,
        }
    }

    #[tokio::test]
    async fn accumulates_text_and_completes() {
        let token = CancellationToken::new();
        let handler = Arc::new(StreamCancellationHandler::new(token));
        let upstream: BoxStream<'static, Result<StreamDelta, LLMError>> = Box::pin(
            futures::stream::iter(vec![Ok(delta("hel", false)), Ok(delta("lo", true))]),
        );
        let mut wrapped = handler.clone().wrap(upstream, Duration::from_secs(5));

        while wrapped.next().await.is_some() {}

        assert_eq!(handler.buffered_text().await, "hello");
        assert_eq!(handler.state(), StreamState::Completed);
    }

    #[tokio::test]
    async fn cancel_stops_stream_and_sets_state() {
        let token = CancellationToken::new();
        let handler = Arc::new(StreamCancellationHandler::new(token.clone()));
        let upstream: BoxStream<'static, Result<StreamDelta, LLMError>> =
            Box::pin(futures::stream::pending());
        let mut wrapped = handler.clone().wrap(upstream, Duration::from_secs(5));

        handler.cancel();
        let next = wrapped.next().await;
        assert!(matches!(
            next,
            Some(Err(LLMError::Cancellation(crate::error::CancellationError::Cancelled {
                phase: crate::error::CancellationPhase::Streaming,
                ..
            })))
        ));
        assert!(wrapped.next().await.is_none());
        assert_eq!(handler.state(), StreamState::Cancelled);
    }

    #[tokio::test]
    async fn start_stream_monitoring_resets_state_and_buffer() {
        let token = CancellationToken::new();
        let handler = Arc::new(StreamCancellationHandler::new(token));
        handler.pause();
        assert_eq!(handler.state(), StreamState::Paused);

        handler.start_stream_monitoring();
        assert_eq!(handler.state(), StreamState::Active);
        assert_eq!(handler.buffered_text().await, "");
    }
}
