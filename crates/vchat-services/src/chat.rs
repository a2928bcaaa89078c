//! Chat session controller
//!
//! Owns one transcript and at most one outstanding completion request.
//! Every state transition goes through the session's watch channel, and
//! every transition made on behalf of a request first checks that the
//! request's generation is still current. A superseded or stopped request
//! therefore cannot touch state even if its response arrives late.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use vchat_core::{
    ChatRequest, GenerationConfig, Message, Result, SessionState, VchatError, WireMessage,
};

use crate::stream::{consume_stream, estimate_tokens, StreamEnd};
use crate::{CompletionTransport, SelectionBinding};

/// How a `send` call ended
#[derive(Debug)]
pub enum SendOutcome {
    /// Text was blank after trimming; nothing happened
    Ignored,
    Completed { message_id: String, token_count: u32 },
    /// Stopped, cleared, or superseded by a newer send
    Cancelled,
    /// The error is also recorded in `SessionState::error`
    Failed(VchatError),
}

struct InFlight {
    generation: u64,
    token: CancellationToken,
    placeholder_id: String,
}

#[derive(Default)]
struct RequestSlot {
    generation: u64,
    in_flight: Option<InFlight>,
}

impl RequestSlot {
    /// Retire the outstanding request, if any. Its generation stops being current.
    fn cancel(&mut self, state: &mut SessionState) -> bool {
        self.generation += 1;
        let Some(prev) = self.in_flight.take() else {
            return false;
        };
        prev.token.cancel();
        state.discard_if_empty(&prev.placeholder_id);
        state.is_loading = false;
        debug!(generation = prev.generation, "Cancelled in-flight request");
        true
    }
}

enum Finish {
    /// Atomic replies carry the full text; streamed text is already in place
    Done { text: Option<String>, token_count: u32 },
    Cancelled,
}

struct SessionInner {
    state: watch::Sender<SessionState>,
    slot: Mutex<RequestSlot>,
    transport: Arc<dyn CompletionTransport>,
    binding: SelectionBinding,
    params: GenerationConfig,
    streaming: AtomicBool,
}

impl SessionInner {
    fn lock_slot(&self) -> MutexGuard<'_, RequestSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` only if `generation` is still the current request
    fn apply_if_current<F>(&self, generation: u64, f: F) -> bool
    where
        F: FnOnce(&mut SessionState, &mut RequestSlot),
    {
        self.state.send_if_modified(|state| {
            let mut slot = self.lock_slot();
            if slot.generation != generation {
                return false;
            }
            f(state, &mut slot);
            true
        })
    }
}

/// Releases the request if the `send` future is dropped before it settles
struct AbandonGuard<'a> {
    inner: &'a SessionInner,
    generation: u64,
    armed: bool,
}

impl AbandonGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let generation = self.generation;
        let released = self.inner.state.send_if_modified(|state| {
            let mut slot = self.inner.lock_slot();
            slot.generation == generation && slot.cancel(state)
        });
        if released {
            warn!(generation, "Send dropped before settling, request released");
        }
    }
}

/// Handle to one chat session. Clones share the same session.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl ChatSession {
    pub fn new(
        transport: Arc<dyn CompletionTransport>,
        binding: SelectionBinding,
        params: GenerationConfig,
    ) -> Self {
        let (state, _rx) = watch::channel(SessionState::new());
        let streaming = AtomicBool::new(params.stream);
        Self {
            inner: Arc::new(SessionInner {
                state,
                slot: Mutex::new(RequestSlot::default()),
                transport,
                binding,
                params,
                streaming,
            }),
        }
    }

    /// Send a user turn and wait for the reply to settle
    ///
    /// The user message and an empty assistant placeholder are appended
    /// before the request goes out. Any request still in flight is
    /// cancelled first.
    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub async fn send(&self, text: &str, model_override: Option<&str>) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SendOutcome::Ignored;
        }

        let selected = self.inner.state.borrow().selected_model.clone();
        let Some(profile_id) = model_override.map(str::to_string).or(selected) else {
            return self.reject(VchatError::ModelUnresolved("no model selected".into()));
        };

        let model_id = match self.inner.binding.resolve(&profile_id).await {
            Ok(id) => id,
            Err(e) => return self.reject(e),
        };

        let user = Message::user(text, Some(profile_id.clone()));
        let placeholder = Message::placeholder(Some(profile_id));
        let placeholder_id = placeholder.id.clone();
        let token = CancellationToken::new();

        let mut generation = 0;
        let mut history = Vec::new();
        self.inner.state.send_modify(|state| {
            let mut slot = self.inner.lock_slot();
            slot.cancel(state);
            generation = slot.generation;
            slot.in_flight = Some(InFlight {
                generation,
                token: token.clone(),
                placeholder_id: placeholder_id.clone(),
            });

            history = state.wire_history();
            history.push(WireMessage::from(&user));
            state.push_exchange(user, placeholder);
            state.is_loading = true;
            state.error = None;
        });
        let guard = AbandonGuard {
            inner: self.inner.as_ref(),
            generation,
            armed: true,
        };

        let mut request = ChatRequest::new(history, model_id, &self.inner.params);
        request.stream = self.inner.streaming.load(Ordering::Relaxed);
        info!(generation, model = %request.model, stream = request.stream, "Sending chat request");

        let result = if request.stream {
            self.run_streaming(generation, &placeholder_id, &token, &request)
                .await
        } else {
            self.run_atomic(&token, &request).await
        };

        let outcome = self.settle(generation, placeholder_id, result);
        guard.disarm();
        outcome
    }

    async fn run_atomic(&self, token: &CancellationToken, request: &ChatRequest) -> Result<Finish> {
        let completion = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(Finish::Cancelled),
            result = self.inner.transport.complete(request) => result?,
        };

        let text = completion.text()?.to_string();
        let token_count = completion
            .total_tokens()
            .unwrap_or_else(|| estimate_tokens(&text));

        Ok(Finish::Done {
            text: Some(text),
            token_count,
        })
    }

    async fn run_streaming(
        &self,
        generation: u64,
        placeholder_id: &str,
        token: &CancellationToken,
        request: &ChatRequest,
    ) -> Result<Finish> {
        let chunks = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(Finish::Cancelled),
            result = self.inner.transport.open_stream(request) => result?,
        };

        let summary = consume_stream(chunks, token, |delta| {
            self.inner.apply_if_current(generation, |state, _| {
                state.append_to(placeholder_id, delta);
            });
        })
        .await?;

        match summary.end {
            StreamEnd::Cancelled => Ok(Finish::Cancelled),
            StreamEnd::Sentinel | StreamEnd::Closed => Ok(Finish::Done {
                text: None,
                token_count: summary.token_count,
            }),
        }
    }

    fn settle(&self, generation: u64, placeholder_id: String, result: Result<Finish>) -> SendOutcome {
        match result {
            Ok(Finish::Done { text, token_count }) => {
                let applied = self.inner.apply_if_current(generation, |state, slot| {
                    if let Some(msg) = state.message_mut(&placeholder_id) {
                        if let Some(text) = text {
                            msg.content = text;
                        }
                        msg.token_count = Some(token_count);
                    }
                    state.is_loading = false;
                    slot.in_flight = None;
                });
                if !applied {
                    debug!(generation, "Dropping reply for superseded request");
                    return SendOutcome::Cancelled;
                }
                info!(generation, token_count, "Reply complete");
                SendOutcome::Completed {
                    message_id: placeholder_id,
                    token_count,
                }
            }
            // Whoever cancelled the token already settled the state
            Ok(Finish::Cancelled) => SendOutcome::Cancelled,
            Err(e) => {
                let message = e.to_string();
                let applied = self.inner.apply_if_current(generation, |state, slot| {
                    state.remove(&placeholder_id);
                    state.set_error(Some(message));
                    state.is_loading = false;
                    slot.in_flight = None;
                });
                if !applied {
                    debug!(generation, error = %e, "Ignoring failure of superseded request");
                    return SendOutcome::Cancelled;
                }
                error!(generation, error = %e, "Chat request failed");
                SendOutcome::Failed(e)
            }
        }
    }

    /// Record a failure that happened before anything was appended
    fn reject(&self, e: VchatError) -> SendOutcome {
        warn!(error = %e, "Send rejected");
        let message = e.to_string();
        self.inner.state.send_modify(|state| state.set_error(Some(message)));
        SendOutcome::Failed(e)
    }

    /// Cancel the in-flight request, keeping any partial reply
    ///
    /// Returns false when nothing was in flight.
    pub fn stop(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            let mut slot = self.inner.lock_slot();
            slot.cancel(state)
        })
    }

    /// Empty the transcript. Stops an in-flight request first.
    pub fn clear(&self) {
        self.inner.state.send_modify(|state| {
            let mut slot = self.inner.lock_slot();
            slot.cancel(state);
            state.clear();
        });
    }

    pub fn set_model(&self, profile_id: impl Into<String>) {
        let profile_id = profile_id.into();
        self.inner
            .state
            .send_modify(|state| state.selected_model = Some(profile_id));
    }

    pub fn clear_error(&self) {
        self.inner
            .state
            .send_if_modified(|state| state.error.take().is_some());
    }

    pub fn set_streaming(&self, streaming: bool) {
        self.inner.streaming.store(streaming, Ordering::Relaxed);
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.streaming.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading
    }
}
