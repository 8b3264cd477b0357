//! Debounced live-check loop.
//!
//! Edits arrive over a channel. Stats are recomputed on every edit; a check
//! is issued once no edit has arrived for the debounce window. Each check is
//! stamped with a sequence number, issuing a new check cancels the previous
//! one, and only the result of the latest check is ever applied.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::checker::{CheckOutcome, GrammarChecker};
use crate::error::CheckError;
use crate::llm::CancellationSignal;
use crate::render::{self, Segment, TextStats};

/// Anything that can run a grammar check for the live loop
#[async_trait]
pub trait CheckBackend: Send + Sync {
    async fn check(&self, text: &str, cancel: &CancellationSignal) -> Result<CheckOutcome, CheckError>;
}

#[async_trait]
impl CheckBackend for GrammarChecker {
    async fn check(&self, text: &str, cancel: &CancellationSignal) -> Result<CheckOutcome, CheckError> {
        GrammarChecker::check(self, text, Some(cancel)).await
    }
}

/// What the live view currently shows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveState {
    /// Latest text as typed
    pub text: String,
    pub stats: TextStats,
    /// An edit is waiting for the debounce window to elapse
    pub pending: bool,
    pub checking: bool,
    /// Result of the latest applied check
    pub outcome: Option<CheckOutcome>,
    /// Message for the latest failed check
    pub error: Option<String>,
    /// Sequence number of the check `outcome`/`error` belong to
    pub applied_seq: u64,
}

impl LiveState {
    /// Segments to display: the checked text with highlights, or the raw
    /// text while nothing has been checked yet
    pub fn segments(&self) -> Vec<Segment> {
        match &self.outcome {
            Some(outcome) => render::highlight(&outcome.normalized_text, &outcome.errors),
            None if self.text.is_empty() => Vec::new(),
            None => vec![Segment::Plain(self.text.clone())],
        }
    }
}

struct InFlight {
    seq: u64,
    cancel: CancellationSignal,
    handle: JoinHandle<()>,
}

impl InFlight {
    fn cancel(self) {
        self.cancel.store(true, Ordering::Release);
        self.handle.abort();
    }
}

/// Handle to a running live-check loop
pub struct LiveHighlighter {
    edits: mpsc::UnboundedSender<String>,
    state: watch::Receiver<LiveState>,
    task: JoinHandle<()>,
}

impl LiveHighlighter {
    /// Spawn the loop on the current tokio runtime
    pub fn spawn(backend: Arc<dyn CheckBackend>, debounce: Duration) -> Self {
        let (edits_tx, edits_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LiveState::default());
        let task = tokio::spawn(run(backend, debounce, edits_rx, state_tx));
        Self {
            edits: edits_tx,
            state: state_rx,
            task,
        }
    }

    /// Replace the text being edited
    pub fn edit(&self, text: impl Into<String>) {
        if self.edits.send(text.into()).is_err() {
            tracing::warn!("live loop has stopped; edit ignored");
        }
    }

    pub fn state(&self) -> LiveState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<LiveState> {
        self.state.clone()
    }

    /// Stop accepting edits and wait for the loop to finish.
    ///
    /// An edit still inside its debounce window is checked right away, and a
    /// check already in flight is awaited, so the final state reflects the
    /// last text sent.
    pub async fn shutdown(self) {
        drop(self.edits);
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                tracing::error!("live loop panicked: {}", e);
            }
        }
    }
}

async fn run(
    backend: Arc<dyn CheckBackend>,
    debounce: Duration,
    mut edits: mpsc::UnboundedReceiver<String>,
    state: watch::Sender<LiveState>,
) {
    let (results_tx, mut results) = mpsc::unbounded_channel::<(u64, Result<CheckOutcome, CheckError>)>();
    let mut pending: Option<String> = None;
    let mut deadline = Instant::now();
    let mut next_seq: u64 = 0;
    let mut in_flight: Option<InFlight> = None;

    loop {
        tokio::select! {
            edit = edits.recv() => {
                let Some(text) = edit else { break };
                let stats = TextStats::of(&text);
                state.send_modify(|s| {
                    s.text = text.clone();
                    s.stats = stats;
                    s.pending = true;
                });
                pending = Some(text);
                deadline = Instant::now() + debounce;
            }
            _ = tokio::time::sleep_until(deadline), if pending.is_some() => {
                let Some(text) = pending.take() else { continue };
                next_seq += 1;
                let seq = next_seq;

                if let Some(previous) = in_flight.take() {
                    tracing::debug!(seq = previous.seq, "cancelling superseded check");
                    previous.cancel();
                }

                if text.trim().is_empty() {
                    clear_results(&state, seq);
                    continue;
                }

                let cancel: CancellationSignal = Arc::new(AtomicBool::new(false));
                let handle = tokio::spawn({
                    let backend = backend.clone();
                    let cancel = cancel.clone();
                    let results_tx = results_tx.clone();
                    async move {
                        let result = backend.check(&text, &cancel).await;
                        let _ = results_tx.send((seq, result));
                    }
                });
                in_flight = Some(InFlight { seq, cancel, handle });
                state.send_modify(|s| {
                    s.pending = false;
                    s.checking = true;
                });
            }
            Some((seq, result)) = results.recv() => {
                if apply_result(&state, next_seq, seq, result) {
                    in_flight = None;
                }
            }
        }
    }

    // The edit channel is closed: check the last edit without waiting out
    // the debounce window, or wait for the check already in flight.
    drop(results_tx);
    if let Some(text) = pending.take() {
        next_seq += 1;
        if let Some(previous) = in_flight.take() {
            previous.cancel();
        }
        if text.trim().is_empty() {
            clear_results(&state, next_seq);
        } else {
            state.send_modify(|s| {
                s.pending = false;
                s.checking = true;
            });
            let cancel: CancellationSignal = Arc::new(AtomicBool::new(false));
            let result = backend.check(&text, &cancel).await;
            apply_result(&state, next_seq, next_seq, result);
        }
    } else if in_flight.take().is_some() {
        while let Some((seq, result)) = results.recv().await {
            if apply_result(&state, next_seq, seq, result) {
                break;
            }
        }
    }
}

fn clear_results(state: &watch::Sender<LiveState>, seq: u64) {
    state.send_modify(|s| {
        s.pending = false;
        s.checking = false;
        s.outcome = None;
        s.error = None;
        s.applied_seq = seq;
    });
}

/// Apply the result of check `seq` if it is the latest one issued.
///
/// Returns false, leaving the state untouched, for a stale result.
fn apply_result(
    state: &watch::Sender<LiveState>,
    latest: u64,
    seq: u64,
    result: Result<CheckOutcome, CheckError>,
) -> bool {
    if seq != latest {
        tracing::debug!(seq, latest, "discarding stale check result");
        return false;
    }
    state.send_modify(|s| {
        s.checking = false;
        s.applied_seq = seq;
        match result {
            Ok(outcome) => {
                s.outcome = Some(outcome);
                s.error = None;
            }
            Err(CheckError::Cancelled) => {}
            Err(e) => {
                tracing::warn!("live check failed: {}", e);
                s.error = Some(e.user_message().to_string());
            }
        }
    });
    true
}
