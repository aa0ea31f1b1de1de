// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The SSE broker: the one process-wide mutable registry in the
//! system — a `HashMap<ConversationId, Arc<RunBroadcast>>` behind a
//! `Mutex`, created at process startup and only ever mutated by
//! insert-on-run-start and remove-after-grace. Each run's broadcast channel
//! fans one producer out to any number of buffered-replay-then-live SSE
//! readers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot, Mutex};
use uuid::Uuid;

use poncho_core::RunEvent;

/// How long a run's replay buffer survives after its terminal event, so a
/// client that reconnects moments after completion still sees the tail.
const REPLAY_GRACE: Duration = Duration::from_secs(30);

/// One run's event history plus its live broadcast channel.
pub struct RunBroadcast {
    pub run_id: String,
    buffered: Mutex<Vec<RunEvent>>,
    live: broadcast::Sender<RunEvent>,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
    finished: AtomicBool,
}

impl RunBroadcast {
    fn new(run_id: String) -> (Self, oneshot::Receiver<()>) {
        let (live, _) = broadcast::channel(256);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        (
            Self {
                run_id,
                buffered: Mutex::new(Vec::new()),
                live,
                cancel: Mutex::new(Some(cancel_tx)),
                finished: AtomicBool::new(false),
            },
            cancel_rx,
        )
    }

    /// True once a terminal event has been published. The broker keeps the
    /// entry around for replay during the grace window, so "present in the
    /// map" alone does not mean the run is still live.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Signals the run's orchestrator to stop at its next suspension point.
    /// A no-op if the run already finished and consumed its sender.
    pub async fn cancel(&self) -> bool {
        match self.cancel.lock().await.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Appends to the replay buffer and fans out to live subscribers.
    /// Publishing to a channel with no subscribers is not an error — events
    /// are still recorded for anyone who attaches via `/events` afterward.
    pub async fn publish(&self, event: RunEvent) {
        if event.is_terminal() {
            self.finished.store(true, Ordering::Release);
        }
        let mut buf = self.buffered.lock().await;
        buf.push(event.clone());
        let _ = self.live.send(event);
    }

    /// Replays everything seen so far, then returns a receiver for anything
    /// published after this call — giving the caller an ordering guarantee
    /// identical to a subscriber that was live from the start.
    pub async fn subscribe(&self) -> (Vec<RunEvent>, broadcast::Receiver<RunEvent>) {
        let rx = self.live.subscribe();
        let buffered = self.buffered.lock().await.clone();
        (buffered, rx)
    }
}

#[derive(Default)]
pub struct Broker {
    runs: Mutex<HashMap<String, Arc<RunBroadcast>>>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start_run(&self, conversation_id: &str) -> (Arc<RunBroadcast>, oneshot::Receiver<()>) {
        let run_id = Uuid::new_v4().to_string();
        let (broadcast, cancel_rx) = RunBroadcast::new(run_id);
        let broadcast = Arc::new(broadcast);
        self.runs.lock().await.insert(conversation_id.to_string(), broadcast.clone());
        (broadcast, cancel_rx)
    }

    /// Starts a run only if the conversation has no live one — the check and
    /// the insert happen under one lock so two concurrent sends can't both
    /// win. A finished run waiting out its replay grace period doesn't block
    /// a new start.
    pub async fn try_start_run(&self, conversation_id: &str) -> Option<(Arc<RunBroadcast>, oneshot::Receiver<()>)> {
        let mut runs = self.runs.lock().await;
        if runs.get(conversation_id).is_some_and(|r| !r.is_finished()) {
            return None;
        }
        let run_id = Uuid::new_v4().to_string();
        let (broadcast, cancel_rx) = RunBroadcast::new(run_id);
        let broadcast = Arc::new(broadcast);
        runs.insert(conversation_id.to_string(), broadcast.clone());
        Some((broadcast, cancel_rx))
    }

    pub async fn active_run(&self, conversation_id: &str) -> Option<Arc<RunBroadcast>> {
        self.runs.lock().await.get(conversation_id).cloned()
    }

    pub async fn is_run_active(&self, conversation_id: &str) -> bool {
        self.runs.lock().await.get(conversation_id).is_some_and(|r| !r.is_finished())
    }

    /// Called once a run's terminal event has been published. Schedules
    /// removal after the replay grace period rather than evicting
    /// immediately, so a client reconnecting moments later still replays.
    /// Eviction is conditional on the run id: if a newer run has replaced
    /// this one for the conversation in the meantime, it is left alone.
    pub fn end_run(self: &Arc<Self>, conversation_id: String, run_id: String) {
        let broker = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(REPLAY_GRACE).await;
            let mut runs = broker.runs.lock().await;
            if runs.get(&conversation_id).is_some_and(|r| r.run_id == run_id) {
                runs.remove(&conversation_id);
            }
        });
    }
}
