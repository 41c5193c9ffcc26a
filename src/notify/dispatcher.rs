//! Change notifier dispatch worker.
//!
//! Commits enqueue events on a bounded channel and never block. A dedicated
//! thread fans each event out to per-subscriber streams; a slow or closed
//! subscriber only loses its own copy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};

use crate::config::NotifierConfig;
use crate::error::{ExecutionError, ReconError, ReconResult};

use super::events::{ChangeEvent, SubscriptionId};
use super::stream::Subscription;

#[derive(Debug)]
pub(crate) enum ControlMsg {
    Register {
        id: SubscriptionId,
        stream_tx: Sender<ChangeEvent>,
        reply: Sender<()>,
    },
    Unregister {
        id: SubscriptionId,
    },
}

#[derive(Debug, Default)]
struct Counters {
    dropped_deliveries: AtomicU64,
    subscribers: AtomicUsize,
}

fn control_disconnected() -> ReconError {
    ReconError::Execution(ExecutionError::Disconnected {
        path: "notifier_control".to_string(),
    })
}

/// Broadcasts committed changes to every live subscriber.
#[derive(Debug)]
pub struct ChangeNotifier {
    cfg: NotifierConfig,
    control_tx: Sender<ControlMsg>,
    event_tx: Sender<ChangeEvent>,
    dropped_events: AtomicU64,
    counters: Arc<Counters>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeNotifier {
    /// Start the dispatch thread.
    ///
    /// # Errors
    /// `Internal` if the thread cannot be spawned.
    pub fn new(cfg: NotifierConfig) -> ReconResult<Self> {
        let (control_tx, control_rx) = bounded::<ControlMsg>(cfg.control_queue_capacity.max(1));
        let (event_tx, event_rx) = bounded::<ChangeEvent>(cfg.event_queue_capacity.max(1));

        let counters = Arc::new(Counters::default());
        let thread_counters = Arc::clone(&counters);
        let join = thread::Builder::new()
            .name("hostrecon-notifier".to_string())
            .spawn(move || dispatch_loop(&thread_counters, &control_rx, &event_rx))
            .map_err(|e| ReconError::internal(format!("failed to spawn notifier thread: {e}")))?;

        Ok(Self {
            cfg,
            control_tx,
            event_tx,
            dropped_events: AtomicU64::new(0),
            counters,
            join: Mutex::new(Some(join)),
        })
    }

    /// Register a subscriber. Events published after this returns are delivered to it.
    pub fn subscribe(&self) -> ReconResult<Subscription> {
        let id = SubscriptionId::new();
        let (stream_tx, stream_rx) = bounded::<ChangeEvent>(self.cfg.stream_capacity.max(1));
        let (reply_tx, reply_rx) = bounded::<()>(1);

        self.control_tx
            .send(ControlMsg::Register {
                id,
                stream_tx,
                reply: reply_tx,
            })
            .map_err(|_| control_disconnected())?;
        reply_rx.recv().map_err(|_| control_disconnected())?;

        Ok(Subscription::new(id, stream_rx, self.control_tx.clone()))
    }

    /// Non-blocking publish. A full queue drops the event.
    pub fn publish(&self, event: ChangeEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event) | TrySendError::Disconnected(event)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    kind = event.payload.kind(),
                    commit_sequence = event.commit_sequence,
                    "change event dropped: notifier queue full"
                );
            }
        }
    }

    /// Events dropped because the notifier queue was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Per-subscriber deliveries dropped because a stream was full or closed.
    #[must_use]
    pub fn dropped_deliveries(&self) -> u64 {
        self.counters.dropped_deliveries.load(Ordering::Relaxed)
    }

    /// Subscribers currently registered with the dispatch thread.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.counters.subscribers.load(Ordering::Relaxed)
    }
}

impl Drop for ChangeNotifier {
    fn drop(&mut self) {
        // Closing the event channel stops the worker, which drops every stream sender.
        let (dummy_tx, _) = bounded::<ChangeEvent>(1);
        drop(std::mem::replace(&mut self.event_tx, dummy_tx));

        if let Ok(mut guard) = self.join.lock() {
            // Detach: the worker may be blocked delivering, and exits on its own.
            drop(guard.take());
        }
    }
}

fn deliver(
    subs: &mut HashMap<SubscriptionId, Sender<ChangeEvent>>,
    counters: &Counters,
    event: &ChangeEvent,
) {
    subs.retain(|id, tx| match tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            counters.dropped_deliveries.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(subscription = %id, kind = event.payload.kind(), "subscriber stream full");
            true
        }
        Err(TrySendError::Disconnected(_)) => {
            counters.dropped_deliveries.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(subscription = %id, "pruned closed subscriber");
            false
        }
    });
}

fn dispatch_loop(
    counters: &Counters,
    control_rx: &Receiver<ControlMsg>,
    event_rx: &Receiver<ChangeEvent>,
) {
    let mut subs: HashMap<SubscriptionId, Sender<ChangeEvent>> = HashMap::new();

    loop {
        select! {
            recv(control_rx) -> msg => match msg {
                Ok(ControlMsg::Register { id, stream_tx, reply }) => {
                    // Events published before this subscription do not reach it.
                    while let Ok(event) = event_rx.try_recv() {
                        deliver(&mut subs, counters, &event);
                    }
                    subs.insert(id, stream_tx);
                    tracing::debug!(subscription = %id, subscribers = subs.len(), "subscriber registered");
                    let _ = reply.send(());
                }
                Ok(ControlMsg::Unregister { id }) => {
                    if subs.remove(&id).is_some() {
                        tracing::debug!(subscription = %id, subscribers = subs.len(), "subscriber removed");
                    }
                }
                Err(_) => break,
            },
            recv(event_rx) -> msg => match msg {
                Ok(event) => deliver(&mut subs, counters, &event),
                Err(_) => break,
            },
        }
        counters.subscribers.store(subs.len(), Ordering::Relaxed);
    }
    counters.subscribers.store(0, Ordering::Relaxed);
}
