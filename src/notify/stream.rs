use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::{ExecutionError, ReconError, ReconResult};

use super::dispatcher::ControlMsg;
use super::events::{ChangeEvent, SubscriptionId};

fn disconnected() -> ReconError {
    ReconError::Execution(ExecutionError::Disconnected {
        path: "change_stream".to_string(),
    })
}

/// A live subscription to change events.
///
/// Dropping it unregisters the subscriber.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: Receiver<ChangeEvent>,
    control_tx: Sender<ControlMsg>,
    unregistered: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        rx: Receiver<ChangeEvent>,
        control_tx: Sender<ControlMsg>,
    ) -> Self {
        Self {
            id,
            rx,
            control_tx,
            unregistered: AtomicBool::new(false),
        }
    }

    /// The subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stop receiving new events. Non-blocking and idempotent.
    ///
    /// Events already buffered can still be received.
    pub fn unsubscribe(&self) {
        if self.unregistered.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.control_tx.try_send(ControlMsg::Unregister { id: self.id });
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> ReconResult<ChangeEvent> {
        self.rx.recv().map_err(|_| disconnected())
    }

    /// Receive the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> ReconResult<ChangeEvent> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ReconError::Execution(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => disconnected(),
        })
    }

    /// Take a buffered event if one is ready.
    pub fn try_recv(&self) -> ReconResult<Option<ChangeEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(disconnected()),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
