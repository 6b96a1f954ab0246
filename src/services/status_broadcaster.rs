use chrono::Utc;
use futures::Stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::AppError;
use crate::models::{
    SchedulerEvent, SchedulerSlot, SchedulerSnapshot, SlotSnapshot, TaskId, TaskRecord,
};
use crate::services::slot_manager::SlotManager;
use crate::services::task_registry::TaskRegistry;

/// Sending half of the push channel shared by the registry and the slots
#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<SchedulerEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn task(&self, record: &TaskRecord) {
        // No subscribers is fine.
        let _ = self.tx.send(SchedulerEvent::Task(record.clone()));
    }

    pub fn slot(&self, slot: &SchedulerSlot) {
        let _ = self.tx.send(SchedulerEvent::Slot(slot.clone()));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }
}

/// Point-in-time queries and replay-on-subscribe streams over scheduler state.
///
/// Both read paths derive from the registry and the slots; nothing is cached
/// here. Subscribers register on the channel before reading the snapshot, so
/// a transition racing the subscription is delivered at least once.
///
/// Every stream ends once `shutdown` is cancelled.
#[derive(Clone)]
pub struct StatusBroadcaster {
    registry: Arc<TaskRegistry>,
    slots: Arc<SlotManager>,
    events: EventPublisher,
    scheduler_running: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl StatusBroadcaster {
    pub fn new(
        registry: Arc<TaskRegistry>,
        slots: Arc<SlotManager>,
        events: EventPublisher,
        scheduler_running: Arc<AtomicBool>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            slots,
            events,
            scheduler_running,
            shutdown,
        }
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let slots = self
            .slots
            .slots()
            .into_iter()
            .map(|slot| {
                let current_task = slot
                    .current_task_id
                    .and_then(|id| self.registry.get(id).ok())
                    .filter(|record| record.status.is_active());
                let last_task = self.registry.latest(slot.job_type);
                SlotSnapshot {
                    slot,
                    current_task,
                    last_task,
                }
            })
            .collect();

        SchedulerSnapshot {
            scheduler_running: self.scheduler_running.load(Ordering::Relaxed),
            generated_at: Utc::now(),
            slots,
        }
    }

    /// Snapshot first, then every subsequent event until the consumer drops
    /// the stream or the scheduler shuts down. A lagging consumer gets a
    /// fresh snapshot instead of the events it missed.
    pub fn subscribe(&self) -> impl Stream<Item = SchedulerEvent> + Send + 'static {
        let mut rx = self.events.subscribe();
        let initial = self.snapshot();
        let this = self.clone();
        let shutdown = self.shutdown.clone();

        async_stream::stream! {
            yield SchedulerEvent::Snapshot(initial);
            loop {
                let received = tokio::select! {
                    _ = shutdown.cancelled() => None,
                    received = rx.recv() => Some(received),
                };
                let Some(received) = received else {
                    debug!("Scheduler shutting down, closing subscriber stream");
                    break;
                };
                match received {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Scheduler subscriber lagged by {} events, resending snapshot", skipped);
                        yield SchedulerEvent::Snapshot(this.snapshot());
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Current record of `id` first, then each update of that record; the
    /// stream ends after the terminal state has been yielded, or on shutdown.
    pub fn subscribe_task(
        &self,
        id: TaskId,
    ) -> Result<impl Stream<Item = TaskRecord> + Send + 'static, AppError> {
        let mut rx = self.events.subscribe();
        let current = self.registry.get(id)?;
        let registry = self.registry.clone();
        let shutdown = self.shutdown.clone();

        Ok(async_stream::stream! {
            let finished = current.is_terminal();
            yield current;

            if !finished {
                loop {
                    let received = tokio::select! {
                        _ = shutdown.cancelled() => None,
                        received = rx.recv() => Some(received),
                    };
                    let Some(received) = received else {
                        break;
                    };
                    match received {
                        Ok(SchedulerEvent::Task(record)) if record.id == id => {
                            let finished = record.is_terminal();
                            yield record;
                            if finished {
                                break;
                            }
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(_)) => match registry.get(id) {
                            Ok(record) => {
                                let finished = record.is_terminal();
                                yield record;
                                if finished {
                                    break;
                                }
                            }
                            Err(_) => break,
                        },
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        })
    }
}
