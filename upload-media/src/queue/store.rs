//! Single source of truth for the queue.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::item::{ItemStatus, QueueItem, QueueItemId, TranscodingType};
use super::reducer::{Action, State, reduce};
use crate::Result;

/// Change notifications for observers of the whole queue (UIs, tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Added {
        id: QueueItemId,
    },
    StatusChanged {
        id: QueueItemId,
        status: ItemStatus,
        /// Plan step being run, set while `Transcoding`.
        step: Option<TranscodingType>,
    },
    /// Item data changed without a status change (e.g. poster attached).
    Updated {
        id: QueueItemId,
    },
    Removed {
        id: QueueItemId,
    },
    TablesChanged,
}

/// Holds the [`State`] and applies actions through [`reduce`].
///
/// The lock is only held for the duration of one reducer application and
/// the event broadcast, never across an `.await`.
pub struct QueueStore {
    state: RwLock<State>,
    event_tx: broadcast::Sender<QueueEvent>,
}

impl QueueStore {
    pub fn new(event_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity.max(1));
        Self {
            state: RwLock::new(State::default()),
            event_tx,
        }
    }

    /// Apply `action`. Events are sent under the lock so observers see them in order.
    pub fn dispatch(&self, action: Action) -> Result<()> {
        let id = action.item_id();
        let kind = ActionKind::of(&action);

        let mut state = self.state.write();
        let next = reduce(&state, action)?;

        let event = match (kind, id) {
            (ActionKind::Add, Some(id)) => QueueEvent::Added { id },
            (ActionKind::Remove, Some(id)) => QueueEvent::Removed { id },
            (ActionKind::Tables, _) | (_, None) => QueueEvent::TablesChanged,
            (ActionKind::Update, Some(id)) => match next.get_item(id) {
                Some(item) if Some(item.status) != state.get_item(id).map(|i| i.status) => {
                    QueueEvent::StatusChanged {
                        id,
                        status: item.status,
                        step: (item.status == ItemStatus::Transcoding)
                            .then(|| item.current_step())
                            .flatten(),
                    }
                }
                _ => QueueEvent::Updated { id },
            },
        };

        *state = next;
        trace!(?event, "Queue event");
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
        Ok(())
    }

    /// Cheap copy of the current state.
    pub fn snapshot(&self) -> State {
        self.state.read().clone()
    }

    pub fn get_item(&self, id: QueueItemId) -> Option<Arc<QueueItem>> {
        self.state.read().get_item(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.state.read().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every item; used when the owning queue shuts down.
    pub fn clear(&self) {
        let mut state = self.state.write();
        debug!(count = state.queue.len(), "Clearing upload queue");
        for item in state.queue.drain(..) {
            let _ = self.event_tx.send(QueueEvent::Removed { id: item.id });
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ActionKind {
    Add,
    Remove,
    Tables,
    Update,
}

impl ActionKind {
    fn of(action: &Action) -> Self {
        match action {
            Action::Add(_) => ActionKind::Add,
            Action::Remove(_) => ActionKind::Remove,
            Action::SetMediaSourceTerms(_) | Action::SetImageSizes(_) => ActionKind::Tables,
            _ => ActionKind::Update,
        }
    }
}
