//! In-process subscription hub.
//!
//! Listeners are kept as `Arc<dyn Fn>` so emission works on a snapshot:
//! a listener removed during delivery still sees the current event, one
//! added during delivery waits for the next. The lock is never held while a
//! listener runs.

use super::{ChangeNotifier, NotifyError, NotifyResult};
use crate::model::entity::ChangeEvent;
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type ListenerId = u64;

type ListenerFn = dyn Fn(&ChangeEvent) -> Result<(), String> + Send + Sync;

/// Which events a listener receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionScope {
    /// Every change in one collection path.
    Collection {
        path: String,
        database_id: Option<String>,
    },
    /// Changes of one entity.
    Entity {
        path: String,
        entity_id: String,
        database_id: Option<String>,
    },
}

impl SubscriptionScope {
    pub fn collection(path: impl Into<String>) -> Self {
        Self::Collection {
            path: path.into(),
            database_id: None,
        }
    }

    pub fn entity(path: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::Entity {
            path: path.into(),
            entity_id: entity_id.into(),
            database_id: None,
        }
    }

    fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            Self::Collection { path, database_id } => {
                *path == event.path && *database_id == event.database_id
            }
            Self::Entity {
                path,
                entity_id,
                database_id,
            } => {
                *path == event.path
                    && *entity_id == event.entity_id
                    && *database_id == event.database_id
            }
        }
    }
}

struct Subscription {
    id: ListenerId,
    scope: SubscriptionScope,
    callback: Arc<ListenerFn>,
}

/// Synchronous fan-out of change events to registered listeners.
pub struct SubscriptionHub {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a listener and returns its id.
    pub fn subscribe(
        &self,
        scope: SubscriptionScope,
        callback: impl Fn(&ChangeEvent) -> Result<(), String> + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.lock().push(Subscription {
            id,
            scope,
            callback: Arc::new(callback),
        });
        id
    }

    /// Removes a listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: ListenerId) {
        self.subscriptions.lock().retain(|sub| sub.id != id);
    }

    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.lock().is_empty()
    }
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeNotifier for SubscriptionHub {
    /// Delivers to every matching listener, then reports the first failure.
    fn notify(&self, event: &ChangeEvent) -> NotifyResult<()> {
        let matching: Vec<(ListenerId, Arc<ListenerFn>)> = {
            let guard = self.subscriptions.lock();
            guard
                .iter()
                .filter(|sub| sub.scope.matches(event))
                .map(|sub| (sub.id, Arc::clone(&sub.callback)))
                .collect()
        };

        debug!(
            "event=change_fanout module=notify status=start path={} listeners={}",
            event.path,
            matching.len()
        );

        let mut first_failure = None;
        for (id, callback) in matching {
            if let Err(message) = callback(event) {
                warn!(
                    "event=change_fanout module=notify status=error listener={} path={} error={}",
                    id, event.path, message
                );
                first_failure.get_or_insert(NotifyError::ListenerFailed {
                    listener: id,
                    message,
                });
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
