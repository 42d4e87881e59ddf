//! Change notification contract and in-process fan-out.
//!
//! # Responsibility
//! - Define the one-operation sink the repository calls after each committed
//!   save or delete.
//! - Provide `SubscriptionHub`, an in-process sink with path and entity
//!   subscriptions.
//!
//! # Invariants
//! - `notify` returns only after the event has been handed to every matching
//!   listener.
//! - A failed notification never rolls back the committed mutation.

mod hub;

pub use hub::{ListenerId, SubscriptionHub, SubscriptionScope};

use crate::model::entity::ChangeEvent;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type NotifyResult<T> = Result<T, NotifyError>;

/// Notification delivery failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// A subscriber reported an error while handling the event.
    ListenerFailed { listener: ListenerId, message: String },
    /// The sink refused the event (closed transport, shutdown, ...).
    Rejected(String),
}

impl Display for NotifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ListenerFailed { listener, message } => {
                write!(f, "change listener {listener} failed: {message}")
            }
            Self::Rejected(message) => write!(f, "change notification rejected: {message}"),
        }
    }
}

impl Error for NotifyError {}

/// Sink for post-mutation change events.
pub trait ChangeNotifier {
    fn notify(&self, event: &ChangeEvent) -> NotifyResult<()>;
}

impl<N: ChangeNotifier + ?Sized> ChangeNotifier for &N {
    fn notify(&self, event: &ChangeEvent) -> NotifyResult<()> {
        (**self).notify(event)
    }
}

impl<N: ChangeNotifier + ?Sized> ChangeNotifier for Arc<N> {
    fn notify(&self, event: &ChangeEvent) -> NotifyResult<()> {
        (**self).notify(event)
    }
}

/// What a save/delete reports when notification fails after commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyFailurePolicy {
    /// Log the failure and report the mutation as successful.
    #[default]
    BestEffort,
    /// Return `RepoError::Notify`; the mutation stays committed.
    Propagate,
}
