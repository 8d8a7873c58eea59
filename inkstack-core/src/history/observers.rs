//! Observer registry for [`HistoryEvent`]s.
//!
//! Callbacks are synchronous and run while the history is locked, so they see events in the
//! exact order they happened. Anything slow should be handed off (spawned, or sent into a
//! channel) rather than done inline.

use super::HistoryEvent;
use std::sync::Arc;

pub type ObserverID = crate::FuzzID<Subscription>;

type Callback = Arc<dyn Fn(&HistoryEvent) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`super::History::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Subscription {
    id: ObserverID,
}
impl Subscription {
    #[must_use]
    pub fn id(&self) -> ObserverID {
        self.id
    }
}

/// One observer's failure on one event.
#[derive(Debug)]
pub struct ObserverFailure {
    pub subscription: Subscription,
    /// Name of the event being delivered, eg. `"Affect"`.
    pub event: &'static str,
    pub error: anyhow::Error,
}

/// Every failure from delivering the events of one history operation.
///
/// The operation itself has already completed when this is reported.
#[derive(thiserror::Error, Debug)]
#[error("{} observer call(s) failed", .failures.len())]
pub struct ObserverErrors {
    /// Never empty.
    pub failures: Vec<ObserverFailure>,
}

#[derive(Default)]
pub(super) struct Observers {
    callbacks: parking_lot::RwLock<Vec<(Subscription, Callback)>>,
}
impl Observers {
    pub fn subscribe(
        &self,
        callback: impl Fn(&HistoryEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        let subscription = Subscription {
            id: ObserverID::default(),
        };
        self.callbacks
            .write()
            .push((subscription, Arc::new(callback)));
        subscription
    }
    /// Returns whether it was subscribed.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(sub, _)| *sub != subscription);
        callbacks.len() != before
    }
    pub fn clear(&self) {
        self.callbacks.write().clear();
    }
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }
    /// Deliver each event to every observer. A failing or panicking observer doesn't stop the
    /// rest from being called.
    pub fn emit(&self, events: &[HistoryEvent]) -> Result<(), ObserverErrors> {
        // Snapshot, so callbacks may (un)subscribe without deadlocking.
        let callbacks = self.callbacks.read().clone();
        let mut failures = Vec::new();
        for event in events {
            for (subscription, callback) in &callbacks {
                let result =
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(event)));
                let error = match result {
                    Ok(Ok(())) => continue,
                    Ok(Err(error)) => error,
                    Err(panic) => {
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(ToString::to_string)
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "<non-string panic>".to_owned());
                        anyhow::anyhow!("observer panicked: {message}")
                    }
                };
                let name: &'static str = event.into();
                log::warn!("observer {} failed on {name}: {error:#}", subscription.id);
                failures.push(ObserverFailure {
                    subscription: *subscription,
                    event: name,
                    error,
                });
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ObserverErrors { failures })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::history::CommandInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event() -> HistoryEvent {
        HistoryEvent::Undo(CommandInfo {
            id: crate::FuzzID::default(),
            name: "Test".into(),
        })
    }

    #[test]
    fn failures_are_collected() {
        let observers = Observers::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let failing = observers.subscribe(|_| anyhow::bail!("nope"));
        let panicking = observers.subscribe(|_| panic!("boom"));
        {
            let calls = calls.clone();
            observers.subscribe(move |_| {
                calls.fetch_add(1, Ordering::Relaxed);
                Ok(())
            });
        }
        let errors = observers.emit(&[event(), event()]).unwrap_err();
        // The healthy sibling still saw both.
        assert_eq!(calls.load(Ordering::Relaxed), 2);
        assert_eq!(errors.failures.len(), 4);
        assert_eq!(errors.failures[0].subscription, failing);
        assert_eq!(errors.failures[1].subscription, panicking);
        assert!(errors.failures[1].error.to_string().contains("boom"));
        assert_eq!(errors.failures[0].event, "Undo");
    }
    #[test]
    fn unsubscribe() {
        let observers = Observers::default();
        let sub = observers.subscribe(|_| anyhow::bail!("nope"));
        assert!(observers.unsubscribe(sub));
        assert!(!observers.unsubscribe(sub));
        assert_eq!(observers.len(), 0);
        observers.emit(&[event()]).unwrap();
    }
}
