//! Notifications of definition changes.
//!
//! Listeners are registered under a dispatch uid, and registering a second listener under the same uid replaces the
//! first, so code which connects on every startup path doesn't end up listening twice.  Listeners run after the change
//! has committed and after the connection is released, so they may call back into the facade.
use std::sync::{Arc, Mutex};

use log::*;

use crate::version::SchemaVersion;

/// A committed change to a model definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchemaEvent {
    ModelCreated {
        schema_id: i64,
        model_name: String,
        db_table: String,
    },
    ModelRenamed {
        schema_id: i64,
        old_model_name: String,
        model_name: String,
        db_table: String,
        version: SchemaVersion,
    },
    ModelDeleted {
        schema_id: i64,
        model_name: String,
        db_table: String,
    },
    FieldAdded {
        schema_id: i64,
        field_id: i64,
        column: String,
        version: SchemaVersion,
    },
    FieldAltered {
        schema_id: i64,
        field_id: i64,
        old_column: String,
        column: String,
        version: SchemaVersion,
    },
    FieldRemoved {
        schema_id: i64,
        field_id: i64,
        column: String,
        version: SchemaVersion,
    },
}

impl SchemaEvent {
    /// The model schema the event is about.
    pub fn schema_id(&self) -> i64 {
        match self {
            SchemaEvent::ModelCreated { schema_id, .. }
            | SchemaEvent::ModelRenamed { schema_id, .. }
            | SchemaEvent::ModelDeleted { schema_id, .. }
            | SchemaEvent::FieldAdded { schema_id, .. }
            | SchemaEvent::FieldAltered { schema_id, .. }
            | SchemaEvent::FieldRemoved { schema_id, .. } => *schema_id,
        }
    }
}

pub type Listener = Arc<dyn Fn(&SchemaEvent) + Send + Sync>;

#[derive(Default)]
pub struct Signals {
    listeners: Mutex<Vec<(String, Listener)>>,
}

impl Signals {
    pub fn new() -> Signals {
        Default::default()
    }

    /// Connect a listener under `dispatch_uid`, replacing any listener already there.
    pub fn connect(
        &self,
        dispatch_uid: impl Into<String>,
        listener: impl Fn(&SchemaEvent) + Send + Sync + 'static,
    ) {
        let dispatch_uid = dispatch_uid.into();
        let listener: Listener = Arc::new(listener);
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        match listeners.iter_mut().find(|(uid, _)| *uid == dispatch_uid) {
            Some(existing) => {
                debug!("Replacing listener {}", dispatch_uid);
                existing.1 = listener;
            }
            None => listeners.push((dispatch_uid, listener)),
        }
    }

    /// Returns whether there was a listener to disconnect.
    pub fn disconnect(&self, dispatch_uid: &str) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(uid, _)| uid != dispatch_uid);
        listeners.len() != before
    }

    /// Call every listener with `event`, in the order they were connected.
    pub fn send(&self, event: &SchemaEvent) {
        // Listeners may connect or disconnect, so don't hold the lock while calling them.
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| l.clone())
            .collect::<Vec<_>>();

        trace!("Sending {:?} to {} listeners", event, listeners.len());
        for listener in listeners {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event() -> SchemaEvent {
        SchemaEvent::ModelCreated {
            schema_id: 1,
            model_name: "SimpleModel".into(),
            db_table: "tests_simple_model".into(),
        }
    }

    #[test]
    fn test_send_reaches_listeners() {
        let signals = Signals::new();
        let seen = Arc::new(Mutex::new(vec![]));
        let s = seen.clone();
        signals.connect("record", move |e| s.lock().unwrap().push(e.clone()));
        signals.send(&event());
        assert_eq!(*seen.lock().unwrap(), vec![event()]);
    }

    #[test]
    fn test_dispatch_uid_replaces() {
        let signals = Signals::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = count.clone();
            signals.connect("counter", move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        signals.send(&event());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(signals.disconnect("counter"));
        assert!(!signals.disconnect("counter"));
        signals.send(&event());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_reconnect() {
        let signals = Arc::new(Signals::new());
        let inner = signals.clone();
        signals.connect("self", move |_| {
            inner.disconnect("self");
        });
        signals.send(&event());
        assert!(!signals.disconnect("self"));
        assert_eq!(event().schema_id(), 1);
    }
}
