// Named-topic publish/subscribe registry
// Dispatch is synchronous and ordered; each topic has its own re-entrant lock so
// a handler can publish again from the same thread, while two threads publishing
// to the same topic take turns. Unrelated topics never contend.

use crate::error::{CoreError, Result};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// A topic name bound to the payload type every handler on it receives.
pub struct Topic<T> {
    name: Cow<'static, str>,
    _payload: PhantomData<fn(&T)>,
}

impl<T> Topic<T> {
    pub const fn fixed(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            _payload: PhantomData,
        }
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Topic").field(&self.name).finish()
    }
}

impl<T> AsRef<str> for Topic<T> {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

type Handler = Arc<dyn Fn(&dyn Any) -> anyhow::Result<()> + Send + Sync>;

struct Binding {
    name: Arc<str>,
    handler: Handler,
}

struct Slot {
    payload: TypeId,
    payload_name: &'static str,
    dispatching: ReentrantMutex<()>,
    bindings: RwLock<Vec<Binding>>,
}

#[derive(Default)]
pub struct EventBus {
    slots: RwLock<HashMap<String, Arc<Slot>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.slots.read().len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` under `(topic, handler_name)`. Re-registering the same pair
    /// swaps the handler in place, keeping its position in the dispatch order.
    pub fn register<T, F>(&self, topic: &Topic<T>, handler_name: &str, handler: F) -> Result<()>
    where
        T: 'static,
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if topic.name().is_empty() {
            return Err(CoreError::InvalidTopic);
        }

        let slot = self.slot_for::<T>(topic.name())?;
        let topic_name = topic.name().to_string();
        let handler: Handler = Arc::new(move |payload: &dyn Any| match payload.downcast_ref::<T>() {
            Some(payload) => handler(payload),
            None => Err(anyhow::anyhow!("payload type mismatch on '{}'", topic_name)),
        });

        let mut bindings = slot.bindings.write();
        if let Some(existing) = bindings.iter_mut().find(|b| &*b.name == handler_name) {
            existing.handler = handler;
            debug!("Replaced handler '{}' on '{}'", handler_name, topic.name());
        } else {
            bindings.push(Binding {
                name: Arc::from(handler_name),
                handler,
            });
            debug!("Registered handler '{}' on '{}'", handler_name, topic.name());
        }
        Ok(())
    }

    /// Remove a binding. Missing topics or names are fine.
    pub fn unregister(&self, topic: impl AsRef<str>, handler_name: &str) {
        let topic = topic.as_ref();
        let Some(slot) = self.slots.read().get(topic).cloned() else {
            return;
        };
        let mut bindings = slot.bindings.write();
        let before = bindings.len();
        bindings.retain(|b| &*b.name != handler_name);
        if bindings.len() != before {
            debug!("Unregistered handler '{}' from '{}'", handler_name, topic);
        }
    }

    /// Run every handler bound to `topic`, in registration order, on this thread.
    /// Failing or panicking handlers are logged and skipped; the caller never sees it.
    pub fn dispatch<T: 'static>(&self, topic: &Topic<T>, payload: T) {
        let Some(slot) = self.slots.read().get(topic.name()).cloned() else {
            trace!("No subscribers for '{}'", topic.name());
            return;
        };
        if slot.payload != TypeId::of::<T>() {
            warn!(
                "Dropped dispatch on '{}': topic carries {} but got {}",
                topic.name(),
                slot.payload_name,
                std::any::type_name::<T>()
            );
            return;
        }

        let _serial = slot.dispatching.lock();
        // copy the list so handlers can (un)register while we iterate
        let bindings: Vec<(Arc<str>, Handler)> = slot
            .bindings
            .read()
            .iter()
            .map(|b| (b.name.clone(), b.handler.clone()))
            .collect();

        for (name, handler) in bindings {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(&payload as &dyn Any))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Handler '{}' on '{}' failed: {:#}", name, topic.name(), e),
                Err(panic) => error!(
                    "Handler '{}' on '{}' panicked: {}",
                    name,
                    topic.name(),
                    panic_message(panic.as_ref())
                ),
            }
        }
    }

    pub fn handler_count(&self, topic: impl AsRef<str>) -> usize {
        self.slots
            .read()
            .get(topic.as_ref())
            .map(|slot| slot.bindings.read().len())
            .unwrap_or(0)
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.slots.read().keys().cloned().collect();
        topics.sort();
        topics
    }

    fn slot_for<T: 'static>(&self, name: &str) -> Result<Arc<Slot>> {
        if let Some(slot) = self.slots.read().get(name) {
            return Self::check_payload::<T>(name, slot);
        }
        let mut slots = self.slots.write();
        let slot = slots.entry(name.to_string()).or_insert_with(|| {
            Arc::new(Slot {
                payload: TypeId::of::<T>(),
                payload_name: std::any::type_name::<T>(),
                dispatching: ReentrantMutex::new(()),
                bindings: RwLock::new(Vec::new()),
            })
        });
        Self::check_payload::<T>(name, slot)
    }

    fn check_payload<T: 'static>(name: &str, slot: &Arc<Slot>) -> Result<Arc<Slot>> {
        if slot.payload == TypeId::of::<T>() {
            Ok(slot.clone())
        } else {
            Err(CoreError::PayloadMismatch {
                topic: name.to_string(),
            })
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Remembers every binding made through it so they can all be dropped at once.
/// Plugins get one of these; disabling the plugin releases it. Handler names are
/// bound as `<owner>.<name>`, so two owners never share a slot.
pub struct Registrations {
    bus: Arc<EventBus>,
    owner: String,
    entries: Mutex<Vec<(String, String)>>,
}

impl Registrations {
    pub fn new(bus: Arc<EventBus>, owner: impl Into<String>) -> Self {
        Self {
            bus,
            owner: owner.into(),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn register<T, F>(&self, topic: &Topic<T>, handler_name: &str, handler: F) -> Result<()>
    where
        T: 'static,
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let key = self.key(handler_name);
        self.bus.register(topic, &key, handler)?;
        let entry = (topic.name().to_string(), key);
        let mut entries = self.entries.lock();
        if !entries.contains(&entry) {
            entries.push(entry);
        }
        Ok(())
    }

    /// Name the handler is bound under on the bus
    pub fn key(&self, handler_name: &str) -> String {
        format!("{}.{}", self.owner, handler_name)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn release(&self) {
        let entries: Vec<_> = self.entries.lock().drain(..).collect();
        if !entries.is_empty() {
            debug!("Releasing {} handlers owned by '{}'", entries.len(), self.owner);
        }
        for (topic, name) in entries {
            self.bus.unregister(&topic, &name);
        }
    }
}

impl Drop for Registrations {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    const NUMBERS: Topic<u32> = Topic::fixed("test.numbers");

    #[test]
    fn test_register_rejects_empty_topic() {
        let bus = EventBus::new();
        let err = bus.register(&Topic::<u32>::new(""), "h", |_| Ok(())).unwrap_err();
        assert_eq!(err, CoreError::InvalidTopic);
    }

    #[test]
    fn test_reregister_replaces_without_duplicate_delivery() {
        let bus = EventBus::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = first.clone();
        bus.register(&NUMBERS, "counter", move |_| {
            f.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        let s = second.clone();
        bus.register(&NUMBERS, "counter", move |_| {
            s.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        bus.dispatch(&NUMBERS, 1);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(&NUMBERS), 1);
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            let seen = seen.clone();
            bus.register(&NUMBERS, name, move |n| {
                seen.lock().push(format!("{}{}", name, n));
                Ok(())
            })
            .unwrap();
        }
        // replacing "a" keeps it first
        let s = seen.clone();
        bus.register(&NUMBERS, "a", move |n| {
            s.lock().push(format!("A{}", n));
            Ok(())
        })
        .unwrap();

        bus.dispatch(&NUMBERS, 7);
        assert_eq!(*seen.lock(), vec!["A7", "b7", "c7"]);
    }

    #[test]
    fn test_failing_handlers_are_isolated() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicUsize::new(0));

        bus.register(&NUMBERS, "errors", |_| Err(anyhow::anyhow!("nope"))).unwrap();
        bus.register(&NUMBERS, "panics", |_| panic!("boom")).unwrap();
        let r = reached.clone();
        bus.register(&NUMBERS, "survivor", move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        bus.dispatch(&NUMBERS, 1);
        bus.dispatch(&NUMBERS, 2);
        assert_eq!(reached.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unregister_missing_is_noop() {
        let bus = EventBus::new();
        bus.unregister("nothing.here", "nobody");
        bus.unregister(&NUMBERS, "nobody");
        assert_eq!(bus.handler_count(&NUMBERS), 0);
    }

    #[test]
    fn test_payload_type_checked_at_registration() {
        let bus = EventBus::new();
        bus.register(&NUMBERS, "n", |_| Ok(())).unwrap();
        let wrong: Topic<String> = Topic::new("test.numbers");
        let err = bus.register(&wrong, "s", |_| Ok(())).unwrap_err();
        assert!(matches!(err, CoreError::PayloadMismatch { .. }));
        // a mistyped dispatch is dropped, not delivered
        bus.dispatch(&wrong, "oops".to_string());
    }

    #[test]
    fn test_reentrant_dispatch_same_topic() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner_bus = Arc::downgrade(&bus);
        let s = seen.clone();
        bus.register(&NUMBERS, "countdown", move |n| {
            s.lock().push(*n);
            if *n > 0 {
                if let Some(bus) = inner_bus.upgrade() {
                    bus.dispatch(&NUMBERS, n - 1);
                }
            }
            Ok(())
        })
        .unwrap();

        bus.dispatch(&NUMBERS, 3);
        assert_eq!(*seen.lock(), vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_same_topic_dispatches_never_interleave() {
        let bus = Arc::new(EventBus::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let (i, o) = (inside.clone(), overlaps.clone());
        bus.register(&NUMBERS, "slow", move |_| {
            if i.fetch_add(1, Ordering::SeqCst) != 0 {
                o.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(2));
            i.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let bus = bus.clone();
                thread::spawn(move || {
                    for n in 0..10 {
                        bus.dispatch(&NUMBERS, n);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_registrations_release_everything() {
        let bus = Arc::new(EventBus::new());
        let other: Topic<String> = Topic::new("test.other");
        let regs = Registrations::new(bus.clone(), "plugin.test");
        regs.register(&NUMBERS, "n", |_| Ok(())).unwrap();
        regs.register(&other, "s", |_| Ok(())).unwrap();
        regs.register(&other, "s", |_| Ok(())).unwrap();
        bus.register(&NUMBERS, "someone.else", |_| Ok(())).unwrap();
        assert_eq!(regs.len(), 2);
        assert_eq!(regs.key("n"), "plugin.test.n");

        regs.release();
        assert!(regs.is_empty());
        assert_eq!(bus.handler_count(&NUMBERS), 1);
        assert_eq!(bus.handler_count(&other), 0);
    }

    #[test]
    fn test_registrations_of_different_owners_do_not_collide() {
        let bus = Arc::new(EventBus::new());
        let first = Registrations::new(bus.clone(), "plugin.first");
        let second = Registrations::new(bus.clone(), "plugin.second");
        let hits = Arc::new(AtomicUsize::new(0));

        for regs in [&first, &second] {
            let hits = hits.clone();
            regs.register(&NUMBERS, "on_number", move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }
        assert_eq!(bus.handler_count(&NUMBERS), 2);

        first.release();
        assert_eq!(bus.handler_count(&NUMBERS), 1);
        bus.dispatch(&NUMBERS, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
