//! Synchronous publish/subscribe bus shared by the realtime components.
//!
//! Subscriptions are keyed by event name. Persistent handlers fire on every
//! dispatch; one-shot handlers fire on the next dispatch only. For a single
//! name, persistent handlers always run before one-shot handlers, each group
//! in registration order.
//!
//! # Example
//!
//! ```rust
//! use waav_realtime::core::event_bus::EventBus;
//!
//! let bus: EventBus<u32> = EventBus::new();
//! bus.on("tick", |n: &u32| println!("tick {n}"));
//! bus.on_next("tick", |n: &u32| println!("first tick only: {n}"));
//! bus.dispatch("tick", &1);
//! bus.dispatch("tick", &2);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

/// Identifier returned by every subscription, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors raised when managing subscriptions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ListenerError {
    /// The listener was never registered for this name, or already removed
    #[error("Listener {id} is not registered for \"{name}\"")]
    NotFound { name: String, id: ListenerId },
}

type Handler<P> = Arc<dyn Fn(&P) + Send + Sync>;
type HandlerTable<P> = HashMap<String, Vec<(ListenerId, Handler<P>)>>;

struct Subscribers<P> {
    persistent: HandlerTable<P>,
    next: HandlerTable<P>,
}

struct BusInner<P> {
    subscribers: Mutex<Subscribers<P>>,
    next_id: AtomicU64,
}

/// Named-event bus with persistent and one-shot subscriptions.
///
/// Cloning an `EventBus` yields another handle to the same subscriber
/// tables. Handler tables are never locked while handlers run, so handlers
/// may subscribe, unsubscribe or dispatch from inside a dispatch.
pub struct EventBus<P> {
    inner: Arc<BusInner<P>>,
}

impl<P> Clone for EventBus<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P> Default for EventBus<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subs = self.inner.subscribers.lock();
        f.debug_struct("EventBus")
            .field("persistent", &subs.persistent.keys().collect::<Vec<_>>())
            .field("next", &subs.next.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<P> EventBus<P>
where
    P: Clone + Send + Sync + 'static,
{
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Subscribers {
                    persistent: HashMap::new(),
                    next: HashMap::new(),
                }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    fn allocate_id(&self) -> ListenerId {
        ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Subscribe `handler` to every dispatch of `name`.
    pub fn on<F>(&self, name: impl Into<String>, handler: F) -> ListenerId
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.inner
            .subscribers
            .lock()
            .persistent
            .entry(name.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Subscribe `handler` to the next dispatch of `name` only.
    pub fn on_next<F>(&self, name: impl Into<String>, handler: F) -> ListenerId
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.inner
            .subscribers
            .lock()
            .next
            .entry(name.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a persistent subscription, or all of them for `name` when `id`
    /// is `None`.
    pub fn off(&self, name: &str, id: Option<ListenerId>) -> Result<(), ListenerError> {
        let mut subs = self.inner.subscribers.lock();
        remove_listener(&mut subs.persistent, name, id)
    }

    /// Remove a one-shot subscription, or all of them for `name` when `id`
    /// is `None`.
    pub fn off_next(&self, name: &str, id: Option<ListenerId>) -> Result<(), ListenerError> {
        let mut subs = self.inner.subscribers.lock();
        remove_listener(&mut subs.next, name, id)
    }

    /// Drop every subscription on this bus.
    pub fn clear(&self) {
        let mut subs = self.inner.subscribers.lock();
        subs.persistent.clear();
        subs.next.clear();
    }

    /// Number of handlers (persistent and one-shot) currently registered for `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        let subs = self.inner.subscribers.lock();
        subs.persistent.get(name).map_or(0, Vec::len) + subs.next.get(name).map_or(0, Vec::len)
    }

    /// Deliver `payload` to every handler subscribed to `name`.
    ///
    /// A panicking handler is logged and skipped; its siblings still run.
    pub fn dispatch(&self, name: &str, payload: &P) {
        let persistent: Vec<Handler<P>> = {
            let subs = self.inner.subscribers.lock();
            subs.persistent
                .get(name)
                .map(|handlers| handlers.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        for handler in &persistent {
            invoke(name, handler, payload);
        }

        let next = self.inner.subscribers.lock().next.remove(name);
        if let Some(next) = next {
            for (_, handler) in &next {
                invoke(name, handler, payload);
            }
        }
    }

    /// Wait for the next dispatch of `name` and return its payload.
    ///
    /// Returns `None` when `timeout` elapses first. Without a timeout the
    /// call waits until the event fires or the subscription is cleared.
    /// Dropping the future unsubscribes its one-shot handler.
    pub async fn wait_for_next(&self, name: &str, timeout: Option<Duration>) -> Option<P> {
        let (tx, rx) = oneshot::channel::<P>();
        let tx = Mutex::new(Some(tx));
        let id = self.on_next(name, move |payload: &P| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(payload.clone());
            }
        });
        let _pending = PendingNext {
            bus: self,
            name,
            id,
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, rx).await.ok()?.ok(),
            None => rx.await.ok(),
        }
    }
}

/// Removes a `wait_for_next` subscription when the waiter goes away.
struct PendingNext<'a, P>
where
    P: Clone + Send + Sync + 'static,
{
    bus: &'a EventBus<P>,
    name: &'a str,
    id: ListenerId,
}

impl<P> Drop for PendingNext<'_, P>
where
    P: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Already gone once the event fired
        let _ = self.bus.off_next(self.name, Some(self.id));
    }
}

fn remove_listener<P>(
    table: &mut HandlerTable<P>,
    name: &str,
    id: Option<ListenerId>,
) -> Result<(), ListenerError> {
    let Some(id) = id else {
        table.remove(name);
        return Ok(());
    };

    let not_found = || ListenerError::NotFound {
        name: name.to_string(),
        id,
    };
    let handlers = table.get_mut(name).ok_or_else(not_found)?;
    let position = handlers
        .iter()
        .position(|(listener, _)| *listener == id)
        .ok_or_else(not_found)?;
    handlers.remove(position);
    if handlers.is_empty() {
        table.remove(name);
    }
    Ok(())
}

fn invoke<P>(name: &str, handler: &Handler<P>, payload: &P) {
    if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
        tracing::error!("Handler for \"{}\" panicked; continuing dispatch", name);
    }
}
