//! Pub/Sub event bus with deferred delivery.
//!
//! Architecture:
//! - emit() only queues; it never calls back into subscribers
//! - dispatch() delivers queued events to subscribers, FIFO per emission order
//! - poll() hands the same events to a main loop for batch processing
//!
//! Subscribers run after the emitting state transition has committed, so a
//! subscriber that emits again cannot re-enter the emitter. Events emitted
//! during dispatch() are delivered in a later round of the same call.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use log::warn;

/// Maximum events in poll queue before oldest are evicted
const MAX_QUEUE_SIZE: usize = 1000;

/// Upper bound on dispatch rounds (subscribers emitting from subscribers)
const MAX_DISPATCH_ROUNDS: usize = 16;

/// Marker trait for events. Events must be Send + Sync + 'static.
pub trait Event: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Shared event handle (delivery queue and poll queue hold the same Arc)
pub type BoxedEvent = Arc<dyn Event>;

#[derive(Default)]
struct Queues {
    /// Awaiting subscriber delivery
    pending: Vec<BoxedEvent>,
    /// Awaiting poll()
    polled: Vec<BoxedEvent>,
}

/// Pub/Sub event bus with deferred delivery.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<TypeId, Vec<Callback>>>>,
    queues: Arc<Mutex<Queues>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events of type E. Callback runs inside dispatch().
    pub fn subscribe<E, F>(&self, callback: F)
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let wrapped: Callback = Arc::new(move |any: &dyn Any| {
            if let Some(event) = any.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(TypeId::of::<E>())
            .or_default()
            .push(wrapped);
    }

    /// Queue event for dispatch() and poll()
    pub fn emit<E: Event>(&self, event: E) {
        push_event(&self.queues, Arc::new(event));
    }

    /// Deliver queued events to subscribers. Returns number delivered.
    pub fn dispatch(&self) -> usize {
        let mut delivered = 0;
        for _ in 0..MAX_DISPATCH_ROUNDS {
            let batch = std::mem::take(&mut self.queues.lock().unwrap_or_else(|e| e.into_inner()).pending);
            if batch.is_empty() {
                return delivered;
            }
            // Clone callbacks out so subscribers may subscribe/emit freely
            for event in batch {
                let cbs: Vec<Callback> = self
                    .subscribers
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .get(&(*event).as_any().type_id())
                    .cloned()
                    .unwrap_or_default();
                for cb in cbs {
                    cb((*event).as_any());
                }
                delivered += 1;
            }
        }
        warn!("EventBus dispatch stopped after {} rounds", MAX_DISPATCH_ROUNDS);
        delivered
    }

    /// Take all events emitted since last poll
    pub fn poll(&self) -> Vec<BoxedEvent> {
        std::mem::take(&mut self.queues.lock().unwrap_or_else(|e| e.into_inner()).polled)
    }

    /// Emit-only handle for components
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter {
            queues: Some(Arc::clone(&self.queues)),
        }
    }
}

/// Lightweight emit-only handle. `dummy()` drops everything.
#[derive(Clone, Default)]
pub struct EventEmitter {
    queues: Option<Arc<Mutex<Queues>>>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("connected", &self.queues.is_some())
            .finish()
    }
}

impl EventEmitter {
    /// No-op emitter (before a bus exists)
    pub fn dummy() -> Self {
        Self { queues: None }
    }

    pub fn emit<E: Event>(&self, event: E) {
        if let Some(queues) = &self.queues {
            push_event(queues, Arc::new(event));
        }
    }
}

fn push_event(queues: &Mutex<Queues>, event: BoxedEvent) {
    let mut q = queues.lock().unwrap_or_else(|e| e.into_inner());
    if q.polled.len() >= MAX_QUEUE_SIZE {
        let evict_count = q.polled.len() / 2;
        warn!("EventBus queue full ({} events), evicting oldest {}", q.polled.len(), evict_count);
        q.polled.drain(0..evict_count);
    }
    q.pending.push(Arc::clone(&event));
    q.polled.push(event);
}

/// Helper: downcast BoxedEvent to concrete type
///
/// Deref to `dyn Event` first: calling `as_any()` on the Arc itself would hit
/// the blanket impl for `Arc<dyn Event>` and the downcast would always fail.
#[inline]
pub fn downcast_event<E: Event>(event: &BoxedEvent) -> Option<&E> {
    (**event).as_any().downcast_ref::<E>()
}
