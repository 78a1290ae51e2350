//! Type-keyed publish/subscribe hub.
//!
//! Every message type gets its own topic, created on first use and kept for
//! the lifetime of the bus. Each subscription owns an unbounded queue and a
//! delivery task that calls the handler one message at a time, so a slow
//! handler only delays itself.
//!
//! ```text
//! publish(T) → topic<T> → queue per subscriber → delivery task → handler
//! ```

use futures::FutureExt;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

/// Anything that can travel over the bus.
pub trait Message: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Message for T {}

/// Published when a subscriber's handler fails and its delivery loop stops.
///
/// Also returned by [`Subscription::closed`].
#[derive(Debug, Clone, Error)]
#[error("subscription {subscription} for {message_type} stopped: {reason}")]
pub struct DeliveryFailed {
    pub subscription: u64,
    pub message_type: &'static str,
    pub reason: String,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Subscriber<T> {
    id: u64,
    sender: mpsc::UnboundedSender<T>,
}

struct Topic<T> {
    subscribers: Mutex<Vec<Subscriber<T>>>,
}

impl<T: Message> Topic<T> {
    fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn attach(&self, id: u64, sender: mpsc::UnboundedSender<T>) {
        lock(&self.subscribers).push(Subscriber { id, sender });
    }

    fn detach(&self, id: u64) {
        lock(&self.subscribers).retain(|s| s.id != id);
    }

    fn deliver(&self, message: T) -> usize {
        let mut subscribers = lock(&self.subscribers);
        // Closed queues belong to loops that already stopped.
        subscribers.retain(|s| s.sender.send(message.clone()).is_ok());
        subscribers.len()
    }
}

#[derive(Default)]
struct BusInner {
    topics: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    next_id: AtomicU64,
}

/// Cheaply cloneable handle to a shared bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic<T: Message>(&self) -> Arc<Topic<T>> {
        let entry = {
            let mut topics = lock(&self.inner.topics);
            topics
                .entry(TypeId::of::<T>())
                .or_insert_with(|| Arc::new(Topic::<T>::new()))
                .clone()
        };
        entry
            .downcast::<Topic<T>>()
            .expect("topic registered under a foreign type id")
    }

    /// Queue `message` for every active subscriber of `T`.
    ///
    /// Never blocks and never fails; with no subscribers the message is
    /// dropped.
    pub fn publish<T: Message>(&self, message: T) {
        let delivered = self.topic::<T>().deliver(message);
        trace!("Published {} to {} subscriber(s)", type_name::<T>(), delivered);
    }

    /// Register `handler` for messages of type `T`.
    ///
    /// Must be called from within a Tokio runtime; the delivery loop is a
    /// spawned task. Dropping the returned handle leaves the subscription
    /// running; call [`Subscription::unsubscribe`] to stop it.
    pub fn subscribe<T, F, Fut>(&self, handler: F) -> Subscription<T>
    where
        T: Message,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let topic = self.topic::<T>();
        let active = Arc::new(AtomicBool::new(true));
        let (sender, mut receiver) = mpsc::unbounded_channel::<T>();
        topic.attach(id, sender);

        debug!("Subscription {} registered for {}", id, type_name::<T>());

        let bus = self.clone();
        let loop_topic = topic.clone();
        let loop_active = active.clone();
        let task = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                if !loop_active.load(Ordering::Acquire) {
                    break;
                }

                let outcome = AssertUnwindSafe(async { handler(message).await })
                    .catch_unwind()
                    .await;
                let reason = match outcome {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => format!("{e:#}"),
                    Err(_) => "handler panicked".to_string(),
                };

                loop_topic.detach(id);
                loop_active.store(false, Ordering::Release);
                let failure = DeliveryFailed {
                    subscription: id,
                    message_type: type_name::<T>(),
                    reason,
                };
                error!("{}", failure);
                bus.publish(failure.clone());
                return Err(failure);
            }
            debug!("Subscription {} for {} drained", id, type_name::<T>());
            Ok(())
        });

        Subscription {
            id,
            active,
            topic,
            task,
        }
    }
}

/// Handle to one registered handler.
pub struct Subscription<T: Message> {
    id: u64,
    active: Arc<AtomicBool>,
    topic: Arc<Topic<T>>,
    task: JoinHandle<Result<(), DeliveryFailed>>,
}

impl<T: Message> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the handler will still receive new messages.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && !self.task.is_finished()
    }

    /// Stop delivering to this handler. A call already running completes;
    /// anything still queued is discarded.
    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::Release);
        self.topic.detach(self.id);
        debug!("Subscription {} for {} cancelled", self.id, type_name::<T>());
    }

    /// Wait for the delivery loop to end.
    ///
    /// Resolves to `Ok(())` after [`unsubscribe`](Self::unsubscribe) once the
    /// queue is drained, or to the failure that stopped the loop.
    pub async fn closed(self) -> Result<(), DeliveryFailed> {
        let id = self.id;
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(DeliveryFailed {
                subscription: id,
                message_type: type_name::<T>(),
                reason: e.to_string(),
            }),
        }
    }
}
