//! In-memory stand-in for a broker queue.
//!
//! Mirrors the parts of broker behaviour the dispatcher relies on: FIFO
//! delivery, a prefetch window that only reopens when a delivery is resolved,
//! and a record of how each delivery was resolved.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use maintenance_messaging::{AckError, Acknowledger, Delivery, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Resolution {
    Ack,
    Reject,
}

struct Inner {
    pending: Mutex<VecDeque<Message>>,
    ready: Notify,
    closed: AtomicBool,
    window: Arc<Semaphore>,
    next_tag: AtomicU64,
    outstanding: AtomicUsize,
    max_outstanding: AtomicUsize,
    resolutions: Mutex<Vec<(u64, Resolution)>>,
}

/// One queue with a fixed prefetch window.
#[derive(Clone)]
pub struct MemoryQueue {
    inner: Arc<Inner>,
}

impl MemoryQueue {
    pub fn with_prefetch(prefetch: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::default(),
                ready: Notify::new(),
                closed: AtomicBool::new(false),
                window: Arc::new(Semaphore::new(prefetch)),
                next_tag: AtomicU64::new(1),
                outstanding: AtomicUsize::new(0),
                max_outstanding: AtomicUsize::new(0),
                resolutions: Mutex::default(),
            }),
        }
    }

    /// Enqueue a message and return its delivery tag.
    pub fn publish(&self, body: &[u8], classification: Option<&str>) -> u64 {
        let tag = self.inner.next_tag.fetch_add(1, Ordering::SeqCst);
        let message = Message::new(body.to_vec(), classification.map(String::from), tag, false);
        self.inner.pending.lock().unwrap().push_back(message);
        self.inner.ready.notify_one();
        tag
    }

    /// End the subscription once the queue has been drained.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.ready.notify_one();
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }

    pub fn max_outstanding(&self) -> usize {
        self.inner.max_outstanding.load(Ordering::SeqCst)
    }

    /// Resolutions recorded so far, sorted by delivery tag.
    pub fn resolutions(&self) -> Vec<(u64, Resolution)> {
        let mut resolutions = self.inner.resolutions.lock().unwrap().clone();
        resolutions.sort();
        resolutions
    }

    /// Delivery stream as a consumer subscription would yield it.
    pub fn deliveries(&self) -> impl Stream<Item = Result<Delivery, String>> + Send + 'static {
        futures::stream::unfold(self.inner.clone(), |inner| async move {
            let permit = inner.window.clone().acquire_owned().await.ok()?;
            loop {
                let next = inner.pending.lock().unwrap().pop_front();
                if let Some(message) = next {
                    let outstanding = inner.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
                    inner.max_outstanding.fetch_max(outstanding, Ordering::SeqCst);
                    let acker = MemoryAcker {
                        tag: message.delivery_tag(),
                        inner: inner.clone(),
                        permit: Mutex::new(Some(permit)),
                    };
                    return Some((Ok(Delivery::new(message, acker)), inner));
                }
                if inner.closed.load(Ordering::SeqCst) {
                    return None;
                }
                inner.ready.notified().await;
            }
        })
    }
}

struct MemoryAcker {
    tag: u64,
    inner: Arc<Inner>,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl MemoryAcker {
    fn resolve(&self, resolution: Resolution) {
        self.inner
            .resolutions
            .lock()
            .unwrap()
            .push((self.tag, resolution));
        self.inner.outstanding.fetch_sub(1, Ordering::SeqCst);
        // Releasing the permit reopens one slot of the prefetch window.
        self.permit.lock().unwrap().take();
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), AckError> {
        self.resolve(Resolution::Ack);
        Ok(())
    }

    async fn reject(&self) -> Result<(), AckError> {
        self.resolve(Resolution::Reject);
        Ok(())
    }
}
