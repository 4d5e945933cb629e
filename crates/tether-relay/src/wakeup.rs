//! Long-poll wakeup registries.
//!
//! The store itself is poll-based; the relay layers wakeups on top so
//! HTTP long-polls return the moment the awaited write lands instead of
//! on their next poll tick. Two registries: one keyed by correlation id
//! (clients waiting for a terminal write) and one keyed by host id
//! (hosts waiting for work to arrive).

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct Wakeups {
    request_waiters: Arc<DashMap<String, Arc<Notify>>>,
    queue_waiters: Arc<DashMap<String, Arc<Notify>>>,
}

impl Wakeups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a client polls on while it waits for its request to turn
    /// terminal. Created on first use.
    pub fn request_handle(&self, client_id: &str) -> Arc<Notify> {
        self.request_waiters
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .value()
            .clone()
    }

    /// Handle a host polls on while its work queue is empty.
    pub fn queue_handle(&self, host_id: &str) -> Arc<Notify> {
        self.queue_waiters
            .entry(host_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .value()
            .clone()
    }

    /// Wake waiters blocked on a terminal write for `client_id`.
    pub fn wake_request(&self, client_id: &str) {
        if let Some(notify) = self.request_waiters.get(client_id) {
            notify.notify_waiters();
        }
    }

    /// Wake waiters blocked on new work for `host_id`.
    pub fn wake_queue(&self, host_id: &str) {
        if let Some(notify) = self.queue_waiters.get(host_id) {
            notify.notify_waiters();
        }
    }

    /// Drop the handle for an evicted request. Waiters that still hold
    /// the Arc observe the request gone on their next read.
    pub fn forget_request(&self, client_id: &str) {
        self.request_waiters.remove(client_id);
    }

    pub fn request_handle_count(&self) -> usize {
        self.request_waiters.len()
    }
}
