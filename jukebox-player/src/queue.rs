//! Request queue
//!
//! FIFO of waiting play requests with admission control. Producers append,
//! the queue worker removes from the head. The playing item is not counted
//! against the cap.

use crate::error::AdmissionError;
use crate::fetch::SourceLocator;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

/// A waiting play request
#[derive(Debug, Clone)]
pub struct Request {
    pub id: Uuid,
    pub locator: SourceLocator,
    pub requester: String,
    pub enqueued_at: DateTime<Utc>,
}

impl Request {
    pub fn new(locator: SourceLocator, requester: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            locator,
            requester: requester.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// Bounded FIFO of requests
pub struct RequestQueue {
    entries: Mutex<VecDeque<Request>>,
    notify: Notify,
    max_requests: usize,
}

impl RequestQueue {
    pub fn new(max_requests: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            max_requests,
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_requests
    }

    /// Append a request; returns its 1-based position
    pub fn push(&self, request: Request) -> Result<usize, AdmissionError> {
        let position = {
            let mut entries = self.lock();
            if entries.len() >= self.max_requests {
                return Err(AdmissionError::QueueFull {
                    capacity: self.max_requests,
                });
            }
            debug!("Enqueued {} from {}", request.locator, request.requester);
            entries.push_back(request);
            entries.len()
        };
        self.notify.notify_one();
        Ok(position)
    }

    pub fn pop_front(&self) -> Option<Request> {
        self.lock().pop_front()
    }

    /// Wait until the queue is non-empty or `timeout` elapses
    ///
    /// Returns true if an item is waiting.
    pub async fn wait_for_item(&self, timeout: Duration) -> bool {
        let notified = self.notify.notified();
        if !self.is_empty() {
            return true;
        }
        let _ = tokio::time::timeout(timeout, notified).await;
        !self.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Request> {
        self.lock().iter().cloned().collect()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.lock().iter().map(|r| r.id).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every waiting request; returns how many were removed
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let n = entries.len();
        entries.clear();
        n
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Request>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
