//! Bounded admission for backend work.
//!
//! At most `max_concurrency` units of work run at once. Further callers wait
//! in FIFO order, up to `max_queue` of them; beyond that a caller is turned
//! away with [`AdmissionError::Busy`] without waiting or taking a slot.
//!
//! A running unit that exceeds the timeout is dropped, which cancels any
//! in-flight HTTP request it owns, and its slot is released. The running and
//! queued counters are held by guards so every exit path, including the
//! caller itself being cancelled, gives its place back.

use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::error::AdmissionError;

/// Point-in-time view of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionStats {
    pub running: usize,
    pub queued: usize,
    pub max_concurrency: usize,
    pub max_queue: usize,
}

pub struct AdmissionController {
    slots: Arc<Semaphore>,
    running: AtomicUsize,
    queued: AtomicUsize,
    max_concurrency: usize,
    max_queue: usize,
    timeout: Duration,
}

impl AdmissionController {
    pub fn new(max_concurrency: usize, max_queue: usize, timeout: Duration) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_concurrency)),
            running: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            max_concurrency,
            max_queue,
            timeout,
        }
    }

    pub fn from_config(config: &crate::config::AdmissionConfig) -> Self {
        Self::new(config.max_concurrency, config.max_queue, config.timeout())
    }

    /// Run `work` once a slot is free.
    pub async fn run<F, T, E>(&self, work: F) -> Result<T, AdmissionError>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let entered = Instant::now();

        let _permit = match self.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let reserved = self
                    .queued
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |q| {
                        (q < self.max_queue).then_some(q + 1)
                    });
                if reserved.is_err() {
                    tracing::warn!(
                        running = self.running.load(Ordering::SeqCst),
                        max_queue = self.max_queue,
                        "request rejected: queue full"
                    );
                    return Err(AdmissionError::Busy);
                }
                let _waiting = CounterGuard(&self.queued);
                self.slots
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| AdmissionError::Backend("admission closed".to_string()))?
            }
        };

        self.running.fetch_add(1, Ordering::SeqCst);
        let _running = CounterGuard(&self.running);
        tracing::debug!(
            waited_ms = entered.elapsed().as_millis() as u64,
            "request admitted"
        );

        match tokio::time::timeout(self.timeout, work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(AdmissionError::Backend(format!("{:#}", e))),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "request timed out"
                );
                Err(AdmissionError::Timeout(self.timeout))
            }
        }
    }

    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            running: self.running.load(Ordering::SeqCst),
            queued: self.queued.load(Ordering::SeqCst),
            max_concurrency: self.max_concurrency,
            max_queue: self.max_queue,
        }
    }
}

/// Decrements the counter it was created for when dropped.
struct CounterGuard<'a>(&'a AtomicUsize);

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
