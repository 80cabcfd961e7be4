//! Segment completion progress
//!
//! Observers are called from worker tasks as segments finish, in completion
//! order. Each call carries a value from a shared atomic counter, so the
//! numbers a single job reports are strictly increasing when serialized.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receives `(completed, total)` after each successful segment
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, completed: usize, total: usize);
}

impl<F> ProgressObserver for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn on_progress(&self, completed: usize, total: usize) {
        self(completed, total)
    }
}

/// Progress update sent through a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub job_id: String,
    pub completed: usize,
    pub total: usize,
}

impl ProgressUpdate {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.completed as f64 / self.total as f64
    }
}

/// Forwards progress into an unbounded channel, tagged with a job id
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    job_id: String,
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ChannelObserver {
    pub fn new(job_id: impl Into<String>, tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self {
            job_id: job_id.into(),
            tx,
        }
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_progress(&self, completed: usize, total: usize) {
        // receiver gone means nobody is listening any more
        let _ = self.tx.send(ProgressUpdate {
            job_id: self.job_id.clone(),
            completed,
            total,
        });
    }
}

/// Completion counter shared by the tasks of one job
#[derive(Clone)]
pub struct ProgressCounter {
    completed: Arc<AtomicUsize>,
    total: usize,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl ProgressCounter {
    pub fn new(total: usize, observer: Option<Arc<dyn ProgressObserver>>) -> Self {
        Self {
            completed: Arc::new(AtomicUsize::new(0)),
            total,
            observer,
        }
    }

    /// Record one finished segment and notify the observer
    pub fn increment(&self) -> usize {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(observer) = &self.observer {
            observer.on_progress(completed, self.total);
        }
        completed
    }

    /// Jump straight to `completed`, used when an external tool did the work
    pub fn finish_all(&self, completed: usize) {
        self.completed.store(completed, Ordering::SeqCst);
        if let Some(observer) = &self.observer {
            observer.on_progress(completed, self.total);
        }
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}
