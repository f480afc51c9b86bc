//! Audit trail for resource operations
//!
//! Every committed mutation (and every `open`) produces an entry:
//! - bounded lock-free queue, the oldest entries are dropped when full
//! - optional background thread handing batches to a sink
//! - microsecond timestamps

use crate::core::ids::UserId;
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// What kind of record an entry refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Node,
    Role,
    Workspace,
}

/// Operation types for audit logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Open,
    Rename,
    UpdateProperties,
    Move,
    Copy,
    Delete,
    CreateShortcut,
    CreateRole,
    EditRole,
    RemoveRole,
    AssignRole,
    UnassignRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditEntry {
    /// Microsecond timestamp since UNIX epoch
    pub timestamp_us: u64,
    pub actor: UserId,
    pub operation: Operation,
    pub target: Target,
    pub target_id: i64,
}

impl AuditEntry {
    pub fn new(actor: UserId, operation: Operation, target: Target, target_id: i64) -> Self {
        let timestamp_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        AuditEntry {
            timestamp_us,
            actor,
            operation,
            target,
            target_id,
        }
    }
}

/// Audit logger with optional background flushing
pub struct AuditLogger {
    queue: Arc<ArrayQueue<AuditEntry>>,
    flush_thread: Option<JoinHandle<()>>,
    flush_interval: Duration,
    running: Arc<Mutex<bool>>,
}

impl AuditLogger {
    /// # Arguments
    /// * `capacity` - entries kept before the oldest are dropped
    /// * `flush_interval` - how often the background thread drains the queue
    pub fn new(capacity: usize, flush_interval: Duration) -> Self {
        AuditLogger {
            queue: Arc::new(ArrayQueue::new(capacity.max(1))),
            flush_thread: None,
            flush_interval,
            running: Arc::new(Mutex::new(false)),
        }
    }

    /// Start draining batches into `sink` on a background thread
    pub fn start<F>(&mut self, sink: F)
    where
        F: Fn(&[AuditEntry]) + Send + 'static,
    {
        *self.running.lock() = true;

        let queue = Arc::clone(&self.queue);
        let flush_interval = self.flush_interval;
        let running = Arc::clone(&self.running);

        let flush_thread = thread::spawn(move || loop {
            thread::sleep(flush_interval);
            let keep_going = *running.lock();

            let batch = drain_queue(&queue, usize::MAX);
            if !batch.is_empty() {
                sink(&batch);
            }

            if !keep_going {
                break;
            }
        });

        self.flush_thread = Some(flush_thread);
    }

    /// Stop the background thread after a final flush
    pub fn stop(&mut self) {
        *self.running.lock() = false;

        if let Some(thread) = self.flush_thread.take() {
            let _ = thread.join();
        }
    }

    /// Record an entry (non-blocking)
    pub fn log(&self, entry: AuditEntry) {
        self.queue.force_push(entry);
    }

    pub fn record(&self, actor: UserId, operation: Operation, target: Target, target_id: i64) {
        self.log(AuditEntry::new(actor, operation, target, target_id));
    }

    /// Take up to `max` pending entries, oldest first
    pub fn drain(&self, max: usize) -> Vec<AuditEntry> {
        drain_queue(&self.queue, max)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

fn drain_queue(queue: &ArrayQueue<AuditEntry>, max: usize) -> Vec<AuditEntry> {
    let mut batch = Vec::new();
    while batch.len() < max {
        match queue.pop() {
            Some(entry) => batch.push(entry),
            None => break,
        }
    }
    batch
}

impl Drop for AuditLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_entry_creation() {
        let entry = AuditEntry::new(UserId(1), Operation::Move, Target::Node, 42);

        assert_eq!(entry.actor, UserId(1));
        assert_eq!(entry.operation, Operation::Move);
        assert_eq!(entry.target, Target::Node);
        assert_eq!(entry.target_id, 42);
        assert!(entry.timestamp_us > 0);
    }

    #[test]
    fn test_drain_in_order() {
        let logger = AuditLogger::new(16, Duration::from_millis(100));
        logger.record(UserId(1), Operation::Create, Target::Node, 1);
        logger.record(UserId(1), Operation::Delete, Target::Node, 1);

        assert_eq!(logger.pending(), 2);
        let entries = logger.drain(10);
        assert_eq!(entries[0].operation, Operation::Create);
        assert_eq!(entries[1].operation, Operation::Delete);
        assert_eq!(logger.pending(), 0);
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let logger = AuditLogger::new(2, Duration::from_millis(100));
        for id in 0..5 {
            logger.record(UserId(1), Operation::Open, Target::Node, id);
        }

        let ids: Vec<i64> = logger.drain(10).iter().map(|e| e.target_id).collect();
        assert_eq!(ids, vec![3, 4]);
    }

    #[test]
    fn test_background_flush() {
        let mut logger = AuditLogger::new(1024, Duration::from_millis(20));
        let flushed = Arc::new(AtomicUsize::new(0));
        let flushed_clone = Arc::clone(&flushed);

        logger.start(move |entries| {
            flushed_clone.fetch_add(entries.len(), Ordering::SeqCst);
        });

        for id in 0..50 {
            logger.record(UserId(1), Operation::Create, Target::Node, id);
        }

        logger.stop();
        assert_eq!(flushed.load(Ordering::SeqCst), 50);
    }
}
