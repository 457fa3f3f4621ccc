//! Command Queue
//!
//! Any thread submits boxed closures; the owner thread drains them with a
//! fixed per-tick budget. One shared queue gives a single global FIFO order.

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Deferred operation executed on the owner thread
pub type Command<T> = Box<dyn FnOnce(&mut T) + Send + 'static>;

// ═══════════════════════════════════════════════════════════════════════════════
// OWNER THREAD
// ═══════════════════════════════════════════════════════════════════════════════

/// Identity of the single thread allowed to mutate engine state
#[derive(Debug)]
pub struct OwnerThread {
    id: RwLock<ThreadId>,
}

impl OwnerThread {
    /// Bind to the calling thread
    pub fn current() -> Self {
        Self {
            id: RwLock::new(thread::current().id()),
        }
    }

    /// Rebind to the calling thread (after moving the owner)
    pub fn rebind(&self) {
        *self.id.write() = thread::current().id();
    }

    #[inline]
    pub fn is_current(&self) -> bool {
        *self.id.read() == thread::current().id()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SENDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Producer side; clone freely across threads
pub struct CommandSender<T> {
    tx: Sender<Command<T>>,
}

impl<T> Clone for CommandSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> CommandSender<T> {
    /// Enqueue a command; never blocks
    ///
    /// Returns `false` if the owner side is gone.
    pub fn submit(&self, command: impl FnOnce(&mut T) + Send + 'static) -> bool {
        if self.tx.send(Box::new(command)).is_err() {
            log::warn!("[CommandQueue] Owner dropped, command discarded");
            return false;
        }
        true
    }

    /// Commands waiting to be drained
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// QUEUE (owner side)
// ═══════════════════════════════════════════════════════════════════════════════

/// Consumer side, held by the owner thread
pub struct CommandQueue<T> {
    rx: Receiver<Command<T>>,
    owner: Arc<OwnerThread>,
}

impl<T> CommandQueue<T> {
    /// Create a queue owned by the calling thread
    pub fn new() -> (CommandSender<T>, Self) {
        let (tx, rx) = unbounded();
        (
            CommandSender { tx },
            Self {
                rx,
                owner: Arc::new(OwnerThread::current()),
            },
        )
    }

    pub fn owner(&self) -> &Arc<OwnerThread> {
        &self.owner
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Pop up to `max_count` commands without running them
    ///
    /// Split from execution so the target can be borrowed mutably while
    /// the queue itself lives inside it.
    pub fn take(&self, max_count: usize) -> Vec<Command<T>> {
        debug_assert!(self.owner.is_current(), "command queue drained off the owner thread");

        let mut batch = Vec::with_capacity(max_count.min(self.rx.len()));
        while batch.len() < max_count {
            match self.rx.try_recv() {
                Ok(command) => batch.push(command),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        batch
    }

    /// Run up to `max_count` commands against `target`, in FIFO order
    pub fn drain(&self, target: &mut T, max_count: usize) -> usize {
        let batch = self.take(max_count);
        let count = batch.len();
        for command in batch {
            command(target);
        }
        count
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_leaves_rest_queued() {
        let (tx, queue) = CommandQueue::<Vec<u32>>::new();
        for i in 0..25 {
            tx.submit(move |log: &mut Vec<u32>| log.push(i));
        }

        let mut log = Vec::new();
        assert_eq!(queue.drain(&mut log, 10), 10);
        assert_eq!(queue.pending(), 15);
        assert_eq!(queue.drain(&mut log, 10), 10);
        assert_eq!(queue.drain(&mut log, 10), 5);
        assert_eq!(queue.drain(&mut log, 10), 0);
        assert_eq!(log, (0..25).collect::<Vec<_>>());
    }

    #[test]
    fn test_fifo_across_threads() {
        let (tx, queue) = CommandQueue::<Vec<char>>::new();
        let producer = tx.clone();
        thread::spawn(move || {
            for c in ['A', 'B', 'C'] {
                producer.submit(move |log: &mut Vec<char>| log.push(c));
            }
        })
        .join()
        .unwrap();

        let mut log = Vec::new();
        while queue.drain(&mut log, 1) > 0 {}
        assert_eq!(log, vec!['A', 'B', 'C']);
    }

    #[test]
    fn test_owner_thread_detection() {
        let owner = Arc::new(OwnerThread::current());
        assert!(owner.is_current());

        let remote = Arc::clone(&owner);
        let seen = thread::spawn(move || remote.is_current()).join().unwrap();
        assert!(!seen);

        let remote = Arc::clone(&owner);
        thread::spawn(move || remote.rebind()).join().unwrap();
        assert!(!owner.is_current());
    }

    #[test]
    fn test_submit_after_owner_dropped() {
        let (tx, queue) = CommandQueue::<()>::new();
        drop(queue);
        assert!(!tx.submit(|_| {}));
    }
}
