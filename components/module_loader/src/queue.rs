//! The parse job queue.
//!
//! A priority heap shared by the main loop (producer) and parse workers
//! (consumers). Lower priority numbers run first; ties go to the older job.
//! Jobs are deduplicated by resolved path across the scheduled, in-flight,
//! and completed sets.

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::path::{Path, PathBuf};

/// One unit of parse work.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ParseJob {
    /// Resolved path to parse.
    pub path: PathBuf,
    /// Name of the resolver that produced the path.
    pub resolver: &'static str,
    /// Scheduling priority; lower runs first.
    pub priority: u32,
    /// Enqueue sequence number; lower (older) wins ties.
    pub seq: u64,
}

impl Ord for ParseJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the smallest (priority, seq)
        // pair surfaces first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ParseJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct State {
    heap: BinaryHeap<ParseJob>,
    scheduled: HashSet<PathBuf>,
    in_flight: HashSet<PathBuf>,
    completed: HashSet<PathBuf>,
    closed: bool,
    seq: u64,
}

/// The shared queue.
#[derive(Debug, Default)]
pub struct ParseQueue {
    state: Mutex<State>,
    available: Condvar,
}

impl ParseQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a job unless the path was already scheduled, is being
    /// parsed, or has completed. Returns whether the job was accepted.
    pub fn push(&self, path: PathBuf, resolver: &'static str, priority: u32) -> bool {
        let mut state = self.state.lock();
        if state.closed
            || state.scheduled.contains(&path)
            || state.in_flight.contains(&path)
            || state.completed.contains(&path)
        {
            return false;
        }
        let seq = state.seq;
        state.seq += 1;
        state.scheduled.insert(path.clone());
        state.heap.push(ParseJob {
            path,
            resolver,
            priority,
            seq,
        });
        drop(state);
        self.available.notify_one();
        true
    }

    /// Blocks until a job is available or the queue closes. `None` means
    /// shut down.
    pub fn pop_blocking(&self) -> Option<ParseJob> {
        let mut state = self.state.lock();
        loop {
            if let Some(job) = state.heap.pop() {
                state.scheduled.remove(&job.path);
                state.in_flight.insert(job.path.clone());
                return Some(job);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Marks a job finished.
    pub fn complete(&self, path: &Path) {
        let mut state = self.state.lock();
        state.in_flight.remove(path);
        state.completed.insert(path.to_path_buf());
    }

    /// Closes the queue and wakes every waiting worker.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    /// Jobs queued or being parsed right now.
    pub fn pending(&self) -> usize {
        let state = self.state.lock();
        state.heap.len() + state.in_flight.len()
    }

    /// Paths that completed parsing.
    pub fn completed_count(&self) -> usize {
        self.state.lock().completed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_then_age_ordering() {
        let queue = ParseQueue::new();
        assert!(queue.push(PathBuf::from("/low"), "fs", 8));
        assert!(queue.push(PathBuf::from("/high"), "fs", 0));
        assert!(queue.push(PathBuf::from("/mid-old"), "fs", 4));
        assert!(queue.push(PathBuf::from("/mid-new"), "fs", 4));

        let order: Vec<PathBuf> = (0..4)
            .map(|_| queue.pop_blocking().expect("job").path)
            .collect();
        assert_eq!(
            order,
            vec![
                PathBuf::from("/high"),
                PathBuf::from("/mid-old"),
                PathBuf::from("/mid-new"),
                PathBuf::from("/low"),
            ]
        );
    }

    #[test]
    fn test_dedup_across_lifecycle() {
        let queue = ParseQueue::new();
        assert!(queue.push(PathBuf::from("/a"), "fs", 0));
        assert!(!queue.push(PathBuf::from("/a"), "fs", 0));
        let job = queue.pop_blocking().expect("job");
        // In flight: still deduplicated.
        assert!(!queue.push(PathBuf::from("/a"), "fs", 0));
        queue.complete(&job.path);
        // Completed: permanently deduplicated.
        assert!(!queue.push(PathBuf::from("/a"), "fs", 0));
        assert_eq!(queue.completed_count(), 1);
    }

    #[test]
    fn test_close_wakes_waiters() {
        let queue = std::sync::Arc::new(ParseQueue::new());
        let waiter = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.pop_blocking())
        };
        std::thread::sleep(std::time::Duration::from_millis(10));
        queue.close();
        assert!(waiter.join().expect("join").is_none());
    }

    #[test]
    fn test_pending_counts_queue_and_in_flight() {
        let queue = ParseQueue::new();
        queue.push(PathBuf::from("/a"), "fs", 0);
        queue.push(PathBuf::from("/b"), "fs", 0);
        assert_eq!(queue.pending(), 2);
        let job = queue.pop_blocking().expect("job");
        assert_eq!(queue.pending(), 2);
        queue.complete(&job.path);
        assert_eq!(queue.pending(), 1);
    }
}
