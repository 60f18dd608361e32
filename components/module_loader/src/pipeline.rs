//! The parallel parse pipeline.
//!
//! Workers pull jobs from the shared priority queue, read the source through
//! the resolver chain (the stream opens and closes inside the worker), run
//! the lexer and parser, and send a `ParseResult` back over a channel. Only
//! parsing is parallel; everything downstream is main-thread work.

use crate::queue::ParseQueue;
use crate::resolver::ResolverChain;
use compiler::ParsedModule;
use core_types::{codes, Diagnostic, DiagnosticKind};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// A worker's answer for one module.
#[derive(Debug)]
pub struct ParseResult {
    /// The parsed path.
    pub path: PathBuf,
    /// Source text plus the parsed module, or the failure diagnostic.
    pub result: Result<(String, ParsedModule), Diagnostic>,
    /// Wall time spent loading and parsing.
    pub duration: Duration,
}

/// A running pool of parse workers.
pub struct ParsePipeline {
    workers: Vec<JoinHandle<()>>,
    results: Receiver<ParseResult>,
    acks: Receiver<usize>,
    cancel: Arc<AtomicBool>,
    queue: Arc<ParseQueue>,
}

impl ParsePipeline {
    /// Spawns `worker_count` workers over the queue and chain.
    pub fn spawn(
        worker_count: usize,
        queue: Arc<ParseQueue>,
        chain: Arc<ResolverChain>,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let (results_tx, results_rx) = unbounded();
        let (acks_tx, acks_rx) = unbounded();
        let cancel = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let queue = queue.clone();
            let chain = chain.clone();
            let results_tx = results_tx.clone();
            let acks_tx = acks_tx.clone();
            let cancel = cancel.clone();
            workers.push(std::thread::spawn(move || {
                worker_loop(id, &queue, &chain, &results_tx, &cancel);
                let _ = acks_tx.send(id);
            }));
        }

        Self {
            workers,
            results: results_rx,
            acks: acks_rx,
            cancel,
            queue,
        }
    }

    /// Receives the next result, waiting up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ParseResult> {
        self.results.recv_timeout(timeout).ok()
    }

    /// Signals cancellation: in-flight parses finish but their results are
    /// discarded by the caller, and idle workers exit promptly.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.queue.close();
    }

    /// Closes the queue and waits up to `grace` for workers to acknowledge
    /// exit; stragglers are abandoned.
    pub fn shutdown(mut self, grace: Duration) {
        self.queue.close();
        let deadline = Instant::now() + grace;
        let mut acked = 0;
        while acked < self.workers.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::warn!(
                    "abandoning {} parse worker(s) after {:?} grace",
                    self.workers.len() - acked,
                    grace
                );
                return;
            }
            if self.acks.recv_timeout(remaining).is_ok() {
                acked += 1;
            }
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    id: usize,
    queue: &ParseQueue,
    chain: &ResolverChain,
    results: &Sender<ParseResult>,
    cancel: &AtomicBool,
) {
    while !cancel.load(Ordering::SeqCst) {
        let Some(job) = queue.pop_blocking() else {
            break;
        };
        if cancel.load(Ordering::SeqCst) {
            queue.complete(&job.path);
            break;
        }
        log::trace!("worker {} parsing {}", id, job.path.display());
        let started = Instant::now();
        let result = chain
            .load(&job.path, job.resolver)
            .map_err(|e| {
                Diagnostic::error(
                    codes::MODULE_LOAD,
                    DiagnosticKind::Module,
                    format!("failed to read module source: {}", e),
                )
                .with_path(job.path.clone())
            })
            .and_then(|source| {
                compiler::parse_module(&source)
                    .map(|parsed| (source, parsed))
                    .map_err(|d| {
                        if d.path.is_none() {
                            d.with_path(job.path.clone())
                        } else {
                            d
                        }
                    })
            });
        queue.complete(&job.path);
        let send_failed = results
            .send(ParseResult {
                path: job.path,
                result,
                duration: started.elapsed(),
            })
            .is_err();
        if send_failed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{MemoryResolver, Resolver};

    fn chain_with(files: &[(&str, &str)]) -> (Arc<ResolverChain>, Vec<PathBuf>) {
        let memory = Arc::new(MemoryResolver::new(5));
        let mut paths = Vec::new();
        for (name, source) in files {
            memory.add(*name, *source);
            paths.push(memory.resolve(name, None).unwrap().path);
        }
        let mut chain = ResolverChain::new();
        chain.add(memory);
        (Arc::new(chain), paths)
    }

    #[test]
    fn test_workers_parse_in_parallel_and_report() {
        let (chain, paths) = chain_with(&[
            ("a.ts", "export const a = 1;"),
            ("b.ts", "import { a } from \"a.ts\"; export const b = a + 1;"),
            ("c.ts", "let broken = ;"),
        ]);
        let queue = Arc::new(ParseQueue::new());
        for path in &paths {
            queue.push(path.clone(), "memory", 0);
        }
        let pipeline = ParsePipeline::spawn(3, queue.clone(), chain);

        let mut ok = 0;
        let mut failed = 0;
        for _ in 0..3 {
            let result = pipeline
                .recv_timeout(Duration::from_secs(5))
                .expect("result in time");
            match result.result {
                Ok((_, parsed)) => {
                    ok += 1;
                    if result.path.to_string_lossy().contains("b.ts") {
                        assert_eq!(parsed.imports.len(), 1);
                        assert_eq!(parsed.exports, vec!["b"]);
                    }
                }
                Err(diagnostic) => {
                    failed += 1;
                    assert_eq!(diagnostic.kind, DiagnosticKind::Syntax);
                }
            }
        }
        assert_eq!(ok, 2);
        assert_eq!(failed, 1);
        pipeline.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_shutdown_with_idle_workers() {
        let (chain, _) = chain_with(&[]);
        let queue = Arc::new(ParseQueue::new());
        let pipeline = ParsePipeline::spawn(4, queue, chain);
        // Workers are blocked on the queue; shutdown must not hang.
        pipeline.shutdown(Duration::from_secs(2));
    }

    #[test]
    fn test_cancel_discards_pending_work() {
        let (chain, paths) = chain_with(&[("a.ts", "export const a = 1;")]);
        let queue = Arc::new(ParseQueue::new());
        let pipeline = ParsePipeline::spawn(1, queue.clone(), chain);
        pipeline.cancel();
        // Pushed after cancel: queue is closed, job is refused.
        assert!(!queue.push(paths[0].clone(), "memory", 0));
        pipeline.shutdown(Duration::from_secs(1));
    }
}
