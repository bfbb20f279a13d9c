//! Lazy-SMP search parallelization: N worker threads share one
//! transposition table behind an `Arc` and search the same root position
//! independently, diverging via per-worker depth offsets and thread-seeded
//! move-ordering randomness. The main thread (worker 0) is authoritative
//! for the reported result.

use crate::basetypes::*;
use crate::chess_move::Move;
use crate::eval::Evaluator;
use crate::position::Position;
use crate::search::{search_iterative, SearchContext};
use crate::tt::Tt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

/// A command sent from the pool to one worker thread.
pub enum Command {
    Search {
        search_id: usize,
        position: Position,
        depth: i32,
        lower_bound: i32,
        upper_bound: i32,
    },
    Stop,
    Exit,
}

/// A progress or final report sent from a worker back to the pool. Sent
/// once per completed depth (`done: false`) and once more when the worker's
/// whole iterative-deepening run ends (`done: true`).
pub struct Report {
    pub search_id: usize,
    /// Which worker this came from; worker 0 is the main thread the pool's
    /// driver treats as authoritative when aggregating peers' reports.
    pub worker_id: usize,
    pub searched_nodes: u64,
    pub depth: i32,
    pub value: i32,
    pub best_moves: Vec<Move>,
    pub done: bool,
}

/// One worker's channel handles and join handle, owned by the pool.
struct Worker {
    commands: Sender<Command>,
    handle: Option<thread::JoinHandle<()>>,
}

/// Runs in a dedicated thread: waits for `Command::Search`, runs iterative
/// deepening to the requested depth with the given aspiration bounds,
/// reports progress, and answers `Stop`/`Exit`. `stop` is shared with the
/// pool (and every other worker) behind one `Arc`, so `ThreadPool::stop`
/// can interrupt a search already in progress by setting the flag directly
/// from the caller's thread -- routing the interrupt through `commands`
/// instead would not help, since a worker blocked inside `search_iterative`
/// only reads the next command after that call returns.
fn serve(worker_id: usize, tt: Arc<Tt>, evaluator: Evaluator, stop: Arc<AtomicBool>, commands: Receiver<Command>, reports: Sender<Report>) {
    loop {
        let command = commands.recv().or::<RecvError>(Ok(Command::Exit)).unwrap();
        match command {
            Command::Search { search_id, mut position, depth, lower_bound, upper_bound } => {
                let mut ctx = SearchContext::new(&tt, &evaluator, &stop);
                // Worker depth offsets diversify the search tree across
                // peers sharing one TT: worker 0 (main) always searches the
                // requested depth exactly; others drift by +/- 1 ply.
                let worker_depth = (depth + (worker_id as i32 % 3) - 1).max(1);
                let (value, best_move) = search_iterative(&mut ctx, &mut position, worker_depth, |d, v, m, nodes| {
                    reports
                        .send(Report {
                            search_id,
                            worker_id,
                            searched_nodes: nodes,
                            depth: d,
                            value: v.clamp(lower_bound, upper_bound),
                            best_moves: m.into_iter().collect(),
                            done: false,
                        })
                        .ok();
                });
                let value = value.clamp(lower_bound, upper_bound);
                reports
                    .send(Report {
                        search_id,
                        worker_id,
                        searched_nodes: ctx.nodes.load(Ordering::Relaxed),
                        depth: worker_depth,
                        value,
                        best_moves: best_move.into_iter().collect(),
                        done: true,
                    })
                    .ok();
            }
            Command::Stop => continue,
            Command::Exit => return,
        }
    }
}

/// A fixed-size pool of Lazy-SMP search workers sharing one transposition
/// table.
pub struct ThreadPool {
    tt: Arc<Tt>,
    workers: Vec<Worker>,
    reports_rx: Arc<Mutex<Receiver<Report>>>,
    next_search_id: usize,
    /// Shared by every worker. Set directly by `stop()` from the caller's
    /// thread, not routed through `commands`, so it takes effect the next
    /// time a worker's hot loop polls it rather than only after the
    /// worker's current blocking call returns.
    stop: Arc<AtomicBool>,
}

impl ThreadPool {
    /// Spawns `thread_count` workers, each with its own `Evaluator` built
    /// from `evaluator_factory` (cheap: no shared mutable evaluator state).
    pub fn new(thread_count: usize, tt_size_mb: usize, evaluator_factory: impl Fn() -> Evaluator) -> ThreadPool {
        let tt = Arc::new(Tt::new(tt_size_mb));
        let (reports_tx, reports_rx) = channel();
        let stop = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(thread_count.max(1));
        for worker_id in 0..thread_count.max(1) {
            let (commands_tx, commands_rx) = channel();
            let tt_handle = Arc::clone(&tt);
            let stop_handle = Arc::clone(&stop);
            let evaluator = evaluator_factory();
            let reports_tx = reports_tx.clone();
            let handle = thread::spawn(move || serve(worker_id, tt_handle, evaluator, stop_handle, commands_rx, reports_tx));
            workers.push(Worker { commands: commands_tx, handle: Some(handle) });
        }
        ThreadPool { tt, workers, reports_rx: Arc::new(Mutex::new(reports_rx)), next_search_id: 0, stop }
    }

    pub fn tt(&self) -> &Arc<Tt> {
        &self.tt
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Returns a cloneable handle onto the report channel, so a driver
    /// running on its own thread can consume reports without holding a
    /// borrow of the pool itself.
    pub fn clone_report_channel(&self) -> Arc<Mutex<Receiver<Report>>> {
        Arc::clone(&self.reports_rx)
    }

    /// Starts a new search across every worker, each receiving a fresh copy
    /// of `position`.
    pub fn begin_search(&mut self, position: &Position, depth: i32, lower_bound: i32, upper_bound: i32) -> usize {
        self.tt.new_search();
        self.stop.store(false, Ordering::Release);
        let search_id = self.next_search_id;
        self.next_search_id += 1;
        for worker in &self.workers {
            worker
                .commands
                .send(Command::Search {
                    search_id,
                    position: position.clone(),
                    depth,
                    lower_bound,
                    upper_bound,
                })
                .ok();
        }
        search_id
    }

    /// Interrupts any in-progress search. Sets the shared flag first, so
    /// every worker's next `ctx.stop.load` inside `alpha_beta`/`quiescence`
    /// observes it immediately, then sends `Command::Stop` so an idle
    /// worker waiting on `commands.recv()` doesn't block on the next real
    /// command.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        for worker in &self.workers {
            worker.commands.send(Command::Stop).ok();
        }
    }

    /// Blocks for the next `Report` from any worker.
    pub fn recv_report(&self) -> Result<Report, std::sync::mpsc::RecvError> {
        self.reports_rx.lock().unwrap().recv()
    }

    pub fn try_recv_report(&self) -> Result<Report, std::sync::mpsc::TryRecvError> {
        self.reports_rx.lock().unwrap().try_recv()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.commands.send(Command::Exit).ok();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                handle.join().ok();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Weights;

    #[test]
    fn test_pool_reports_a_move_for_start_position() {
        let mut pool = ThreadPool::new(2, 1, || Evaluator::new(Weights::default()));
        let pos = Position::start_position();
        pool.begin_search(&pos, 3, -MATE_SCORE, MATE_SCORE);
        let mut saw_done = false;
        for _ in 0..32 {
            if let Ok(report) = pool.recv_report() {
                if report.done {
                    assert!(!report.best_moves.is_empty());
                    saw_done = true;
                    break;
                }
            }
        }
        assert!(saw_done, "expected at least one worker to report completion");
        pool.stop();
    }

    #[test]
    fn test_pool_shares_one_transposition_table() {
        let pool = ThreadPool::new(3, 1, || Evaluator::new(Weights::default()));
        assert_eq!(Arc::strong_count(pool.tt()), 4); // 3 workers + the pool's own handle
    }
}
