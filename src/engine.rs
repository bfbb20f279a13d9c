//! The top-level driver a UCI-style front end embeds: owns the position,
//! the Lazy-SMP thread pool, and an optional opening book and tablebase
//! oracle, and turns a `begin_search` call into a stream of [`SearchInfo`]
//! progress reports delivered through a caller-supplied callback.

use crate::book::{PolyglotBook, SelectionPolicy};
use crate::chess_move::{Move, MoveList};
use crate::eval::{Evaluator, Weights};
use crate::position::movegen::generate_legal_moves;
use crate::position::Position;
use crate::search::threading::ThreadPool;
use crate::search::{search_iterative, SearchContext, MAX_DEPTH};
use crate::tablebase::{NullOracle, TablebaseOracle};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvError;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

/// Construction-time engine configuration. Mirrors the UCI options a front
/// end would expose (`Hash`, `Threads`, `Contempt`, `MultiPV`, the NNUE file
/// path) as a plain struct so a front end can build one from its own option
/// table without depending on this crate's wire protocol.
#[derive(Clone)]
pub struct EngineOptions {
    pub hash_mb: usize,
    pub threads: usize,
    pub contempt: i32,
    pub multipv: usize,
    pub nnue_path: Option<String>,
    pub book_path: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> EngineOptions {
        EngineOptions { hash_mb: 16, threads: 1, contempt: 0, multipv: 1, nnue_path: None, book_path: None }
    }
}

/// Caller-visible bounds on a search: a depth limit, a node limit, or both.
/// `None` means "no limit on that dimension."
#[derive(Clone, Copy, Default)]
pub struct SearchLimits {
    pub depth: Option<i32>,
    pub nodes: Option<u64>,
    pub move_time_ms: Option<u64>,
}

/// One progress update emitted while a search runs, and the final record
/// left behind after it finishes.
#[derive(Clone)]
pub struct SearchInfo {
    pub depth: i32,
    pub seldepth: i32,
    pub score_cp: i32,
    pub nodes: u64,
    pub nps: u64,
    pub time_ms: u64,
    pub pv: Vec<Move>,
    pub hashfull: u32,
    /// 0 for the primary line, 1 for the second-best, and so on. Always 0
    /// unless `EngineOptions::multipv` asked for more than one line.
    pub multipv_rank: usize,
}

fn build_evaluator(options: &EngineOptions) -> Evaluator {
    let mut weights = Weights::default();
    weights.contempt = options.contempt;
    let mut evaluator = Evaluator::new(weights);
    if let Some(path) = &options.nnue_path {
        if let Err(e) = evaluator.load_nnue(path) {
            warn!("failed to load NNUE network from {path}: {e}, falling back to classical evaluation");
        }
    }
    evaluator
}

/// Owns one game's worth of engine state. Not `Clone`: a front end holds
/// exactly one `Engine` per running game/analysis session.
pub struct Engine {
    pool: ThreadPool,
    position: Position,
    options: EngineOptions,
    book: Option<PolyglotBook>,
    tablebase: Arc<dyn TablebaseOracle>,
    last_result: Arc<Mutex<Option<SearchInfo>>>,
    search_handle: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Engine {
        let book = options.book_path.as_deref().and_then(|path| match PolyglotBook::open(path) {
            Ok(book) => Some(book),
            Err(e) => {
                warn!("failed to load opening book from {path}: {e}, continuing without a book");
                None
            }
        });
        let opts_for_pool = options.clone();
        let pool = ThreadPool::new(options.threads.max(1), options.hash_mb, move || build_evaluator(&opts_for_pool));
        Engine {
            pool,
            position: Position::start_position(),
            options,
            book,
            tablebase: Arc::new(NullOracle),
            last_result: Arc::new(Mutex::new(None)),
            search_handle: None,
        }
    }

    /// Installs a tablebase oracle, replacing the default no-op one.
    pub fn set_tablebase(&mut self, oracle: Arc<dyn TablebaseOracle>) {
        self.tablebase = oracle;
    }

    /// Resets to the starting position and clears the transposition table,
    /// as UCI's `ucinewgame` requires.
    pub fn new_game(&mut self) {
        self.stop();
        self.position = Position::start_position();
        self.pool.tt().clear();
    }

    pub fn set_position(&mut self, position: Position) {
        self.stop();
        self.position = position;
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Ranks every legal move by the oracle's verdict on the position it
    /// leads to, negamax-style, and returns the one best for the side to
    /// move. `None` if no legal move's result is itself probeable -- the
    /// oracle's own `max_pieces` ceiling can make the root probeable while
    /// every capture crosses it in the other direction, which for this
    /// crate's material-signature-only oracle only happens at the boundary.
    fn best_tablebase_move(&self, pos: &Position) -> Option<Move> {
        let mut moves = MoveList::new();
        let mut scratch = pos.clone();
        generate_legal_moves(&mut scratch, &mut moves);
        let mut best: Option<(Move, i32)> = None;
        for &m in moves.iter() {
            let mut child = pos.clone();
            child.make_move(m);
            if let Ok(result) = self.tablebase.probe(&child) {
                let score = -result.to_score(1);
                if best.map_or(true, |(_, best_score)| score > best_score) {
                    best = Some((m, score));
                }
            }
        }
        best.map(|(m, _)| m)
    }

    /// Starts a search in the background. `callback` is invoked once per
    /// completed iterative-deepening depth and a final time when the search
    /// concludes; it may be called from a thread other than the caller's.
    ///
    /// A book hit or a decisive tablebase verdict at the root short-circuits
    /// the whole search: no worker is spawned and `callback` receives
    /// exactly one zero-depth record naming the chosen move.
    pub fn begin_search(&mut self, limits: SearchLimits, callback: impl Fn(&SearchInfo) + Send + Sync + 'static) {
        self.stop();

        if let Some(book) = &self.book {
            if let Some(m) = book.probe(&self.position, SelectionPolicy::Weighted) {
                info!("book move selected for current position");
                let record = SearchInfo {
                    depth: 0,
                    seldepth: 0,
                    score_cp: 0,
                    nodes: 0,
                    nps: 0,
                    time_ms: 0,
                    pv: vec![m],
                    hashfull: 0,
                    multipv_rank: 0,
                };
                callback(&record);
                *self.last_result.lock().unwrap() = Some(record);
                return;
            }
        }

        if let Ok(root_result) = self.tablebase.probe(&self.position) {
            info!("tablebase hit at the root: {:?}", root_result.wdl);
            if let Some(m) = self.best_tablebase_move(&self.position) {
                let record = SearchInfo {
                    depth: 0,
                    seldepth: 0,
                    score_cp: root_result.to_score(0),
                    nodes: 0,
                    nps: 0,
                    time_ms: 0,
                    pv: vec![m],
                    hashfull: 0,
                    multipv_rank: 0,
                };
                callback(&record);
                *self.last_result.lock().unwrap() = Some(record);
                return;
            }
        }

        let depth = limits.depth.unwrap_or(MAX_DEPTH).min(MAX_DEPTH);
        let position = self.position.clone();
        let last_result = Arc::clone(&self.last_result);
        let callback = Arc::new(callback);

        let mut root_moves = MoveList::new();
        generate_legal_moves(&mut position.clone(), &mut root_moves);
        let extra_lines = self.options.multipv.saturating_sub(1).min(root_moves.len().saturating_sub(1));
        let tt = Arc::clone(self.pool.tt());
        let options = self.options.clone();

        // Each call to begin_search talks to the pool from a dedicated
        // driver thread so the caller is never blocked waiting on a worker.
        let started = Instant::now();
        let started_search_id = self.pool.begin_search(&position, depth, -crate::basetypes::MATE_SCORE, crate::basetypes::MATE_SCORE);
        let pool_reports = self.pool.clone_report_channel();
        let worker_count = self.pool.worker_count();
        let handle = std::thread::spawn(move || {
            let mut final_report: Option<SearchInfo> = None;
            // Workers diverge by depth offset and finish in any order; the
            // driver aggregates their reports rather than trusting whichever
            // arrives first. The highest completed depth wins, ties broken
            // by whichever update arrives later.
            let mut best_depth = -1i32;
            let mut done_count = 0usize;
            loop {
                let report: Result<_, RecvError> = pool_reports.lock().unwrap().recv();
                let report = match report {
                    Ok(r) if r.search_id == started_search_id => r,
                    Ok(_) => continue,
                    Err(_) => break,
                };
                if report.done {
                    done_count += 1;
                }
                if report.depth >= best_depth {
                    best_depth = report.depth;
                    let elapsed_ms = started.elapsed().as_millis().max(1) as u64;
                    let info = SearchInfo {
                        depth: report.depth,
                        seldepth: report.depth,
                        score_cp: report.value,
                        nodes: report.searched_nodes,
                        nps: report.searched_nodes * 1000 / elapsed_ms,
                        time_ms: elapsed_ms,
                        pv: report.best_moves,
                        hashfull: 0,
                        multipv_rank: 0,
                    };
                    (*callback)(&info);
                    final_report = Some(info);
                }
                if done_count >= worker_count {
                    break;
                }
            }

            // MultiPV: the primary line came from the pool above; every
            // further-ranked line is a fresh single-threaded search on this
            // same driver thread, sharing the pool's transposition table but
            // excluding every root move already reported at a better rank.
            let mut excluded: Vec<Move> = final_report.iter().flat_map(|r| r.pv.first().copied()).collect();
            for rank in 1..=extra_lines {
                let evaluator = build_evaluator(&options);
                let local_stop = AtomicBool::new(false);
                let mut ctx = SearchContext::new(&tt, &evaluator, &local_stop);
                ctx.excluded_root_moves = excluded.clone();
                let mut line_position = position.clone();
                let (value, best_move) = search_iterative(&mut ctx, &mut line_position, depth, |_, _, _, _| {});
                let m = match best_move {
                    Some(m) => m,
                    None => break,
                };
                excluded.push(m);
                let elapsed_ms = started.elapsed().as_millis().max(1) as u64;
                let info = SearchInfo {
                    depth,
                    seldepth: depth,
                    score_cp: value,
                    nodes: ctx.nodes.load(Ordering::Relaxed),
                    nps: ctx.nodes.load(Ordering::Relaxed) * 1000 / elapsed_ms,
                    time_ms: elapsed_ms,
                    pv: vec![m],
                    hashfull: 0,
                    multipv_rank: rank,
                };
                (*callback)(&info);
            }

            *last_result.lock().unwrap() = final_report;
        });
        self.search_handle = Some(handle);
    }

    /// Signals every worker to stop searching. Does not block; call `wait`
    /// to join the in-flight search.
    pub fn stop(&mut self) {
        self.pool.stop();
        self.wait();
    }

    /// Blocks until the in-flight search (if any) has finished.
    pub fn wait(&mut self) {
        if let Some(handle) = self.search_handle.take() {
            handle.join().ok();
        }
    }

    /// The last search's final report, if any search has completed.
    pub fn result(&self) -> Option<SearchInfo> {
        self.last_result.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_engine_reports_a_move_for_start_position() {
        let mut engine = Engine::new(EngineOptions { threads: 1, hash_mb: 1, ..Default::default() });
        let call_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&call_count);
        engine.begin_search(SearchLimits { depth: Some(2), ..Default::default() }, move |_info| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        engine.wait();
        assert!(call_count.load(Ordering::Relaxed) > 0);
        let result = engine.result().expect("expected a completed search result");
        assert!(!result.pv.is_empty());
    }

    #[test]
    fn test_new_game_resets_to_start_position() {
        let mut engine = Engine::new(EngineOptions { threads: 1, hash_mb: 1, ..Default::default() });
        let custom = Position::from_fen("4k3/8/8/8/8/8/8/4K2R w K - 0 1").unwrap();
        engine.set_position(custom);
        engine.new_game();
        assert_eq!(engine.position().to_fen(), Position::start_position().to_fen());
    }
}
