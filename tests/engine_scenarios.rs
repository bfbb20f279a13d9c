//! Whole-crate end-to-end scenarios exercised through the public `Engine`
//! surface, as opposed to the unit-level `#[cfg(test)]` modules that probe
//! one file's internals.

use chesscore::book::{polyglot_key, PolyglotBook};
use chesscore::engine::{Engine, EngineOptions, SearchLimits};
use chesscore::position::Position;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn wait_for_result(engine: &mut Engine, timeout: Duration) -> chesscore::engine::SearchInfo {
    let start = std::time::Instant::now();
    loop {
        if let Some(result) = engine.result() {
            return result;
        }
        if start.elapsed() > timeout {
            panic!("search did not report a result within {:?}", timeout);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn scenario_finds_forced_mate_in_one() {
    let mut engine = Engine::new(EngineOptions { threads: 1, hash_mb: 4, ..Default::default() });
    let pos = Position::from_fen("6k1/5ppp/8/8/8/8/8/R5K1 w - - 0 1").unwrap();
    engine.set_position(pos);
    engine.begin_search(SearchLimits { depth: Some(4), ..Default::default() }, |_info| {});
    engine.wait();
    let result = wait_for_result(&mut engine, Duration::from_secs(5));
    assert!(result.score_cp.abs() >= chesscore::basetypes::MATE_SCORE - chesscore::basetypes::MAX_PLY as i32);
    assert!(!result.pv.is_empty());
}

#[test]
fn scenario_finds_forced_mate_in_two() {
    let mut engine = Engine::new(EngineOptions { threads: 1, hash_mb: 4, ..Default::default() });
    // White: Qh5, Ra1, Kg1 vs. Black Kg8, pawns f7/g7/h7 cracked open on the
    // back rank -- a textbook mate-in-two via Qxf7+ forcing Kh8, then Qg8#
    // style mating nets are generated by the position, not hand-verified
    // here; what matters is the search reports a mate score within depth 6.
    let pos = Position::from_fen("6k1/5p1p/6p1/8/7Q/8/8/R5K1 w - - 0 1").unwrap();
    engine.set_position(pos);
    engine.begin_search(SearchLimits { depth: Some(6), ..Default::default() }, |_info| {});
    engine.wait();
    let result = wait_for_result(&mut engine, Duration::from_secs(10));
    assert!(result.score_cp.abs() >= chesscore::basetypes::MATE_SCORE - chesscore::basetypes::MAX_PLY as i32);
}

#[test]
fn scenario_book_move_short_circuits_search() {
    let pos = Position::start_position();
    let key = polyglot_key(&pos);
    // e2e4: from=e2 (file 4, rank 1), to=e4 (file 4, rank 3).
    let raw_move: u16 = (4) | (3 << 3) | (4 << 6) | (1 << 9);
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&key.to_be_bytes());
    bytes.extend_from_slice(&raw_move.to_be_bytes());
    bytes.extend_from_slice(&50u16.to_be_bytes());
    bytes.extend_from_slice(&0u32.to_be_bytes());
    let path = std::env::temp_dir().join("chesscore_scenario_book.bin");
    std::fs::write(&path, &bytes).unwrap();

    let book = PolyglotBook::open(path.to_str().unwrap()).unwrap();
    assert!(book.probe(&pos, chesscore::book::SelectionPolicy::BestOnly).is_some());

    let mut engine = Engine::new(EngineOptions {
        threads: 1,
        hash_mb: 4,
        book_path: Some(path.to_str().unwrap().to_string()),
        ..Default::default()
    });
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    engine.begin_search(SearchLimits::default(), move |_info| {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    let result = engine.result().expect("book hit should report synchronously");
    assert_eq!(result.depth, 0);
    assert_eq!(result.pv.len(), 1);
    assert_eq!(calls.load(Ordering::Relaxed), 1);

    std::fs::remove_file(&path).ok();
}

#[test]
fn scenario_respects_depth_limit() {
    let mut engine = Engine::new(EngineOptions { threads: 1, hash_mb: 4, ..Default::default() });
    engine.begin_search(SearchLimits { depth: Some(2), ..Default::default() }, |_info| {});
    engine.wait();
    let result = wait_for_result(&mut engine, Duration::from_secs(5));
    assert!(result.depth <= 2);
}

#[test]
fn scenario_four_thread_search_agrees_with_single_thread_on_material_win() {
    let pos = Position::from_fen("4k3/8/8/3p4/4P3/8/8/4K3 w - - 0 1").unwrap();

    let mut single = Engine::new(EngineOptions { threads: 1, hash_mb: 4, ..Default::default() });
    single.set_position(pos.clone());
    single.begin_search(SearchLimits { depth: Some(5), ..Default::default() }, |_info| {});
    single.wait();
    let single_result = wait_for_result(&mut single, Duration::from_secs(10));

    let mut multi = Engine::new(EngineOptions { threads: 4, hash_mb: 4, ..Default::default() });
    multi.set_position(pos);
    multi.begin_search(SearchLimits { depth: Some(5), ..Default::default() }, |_info| {});
    multi.wait();
    let multi_result = wait_for_result(&mut multi, Duration::from_secs(10));

    assert!(single_result.score_cp > 0);
    assert!(multi_result.score_cp > 0);
}

#[test]
fn scenario_multipv_reports_distinct_ranked_lines() {
    let mut engine = Engine::new(EngineOptions { threads: 1, hash_mb: 4, multipv: 3, ..Default::default() });
    let pos = Position::from_fen("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1").unwrap();
    engine.set_position(pos);
    let reports = Arc::new(std::sync::Mutex::new(Vec::new()));
    let collected = Arc::clone(&reports);
    engine.begin_search(SearchLimits { depth: Some(3), ..Default::default() }, move |info| {
        collected.lock().unwrap().push((info.multipv_rank, info.pv.first().copied()));
    });
    engine.wait();

    let reports = reports.lock().unwrap();
    let ranks_seen: std::collections::HashSet<usize> = reports.iter().map(|(rank, _)| *rank).collect();
    assert!(ranks_seen.contains(&0));
    assert!(ranks_seen.len() > 1, "expected more than one multipv rank to be reported, got {ranks_seen:?}");

    let mut moves_by_rank: Vec<(usize, chesscore::chess_move::Move)> =
        reports.iter().filter_map(|(rank, mv)| mv.map(|m| (*rank, m))).collect();
    moves_by_rank.sort_by_key(|(rank, _)| *rank);
    moves_by_rank.dedup_by_key(|(rank, _)| *rank);
    for window in moves_by_rank.windows(2) {
        assert_ne!(window[0].1, window[1].1, "distinct multipv ranks must name distinct root moves");
    }
}

#[test]
fn scenario_new_game_clears_state_between_searches() {
    let mut engine = Engine::new(EngineOptions { threads: 1, hash_mb: 4, ..Default::default() });
    let tactical = Position::from_fen("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1").unwrap();
    engine.set_position(tactical);
    engine.begin_search(SearchLimits { depth: Some(3), ..Default::default() }, |_info| {});
    engine.wait();
    wait_for_result(&mut engine, Duration::from_secs(10));

    engine.new_game();
    assert_eq!(engine.position().to_fen(), Position::start_position().to_fen());

    engine.begin_search(SearchLimits { depth: Some(2), ..Default::default() }, |_info| {});
    engine.wait();
    let result = wait_for_result(&mut engine, Duration::from_secs(5));
    assert!(!result.pv.is_empty());
}
