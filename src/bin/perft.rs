//! A thin command-line perft runner: `perft <depth> [fen]`, defaulting to
//! the start position when no FEN is given. Exists for manual spot-checks
//! of move generation during development; carries no protocol logic and is
//! not part of the crate's public API surface.

use chesscore::position::movegen::perft;
use chesscore::position::Position;
use std::env;
use std::process::exit;
use std::time::Instant;

fn main() {
    let mut args = env::args().skip(1);
    let depth: u32 = match args.next().and_then(|s| s.parse().ok()) {
        Some(d) => d,
        None => {
            eprintln!("usage: perft <depth> [fen]");
            exit(1);
        }
    };

    let fen = args.collect::<Vec<_>>().join(" ");
    let mut pos = if fen.is_empty() {
        Position::start_position()
    } else {
        match Position::from_fen(&fen) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("invalid FEN: {e}");
                exit(1);
            }
        }
    };

    let started = Instant::now();
    let nodes = perft(&mut pos, depth);
    let elapsed_secs = started.elapsed().as_secs_f64().max(1e-9);
    println!("depth {depth}: {nodes} nodes in {elapsed_secs:.3}s ({:.0} nps)", nodes as f64 / elapsed_secs);
}
