//! chainctl - query tool for the indexed chain store
//!
//! Opens the RocksDB store read-only, so it can run next to a live indexer.

use chainscan::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
