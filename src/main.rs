//! rtable CLI entry point
//!
//! Parses arguments, dispatches to the CLI module and turns a failure
//! into a JSON error on stdout plus a non-zero exit.

use rtable::cli;

fn main() {
    if let Err(e) = cli::run() {
        let _ = cli::write_error(e.code_str(), e.message());
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
