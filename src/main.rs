//! Jsongen Binary

use jsongen::cli::Cli;
use std::process;

fn main() {
    match Cli::new().run() {
        Ok(status) => process::exit(status),
        Err(e) => {
            eprintln!("{}: {}", jsongen::NAME, e);
            process::exit(1);
        }
    }
}
