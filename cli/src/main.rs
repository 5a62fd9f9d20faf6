//! pharos launcher binary

#![allow(unused_crate_dependencies)]

use clap::Parser;
use pharos_cli::{launch, Cli};

fn main() {
    let cli = Cli::parse();
    match launch(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("pharos: [{}] {e}", e.code());
            // Negative sentinel; observed as 255 by wait(2).
            std::process::exit(-1);
        }
    }
}
