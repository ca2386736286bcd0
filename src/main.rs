#![forbid(unsafe_code)]

//! chaosd: chaos experiment control plane CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = cli_app::Cli::parse();
    if let Err(e) = cli_app::run(&args) {
        eprintln!("chaosd: {e}");
        std::process::exit(e.exit_code());
    }
}
