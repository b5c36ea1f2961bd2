#![forbid(unsafe_code)]

//! fsl — filesystem-ledger CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = cli_app::Cli::parse();
    match cli_app::run(&args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("fsl: {e}");
            std::process::exit(2);
        }
    }
}
