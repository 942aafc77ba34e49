// File: src/main.rs
//
// Main entry point for the Dictu interpreter. With a script argument the
// file is executed; without one an interactive REPL starts. Exit codes
// follow sysexits: 65 compile error, 70 runtime error, 74 I/O error.

mod chunk;
mod compiler;
mod debug;
mod errors;
mod gc;
mod natives;
mod object;
mod repl;
mod scanner;
mod table;
mod value;
mod vm;

use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(
    name = "dictu",
    about = "Dictu: a small, dynamically-typed scripting language",
    version = env!("CARGO_PKG_VERSION"),
    long_about = None
)]
struct Cli {
    /// Script to execute; starts the REPL when omitted.
    script: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    match cli.script {
        Some(path) => {
            let source = match fs::read_to_string(&path) {
                Ok(source) => source,
                Err(e) => {
                    eprintln!("Unable to open file \"{}\" ({}).", path.display(), e);
                    process::exit(74);
                }
            };
            let mut vm = vm::Vm::new(false);
            let result = vm.interpret(&source);
            process::exit(result.exit_code());
        }
        None => match repl::Repl::new() {
            Ok(mut repl) => {
                if let Err(e) = repl.run() {
                    eprintln!("REPL error: {}", e);
                    process::exit(70);
                }
            }
            Err(e) => {
                eprintln!("Failed to start REPL: {}", e);
                process::exit(70);
            }
        },
    }
}
