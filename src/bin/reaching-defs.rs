use std::fs;
use std::process::ExitCode;

use clap::Parser;
use lir_analysis::lir::Program;
use lir_analysis::reaching::{analyze_reaching_defs, write_reaching};
use lir_analysis::Result;

/// Reaching definitions per program point, composed from the points-to
/// solution and per-function mod/ref summaries.
#[derive(Parser)]
#[command(name = "reaching-defs")]
#[command(about = "Per-program-point reaching definitions for a LIR function", long_about = None)]
struct Cli {
    /// Textual LIR file (accepted for interface compatibility; not read).
    lir_file: String,
    /// LIR JSON file to analyze.
    lir_json: String,
    /// Name of the function to analyze; also seeds the call graph.
    func: String,
    /// Log fixpoint progress to stderr.
    #[arg(short, long)]
    verbose: bool,
}

fn run(cli: &Cli) -> Result<()> {
    let bytes = fs::read(&cli.lir_json)?;
    let program = Program::parse(&bytes)?;
    let solution = analyze_reaching_defs(&program, &cli.func)?;
    write_reaching(&mut std::io::stdout().lock(), &solution)?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if err.use_stderr() => {
            let text = err.to_string();
            let line = text.lines().next().unwrap_or("invalid arguments");
            eprintln!("reaching-defs: usage: {}", line.trim_start_matches("error: "));
            return ExitCode::FAILURE;
        }
        Err(err) => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
    };

    let level = if cli.verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Warn
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("reaching-defs: {err}");
            ExitCode::FAILURE
        }
    }
}
