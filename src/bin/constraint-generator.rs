use std::fs;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use lir_analysis::constraints;
use lir_analysis::lir::Program;
use lir_analysis::Result;

/// Emit the program's points-to set constraints, deduplicated and sorted.
#[derive(Parser)]
#[command(name = "constraint-generator")]
#[command(about = "Generate set constraints for the points-to analysis", long_about = None)]
struct Cli {
    /// LIR JSON file.
    lir_json: String,
}

fn run(cli: &Cli) -> Result<()> {
    let bytes = fs::read(&cli.lir_json)?;
    let program = Program::parse(&bytes)?;
    let constraints = constraints::generate(&program);
    let mut stdout = std::io::stdout().lock();
    write!(stdout, "{}", constraints::render(&constraints))?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if err.use_stderr() => {
            let text = err.to_string();
            let line = text.lines().next().unwrap_or("invalid arguments");
            eprintln!("constraint-generator: usage: {}", line.trim_start_matches("error: "));
            return ExitCode::FAILURE;
        }
        Err(err) => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("constraint-generator: {err}");
            ExitCode::FAILURE
        }
    }
}
