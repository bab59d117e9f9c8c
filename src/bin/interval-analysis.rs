use std::fs;
use std::process::ExitCode;

use clap::Parser;
use lir_analysis::lir::Program;
use lir_analysis::transfer::analyze_intervals;
use lir_analysis::worklist::write_report;
use lir_analysis::Result;

/// Integer interval analysis with widening at loop headers.
#[derive(Parser)]
#[command(name = "interval-analysis")]
#[command(about = "Per-block integer intervals for a LIR function", long_about = None)]
struct Cli {
    /// Textual LIR file (accepted for interface compatibility; not read).
    lir_file: String,
    /// LIR JSON file to analyze.
    lir_json: String,
    /// Name of the function to analyze.
    func: String,
    /// Exclude address-taken globals from the weak-update set.
    #[arg(long)]
    addrof_locals_only: bool,
    /// Log fixpoint progress to stderr.
    #[arg(short, long)]
    verbose: bool,
}

fn run(cli: &Cli) -> Result<()> {
    let bytes = fs::read(&cli.lir_json)?;
    let program = Program::parse(&bytes)?;
    let solution = analyze_intervals(&program, &cli.func, cli.addrof_locals_only)?;
    write_report(&mut std::io::stdout().lock(), &solution)?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if err.use_stderr() => {
            eprintln!("interval-analysis: usage: {}", first_line(&err));
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
            eprintln!("interval-analysis: {err}");
            ExitCode::FAILURE
        }
    }
}

fn first_line(err: &clap::Error) -> String {
    let text = err.to_string();
    text.lines()
        .next()
        .unwrap_or("invalid arguments")
        .trim_start_matches("error: ")
        .to_string()
}
