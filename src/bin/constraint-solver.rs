use std::fs;
use std::process::ExitCode;

use clap::Parser;
use lir_analysis::solver;
use lir_analysis::Result;

/// Solve a set-constraint file and print the points-to solution.
#[derive(Parser)]
#[command(name = "constraint-solver")]
#[command(about = "Saturate set constraints into points-to sets", long_about = None)]
struct Cli {
    /// Constraint file: one `lhs <= rhs` statement per line.
    constraints: String,
    /// Log saturation progress to stderr.
    #[arg(short, long)]
    verbose: bool,
}

fn run(cli: &Cli) -> Result<()> {
    let input = fs::read_to_string(&cli.constraints)?;
    let solution = solver::solve_constraints(&input)?;
    solver::write_points_to(&mut std::io::stdout().lock(), &solution)?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if err.use_stderr() => {
            let text = err.to_string();
            let line = text.lines().next().unwrap_or("invalid arguments");
            eprintln!("constraint-solver: usage: {}", line.trim_start_matches("error: "));
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
            eprintln!("constraint-solver: {err}");
            ExitCode::FAILURE
        }
    }
}
