use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use walklox::ast::printer;
use walklox::interpreter::Interpreter;
use walklox::parser::Parser as LoxParser;
use walklox::{FancyReporter, Reporter, StderrReporter, scanner};

const EXIT_DATA_ERROR: u8 = 65;
const EXIT_SOFTWARE: u8 = 70;
const EXIT_IO_ERROR: u8 = 74;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AstFormat {
    Sexp,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "walklox", about = "A tree-walking interpreter for a small Lox dialect")]
struct Cli {
    /// Source file to run (omit for REPL)
    file: Option<PathBuf>,

    /// Dump tokens and exit
    #[arg(long)]
    dump_tokens: bool,

    /// Dump AST and exit
    #[arg(long)]
    dump_ast: bool,

    /// AST output format
    #[arg(long, value_enum, default_value_t = AstFormat::Sexp)]
    ast_format: AstFormat,

    /// Report how long the run took on stderr
    #[arg(long)]
    time: bool,

    /// Render compile errors with source snippets
    #[arg(long)]
    fancy: bool,
}

fn read_source(path: &PathBuf) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("read source file '{}'", path.display()))
}

fn report_compile_errors(errors: Vec<walklox::CompileError>, reporter: &mut dyn Reporter) -> ExitCode {
    for error in errors {
        reporter.compile_error(error);
    }
    ExitCode::from(EXIT_DATA_ERROR)
}

fn dump_tokens(source: &str, reporter: &mut dyn Reporter) -> ExitCode {
    match scanner::scan(source) {
        Ok(tokens) => {
            for token in &tokens {
                println!("{token}");
            }
            ExitCode::SUCCESS
        }
        Err(errors) => report_compile_errors(errors, reporter),
    }
}

fn dump_ast(source: &str, format: AstFormat, reporter: &mut dyn Reporter) -> Result<ExitCode> {
    let program = match scanner::scan(source).and_then(|tokens| LoxParser::new(tokens).parse()) {
        Ok(program) => program,
        Err(errors) => return Ok(report_compile_errors(errors, reporter)),
    };
    match format {
        AstFormat::Json => println!(
            "{}",
            printer::to_json(&program).context("serialize AST to JSON")?
        ),
        AstFormat::Sexp => print!("{}", printer::to_sexp(&program)),
    }
    Ok(ExitCode::SUCCESS)
}

fn run_file(source: &str, reporter: &mut dyn Reporter, time: bool) -> ExitCode {
    let started = Instant::now();
    let mut interpreter = Interpreter::new();
    let outcome = walklox::run_source(source, &mut interpreter, reporter);
    if time {
        eprintln!("finished in {:.3?}", started.elapsed());
    }

    if outcome.had_error {
        ExitCode::from(EXIT_DATA_ERROR)
    } else if outcome.had_runtime_error {
        ExitCode::from(EXIT_SOFTWARE)
    } else {
        ExitCode::SUCCESS
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    // clap exits with status 2 on usage errors; this interpreter uses 64.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            return ExitCode::from(64);
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
    };
    init_tracing();

    let Some(path) = cli.file.as_ref() else {
        return match walklox::repl::run_repl() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("error: {e:#}");
                ExitCode::from(EXIT_IO_ERROR)
            }
        };
    };

    let source = match read_source(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(EXIT_IO_ERROR);
        }
    };
    tracing::debug!(file = %path.display(), bytes = source.len(), "loaded source");

    let mut reporter: Box<dyn Reporter> = if cli.fancy {
        Box::new(FancyReporter::new(path.display().to_string(), source.as_str()))
    } else {
        Box::new(StderrReporter)
    };

    if cli.dump_tokens {
        return dump_tokens(&source, reporter.as_mut());
    }

    if cli.dump_ast {
        return match dump_ast(&source, cli.ast_format, reporter.as_mut()) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("error: {e:#}");
                ExitCode::from(EXIT_SOFTWARE)
            }
        };
    }

    run_file(&source, reporter.as_mut(), cli.time)
}
