pub mod ast;
pub mod error;
pub mod interpreter;
pub mod parser;
pub mod repl;
pub mod scanner;

use std::collections::HashMap;

use ast::{ExprId, Program};
use interpreter::Interpreter;
use interpreter::resolver::Resolver;

// Re-export error types for convenience
pub use error::{CompileError, RuntimeError};

/// Sink for diagnostics produced while running a program.
pub trait Reporter {
    fn compile_error(&mut self, error: CompileError);
    fn runtime_error(&mut self, error: RuntimeError);
}

/// Writes each diagnostic to stderr in its plain one-line format.
#[derive(Debug, Default)]
pub struct StderrReporter;

impl Reporter for StderrReporter {
    fn compile_error(&mut self, error: CompileError) {
        eprintln!("{error}");
    }

    fn runtime_error(&mut self, error: RuntimeError) {
        eprintln!("{error}");
    }
}

/// Renders compile errors as miette reports with the offending source
/// highlighted.
#[derive(Debug)]
pub struct FancyReporter {
    name: String,
    source: String,
}

impl FancyReporter {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}

impl Reporter for FancyReporter {
    fn compile_error(&mut self, error: CompileError) {
        let error = error.with_source_code(self.name.clone(), self.source.clone());
        eprintln!("{:?}", miette::Report::new(error));
    }

    fn runtime_error(&mut self, error: RuntimeError) {
        eprintln!("{error}");
    }
}

/// Collects diagnostics in memory.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    pub compile_errors: Vec<CompileError>,
    pub runtime_errors: Vec<RuntimeError>,
}

impl Reporter for CollectingReporter {
    fn compile_error(&mut self, error: CompileError) {
        self.compile_errors.push(error);
    }

    fn runtime_error(&mut self, error: RuntimeError) {
        self.runtime_errors.push(error);
    }
}

/// What happened during one run; the caller picks the exit status from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOutcome {
    /// A scan, parse or resolve error occurred; nothing was executed.
    pub had_error: bool,
    /// Execution stopped on a runtime error.
    pub had_runtime_error: bool,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        !self.had_error && !self.had_runtime_error
    }
}

/// Scan, parse and resolve `source`. Scan errors stop compilation. Parse
/// errors do not: the statements that did parse are still resolved, and the
/// resolve errors follow the parse errors.
pub fn compile(source: &str) -> Result<(Program, HashMap<ExprId, usize>), Vec<CompileError>> {
    let tokens = scanner::scan(source)?;
    let (program, mut errors) = parser::Parser::new(tokens).parse_recovering();
    match Resolver::new().resolve(&program) {
        Ok(locals) if errors.is_empty() => Ok((program, locals)),
        Ok(_) => Err(errors),
        Err(resolve_errors) => {
            errors.extend(resolve_errors);
            Err(errors)
        }
    }
}

/// Run the whole pipeline over `source` on `interpreter`, reporting every
/// diagnostic to `reporter`. Globals defined by earlier runs on the same
/// interpreter stay visible.
pub fn run_source(
    source: &str,
    interpreter: &mut Interpreter,
    reporter: &mut dyn Reporter,
) -> RunOutcome {
    let mut outcome = RunOutcome::default();
    let (program, locals) = match compile(source) {
        Ok(compiled) => compiled,
        Err(errors) => {
            outcome.had_error = true;
            for error in errors {
                reporter.compile_error(error);
            }
            return outcome;
        }
    };

    if let Err(error) = interpreter.interpret(&program, locals) {
        tracing::debug!(line = error.line(), "runtime error");
        outcome.had_runtime_error = true;
        reporter.runtime_error(error);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> (RunOutcome, Interpreter, CollectingReporter) {
        let mut interpreter = Interpreter::capturing();
        let mut reporter = CollectingReporter::default();
        let outcome = run_source(source, &mut interpreter, &mut reporter);
        (outcome, interpreter, reporter)
    }

    #[test]
    fn successful_run() {
        let (outcome, interpreter, _) = run("print 1 + 1;");
        assert!(outcome.is_success());
        assert_eq!(interpreter.output(), ["2"]);
    }

    #[test]
    fn scan_error_sets_had_error() {
        let (outcome, interpreter, reporter) = run("print 1;\nvar @ = 2;");
        assert!(outcome.had_error);
        assert!(!outcome.had_runtime_error);
        assert!(interpreter.output().is_empty());
        assert_eq!(
            reporter.compile_errors[0].to_string(),
            "[line: 2] Error at '@': unexpected character '@'"
        );
    }

    #[test]
    fn all_parse_errors_reported_in_one_run() {
        let (outcome, _, reporter) = run("print 1\nprint 2;\nvar = 3;\nprint 4;");
        assert!(outcome.had_error);
        let lines: Vec<usize> = reporter.compile_errors.iter().map(|e| e.line()).collect();
        assert_eq!(lines, vec![2, 3]);
    }

    #[test]
    fn resolve_errors_reported_alongside_parse_errors() {
        let (outcome, interpreter, reporter) = run("print this;\nvar = 1;");
        assert!(outcome.had_error);
        assert!(interpreter.output().is_empty());
        let lines: Vec<usize> = reporter.compile_errors.iter().map(|e| e.line()).collect();
        assert_eq!(lines, vec![2, 1]);
        assert!(matches!(reporter.compile_errors[0], CompileError::Parse { .. }));
        assert!(matches!(reporter.compile_errors[1], CompileError::Resolve { .. }));
    }

    #[test]
    fn recursion_one_thousand_deep_succeeds() {
        let (outcome, interpreter, _) =
            run("fun f(n) { if (n == 0) return 0; return 1 + f(n - 1); } print f(1000);");
        assert!(outcome.is_success());
        assert_eq!(interpreter.output(), ["1000"]);
    }

    #[test]
    fn unbounded_recursion_is_a_runtime_error() {
        let (outcome, _, reporter) = run("fun f(n) { return f(n + 1); }\nf(0);");
        assert!(!outcome.had_error);
        assert!(outcome.had_runtime_error);
        assert_eq!(reporter.runtime_errors.len(), 1);
        assert_eq!(reporter.runtime_errors[0].message, "stack overflow");
    }

    #[test]
    fn runtime_error_sets_had_runtime_error() {
        let (outcome, interpreter, reporter) = run("print 1;\nprint -\"a\";\nprint 3;");
        assert!(!outcome.had_error);
        assert!(outcome.had_runtime_error);
        assert_eq!(interpreter.output(), ["1"]);
        assert_eq!(
            reporter.runtime_errors[0].to_string(),
            "operand must be a number\n[line 2]"
        );
    }

    #[test]
    fn globals_persist_across_runs() {
        let mut interpreter = Interpreter::capturing();
        let mut reporter = CollectingReporter::default();
        run_source("var x = 1; fun inc() { x = x + 1; }", &mut interpreter, &mut reporter);
        let outcome = run_source("inc(); print x;", &mut interpreter, &mut reporter);
        assert!(outcome.is_success());
        assert_eq!(interpreter.output(), ["2"]);
    }
}
