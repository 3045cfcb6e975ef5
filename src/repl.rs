use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::interpreter::Interpreter;
use crate::{StderrReporter, run_source};

const PROMPT: &str = "> ";

/// Run the interactive REPL. Globals persist across lines; a runtime error
/// aborts only the line that raised it.
pub fn run_repl() -> rustyline::Result<()> {
    let mut editor = DefaultEditor::new()?;
    let mut interpreter = Interpreter::new();
    let mut reporter = StderrReporter;

    loop {
        let line = match editor.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e),
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        editor.add_history_entry(trimmed)?;

        let source = echo_wrapped(trimmed);
        let outcome = run_source(&source, &mut interpreter, &mut reporter);
        tracing::trace!(?outcome, "repl line");
    }
    Ok(())
}

/// Bare expressions are echoed by rewriting them as `print <expr>;`.
fn echo_wrapped(line: &str) -> String {
    if is_bare_expression(line) {
        let expr = line.strip_suffix(';').unwrap_or(line);
        format!("print {expr};")
    } else {
        line.to_string()
    }
}

/// Heuristic: the line is a bare expression if it doesn't end with '}' and
/// doesn't start with a keyword that begins a declaration or statement.
/// Assignments are left alone so they don't echo.
fn is_bare_expression(line: &str) -> bool {
    if line.ends_with('}') {
        return false;
    }
    let first_word = line
        .split(|c: char| !c.is_ascii_alphanumeric())
        .next()
        .unwrap_or("");
    if matches!(
        first_word,
        "var" | "let" | "const" | "fun" | "function" | "class" | "if" | "while" | "for"
            | "print" | "return"
    ) || line.starts_with('{')
    {
        return false;
    }
    !is_assignment(line)
}

/// A single `=` outside a string that is not part of `==`, `!=`, `<=` or `>=`.
fn is_assignment(line: &str) -> bool {
    let bytes = line.as_bytes();
    let mut in_string = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_string = !in_string,
            b'=' if !in_string => {
                let prev = i.checked_sub(1).map(|p| bytes[p]);
                let next = bytes.get(i + 1).copied();
                let compound = matches!(prev, Some(b'=' | b'!' | b'<' | b'>')) || next == Some(b'=');
                if !compound {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}
