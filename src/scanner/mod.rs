pub mod lexer;
pub mod token;

use crate::error::CompileError;
use token::Token;

/// Scan source code into a list of tokens.
pub fn scan(source: &str) -> Result<Vec<Token>, Vec<CompileError>> {
    let result = lexer::scan_all(source);
    match &result {
        Ok(tokens) => tracing::debug!(tokens = tokens.len(), "scan complete"),
        Err(errors) => tracing::debug!(errors = errors.len(), "scan failed"),
    }
    result
}
