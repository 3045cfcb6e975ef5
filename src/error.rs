use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use crate::scanner::token::{Span, Token};

// ============= Compile-time errors (with miette diagnostics) =============

#[derive(Error, Debug, Diagnostic)]
pub enum CompileError {
    #[error("[line: {line}] Error {location}: {message}")]
    #[diagnostic(code(lox::scan))]
    Scan {
        message: String,
        line: usize,
        location: String,
        #[label("here")]
        span: SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("[line: {line}] Error {location}: {message}")]
    #[diagnostic(code(lox::parse))]
    Parse {
        message: String,
        line: usize,
        location: String,
        #[label("here")]
        span: SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("[line: {line}] Error {location}: {message}")]
    #[diagnostic(code(lox::resolve))]
    Resolve {
        message: String,
        line: usize,
        location: String,
        #[label("here")]
        span: SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },
}

impl CompileError {
    pub fn scan(message: impl Into<String>, location: impl Into<String>, span: Span) -> Self {
        Self::Scan {
            message: message.into(),
            line: span.line,
            location: location.into(),
            span: span.into(),
            src: miette::NamedSource::new("input", String::new()),
        }
    }

    /// Syntax error reported at `token`.
    pub fn parse(message: impl Into<String>, token: &Token) -> Self {
        Self::Parse {
            message: message.into(),
            line: token.line,
            location: token.location(),
            span: token.span.into(),
            src: miette::NamedSource::new("input", String::new()),
        }
    }

    pub fn resolve(message: impl Into<String>, lexeme: &str, span: Span) -> Self {
        Self::Resolve {
            message: message.into(),
            line: span.line,
            location: format!("at '{lexeme}'"),
            span: span.into(),
            src: miette::NamedSource::new("input", String::new()),
        }
    }

    pub fn line(&self) -> usize {
        match self {
            Self::Scan { line, .. } | Self::Parse { line, .. } | Self::Resolve { line, .. } => {
                *line
            }
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Scan { message, .. }
            | Self::Parse { message, .. }
            | Self::Resolve { message, .. } => message,
        }
    }

    /// Attach source code for fancy miette diagnostics
    pub fn with_source_code(self, name: impl Into<String>, source: impl Into<String>) -> Self {
        let src = miette::NamedSource::new(name.into(), source.into());
        match self {
            Self::Scan {
                message,
                line,
                location,
                span,
                ..
            } => Self::Scan {
                message,
                line,
                location,
                span,
                src,
            },
            Self::Parse {
                message,
                line,
                location,
                span,
                ..
            } => Self::Parse {
                message,
                line,
                location,
                span,
                src,
            },
            Self::Resolve {
                message,
                line,
                location,
                span,
                ..
            } => Self::Resolve {
                message,
                line,
                location,
                span,
                src,
            },
        }
    }
}

// ============= Runtime errors =============

/// A fatal error raised while evaluating; carries the offending token's span.
#[derive(Error, Debug, Clone)]
#[error("{message}\n[line {}]", .span.line)]
pub struct RuntimeError {
    pub message: String,
    pub span: Span,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    pub fn line(&self) -> usize {
        self.span.line
    }
}

// ============= Tests =============

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::token::TokenKind;

    #[test]
    fn compile_error_implements_diagnostic() {
        let err = CompileError::scan("unexpected character", "at '@'", Span::new(0, 1, 1));
        let diag: &dyn Diagnostic = &err;
        assert!(diag.code().is_some());
    }

    #[test]
    fn compile_error_with_source() {
        let token = Token::new(TokenKind::Eof, "", Span::new(9, 0, 1));
        let err = CompileError::parse("expect ';' after value", &token)
            .with_source_code("test.lox", "print 1\n");
        assert!(matches!(err, CompileError::Parse { .. }));
        assert_eq!(err.line(), 1);
    }

    #[test]
    fn parse_error_format_at_token() {
        let token = Token::new(TokenKind::Identifier, "y", Span::new(12, 1, 2));
        let err = CompileError::parse("expect ';' after expression", &token);
        assert_eq!(
            err.to_string(),
            "[line: 2] Error at 'y': expect ';' after expression"
        );
    }

    #[test]
    fn parse_error_format_at_end() {
        let token = Token::new(TokenKind::Eof, "", Span::new(20, 0, 4));
        let err = CompileError::parse("expect expression", &token);
        assert_eq!(err.to_string(), "[line: 4] Error at end: expect expression");
    }

    #[test]
    fn resolve_error_format() {
        let err = CompileError::resolve(
            "can't read local variable in its own initializer",
            "a",
            Span::new(14, 1, 1),
        );
        assert_eq!(
            err.to_string(),
            "[line: 1] Error at 'a': can't read local variable in its own initializer"
        );
        assert_eq!(
            err.message(),
            "can't read local variable in its own initializer"
        );
    }

    #[test]
    fn runtime_error_format() {
        let err = RuntimeError::new("undefined variable 'z'", Span::new(21, 1, 2));
        assert_eq!(err.to_string(), "undefined variable 'z'\n[line 2]");
        assert_eq!(err.line(), 2);
    }
}
