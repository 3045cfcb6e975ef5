use winnow::combinator::{alt, opt};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::stream::{LocatingSlice, Location, Stateful, Stream};
use winnow::token::{any, take_till, take_while};

use crate::error::CompileError;
use crate::scanner::token::{LineIndex, Literal, Span, Token, TokenKind, keyword_kind};

type Input<'a> = Stateful<LocatingSlice<&'a str>, &'a LineIndex>;

fn span_from(input: &Input<'_>, start: usize) -> Span {
    let end = input.current_token_start();
    Span::new(start, end - start, input.state.line_of(start))
}

fn cut() -> ErrMode<ContextError> {
    ErrMode::Cut(ContextError::new())
}

fn shebang(input: &mut Input<'_>) -> ModalResult<()> {
    ("#!", take_till(0.., '\n'), opt('\n'))
        .void()
        .parse_next(input)
}

fn whitespace_and_comments(input: &mut Input<'_>) -> ModalResult<()> {
    loop {
        let before = input.current_token_start();
        take_while(0.., |c: char| {
            c == ' ' || c == '\t' || c == '\r' || c == '\n'
        })
        .void()
        .parse_next(input)?;

        if input.starts_with("//") {
            take_while(0.., |c: char| c != '\n')
                .void()
                .parse_next(input)?;
        } else if input.current_token_start() == before {
            break;
        }
    }
    Ok(())
}

/// Body of a string literal after the opening quote, through the closing one.
/// Reaching end of input is a cut so the caller can report the open string.
fn string_contents(input: &mut Input<'_>) -> ModalResult<String> {
    let mut s = String::new();
    loop {
        let c = any
            .parse_next(input)
            .map_err(|_: ErrMode<ContextError>| cut())?;
        match c {
            '"' => break,
            '\\' => {
                let esc = any
                    .parse_next(input)
                    .map_err(|_: ErrMode<ContextError>| cut())?;
                match esc {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    '\\' => s.push('\\'),
                    '"' => s.push('"'),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
            }
            other => s.push(other),
        }
    }
    Ok(s)
}

fn string_literal(input: &mut Input<'_>) -> ModalResult<Token> {
    let start = input.current_token_start();
    let (contents, raw) = ('"', string_contents)
        .map(|(_, contents)| contents)
        .with_taken()
        .parse_next(input)?;
    let span = span_from(input, start);
    Ok(Token::new(TokenKind::String, raw, span).with_literal(Literal::Str(contents)))
}

/// `digits` or `digits.digits`; a dot without digits on both sides is not part
/// of the number.
fn number_literal(input: &mut Input<'_>) -> ModalResult<Token> {
    let start = input.current_token_start();
    let whole: &str = take_while(1.., |c: char| c.is_ascii_digit()).parse_next(input)?;
    let mut lexeme = whole.to_string();
    let mut is_float = false;

    let checkpoint = input.checkpoint();
    let dot_result: Result<char, ErrMode<ContextError>> = '.'.parse_next(input);
    if dot_result.is_ok() {
        match take_while::<_, _, ContextError>(1.., |c: char| c.is_ascii_digit()).parse_next(input)
        {
            Ok(frac) => {
                lexeme.push('.');
                lexeme.push_str(frac);
                is_float = true;
            }
            Err(_) => {
                input.reset(&checkpoint);
            }
        }
    }

    let literal = if is_float {
        Literal::Float(lexeme.parse().map_err(|_| cut())?)
    } else {
        match lexeme.parse::<i64>() {
            Ok(n) => Literal::Integer(n),
            // Wider than i64: keep the magnitude as a float.
            Err(_) => Literal::Float(lexeme.parse().map_err(|_| cut())?),
        }
    };
    let kind = if is_float {
        TokenKind::Float
    } else {
        TokenKind::Number
    };
    let span = span_from(input, start);
    Ok(Token::new(kind, lexeme, span).with_literal(literal))
}

fn identifier_or_keyword(input: &mut Input<'_>) -> ModalResult<Token> {
    let start = input.current_token_start();
    let first: char = any
        .verify(|c: &char| c.is_ascii_alphabetic())
        .parse_next(input)?;
    let rest: &str = take_while(0.., |c: char| c.is_ascii_alphanumeric()).parse_next(input)?;
    let mut lexeme = String::with_capacity(1 + rest.len());
    lexeme.push(first);
    lexeme.push_str(rest);
    let kind = keyword_kind(&lexeme).unwrap_or(TokenKind::Identifier);
    let span = span_from(input, start);
    Ok(Token::new(kind, lexeme, span))
}

fn two_char_token(input: &mut Input<'_>) -> ModalResult<Token> {
    let start = input.current_token_start();
    let (kind, lexeme) = alt((
        "!=".value((TokenKind::BangEqual, "!=")),
        "==".value((TokenKind::EqualEqual, "==")),
        ">=".value((TokenKind::GreaterEqual, ">=")),
        "<=".value((TokenKind::LessEqual, "<=")),
        "&&".value((TokenKind::And, "&&")),
        "||".value((TokenKind::Or, "||")),
    ))
    .parse_next(input)?;
    let span = span_from(input, start);
    Ok(Token::new(kind, lexeme, span))
}

fn single_char_token(input: &mut Input<'_>) -> ModalResult<Token> {
    let start = input.current_token_start();
    let c = any
        .verify(|c: &char| "(){}.,;-+/*!=<>".contains(*c))
        .parse_next(input)?;
    let kind = match c {
        '(' => TokenKind::LeftParen,
        ')' => TokenKind::RightParen,
        '{' => TokenKind::LeftBrace,
        '}' => TokenKind::RightBrace,
        ',' => TokenKind::Comma,
        '.' => TokenKind::Dot,
        '-' => TokenKind::Minus,
        '+' => TokenKind::Plus,
        ';' => TokenKind::Semicolon,
        '/' => TokenKind::Slash,
        '*' => TokenKind::Star,
        '!' => TokenKind::Bang,
        '=' => TokenKind::Equal,
        '<' => TokenKind::Less,
        '>' => TokenKind::Greater,
        _ => unreachable!("verify guarantees valid char"),
    };
    let span = span_from(input, start);
    Ok(Token::new(kind, c.to_string(), span))
}

fn scan_token(input: &mut Input<'_>) -> ModalResult<Token> {
    alt((
        string_literal,
        number_literal,
        identifier_or_keyword,
        two_char_token,
        single_char_token,
    ))
    .parse_next(input)
}

/// Scan all tokens from source, returning either a token list or scan errors.
///
/// A malformed token is reported and skipped so that every lexical error in
/// the source is collected in one pass.
pub fn scan_all(source: &str) -> Result<Vec<Token>, Vec<CompileError>> {
    let lines = LineIndex::new(source);
    let mut input = Stateful {
        input: LocatingSlice::new(source),
        state: &lines,
    };
    let _ = opt(shebang).parse_next(&mut input);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    loop {
        if whitespace_and_comments(&mut input).is_err() {
            break;
        }
        if input.is_empty() {
            break;
        }
        let checkpoint = input.checkpoint();
        match scan_token(&mut input) {
            Ok(token) => tokens.push(token),
            Err(_) => {
                input.reset(&checkpoint);
                let offset = input.current_token_start();
                let span = Span::new(offset, 1, lines.line_of(offset));
                let ch = any::<_, ContextError>.parse_next(&mut input).ok();
                if ch == Some('"') {
                    errors.push(CompileError::scan("unterminated string", "at end", span));
                    let _ = take_while::<_, _, ContextError>(0.., |_: char| true)
                        .void()
                        .parse_next(&mut input);
                } else {
                    let ch = ch.unwrap_or('?');
                    errors.push(CompileError::scan(
                        format!("unexpected character '{ch}'"),
                        format!("at '{ch}'"),
                        span,
                    ));
                }
            }
        }
    }

    let eof_offset = source.len();
    tokens.push(Token::new(
        TokenKind::Eof,
        "",
        Span::new(eof_offset, 0, lines.line_of(eof_offset)),
    ));

    if errors.is_empty() {
        Ok(tokens)
    } else {
        Err(errors)
    }
}
