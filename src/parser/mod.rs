use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::ast::*;
use crate::error::CompileError;
use crate::interpreter::stack::ensure_sufficient_stack;
use crate::scanner::token::{Literal, Span, Token, TokenKind};

static NEXT_EXPR_ID: AtomicUsize = AtomicUsize::new(0);

fn next_id() -> ExprId {
    NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed)
}

const MAX_ARGS: usize = 255;

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    errors: Vec<CompileError>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            errors: Vec::new(),
        }
    }

    pub fn parse(self) -> Result<Program, Vec<CompileError>> {
        let (program, errors) = self.parse_recovering();
        if errors.is_empty() {
            Ok(program)
        } else {
            Err(errors)
        }
    }

    /// Parse the whole token stream, resynchronizing after each syntax error.
    /// Returns every statement that parsed cleanly alongside all errors.
    pub fn parse_recovering(mut self) -> (Program, Vec<CompileError>) {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            match self.declaration() {
                Ok(stmt) => statements.push(stmt),
                Err(e) => {
                    self.errors.push(e);
                    self.synchronize();
                }
            }
        }
        tracing::debug!(
            statements = statements.len(),
            errors = self.errors.len(),
            "parse complete"
        );
        (Program { statements }, self.errors)
    }

    fn declaration(&mut self) -> Result<Stmt, CompileError> {
        match self.peek().kind {
            TokenKind::Class => self.class_declaration(),
            TokenKind::Fun => self.fun_declaration(),
            TokenKind::Var => self.var_declaration(),
            TokenKind::Let | TokenKind::Const => Err(CompileError::parse(
                "reserved word; declare variables with 'var'",
                self.peek(),
            )),
            _ => self.statement(),
        }
    }

    fn class_declaration(&mut self) -> Result<Stmt, CompileError> {
        let start = self.current_span();
        self.advance(); // consume 'class'
        let name = self.expect_identifier("class name")?;
        self.consume(TokenKind::LeftBrace, "'{' before class body")?;

        let mut methods = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.is_at_end() {
            methods.push(Rc::new(self.function("method")?));
        }

        self.consume(TokenKind::RightBrace, "'}' after class body")?;

        let span = self.span_from(start);
        Ok(Stmt::Class(ClassDecl {
            name,
            methods,
            span,
        }))
    }

    fn fun_declaration(&mut self) -> Result<Stmt, CompileError> {
        let start = self.current_span();
        self.advance(); // consume 'fun' / 'function'
        let function = Rc::new(self.function("function")?);
        let span = self.span_from(start);
        Ok(Stmt::Function(FunDecl { function, span }))
    }

    fn function(&mut self, kind: &str) -> Result<Function, CompileError> {
        let start = self.current_span();
        let name = self.expect_identifier(&format!("{kind} name"))?;

        self.consume(TokenKind::LeftParen, &format!("'(' after {kind} name"))?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                if params.len() >= MAX_ARGS {
                    return Err(CompileError::parse(
                        "can't have more than 255 parameters",
                        self.peek(),
                    ));
                }
                params.push(self.expect_identifier("parameter name")?);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "')' after parameters")?;

        self.consume(TokenKind::LeftBrace, &format!("'{{' before {kind} body"))?;
        let body = self.block_statements()?;
        let span = self.span_from(start);

        Ok(Function {
            name,
            params,
            body,
            span,
        })
    }

    fn var_declaration(&mut self) -> Result<Stmt, CompileError> {
        let start = self.current_span();
        self.advance(); // consume 'var'
        let name = self.expect_identifier("variable name")?;

        let initializer = if self.match_token(TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };

        self.consume(TokenKind::Semicolon, "';' after variable declaration")?;
        let span = self.span_from(start);
        Ok(Stmt::Var(VarDecl {
            name,
            initializer,
            span,
        }))
    }

    fn statement(&mut self) -> Result<Stmt, CompileError> {
        ensure_sufficient_stack(|| self.statement_inner())
    }

    fn statement_inner(&mut self) -> Result<Stmt, CompileError> {
        match self.peek().kind {
            TokenKind::Print => self.print_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::LeftBrace => self.block_statement(),
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::For => self.for_statement(),
            _ => self.expression_statement(),
        }
    }

    fn print_statement(&mut self) -> Result<Stmt, CompileError> {
        let start = self.current_span();
        self.advance(); // consume 'print'
        let expression = self.expression()?;
        self.consume(TokenKind::Semicolon, "';' after value")?;
        let span = self.span_from(start);
        Ok(Stmt::Print(PrintStmt { expression, span }))
    }

    fn return_statement(&mut self) -> Result<Stmt, CompileError> {
        let start = self.current_span();
        self.advance(); // consume 'return'
        let value = if !self.check(TokenKind::Semicolon) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenKind::Semicolon, "';' after return value")?;
        let span = self.span_from(start);
        Ok(Stmt::Return(ReturnStmt { value, span }))
    }

    fn block_statement(&mut self) -> Result<Stmt, CompileError> {
        let start = self.current_span();
        self.advance(); // consume '{'
        let statements = self.block_statements()?;
        let span = self.span_from(start);
        Ok(Stmt::Block(BlockStmt { statements, span }))
    }

    /// Statements up to and including the closing brace. A malformed statement
    /// is recorded and skipped so the rest of the block is still checked.
    fn block_statements(&mut self) -> Result<Vec<Stmt>, CompileError> {
        let mut statements = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.is_at_end() {
            match self.declaration() {
                Ok(stmt) => statements.push(stmt),
                Err(e) => {
                    self.errors.push(e);
                    if !self.check(TokenKind::RightBrace) {
                        self.synchronize();
                    }
                }
            }
        }
        self.consume(TokenKind::RightBrace, "'}' after block")?;
        Ok(statements)
    }

    fn if_statement(&mut self) -> Result<Stmt, CompileError> {
        let start = self.current_span();
        self.advance(); // consume 'if'
        self.consume(TokenKind::LeftParen, "'(' after 'if'")?;
        let condition = self.expression()?;
        self.consume(TokenKind::RightParen, "')' after if condition")?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.match_token(TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        let span = self.span_from(start);
        Ok(Stmt::If(IfStmt {
            condition,
            then_branch,
            else_branch,
            span,
        }))
    }

    fn while_statement(&mut self) -> Result<Stmt, CompileError> {
        let start = self.current_span();
        self.advance(); // consume 'while'
        self.consume(TokenKind::LeftParen, "'(' after 'while'")?;
        let condition = self.expression()?;
        self.consume(TokenKind::RightParen, "')' after while condition")?;
        let body = Box::new(self.statement()?);
        let span = self.span_from(start);
        Ok(Stmt::While(WhileStmt {
            condition,
            body,
            span,
        }))
    }

    /// Desugar `for` into `while`.
    fn for_statement(&mut self) -> Result<Stmt, CompileError> {
        let start = self.current_span();
        self.advance(); // consume 'for'
        self.consume(TokenKind::LeftParen, "'(' after 'for'")?;

        let initializer = if self.match_token(TokenKind::Semicolon) {
            None
        } else if self.check(TokenKind::Var) {
            Some(self.var_declaration()?)
        } else {
            Some(self.expression_statement()?)
        };

        let condition = if !self.check(TokenKind::Semicolon) {
            self.expression()?
        } else {
            Expr::Literal(LiteralExpr {
                id: next_id(),
                value: LiteralValue::Bool(true),
                span: self.current_span(),
            })
        };
        self.consume(TokenKind::Semicolon, "';' after loop condition")?;

        let increment = if !self.check(TokenKind::RightParen) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenKind::RightParen, "')' after for clauses")?;

        let mut body = self.statement()?;

        // Append increment to body
        if let Some(inc) = increment {
            let inc_span = inc.span();
            body = Stmt::Block(BlockStmt {
                statements: vec![
                    body,
                    Stmt::Expression(ExprStmt {
                        expression: inc,
                        span: inc_span,
                    }),
                ],
                span: self.span_from(start),
            });
        }

        // Wrap in while
        body = Stmt::While(WhileStmt {
            condition,
            body: Box::new(body),
            span: self.span_from(start),
        });

        // Wrap with initializer
        if let Some(init) = initializer {
            body = Stmt::Block(BlockStmt {
                statements: vec![init, body],
                span: self.span_from(start),
            });
        }

        Ok(body)
    }

    fn expression_statement(&mut self) -> Result<Stmt, CompileError> {
        let expression = self.expression()?;
        self.consume(TokenKind::Semicolon, "';' after expression")?;
        let span = expression.span().to(self.previous_span());
        Ok(Stmt::Expression(ExprStmt { expression, span }))
    }

    fn expression(&mut self) -> Result<Expr, CompileError> {
        ensure_sufficient_stack(|| self.assignment())
    }

    fn assignment(&mut self) -> Result<Expr, CompileError> {
        let expr = self.or()?;

        if self.check(TokenKind::Equal) {
            let equals = self.advance().clone();
            let value = self.assignment()?;
            let span = expr.span().to(value.span());

            match expr {
                Expr::Variable(v) => {
                    return Ok(Expr::Assign(AssignExpr {
                        id: next_id(),
                        name: v.name,
                        value: Box::new(value),
                        span,
                    }));
                }
                Expr::Get(g) => {
                    return Ok(Expr::Set(SetExpr {
                        id: next_id(),
                        object: g.object,
                        name: g.name,
                        name_span: g.name_span,
                        value: Box::new(value),
                        span,
                    }));
                }
                other => {
                    // Reported without unwinding: the statement is otherwise
                    // well-formed, so parsing carries on.
                    self.errors
                        .push(CompileError::parse("invalid assignment target", &equals));
                    return Ok(other);
                }
            }
        }

        Ok(expr)
    }

    fn or(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.and()?;
        while self.match_token(TokenKind::Or) {
            let right = self.and()?;
            let span = expr.span().to(right.span());
            expr = Expr::Logical(LogicalExpr {
                id: next_id(),
                left: Box::new(expr),
                operator: LogicalOp::Or,
                right: Box::new(right),
                span,
            });
        }
        Ok(expr)
    }

    fn and(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.equality()?;
        while self.match_token(TokenKind::And) {
            let right = self.equality()?;
            let span = expr.span().to(right.span());
            expr = Expr::Logical(LogicalExpr {
                id: next_id(),
                left: Box::new(expr),
                operator: LogicalOp::And,
                right: Box::new(right),
                span,
            });
        }
        Ok(expr)
    }

    /// One left-associative binary precedence level.
    fn binary_level(
        &mut self,
        kinds: &[TokenKind],
        operand: fn(&mut Self) -> Result<Expr, CompileError>,
    ) -> Result<Expr, CompileError> {
        let mut expr = operand(self)?;
        while let Some(op) = self.match_binary_op(kinds) {
            let op_span = self.previous_span();
            let right = operand(self)?;
            let span = expr.span().to(right.span());
            expr = Expr::Binary(BinaryExpr {
                id: next_id(),
                left: Box::new(expr),
                operator: op,
                right: Box::new(right),
                op_span,
                span,
            });
        }
        Ok(expr)
    }

    fn equality(&mut self) -> Result<Expr, CompileError> {
        self.binary_level(
            &[TokenKind::EqualEqual, TokenKind::BangEqual],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> Result<Expr, CompileError> {
        self.binary_level(
            &[
                TokenKind::Greater,
                TokenKind::GreaterEqual,
                TokenKind::Less,
                TokenKind::LessEqual,
            ],
            Self::term,
        )
    }

    fn term(&mut self) -> Result<Expr, CompileError> {
        self.binary_level(&[TokenKind::Plus, TokenKind::Minus], Self::factor)
    }

    fn factor(&mut self) -> Result<Expr, CompileError> {
        self.binary_level(&[TokenKind::Star, TokenKind::Slash], Self::unary)
    }

    fn unary(&mut self) -> Result<Expr, CompileError> {
        if self.check(TokenKind::Bang) || self.check(TokenKind::Minus) {
            let start = self.current_span();
            let op = if self.match_token(TokenKind::Bang) {
                UnaryOp::Not
            } else {
                self.advance();
                UnaryOp::Negate
            };
            let operand = self.unary()?;
            let span = start.to(operand.span());
            return Ok(Expr::Unary(UnaryExpr {
                id: next_id(),
                operator: op,
                operand: Box::new(operand),
                span,
            }));
        }
        self.call()
    }

    fn call(&mut self) -> Result<Expr, CompileError> {
        let mut expr = if self.check(TokenKind::New) {
            self.instantiation()?
        } else {
            self.primary()?
        };

        loop {
            if self.match_token(TokenKind::LeftParen) {
                let (arguments, paren) = self.finish_arguments()?;
                let span = expr.span().to(paren);
                expr = Expr::Call(CallExpr {
                    id: next_id(),
                    callee: Box::new(expr),
                    arguments,
                    paren,
                    span,
                });
            } else if self.match_token(TokenKind::Dot) {
                expr = self.finish_get(expr)?;
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// `new` callee, where the callee is a primary optionally followed by
    /// `.name` accesses, and the argument list may be omitted.
    fn instantiation(&mut self) -> Result<Expr, CompileError> {
        let start = self.current_span();
        self.advance(); // consume 'new'
        let mut callee = self.primary()?;
        while self.match_token(TokenKind::Dot) {
            callee = self.finish_get(callee)?;
        }

        let (arguments, paren) = if self.match_token(TokenKind::LeftParen) {
            self.finish_arguments()?
        } else {
            (Vec::new(), self.previous_span())
        };
        Ok(Expr::Instantiate(InstantiateExpr {
            id: next_id(),
            callee: Box::new(callee),
            arguments,
            paren,
            span: start.to(paren),
        }))
    }

    fn finish_get(&mut self, object: Expr) -> Result<Expr, CompileError> {
        let name = self.expect_identifier("property name after '.'")?;
        let name_span = self.previous_span();
        let span = object.span().to(name_span);
        Ok(Expr::Get(GetExpr {
            id: next_id(),
            object: Box::new(object),
            name,
            name_span,
            span,
        }))
    }

    /// Arguments after an opening parenthesis; returns them with the span of
    /// the closing parenthesis.
    fn finish_arguments(&mut self) -> Result<(Vec<Expr>, Span), CompileError> {
        let mut arguments = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                if arguments.len() >= MAX_ARGS {
                    return Err(CompileError::parse(
                        "can't have more than 255 arguments",
                        self.peek(),
                    ));
                }
                arguments.push(self.expression()?);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        let paren = self.consume(TokenKind::RightParen, "')' after arguments")?.span;
        Ok((arguments, paren))
    }

    fn primary(&mut self) -> Result<Expr, CompileError> {
        let token = self.peek().clone();
        let value = match token.kind {
            TokenKind::Number | TokenKind::Float => match token.literal {
                Some(Literal::Integer(n)) => LiteralValue::Number(n as f64),
                Some(Literal::Float(n)) => LiteralValue::Number(n),
                _ => return Err(CompileError::parse("malformed number literal", &token)),
            },
            TokenKind::String => match token.literal {
                Some(Literal::Str(ref s)) => LiteralValue::String(s.clone()),
                _ => return Err(CompileError::parse("malformed string literal", &token)),
            },
            TokenKind::True => LiteralValue::Bool(true),
            TokenKind::False => LiteralValue::Bool(false),
            TokenKind::Nil => LiteralValue::Nil,
            TokenKind::This => {
                self.advance();
                return Ok(Expr::This(ThisExpr {
                    id: next_id(),
                    span: token.span,
                }));
            }
            TokenKind::Identifier => {
                self.advance();
                return Ok(Expr::Variable(VariableExpr {
                    id: next_id(),
                    name: token.lexeme,
                    span: token.span,
                }));
            }
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.expression()?;
                self.consume(TokenKind::RightParen, "')' after expression")?;
                return Ok(Expr::Grouping(GroupingExpr {
                    id: next_id(),
                    expression: Box::new(expr),
                    span: self.span_from(token.span),
                }));
            }
            _ => return Err(CompileError::parse("expected expression", &token)),
        };
        self.advance();
        Ok(Expr::Literal(LiteralExpr {
            id: next_id(),
            value,
            span: token.span,
        }))
    }

    // --- Helper methods ---

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_binary_op(&mut self, kinds: &[TokenKind]) -> Option<BinaryOp> {
        for &kind in kinds {
            if self.check(kind) {
                self.advance();
                return token_to_binary_op(kind);
            }
        }
        None
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<&Token, CompileError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(CompileError::parse(
                format!("expected {message}"),
                self.peek(),
            ))
        }
    }

    fn expect_identifier(&mut self, context: &str) -> Result<String, CompileError> {
        if self.check(TokenKind::Identifier) {
            Ok(self.advance().lexeme.clone())
        } else {
            Err(CompileError::parse(
                format!("expected {context}"),
                self.peek(),
            ))
        }
    }

    fn current_span(&self) -> Span {
        self.peek().span
    }

    fn previous_span(&self) -> Span {
        self.tokens[self.current.saturating_sub(1)].span
    }

    fn span_from(&self, start: Span) -> Span {
        start.to(self.previous_span())
    }

    /// Discard tokens until a statement boundary: just past a ';', or before a
    /// keyword that starts a statement or a '}' that closes the enclosing block.
    fn synchronize(&mut self) {
        self.advance();
        while !self.is_at_end() {
            if self.tokens[self.current - 1].kind == TokenKind::Semicolon {
                return;
            }
            match self.peek().kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return
                | TokenKind::RightBrace => return,
                _ => {
                    self.advance();
                }
            }
        }
    }
}

fn token_to_binary_op(kind: TokenKind) -> Option<BinaryOp> {
    match kind {
        TokenKind::Plus => Some(BinaryOp::Add),
        TokenKind::Minus => Some(BinaryOp::Subtract),
        TokenKind::Star => Some(BinaryOp::Multiply),
        TokenKind::Slash => Some(BinaryOp::Divide),
        TokenKind::EqualEqual => Some(BinaryOp::Equal),
        TokenKind::BangEqual => Some(BinaryOp::NotEqual),
        TokenKind::Less => Some(BinaryOp::Less),
        TokenKind::LessEqual => Some(BinaryOp::LessEqual),
        TokenKind::Greater => Some(BinaryOp::Greater),
        TokenKind::GreaterEqual => Some(BinaryOp::GreaterEqual),
        _ => None,
    }
}
