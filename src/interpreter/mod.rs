pub mod callable;
pub mod environment;
pub mod resolver;
pub mod stack;
pub mod value;

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use crate::ast::*;
use crate::error::RuntimeError;
use crate::interpreter::callable::{Callable, LoxClass, LoxFunction};
use crate::interpreter::environment::Environment;
use crate::interpreter::stack::ensure_sufficient_stack;
use crate::interpreter::value::Value;
use crate::scanner::token::Span;

/// How a statement finished. `Return` unwinds every enclosing block, `if` and
/// loop up to the nearest function call.
#[derive(Debug, Clone)]
pub enum Flow {
    Normal,
    Return(Value),
}

/// Calls deeper than this fail with a runtime error instead of exhausting memory.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 4_000;

pub struct Interpreter {
    globals: Rc<RefCell<Environment>>,
    environment: Rc<RefCell<Environment>>,
    locals: HashMap<ExprId, usize>,
    /// Every printed line, kept only when capturing.
    output: Option<Vec<String>>,
    writer: Box<dyn Write>,
    call_depth: usize,
    max_call_depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// An interpreter printing to stdout.
    pub fn new() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(writer: Box<dyn Write>) -> Self {
        let globals = Rc::new(RefCell::new(Environment::new()));
        Self {
            globals: Rc::clone(&globals),
            environment: globals,
            locals: HashMap::new(),
            output: None,
            writer,
            call_depth: 0,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    /// An interpreter that records printed lines instead of writing them.
    pub fn capturing() -> Self {
        let mut interpreter = Self::with_writer(Box::new(std::io::sink()));
        interpreter.output = Some(Vec::new());
        interpreter
    }

    pub fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    /// Lines printed so far; empty unless built with [`Interpreter::capturing`].
    pub fn output(&self) -> &[String] {
        self.output.as_deref().unwrap_or_default()
    }

    /// Run `program` with the binding distances computed for it. Globals and
    /// previously merged distances persist, so this can be called repeatedly.
    pub fn interpret(
        &mut self,
        program: &Program,
        locals: HashMap<ExprId, usize>,
    ) -> Result<(), RuntimeError> {
        self.locals.extend(locals);
        for stmt in &program.statements {
            // Top-level `return` is rejected by the resolver.
            self.execute(stmt)?;
        }
        Ok(())
    }

    fn execute(&mut self, stmt: &Stmt) -> Result<Flow, RuntimeError> {
        ensure_sufficient_stack(|| self.execute_stmt(stmt))
    }

    fn execute_stmt(&mut self, stmt: &Stmt) -> Result<Flow, RuntimeError> {
        match stmt {
            Stmt::Expression(e) => {
                self.evaluate_expr(&e.expression)?;
                Ok(Flow::Normal)
            }
            Stmt::Print(p) => {
                let value = self.evaluate_expr(&p.expression)?;
                self.print(value.to_string(), p.span)?;
                Ok(Flow::Normal)
            }
            Stmt::Var(v) => {
                let value = match &v.initializer {
                    Some(init) => self.evaluate_expr(init)?,
                    None => Value::Nil,
                };
                self.environment.borrow_mut().define(v.name.as_str(), value);
                Ok(Flow::Normal)
            }
            Stmt::Block(b) => {
                let env = Environment::child_of(&self.environment);
                self.execute_block(&b.statements, env)
            }
            Stmt::If(i) => {
                if self.evaluate_expr(&i.condition)?.is_truthy() {
                    self.execute(&i.then_branch)
                } else if let Some(ref else_branch) = i.else_branch {
                    self.execute(else_branch)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While(w) => {
                while self.evaluate_expr(&w.condition)?.is_truthy() {
                    if let Flow::Return(value) = self.execute(&w.body)? {
                        return Ok(Flow::Return(value));
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Function(f) => {
                let function =
                    LoxFunction::new(Rc::clone(&f.function), Rc::clone(&self.environment));
                self.environment
                    .borrow_mut()
                    .define(f.function.name.as_str(), Value::Function(function));
                Ok(Flow::Normal)
            }
            Stmt::Class(c) => {
                self.execute_class(c);
                Ok(Flow::Normal)
            }
            Stmt::Return(r) => {
                let value = match &r.value {
                    Some(val) => self.evaluate_expr(val)?,
                    None => Value::Nil,
                };
                Ok(Flow::Return(value))
            }
        }
    }

    fn execute_class(&mut self, class: &ClassDecl) {
        // Placeholder so methods can refer to the class by name.
        self.environment
            .borrow_mut()
            .define(class.name.as_str(), Value::Nil);

        let methods = class
            .methods
            .iter()
            .map(|method| {
                (
                    method.name.clone(),
                    LoxFunction::new(Rc::clone(method), Rc::clone(&self.environment)),
                )
            })
            .collect();

        let lox_class = Rc::new(LoxClass::new(class.name.as_str(), methods));
        self.environment
            .borrow_mut()
            .define(class.name.as_str(), Value::Class(lox_class));
    }

    /// Run `statements` inside `env`, restoring the current environment on
    /// every exit path.
    pub(crate) fn execute_block(
        &mut self,
        statements: &[Stmt],
        env: Rc<RefCell<Environment>>,
    ) -> Result<Flow, RuntimeError> {
        let previous = std::mem::replace(&mut self.environment, env);
        let result = self.execute_statements(statements);
        self.environment = previous;
        result
    }

    fn execute_statements(&mut self, statements: &[Stmt]) -> Result<Flow, RuntimeError> {
        for stmt in statements {
            if let Flow::Return(value) = self.execute(stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn print(&mut self, text: String, span: Span) -> Result<(), RuntimeError> {
        writeln!(self.writer, "{text}")
            .map_err(|e| RuntimeError::new(format!("failed to write output: {e}"), span))?;
        if let Some(ref mut output) = self.output {
            output.push(text);
        }
        Ok(())
    }

    fn evaluate_expr(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        ensure_sufficient_stack(|| self.evaluate(expr))
    }

    fn evaluate(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Literal(l) => Ok(match &l.value {
                LiteralValue::Number(n) => Value::Number(*n),
                LiteralValue::String(s) => Value::Str(s.clone()),
                LiteralValue::Bool(b) => Value::Bool(*b),
                LiteralValue::Nil => Value::Nil,
            }),
            Expr::Grouping(g) => self.evaluate_expr(&g.expression),
            Expr::Unary(u) => {
                let operand = self.evaluate_expr(&u.operand)?;
                match u.operator {
                    UnaryOp::Negate => match operand {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        _ => Err(RuntimeError::new("operand must be a number", u.span)),
                    },
                    UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
                }
            }
            Expr::Binary(b) => self.evaluate_binary(b),
            Expr::Variable(v) => self.look_up_variable(&v.name, v.id, v.span),
            Expr::Assign(a) => {
                let value = self.evaluate_expr(&a.value)?;
                let assigned = match self.locals.get(&a.id) {
                    Some(&distance) => {
                        self.environment
                            .borrow_mut()
                            .assign_at(distance, &a.name, value.clone())
                    }
                    None => self.globals.borrow_mut().assign(&a.name, value.clone()),
                };
                if !assigned {
                    return Err(RuntimeError::new(
                        format!("undefined variable '{}'", a.name),
                        a.span,
                    ));
                }
                Ok(value)
            }
            Expr::Logical(l) => {
                let left = self.evaluate_expr(&l.left)?;
                let short_circuits = match l.operator {
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::And => !left.is_truthy(),
                };
                if short_circuits {
                    Ok(left)
                } else {
                    self.evaluate_expr(&l.right)
                }
            }
            Expr::Call(c) => self.evaluate_call(c),
            Expr::Instantiate(n) => self.evaluate_instantiate(n),
            Expr::Get(g) => {
                let object = self.evaluate_expr(&g.object)?;
                match object {
                    Value::Instance(inst) => {
                        let value = inst.borrow().get(&g.name, &inst);
                        value.ok_or_else(|| {
                            RuntimeError::new(
                                format!("undefined property '{}'", g.name),
                                g.name_span,
                            )
                        })
                    }
                    other => Err(RuntimeError::new(
                        format!("only instances have properties; got {}", other.type_name()),
                        g.name_span,
                    )),
                }
            }
            Expr::Set(s) => {
                let object = self.evaluate_expr(&s.object)?;
                match object {
                    Value::Instance(inst) => {
                        let value = self.evaluate_expr(&s.value)?;
                        inst.borrow_mut().set(s.name.as_str(), value.clone());
                        Ok(value)
                    }
                    other => Err(RuntimeError::new(
                        format!("only instances have fields; got {}", other.type_name()),
                        s.name_span,
                    )),
                }
            }
            Expr::This(t) => self.look_up_variable("this", t.id, t.span),
        }
    }

    fn evaluate_binary(&mut self, b: &BinaryExpr) -> Result<Value, RuntimeError> {
        let left = self.evaluate_expr(&b.left)?;
        let right = self.evaluate_expr(&b.right)?;

        match b.operator {
            BinaryOp::Add => match (&left, &right) {
                (Value::Number(a), Value::Number(c)) => Ok(Value::Number(a + c)),
                (Value::Str(a), Value::Str(c)) => Ok(Value::Str(format!("{a}{c}"))),
                _ => Err(RuntimeError::new(
                    "operands must be two numbers or two strings",
                    b.op_span,
                )),
            },
            BinaryOp::Subtract => number_binop(&left, &right, |a, c| a - c, b),
            BinaryOp::Multiply => number_binop(&left, &right, |a, c| a * c, b),
            BinaryOp::Divide => match (&left, &right) {
                (Value::Number(_), Value::Number(c)) if *c == 0.0 => {
                    Err(RuntimeError::new("division by zero", b.op_span))
                }
                _ => number_binop(&left, &right, |a, c| a / c, b),
            },
            BinaryOp::Less => number_cmp(&left, &right, |a, c| a < c, b),
            BinaryOp::LessEqual => number_cmp(&left, &right, |a, c| a <= c, b),
            BinaryOp::Greater => number_cmp(&left, &right, |a, c| a > c, b),
            BinaryOp::GreaterEqual => number_cmp(&left, &right, |a, c| a >= c, b),
            BinaryOp::Equal => Ok(Value::Bool(left.is_equal(&right))),
            BinaryOp::NotEqual => Ok(Value::Bool(!left.is_equal(&right))),
        }
    }

    fn evaluate_arguments(&mut self, arguments: &[Expr]) -> Result<Vec<Value>, RuntimeError> {
        arguments.iter().map(|arg| self.evaluate_expr(arg)).collect()
    }

    fn evaluate_call(&mut self, c: &CallExpr) -> Result<Value, RuntimeError> {
        let callee = self.evaluate_expr(&c.callee)?;
        let args = self.evaluate_arguments(&c.arguments)?;

        match callee {
            Value::Function(func) => self.call_checked(&func, args, c.paren),
            Value::Class(class) => Err(RuntimeError::new(
                format!("can't call class '{}' directly; use 'new {}()'", class.name, class.name),
                c.paren,
            )),
            other => Err(RuntimeError::new(
                format!("can only call functions; '{other}' is not callable"),
                c.paren,
            )),
        }
    }

    fn evaluate_instantiate(&mut self, n: &InstantiateExpr) -> Result<Value, RuntimeError> {
        let callee = self.evaluate_expr(&n.callee)?;
        let args = self.evaluate_arguments(&n.arguments)?;

        match callee {
            Value::Class(class) => self.call_checked(&class, args, n.paren),
            other => Err(RuntimeError::new(
                format!("can only instantiate classes; '{other}' is not a class"),
                n.paren,
            )),
        }
    }

    fn call_checked(
        &mut self,
        callee: &dyn Callable,
        args: Vec<Value>,
        paren: Span,
    ) -> Result<Value, RuntimeError> {
        if args.len() != callee.arity() {
            return Err(RuntimeError::new(
                format!(
                    "expected {} arguments but got {}",
                    callee.arity(),
                    args.len()
                ),
                paren,
            ));
        }
        if self.call_depth >= self.max_call_depth {
            return Err(RuntimeError::new("stack overflow", paren));
        }
        self.call_depth += 1;
        let result = ensure_sufficient_stack(|| callee.call(self, args));
        self.call_depth -= 1;
        result
    }

    fn look_up_variable(&self, name: &str, id: ExprId, span: Span) -> Result<Value, RuntimeError> {
        let value = match self.locals.get(&id) {
            Some(&distance) => self.environment.borrow().get_at(distance, name),
            None => self.globals.borrow().get(name),
        };
        value.ok_or_else(|| RuntimeError::new(format!("undefined variable '{name}'"), span))
    }
}

fn number_binop(
    left: &Value,
    right: &Value,
    op: fn(f64, f64) -> f64,
    b: &BinaryExpr,
) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Number(a), Value::Number(c)) => Ok(Value::Number(op(*a, *c))),
        _ => Err(RuntimeError::new("operands must be numbers", b.op_span)),
    }
}

fn number_cmp(
    left: &Value,
    right: &Value,
    op: fn(f64, f64) -> bool,
    b: &BinaryExpr,
) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Number(a), Value::Number(c)) => Ok(Value::Bool(op(*a, *c))),
        _ => Err(RuntimeError::new("operands must be numbers", b.op_span)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::resolver::Resolver;
    use crate::parser::Parser;
    use crate::scanner;
    use rstest::rstest;

    fn interpret(source: &str) -> (Interpreter, Result<(), RuntimeError>) {
        let tokens = scanner::scan(source).expect("scan should succeed");
        let program = Parser::new(tokens).parse().expect("parse should succeed");
        let locals = Resolver::new()
            .resolve(&program)
            .expect("resolve should succeed");
        let mut interp = Interpreter::capturing();
        let result = interp.interpret(&program, locals);
        (interp, result)
    }

    fn run(source: &str) -> Vec<String> {
        let (interp, result) = interpret(source);
        result.expect("interpret should succeed");
        interp.output().to_vec()
    }

    fn run_err(source: &str) -> RuntimeError {
        interpret(source).1.unwrap_err()
    }

    #[rstest]
    #[case("print 1 + 2;", "3")]
    #[case("print 10 - 3;", "7")]
    #[case("print 2 * 3;", "6")]
    #[case("print 10 / 4;", "2.5")]
    #[case("print 0.1 + 0.2;", "0.30000000000000004")]
    #[case("print -5;", "-5")]
    #[case("print (1 + 2) * 3;", "9")]
    fn arithmetic(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(run(source), vec![expected]);
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(run("print \"a\" + \"b\";"), vec!["ab"]);
    }

    #[rstest]
    #[case("print 1 + \"a\";", "operands must be two numbers or two strings")]
    #[case("print \"a\" - 1;", "operands must be numbers")]
    #[case("print \"a\" * \"b\";", "operands must be numbers")]
    #[case("print nil / 2;", "operands must be numbers")]
    #[case("print 1 < \"2\";", "operands must be numbers")]
    #[case("print true >= false;", "operands must be numbers")]
    #[case("print -\"x\";", "operand must be a number")]
    #[case("print 1 / 0;", "division by zero")]
    fn operator_type_errors(#[case] source: &str, #[case] message: &str) {
        assert_eq!(run_err(source).message, message);
    }

    #[test]
    fn runtime_error_reports_operator_line() {
        let err = run_err("var a = 1;\nprint a +\n  \"b\";");
        assert_eq!(err.to_string(), "operands must be two numbers or two strings\n[line 2]");
    }

    #[test]
    fn truthiness() {
        assert_eq!(run("print !nil;"), vec!["true"]);
        assert_eq!(run("print !false;"), vec!["true"]);
        assert_eq!(run("print !0;"), vec!["false"]);
        assert_eq!(run("print !\"\";"), vec!["false"]);
        assert_eq!(run("if (0) print \"zero is truthy\";"), vec!["zero is truthy"]);
    }

    #[test]
    fn equality() {
        assert_eq!(run("print 1 == 1;"), vec!["true"]);
        assert_eq!(run("print 1 == 2;"), vec!["false"]);
        assert_eq!(run("print nil == nil;"), vec!["true"]);
        assert_eq!(run("print 1 != 2;"), vec!["true"]);
        assert_eq!(run("print 1 == \"1\";"), vec!["false"]);
        assert_eq!(run("print nil == false;"), vec!["false"]);
    }

    #[test]
    fn variables() {
        assert_eq!(run("var x = 10; print x;"), vec!["10"]);
        assert_eq!(run("var x; print x;"), vec!["nil"]);
        assert_eq!(run("var x = 1; x = 2; print x;"), vec!["2"]);
    }

    #[test]
    fn assignment_in_inner_block_mutates_outer() {
        assert_eq!(run("var x = 1; { x = 2; } print x;"), vec!["2"]);
    }

    #[test]
    fn declaration_in_inner_block_shadows() {
        let output = run("var x = 1; { var x = 2; print x; } print x;");
        assert_eq!(output, vec!["2", "1"]);
    }

    #[test]
    fn closure_sees_binding_not_later_shadow() {
        let output = run("var a = \"global\";
            {
                fun show() { print a; }
                show();
                var a = \"block\";
                show();
            }");
        assert_eq!(output, vec!["global", "global"]);
    }

    #[test]
    fn if_else() {
        assert_eq!(run("if (true) print 1; else print 2;"), vec!["1"]);
        assert_eq!(run("if (false) print 1; else print 2;"), vec!["2"]);
    }

    #[test]
    fn while_loop() {
        let output = run("var i = 0; while (i < 3) { print i; i = i + 1; }");
        assert_eq!(output, vec!["0", "1", "2"]);
    }

    #[test]
    fn for_loop() {
        let output = run("for (var i = 0; i < 3; i = i + 1) print i;");
        assert_eq!(output, vec!["0", "1", "2"]);
    }

    #[test]
    fn loop_closures_share_one_variable() {
        let output = run("var first;
            var second;
            for (var i = 0; i < 2; i = i + 1) {
                fun show() { print i; }
                if (first == nil) first = show; else second = show;
            }
            first();
            second();");
        assert_eq!(output, vec!["2", "2"]);
    }

    #[test]
    fn logical_operators_short_circuit() {
        assert_eq!(run("print true or false;"), vec!["true"]);
        assert_eq!(run("print false and true;"), vec!["false"]);
        assert_eq!(run("print nil or \"yes\";"), vec!["yes"]);
        assert_eq!(run("print 1 && 2;"), vec!["2"]);
        let output = run("var hit = false;
            fun touch() { hit = true; return true; }
            print false and touch();
            print true or touch();
            print hit;");
        assert_eq!(output, vec!["false", "true", "false"]);
    }

    #[test]
    fn functions() {
        let output = run("fun add(a, b) { return a + b; } print add(1, 2);");
        assert_eq!(output, vec!["3"]);
    }

    #[test]
    fn return_from_nested_if() {
        let output = run("fun f(x) { if (x) { return 1; } return 2; }
            print f(true);
            print f(false);");
        assert_eq!(output, vec!["1", "2"]);
    }

    #[test]
    fn return_from_inside_loop() {
        let output = run("fun find() {
                var i = 0;
                while (true) {
                    { if (i == 3) return i; }
                    i = i + 1;
                }
            }
            print find();");
        assert_eq!(output, vec!["3"]);
    }

    #[test]
    fn falsy_return_value_still_returns() {
        let output = run("fun f() { if (true) return nil; print \"unreachable\"; }
            fun g() { return false; print \"unreachable\"; }
            print f();
            print g();");
        assert_eq!(output, vec!["nil", "false"]);
    }

    #[test]
    fn implicit_return_is_nil() {
        assert_eq!(run("fun f() {} print f();"), vec!["nil"]);
    }

    #[test]
    fn closures() {
        let output = run("fun makeCounter() {
                var i = 0;
                fun count() {
                    i = i + 1;
                    return i;
                }
                return count;
            }
            var counter = makeCounter();
            print counter();
            print counter();");
        assert_eq!(output, vec!["1", "2"]);
    }

    #[test]
    fn callable_renderings_are_stable() {
        let output = run("fun f() {}
            class C { m() {} }
            print f;
            f();
            f();
            print f;
            print C;
            print new C();
            print new C().m;");
        assert_eq!(
            output,
            vec!["<fn f>", "<fn f>", "<class C>", "<instance C>", "<fn m>"]
        );
    }

    #[test]
    fn classes() {
        let output = run("class Foo {
                bar() { return 42; }
            }
            var foo = new Foo();
            print foo.bar();");
        assert_eq!(output, vec!["42"]);
    }

    #[test]
    fn class_fields_and_this() {
        let output = run("class Point {
                sum() { return this.x + this.y; }
            }
            var p = new Point;
            p.x = 1;
            p.y = 2;
            print p.sum();");
        assert_eq!(output, vec!["3"]);
    }

    #[test]
    fn instances_have_independent_fields() {
        let output = run("class Box {}
            var a = new Box();
            var b = new Box();
            a.v = 1;
            b.v = 2;
            a.v = 10;
            print a.v;
            print b.v;");
        assert_eq!(output, vec!["10", "2"]);
    }

    #[test]
    fn this_binds_per_instance() {
        let output = run("class Named {
                say() { print this.name; }
            }
            var a = new Named();
            a.name = \"a\";
            var b = new Named();
            b.name = \"b\";
            a.say();
            b.say();
            var m = a.say;
            b.say = m;
            b.say();");
        assert_eq!(output, vec!["a", "b", "a"]);
    }

    #[test]
    fn field_shadows_method() {
        let output = run("class A { m() { return \"method\"; } }
            var a = new A();
            a.m = \"field\";
            print a.m;");
        assert_eq!(output, vec!["field"]);
    }

    #[test]
    fn method_can_reference_its_class() {
        let output = run("class Node { make() { return new Node(); } }
            print new Node().make();");
        assert_eq!(output, vec!["<instance Node>"]);
    }

    #[test]
    fn object_identity_equality() {
        let output = run("class A { m() {} }
            var a = new A();
            var b = new A();
            fun f() {}
            print a == a;
            print a == b;
            print A == A;
            print f == f;
            print a.m == a.m;");
        assert_eq!(output, vec!["true", "false", "true", "true", "false"]);
    }

    #[rstest]
    #[case("print x;", "undefined variable 'x'")]
    #[case("x = 1;", "undefined variable 'x'")]
    #[case("fun f(a) {} f(1, 2);", "expected 1 arguments but got 2")]
    #[case("class A {} new A(1);", "expected 0 arguments but got 1")]
    #[case("class A {} A();", "can't call class 'A' directly; use 'new A()'")]
    #[case("\"str\"();", "can only call functions; 'str' is not callable")]
    #[case("var f = 1; new f();", "can only instantiate classes; '1' is not a class")]
    #[case("class A {} print new A().missing;", "undefined property 'missing'")]
    #[case("var n = 1; print n.x;", "only instances have properties; got number")]
    #[case("var n = 1; n.x = 2;", "only instances have fields; got number")]
    fn runtime_errors(#[case] source: &str, #[case] message: &str) {
        assert_eq!(run_err(source).message, message);
    }

    #[test]
    fn runtime_error_halts_execution() {
        let (interp, result) = interpret("print 1;\nprint nil + 1;\nprint 3;");
        assert!(result.is_err());
        assert_eq!(interp.output(), ["1"]);
    }

    #[test]
    fn environment_restored_after_error_in_block() {
        let tokens = scanner::scan("var x = \"outer\"; { var x = \"inner\"; print x + 1; }")
            .expect("scan should succeed");
        let program = Parser::new(tokens).parse().expect("parse should succeed");
        let locals = Resolver::new().resolve(&program).expect("resolve should succeed");
        let mut interp = Interpreter::capturing();
        assert!(interp.interpret(&program, locals).is_err());
        assert!(Rc::ptr_eq(&interp.environment, &interp.globals));
    }

    #[test]
    fn fibonacci() {
        let output = run("fun fib(n) {
                if (n <= 1) return n;
                return fib(n - 1) + fib(n - 2);
            }
            for (var i = 0; i < 10; i = i + 1) {
                print fib(i);
            }");
        assert_eq!(
            output,
            vec!["0", "1", "1", "2", "3", "5", "8", "13", "21", "34"]
        );
    }

    #[test]
    fn call_depth_limit_reports_stack_overflow() {
        let tokens = scanner::scan("fun f(n) {\n  return f(n + 1);\n}\nf(0);")
            .expect("scan should succeed");
        let program = Parser::new(tokens).parse().expect("parse should succeed");
        let locals = Resolver::new().resolve(&program).expect("resolve should succeed");
        let mut interp = Interpreter::capturing().with_max_call_depth(50);
        let err = interp.interpret(&program, locals).unwrap_err();
        assert_eq!(err.message, "stack overflow");
        assert_eq!(err.line(), 2);
        assert!(Rc::ptr_eq(&interp.environment, &interp.globals));
        assert_eq!(interp.call_depth, 0);
    }

    #[test]
    fn call_depth_unwinds_after_overflow() {
        let (mut interp, result) = interpret("fun f() { return f(); } f();");
        assert!(result.is_err());
        assert_eq!(interp.call_depth, 0);

        let tokens = scanner::scan("fun g(n) { if (n == 0) return 0; return g(n - 1); } print g(100);")
            .expect("scan should succeed");
        let program = Parser::new(tokens).parse().expect("parse should succeed");
        let locals = Resolver::new().resolve(&program).expect("resolve should succeed");
        interp.interpret(&program, locals).expect("second run should succeed");
        assert_eq!(interp.output(), ["0"]);
    }

    #[test]
    fn negative_zero_keeps_its_sign() {
        assert_eq!(run("print -0; print 0; print -0.0 * 1;"), vec!["-0", "0", "-0"]);
    }
}
