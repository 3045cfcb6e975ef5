use std::collections::HashMap;

use crate::ast::*;
use crate::error::CompileError;
use crate::interpreter::stack::ensure_sufficient_stack;
use crate::scanner::token::Span;

#[derive(Debug, Clone, Copy, PartialEq)]
enum FunctionType {
    None,
    Function,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ClassType {
    None,
    Class,
}

/// Static pass computing, for each variable-like expression, how many scopes
/// separate it from its declaration. Names found in no local scope are globals
/// and get no entry.
pub struct Resolver {
    /// `false` while a name is declared but its initializer is still running.
    scopes: Vec<HashMap<String, bool>>,
    locals: HashMap<ExprId, usize>,
    current_function: FunctionType,
    current_class: ClassType,
    errors: Vec<CompileError>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            scopes: Vec::new(),
            locals: HashMap::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
            errors: Vec::new(),
        }
    }

    pub fn resolve(
        mut self,
        program: &Program,
    ) -> Result<HashMap<ExprId, usize>, Vec<CompileError>> {
        for stmt in &program.statements {
            self.resolve_stmt(stmt);
        }
        tracing::debug!(
            locals = self.locals.len(),
            errors = self.errors.len(),
            "resolve complete"
        );
        if self.errors.is_empty() {
            Ok(self.locals)
        } else {
            Err(self.errors)
        }
    }

    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    /// Redeclaring a name in the same scope is allowed and simply rebinds it.
    fn declare(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), false);
        }
    }

    fn define(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), true);
        }
    }

    fn resolve_local(&mut self, id: ExprId, name: &str) {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if scope.contains_key(name) {
                self.locals.insert(id, depth);
                return;
            }
        }
    }

    fn error(&mut self, message: &str, lexeme: &str, span: Span) {
        self.errors
            .push(CompileError::resolve(message, lexeme, span));
    }

    fn resolve_function(&mut self, function: &Function, func_type: FunctionType) {
        let enclosing = self.current_function;
        self.current_function = func_type;
        self.begin_scope();
        for param in &function.params {
            self.declare(param);
            self.define(param);
        }
        for stmt in &function.body {
            self.resolve_stmt(stmt);
        }
        self.end_scope();
        self.current_function = enclosing;
    }

    fn resolve_stmt(&mut self, stmt: &Stmt) {
        ensure_sufficient_stack(|| self.resolve_stmt_inner(stmt));
    }

    fn resolve_stmt_inner(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Var(v) => {
                self.declare(&v.name);
                if let Some(ref init) = v.initializer {
                    self.resolve_expr(init);
                }
                self.define(&v.name);
            }
            Stmt::Function(f) => {
                self.declare(&f.function.name);
                self.define(&f.function.name);
                self.resolve_function(&f.function, FunctionType::Function);
            }
            Stmt::Class(c) => {
                let enclosing_class = self.current_class;
                self.current_class = ClassType::Class;

                self.declare(&c.name);
                self.define(&c.name);

                self.begin_scope();
                self.define("this");
                for method in &c.methods {
                    self.resolve_function(method, FunctionType::Function);
                }
                self.end_scope();

                self.current_class = enclosing_class;
            }
            Stmt::Expression(e) => self.resolve_expr(&e.expression),
            Stmt::Print(p) => self.resolve_expr(&p.expression),
            Stmt::Return(r) => {
                if self.current_function == FunctionType::None {
                    self.error("can't return from top-level code", "return", r.span);
                }
                if let Some(ref value) = r.value {
                    self.resolve_expr(value);
                }
            }
            Stmt::Block(b) => {
                self.begin_scope();
                for stmt in &b.statements {
                    self.resolve_stmt(stmt);
                }
                self.end_scope();
            }
            Stmt::If(i) => {
                self.resolve_expr(&i.condition);
                self.resolve_stmt(&i.then_branch);
                if let Some(ref else_branch) = i.else_branch {
                    self.resolve_stmt(else_branch);
                }
            }
            Stmt::While(w) => {
                self.resolve_expr(&w.condition);
                self.resolve_stmt(&w.body);
            }
        }
    }

    fn resolve_expr(&mut self, expr: &Expr) {
        ensure_sufficient_stack(|| self.resolve_expr_inner(expr));
    }

    fn resolve_expr_inner(&mut self, expr: &Expr) {
        match expr {
            Expr::Variable(v) => {
                if let Some(scope) = self.scopes.last()
                    && scope.get(&v.name) == Some(&false)
                {
                    self.error(
                        "can't read local variable in its own initializer",
                        &v.name,
                        v.span,
                    );
                }
                self.resolve_local(v.id, &v.name);
            }
            Expr::Assign(a) => {
                self.resolve_expr(&a.value);
                self.resolve_local(a.id, &a.name);
            }
            Expr::Binary(b) => {
                self.resolve_expr(&b.left);
                self.resolve_expr(&b.right);
            }
            Expr::Unary(u) => self.resolve_expr(&u.operand),
            Expr::Logical(l) => {
                self.resolve_expr(&l.left);
                self.resolve_expr(&l.right);
            }
            Expr::Call(c) => {
                self.resolve_expr(&c.callee);
                for arg in &c.arguments {
                    self.resolve_expr(arg);
                }
            }
            Expr::Instantiate(n) => {
                self.resolve_expr(&n.callee);
                for arg in &n.arguments {
                    self.resolve_expr(arg);
                }
            }
            Expr::Get(g) => self.resolve_expr(&g.object),
            Expr::Set(s) => {
                self.resolve_expr(&s.value);
                self.resolve_expr(&s.object);
            }
            Expr::Grouping(g) => self.resolve_expr(&g.expression),
            Expr::This(t) => {
                if self.current_class == ClassType::None {
                    self.error("can't use 'this' outside of a class", "this", t.span);
                    return;
                }
                self.resolve_local(t.id, "this");
            }
            Expr::Literal(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::scanner;

    fn resolve(source: &str) -> Result<HashMap<ExprId, usize>, Vec<CompileError>> {
        let tokens = scanner::scan(source).expect("scan should succeed");
        let program = Parser::new(tokens).parse().expect("parse should succeed");
        Resolver::new().resolve(&program)
    }

    fn resolve_with_program(source: &str) -> (Program, HashMap<ExprId, usize>) {
        let tokens = scanner::scan(source).expect("scan should succeed");
        let program = Parser::new(tokens).parse().expect("parse should succeed");
        let locals = Resolver::new()
            .resolve(&program)
            .expect("resolve should succeed");
        (program, locals)
    }

    fn messages(errors: &[CompileError]) -> Vec<String> {
        errors.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn globals_are_left_unresolved() {
        let locals = resolve("var a = 1; print a;").expect("resolve should succeed");
        assert!(locals.is_empty());
    }

    #[test]
    fn block_local_resolves_at_depth_zero() {
        let (program, locals) = resolve_with_program("{ var a = 1; print a; }");
        let Stmt::Block(block) = &program.statements[0] else {
            panic!("expected block");
        };
        let Stmt::Print(print) = &block.statements[1] else {
            panic!("expected print");
        };
        assert_eq!(locals.get(&print.expression.id()), Some(&0));
    }

    #[test]
    fn closure_reference_counts_enclosing_scopes() {
        let (program, locals) =
            resolve_with_program("fun outer() { var x = 1; fun inner() { print x; } }");
        let Stmt::Function(outer) = &program.statements[0] else {
            panic!("expected function");
        };
        let Stmt::Function(inner) = &outer.function.body[1] else {
            panic!("expected inner function");
        };
        let Stmt::Print(print) = &inner.function.body[0] else {
            panic!("expected print");
        };
        assert_eq!(locals.get(&print.expression.id()), Some(&1));
    }

    #[test]
    fn this_resolves_to_class_scope() {
        let (program, locals) = resolve_with_program("class A { m() { return this; } }");
        let Stmt::Class(class) = &program.statements[0] else {
            panic!("expected class");
        };
        let Stmt::Return(ret) = &class.methods[0].body[0] else {
            panic!("expected return");
        };
        let this = ret.value.as_ref().expect("return value");
        assert_eq!(locals.get(&this.id()), Some(&1));
    }

    #[test]
    fn self_reference_in_initializer_is_error() {
        let errors = resolve("{ var a = a; }").unwrap_err();
        assert_eq!(
            messages(&errors),
            vec!["[line: 1] Error at 'a': can't read local variable in its own initializer"]
        );
    }

    #[test]
    fn global_self_reference_is_allowed() {
        assert!(resolve("var a = 1; var a = a;").is_ok());
    }

    #[test]
    fn redeclaration_in_same_scope_is_allowed() {
        assert!(resolve("{ var a = 1; var a = 2; print a; }").is_ok());
    }

    #[test]
    fn return_at_top_level_is_error() {
        let errors = resolve("return 1;").unwrap_err();
        assert!(messages(&errors)[0].contains("can't return from top-level code"));
    }

    #[test]
    fn this_outside_class_is_error() {
        let errors = resolve("print this;").unwrap_err();
        assert!(messages(&errors)[0].contains("can't use 'this' outside of a class"));
    }

    #[test]
    fn this_in_plain_function_is_error() {
        assert!(resolve("fun f() { return this; }").is_err());
    }

    #[test]
    fn errors_accumulate() {
        let errors = resolve("{ var a = a; }\nreturn;\nprint this;").unwrap_err();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[1].line(), 2);
    }

    #[test]
    fn recursive_function_resolves() {
        assert!(resolve("{ fun f(n) { if (n > 0) f(n - 1); } f(3); }").is_ok());
    }

    #[test]
    fn methods_resolve_like_functions() {
        assert!(resolve("class A { m() { return 1; } n() { fun g() { return this; } return g; } }").is_ok());
    }

    #[test]
    fn deeply_nested_grouping_resolves() {
        let source = format!("print {}1{};", "(".repeat(5_000), ")".repeat(5_000));
        assert!(resolve(&source).is_ok());
    }
}
