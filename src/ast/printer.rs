use crate::ast::*;

pub fn to_sexp(program: &Program) -> String {
    let mut buf = String::new();
    for stmt in &program.statements {
        sexp_stmt(&mut buf, stmt);
        buf.push('\n');
    }
    buf
}

pub fn to_json(program: &Program) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(program)
}

fn sexp_function(buf: &mut String, f: &Function) {
    buf.push_str("(fun ");
    buf.push_str(&f.name);
    buf.push_str(" (");
    buf.push_str(&f.params.join(" "));
    buf.push(')');
    for stmt in &f.body {
        buf.push(' ');
        sexp_stmt(buf, stmt);
    }
    buf.push(')');
}

fn sexp_stmt(buf: &mut String, stmt: &Stmt) {
    match stmt {
        Stmt::Class(c) => {
            buf.push_str("(class ");
            buf.push_str(&c.name);
            for method in &c.methods {
                buf.push(' ');
                sexp_function(buf, method);
            }
            buf.push(')');
        }
        Stmt::Function(f) => sexp_function(buf, &f.function),
        Stmt::Var(v) => {
            buf.push_str("(var ");
            buf.push_str(&v.name);
            if let Some(ref init) = v.initializer {
                buf.push(' ');
                sexp_expr(buf, init);
            }
            buf.push(')');
        }
        Stmt::Expression(e) => sexp_expr(buf, &e.expression),
        Stmt::Print(p) => {
            buf.push_str("(print ");
            sexp_expr(buf, &p.expression);
            buf.push(')');
        }
        Stmt::Return(r) => {
            buf.push_str("(return");
            if let Some(ref val) = r.value {
                buf.push(' ');
                sexp_expr(buf, val);
            }
            buf.push(')');
        }
        Stmt::Block(b) => {
            buf.push_str("(block");
            for stmt in &b.statements {
                buf.push(' ');
                sexp_stmt(buf, stmt);
            }
            buf.push(')');
        }
        Stmt::If(i) => {
            buf.push_str("(if ");
            sexp_expr(buf, &i.condition);
            buf.push(' ');
            sexp_stmt(buf, &i.then_branch);
            if let Some(ref else_branch) = i.else_branch {
                buf.push(' ');
                sexp_stmt(buf, else_branch);
            }
            buf.push(')');
        }
        Stmt::While(w) => {
            buf.push_str("(while ");
            sexp_expr(buf, &w.condition);
            buf.push(' ');
            sexp_stmt(buf, &w.body);
            buf.push(')');
        }
    }
}

fn sexp_call(buf: &mut String, head: &str, callee: &Expr, arguments: &[Expr]) {
    buf.push('(');
    buf.push_str(head);
    buf.push(' ');
    sexp_expr(buf, callee);
    for arg in arguments {
        buf.push(' ');
        sexp_expr(buf, arg);
    }
    buf.push(')');
}

fn sexp_expr(buf: &mut String, expr: &Expr) {
    match expr {
        Expr::Binary(b) => {
            buf.push('(');
            buf.push_str(&b.operator.to_string());
            buf.push(' ');
            sexp_expr(buf, &b.left);
            buf.push(' ');
            sexp_expr(buf, &b.right);
            buf.push(')');
        }
        Expr::Unary(u) => {
            buf.push('(');
            buf.push_str(&u.operator.to_string());
            buf.push(' ');
            sexp_expr(buf, &u.operand);
            buf.push(')');
        }
        Expr::Literal(l) => match &l.value {
            LiteralValue::Number(n) => buf.push_str(&format!("{n}")),
            LiteralValue::String(s) => {
                buf.push('"');
                buf.push_str(s);
                buf.push('"');
            }
            LiteralValue::Bool(b) => buf.push_str(if *b { "true" } else { "false" }),
            LiteralValue::Nil => buf.push_str("nil"),
        },
        Expr::Grouping(g) => {
            buf.push_str("(group ");
            sexp_expr(buf, &g.expression);
            buf.push(')');
        }
        Expr::Variable(v) => buf.push_str(&v.name),
        Expr::Assign(a) => {
            buf.push_str("(= ");
            buf.push_str(&a.name);
            buf.push(' ');
            sexp_expr(buf, &a.value);
            buf.push(')');
        }
        Expr::Logical(l) => {
            buf.push('(');
            buf.push_str(&l.operator.to_string());
            buf.push(' ');
            sexp_expr(buf, &l.left);
            buf.push(' ');
            sexp_expr(buf, &l.right);
            buf.push(')');
        }
        Expr::Call(c) => sexp_call(buf, "call", &c.callee, &c.arguments),
        Expr::Instantiate(n) => sexp_call(buf, "new", &n.callee, &n.arguments),
        Expr::Get(g) => {
            buf.push_str("(. ");
            sexp_expr(buf, &g.object);
            buf.push(' ');
            buf.push_str(&g.name);
            buf.push(')');
        }
        Expr::Set(s) => {
            buf.push_str("(.= ");
            sexp_expr(buf, &s.object);
            buf.push(' ');
            buf.push_str(&s.name);
            buf.push(' ');
            sexp_expr(buf, &s.value);
            buf.push(')');
        }
        Expr::This(_) => buf.push_str("this"),
    }
}
