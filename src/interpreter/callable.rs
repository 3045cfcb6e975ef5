use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::Function;
use crate::error::RuntimeError;
use crate::interpreter::environment::Environment;
use crate::interpreter::value::{LoxInstance, Value};
use crate::interpreter::{Flow, Interpreter};

/// Anything that can be invoked with a fixed number of arguments.
///
/// Callers check `arity` against the argument count before calling.
pub trait Callable {
    fn name(&self) -> &str;

    fn arity(&self) -> usize;

    fn call(
        &self,
        interpreter: &mut Interpreter,
        arguments: Vec<Value>,
    ) -> Result<Value, RuntimeError>;
}

/// A user-defined function: its declaration plus the environment it closed over.
#[derive(Debug, Clone)]
pub struct LoxFunction {
    pub declaration: Rc<Function>,
    pub closure: Rc<RefCell<Environment>>,
}

impl LoxFunction {
    pub fn new(declaration: Rc<Function>, closure: Rc<RefCell<Environment>>) -> Self {
        Self {
            declaration,
            closure,
        }
    }

    /// A new function whose closure additionally binds `this` to `instance`.
    /// The original is left untouched.
    pub fn bind(&self, instance: Rc<RefCell<LoxInstance>>) -> Self {
        let env = Environment::child_of(&self.closure);
        env.borrow_mut().define("this", Value::Instance(instance));
        Self {
            declaration: Rc::clone(&self.declaration),
            closure: env,
        }
    }

    /// Same declaration and same captured frame.
    pub fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.declaration, &other.declaration)
            && Rc::ptr_eq(&self.closure, &other.closure)
    }
}

impl Callable for LoxFunction {
    fn name(&self) -> &str {
        &self.declaration.name
    }

    fn arity(&self) -> usize {
        self.declaration.params.len()
    }

    #[tracing::instrument(level = "trace", skip_all, fields(function = %self.declaration.name))]
    fn call(
        &self,
        interpreter: &mut Interpreter,
        arguments: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let env = Environment::child_of(&self.closure);
        for (param, arg) in self.declaration.params.iter().zip(arguments) {
            env.borrow_mut().define(param.as_str(), arg);
        }
        match interpreter.execute_block(&self.declaration.body, env)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Nil),
        }
    }
}

impl fmt::Display for LoxFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fn {}>", self.declaration.name)
    }
}

/// A class: a name and an immutable method table. Instances are created only
/// through `new`.
#[derive(Debug)]
pub struct LoxClass {
    pub name: String,
    pub methods: HashMap<String, LoxFunction>,
}

impl LoxClass {
    pub fn new(name: impl Into<String>, methods: HashMap<String, LoxFunction>) -> Self {
        Self {
            name: name.into(),
            methods,
        }
    }

    pub fn find_method(&self, name: &str) -> Option<&LoxFunction> {
        self.methods.get(name)
    }
}

impl Callable for Rc<LoxClass> {
    fn name(&self) -> &str {
        &self.name
    }

    /// Classes carry no constructor, so instantiation takes no arguments.
    fn arity(&self) -> usize {
        0
    }

    fn call(
        &self,
        _interpreter: &mut Interpreter,
        _arguments: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let instance = LoxInstance::new(Rc::clone(self));
        Ok(Value::Instance(Rc::new(RefCell::new(instance))))
    }
}

impl fmt::Display for LoxClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class {}>", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::token::Span;

    fn function(name: &str, params: &[&str]) -> Rc<Function> {
        Rc::new(Function {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            body: Vec::new(),
            span: Span::new(0, 0, 1),
        })
    }

    #[test]
    fn function_arity_and_name() {
        let f = LoxFunction::new(
            function("add", &["a", "b"]),
            Rc::new(RefCell::new(Environment::new())),
        );
        assert_eq!(f.arity(), 2);
        assert_eq!(f.name(), "add");
        assert_eq!(f.to_string(), "<fn add>");
    }

    #[test]
    fn bind_creates_fresh_closure_with_this() {
        let globals = Rc::new(RefCell::new(Environment::new()));
        let method = LoxFunction::new(function("get", &[]), Rc::clone(&globals));
        let class = Rc::new(LoxClass::new("Box", HashMap::new()));
        let a = Rc::new(RefCell::new(LoxInstance::new(Rc::clone(&class))));
        let b = Rc::new(RefCell::new(LoxInstance::new(Rc::clone(&class))));

        let bound_a = method.bind(Rc::clone(&a));
        let bound_b = method.bind(Rc::clone(&b));

        assert!(!bound_a.same_as(&bound_b));
        assert!(!bound_a.same_as(&method));
        assert!(globals.borrow().get("this").is_none());
        match bound_a.closure.borrow().get_at(0, "this") {
            Some(Value::Instance(this)) => assert!(Rc::ptr_eq(&this, &a)),
            other => panic!("expected bound instance, got {other:?}"),
        }
    }

    #[test]
    fn class_has_zero_arity() {
        let class = Rc::new(LoxClass::new("Point", HashMap::new()));
        assert_eq!(class.arity(), 0);
        assert_eq!(class.to_string(), "<class Point>");
    }
}
