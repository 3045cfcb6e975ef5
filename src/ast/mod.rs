pub mod printer;

use std::rc::Rc;

use serde::Serialize;

use crate::scanner::token::Span;

/// A unique identifier for each expression node, used by the resolver
/// to store variable resolution depths.
pub type ExprId = usize;

/// Top-level program: a list of statements.
#[derive(Debug, Clone, Serialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Stmt {
    Expression(ExprStmt),
    Print(PrintStmt),
    Var(VarDecl),
    Block(BlockStmt),
    If(IfStmt),
    While(WhileStmt),
    Function(FunDecl),
    Class(ClassDecl),
    Return(ReturnStmt),
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassDecl {
    pub name: String,
    pub methods: Vec<Rc<Function>>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunDecl {
    pub function: Rc<Function>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct VarDecl {
    pub name: String,
    pub initializer: Option<Expr>,
    pub span: Span,
}

/// A function or method body. Shared by reference between the declaring
/// statement and every closure created from it.
#[derive(Debug, Clone, Serialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExprStmt {
    pub expression: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrintStmt {
    pub expression: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnStmt {
    pub value: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockStmt {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct IfStmt {
    pub condition: Expr,
    pub then_branch: Box<Stmt>,
    pub else_branch: Option<Box<Stmt>>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct WhileStmt {
    pub condition: Expr,
    pub body: Box<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Expr {
    Binary(BinaryExpr),
    Unary(UnaryExpr),
    Literal(LiteralExpr),
    Grouping(GroupingExpr),
    Variable(VariableExpr),
    Assign(AssignExpr),
    Logical(LogicalExpr),
    Call(CallExpr),
    Instantiate(InstantiateExpr),
    Get(GetExpr),
    Set(SetExpr),
    This(ThisExpr),
}

impl Expr {
    pub fn id(&self) -> ExprId {
        match self {
            Self::Binary(e) => e.id,
            Self::Unary(e) => e.id,
            Self::Literal(e) => e.id,
            Self::Grouping(e) => e.id,
            Self::Variable(e) => e.id,
            Self::Assign(e) => e.id,
            Self::Logical(e) => e.id,
            Self::Call(e) => e.id,
            Self::Instantiate(e) => e.id,
            Self::Get(e) => e.id,
            Self::Set(e) => e.id,
            Self::This(e) => e.id,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::Binary(e) => e.span,
            Self::Unary(e) => e.span,
            Self::Literal(e) => e.span,
            Self::Grouping(e) => e.span,
            Self::Variable(e) => e.span,
            Self::Assign(e) => e.span,
            Self::Logical(e) => e.span,
            Self::Call(e) => e.span,
            Self::Instantiate(e) => e.span,
            Self::Get(e) => e.span,
            Self::Set(e) => e.span,
            Self::This(e) => e.span,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BinaryExpr {
    pub id: ExprId,
    pub left: Box<Expr>,
    pub operator: BinaryOp,
    pub right: Box<Expr>,
    /// Span of the operator token; runtime type errors are reported here.
    pub op_span: Span,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum BinaryOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "/")]
    Divide,
    #[strum(serialize = "==")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessEqual,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterEqual,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnaryExpr {
    pub id: ExprId,
    pub operator: UnaryOp,
    pub operand: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum UnaryOp {
    #[strum(serialize = "-")]
    Negate,
    #[strum(serialize = "!")]
    Not,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiteralExpr {
    pub id: ExprId,
    pub value: LiteralValue,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub enum LiteralValue {
    Number(f64),
    String(String),
    Bool(bool),
    Nil,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupingExpr {
    pub id: ExprId,
    pub expression: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariableExpr {
    pub id: ExprId,
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignExpr {
    pub id: ExprId,
    pub name: String,
    pub value: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogicalExpr {
    pub id: ExprId,
    pub left: Box<Expr>,
    pub operator: LogicalOp,
    pub right: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallExpr {
    pub id: ExprId,
    pub callee: Box<Expr>,
    pub arguments: Vec<Expr>,
    /// Span of the closing parenthesis.
    pub paren: Span,
    pub span: Span,
}

/// `new Callee(args)`: the only way to construct an instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstantiateExpr {
    pub id: ExprId,
    pub callee: Box<Expr>,
    pub arguments: Vec<Expr>,
    pub paren: Span,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetExpr {
    pub id: ExprId,
    pub object: Box<Expr>,
    pub name: String,
    pub name_span: Span,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetExpr {
    pub id: ExprId,
    pub object: Box<Expr>,
    pub name: String,
    pub name_span: Span,
    pub value: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThisExpr {
    pub id: ExprId,
    pub span: Span,
}
