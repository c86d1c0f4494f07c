//! Abstract syntax tree for scripts.

use serde::{Deserialize, Serialize};

use crate::token::Span;

/// A statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// An expression evaluated for its value or side effects.
    Expr(Expr),
    /// `let`, `const`, or `var` declaration. Bindings are function-scoped.
    Declare {
        /// The declared name.
        name: String,
        /// The initializer, if any.
        init: Option<Expr>,
    },
    /// A named function declaration, hoisted to the top of its body.
    Function(FunctionDecl),
    /// `return` with an optional value.
    Return(Option<Expr>),
    /// `if (cond) then else otherwise`.
    If {
        /// The condition.
        cond: Expr,
        /// Statements run when the condition is truthy.
        then: Vec<Stmt>,
        /// Statements run otherwise.
        otherwise: Option<Vec<Stmt>>,
    },
    /// `while (cond) body`.
    While {
        /// The loop condition.
        cond: Expr,
        /// The loop body.
        body: Vec<Stmt>,
    },
    /// A braced block.
    Block(Vec<Stmt>),
    /// A lone `;`.
    Empty,
}

/// A function declaration or expression.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    /// The function name, if any.
    pub name: Option<String>,
    /// Parameter names.
    pub params: Vec<String>,
    /// The body statements.
    pub body: Vec<Stmt>,
    /// Span of the body, braces included.
    pub body_span: Span,
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A numeric literal.
    Number(f64),
    /// A string literal, escapes decoded.
    Str(String),
    /// `true` or `false`.
    Bool(bool),
    /// `null`.
    Null,
    /// `undefined`.
    Undefined,
    /// `this`.
    This,
    /// A name reference.
    Ident(String),
    /// `[a, b, ...]`.
    Array(Vec<Expr>),
    /// `{ key: value, ... }`.
    Object(Vec<(String, Expr)>),
    /// A function expression.
    Function(Box<FunctionDecl>),
    /// A prefix operator.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        operand: Box<Expr>,
    },
    /// An arithmetic or comparison operator.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// A short-circuiting operator.
    Logical {
        /// The operator.
        op: LogicalOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Assignment to a name, member, or index.
    Assign {
        /// The assignment target.
        target: Box<Expr>,
        /// The assigned value.
        value: Box<Expr>,
    },
    /// `object.property`.
    Member {
        /// The object expression.
        object: Box<Expr>,
        /// The property name.
        property: String,
    },
    /// `object[index]`.
    Index {
        /// The object expression.
        object: Box<Expr>,
        /// The index expression.
        index: Box<Expr>,
    },
    /// `callee(args...)`.
    Call {
        /// The callee expression.
        callee: Box<Expr>,
        /// The arguments.
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Returns `true` if the expression can be assigned to.
    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }
        )
    }
}

/// Prefix operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `+x`
    Plus,
    /// `!x`
    Not,
    /// `typeof x`
    Typeof,
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `===`
    StrictEq,
    /// `!==`
    StrictNotEq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Short-circuiting operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    /// `&&`
    And,
    /// `||`
    Or,
}
