//! Expression definitions for the AST

use super::*;
use std::fmt;

/// Expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Binary operation: left op right
    Binary {
        op: BinaryOp,
        left: Box<Node<Expr>>,
        right: Box<Node<Expr>>,
    },

    /// Unary operation (also covers pre/post increment and decrement)
    Unary {
        op: UnaryOp,
        expr: Box<Node<Expr>>,
    },

    /// Assignment: target op value
    Assign {
        op: AssignOp,
        target: Box<Node<Expr>>,
        value: Box<Node<Expr>>,
    },

    /// Ternary/conditional: condition ? then_expr : else_expr
    Conditional {
        condition: Box<Node<Expr>>,
        then_expr: Box<Node<Expr>>,
        else_expr: Box<Node<Expr>>,
    },

    /// Property access: object.key and object[key] share one node; the key
    /// of a dotted access is a string literal expression
    Property {
        object: Box<Node<Expr>>,
        key: Box<Node<Expr>>,
    },

    /// Function call: callee(args)
    Call {
        callee: Box<Node<Expr>>,
        args: Vec<Node<Expr>>,
    },

    /// New expression: new callee(args)
    CallNew {
        callee: Box<Node<Expr>>,
        args: Vec<Node<Expr>>,
    },

    /// Regular expression literal: /pattern/flags
    Regex { pattern: String, flags: String },

    /// Function expression, including named function expressions
    Function(Box<FunctionLiteral>),

    /// This expression
    This,

    /// Identifier reference
    Ident(Ident),

    /// Null literal
    Null,

    /// Boolean literal
    Bool(bool),

    /// Number literal; the verbatim source text is preserved so the emitter
    /// can reproduce the exact literal
    Number { value: f64, text: String },

    /// String literal
    Str(String),

    /// Array literal: [elem1, elem2, ...]
    Array(Vec<Node<Expr>>),

    /// Object literal: { key1: value1, get p() {}, ... }
    Object(Vec<ObjectProperty>),

    /// No value; elided array elements
    Nothing,
}

/// Object literal member
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectProperty {
    /// key: value
    Data {
        key: Node<Expr>,
        value: Node<Expr>,
    },

    /// get name() { ... }
    Getter {
        name: Ident,
        function: Node<Expr>,
    },

    /// set name(v) { ... }
    Setter {
        name: Ident,
        function: Node<Expr>,
    },
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Comma,

    // Arithmetic
    Mul,
    Div,
    Mod,
    Add,
    Sub,

    // Shifts
    Ls,
    Rss,
    Rus,

    // Relational
    Lt,
    Gt,
    Lte,
    Gte,
    In,
    InstanceOf,

    // Equality
    Eq,
    Neq,
    StrictEq,
    StrictNeq,

    // Bitwise
    BitAnd,
    BitXor,
    BitOr,

    // Logical (short-circuiting)
    LogAnd,
    LogOr,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Comma => ",",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Ls => "<<",
            BinaryOp::Rss => ">>",
            BinaryOp::Rus => ">>>",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Lte => "<=",
            BinaryOp::Gte => ">=",
            BinaryOp::In => "in",
            BinaryOp::InstanceOf => "instanceof",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::StrictEq => "===",
            BinaryOp::StrictNeq => "!==",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitXor => "^",
            BinaryOp::BitOr => "|",
            BinaryOp::LogAnd => "&&",
            BinaryOp::LogOr => "||",
        };
        write!(f, "{}", s)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Delete,
    Void,
    Typeof,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
    Plus,
    Minus,
    BitNot,
    LogNot,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnaryOp::Delete => "delete",
            UnaryOp::Void => "void",
            UnaryOp::Typeof => "typeof",
            UnaryOp::PreInc | UnaryOp::PostInc => "++",
            UnaryOp::PreDec | UnaryOp::PostDec => "--",
            UnaryOp::Plus => "+",
            UnaryOp::Minus => "-",
            UnaryOp::BitNot => "~",
            UnaryOp::LogNot => "!",
        };
        write!(f, "{}", s)
    }
}

/// Assignment operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    LsAssign,
    RssAssign,
    RusAssign,
    BitAndAssign,
    BitOrAssign,
    BitXorAssign,
}

impl fmt::Display for AssignOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssignOp::Assign => "=",
            AssignOp::AddAssign => "+=",
            AssignOp::SubAssign => "-=",
            AssignOp::MulAssign => "*=",
            AssignOp::DivAssign => "/=",
            AssignOp::ModAssign => "%=",
            AssignOp::LsAssign => "<<=",
            AssignOp::RssAssign => ">>=",
            AssignOp::RusAssign => ">>>=",
            AssignOp::BitAndAssign => "&=",
            AssignOp::BitOrAssign => "|=",
            AssignOp::BitXorAssign => "^=",
        };
        write!(f, "{}", s)
    }
}
