//! Function literal definition

use super::*;

/// Whether a function literal appeared in declaration or expression position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Declaration,
    Expression,
}

/// Function literal
///
/// The parser decides `is_strict` from the directive prologue; inner
/// functions inherit the flag from their enclosing function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLiteral {
    pub kind: FunctionKind,
    pub name: Option<Node<Ident>>,
    pub params: Vec<Node<Ident>>,
    pub body: Vec<Node<Stmt>>,
    pub is_strict: bool,
    pub span: Span,
}

impl FunctionLiteral {
    pub fn name_str(&self) -> &str {
        self.name.as_ref().map(|n| n.value.name.as_str()).unwrap_or("")
    }
}
