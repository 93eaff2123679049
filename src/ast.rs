//! Abstract syntax tree nodes for the 1eft language.
//!
//! Nodes are built once by the constructor and only read afterwards; every
//! node carries the position it was parsed at.

use std::fmt;

/// 1-based source position. Synthesized nodes sit at `1:1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

impl Pos {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl Default for Pos {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A variable or function name.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub kind: TypeKind,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Void,
    // signed 64-bit integer
    Decimal,
    Boolean,
    Char,
    // `str`, spelled-out sugar for `char#`
    StrPtr,
    PointerOf(Box<Type>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub kind: ExprKind,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    DecimalLiteral(i64),
    StringLiteral(String),
    BooleanLiteral(bool),
    // read of a named variable
    Identifier(Ident),
    // storage address of a named variable
    AddressOf(Ident),
    Deref(Box<Expression>),
    Exec { callee: Ident, args: Vec<Expression> },
    // logical not
    Rev(Box<Expression>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
}

/// Every binary operator, one per source symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Equals,
    RevEquals,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            BinaryOp::LessThan
                | BinaryOp::LessThanEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanEqual
        )
    }

    pub fn is_equality(self) -> bool {
        matches!(self, BinaryOp::Equals | BinaryOp::RevEquals)
    }
}

impl Expression {
    pub fn new(kind: ExprKind, pos: Pos) -> Self {
        Self { kind, pos }
    }

    pub fn binary(op: BinaryOp, lhs: Expression, rhs: Expression, pos: Pos) -> Self {
        Self::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            pos,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StmtKind,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `ret`, with a value unless the function returns `v@1d`.
    Return(Option<Expression>),
    Expression(Expression),
    NoOp,
    VarDecl { ty: Type, name: Ident },
    VarAss { target: AssignTarget, value: Expression },
    If(IfStatement),
    /// Pre-tested loop: runs `body` while `condition` holds.
    As { condition: Expression, body: Block },
}

/// Left-hand side of an assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Name(Ident),
    // `# ptr = value`, stores through the pointer value
    Deref { pointer: Expression, pos: Pos },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStatement {
    pub condition: Expression,
    pub body: Block,
    pub else_ifs: Vec<ElseIf>,
    pub else_body: Option<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElseIf {
    pub condition: Expression,
    pub body: Block,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub ty: Type,
    pub name: Ident,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub return_type: Type,
    pub name: Ident,
    pub params: Vec<Param>,
    pub body: Block,
    pub pos: Pos,
}

/// Top-level container for a parsed 1eft program.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub functions: Vec<FunctionDef>,
    pub pos: Pos,
}
